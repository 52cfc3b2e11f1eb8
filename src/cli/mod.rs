pub mod commands;

use crate::config::{
    Action, Config, Interface, OutputFormat, StatsConfig, XdpFlags, DEFAULT_INTERVAL,
    DEFAULT_OBJECT, DEFAULT_PIN_BASEDIR,
};
use crate::{Result, XdpctlError};
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "xdpctl")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Load, attach and monitor an XDP program", long_about = None)]
#[command(group(ArgGroup::new("mode").args(["skb_mode", "native_mode", "offload_mode"])))]
#[command(group(ArgGroup::new("op").args(["unload", "stats_only"])))]
pub struct Cli {
    #[arg(short, long, value_name = "IFNAME", help = "Operate on device <ifname>")]
    pub dev: String,

    #[arg(short = 'U', long, help = "Unload XDP program instead of loading")]
    pub unload: bool,

    #[arg(
        long,
        value_name = "ID",
        default_value_t = 0,
        requires = "unload",
        help = "Only unload if the attached program has this id (0 = any)"
    )]
    pub id: u32,

    #[arg(short = 'S', long, help = "Install XDP program in SKB (AKA generic) mode")]
    pub skb_mode: bool,

    #[arg(short = 'N', long, help = "Install XDP program in native mode")]
    pub native_mode: bool,

    #[arg(long, help = "Install XDP program in hardware offload mode")]
    pub offload_mode: bool,

    #[arg(short = 'F', long, help = "Force install, replacing existing program on interface")]
    pub force: bool,

    #[arg(long, value_name = "FILE", default_value = DEFAULT_OBJECT, help = "Load program from <file>")]
    pub filename: PathBuf,

    #[arg(long, value_name = "SECTION", help = "Load program in <section> of the ELF file")]
    pub progsec: Option<String>,

    #[arg(long, value_name = "DIR", default_value = DEFAULT_PIN_BASEDIR, help = "Base directory for pinned maps")]
    pub pin_basedir: PathBuf,

    #[arg(long, value_name = "NAME", default_value = xdpctl_common::stats_map::NAME, help = "Counter map to verify and poll")]
    pub mapname: String,

    #[arg(short = 'M', long, help = "Reuse pinned maps")]
    pub reuse_maps: bool,

    #[arg(long, help = "Pin maps after attaching")]
    pub pin: bool,

    #[arg(long, conflicts_with = "unload", help = "Poll counters after attaching")]
    pub stats: bool,

    #[arg(long, help = "Poll counters of an already pinned map without loading")]
    pub stats_only: bool,

    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_INTERVAL.as_secs(), help = "Seconds between counter samples")]
    pub interval: u64,

    #[arg(long, value_name = "FORMAT", default_value = "text", help = "Report format (text, json)")]
    pub format: OutputFormat,

    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,
}

impl Cli {
    pub fn xdp_flags(&self) -> XdpFlags {
        let mut flags = Config::DEFAULT_FLAGS;
        if self.force {
            flags = flags.difference(XdpFlags::UPDATE_IF_NOEXIST);
        }
        if self.skb_mode {
            flags = flags.with_mode(XdpFlags::SKB_MODE);
        } else if self.offload_mode {
            flags = flags.with_mode(XdpFlags::HW_MODE);
        } else if self.native_mode {
            flags = flags.with_mode(XdpFlags::DRV_MODE);
        }
        flags
    }

    pub fn action(&self) -> Action {
        if self.unload {
            Action::Unload
        } else if self.stats_only {
            Action::StatsOnly
        } else {
            Action::Load
        }
    }

    /// Resolve the interface and build the immutable configuration
    pub fn into_config(self) -> Result<Config> {
        if self.interval == 0 {
            return Err(XdpctlError::ConfigError(
                "--interval must be at least 1 second".to_string(),
            ));
        }

        let interface = Interface::resolve(&self.dev)?;
        let action = self.action();
        let xdp_flags = self.xdp_flags();

        Ok(Config {
            interface,
            action,
            object_path: self.filename,
            program_section: self.progsec,
            xdp_flags,
            pin_basedir: self.pin_basedir,
            map_name: self.mapname,
            reuse_maps: self.reuse_maps,
            need_pin: self.pin,
            expected_prog_id: self.id,
            stats: StatsConfig {
                enabled: self.stats || self.stats_only,
                interval: Duration::from_secs(self.interval),
                format: self.format,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("xdpctl").chain(args.iter().copied()))
            .expect("valid arguments")
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["--dev", "lo"]);
        assert_eq!(cli.xdp_flags(), Config::DEFAULT_FLAGS);
        assert_eq!(cli.action(), Action::Load);
        assert_eq!(cli.filename, PathBuf::from("xdp_prog_kern.o"));
        assert_eq!(cli.mapname, "xdp_stat_map");

        let config = cli.into_config().expect("lo resolves");
        assert_eq!(config.pin_dir(), PathBuf::from("/sys/fs/bpf/lo"));
        assert!(!config.stats.enabled);
    }

    #[test]
    fn test_mode_flags() {
        let skb = parse(&["-d", "lo", "-S"]).xdp_flags();
        assert_eq!(skb, XdpFlags::UPDATE_IF_NOEXIST | XdpFlags::SKB_MODE);

        let forced = parse(&["-d", "lo", "--offload-mode", "-F"]).xdp_flags();
        assert_eq!(forced, XdpFlags::HW_MODE);
    }

    #[test]
    fn test_conflicting_modes_rejected() {
        let result = Cli::try_parse_from(["xdpctl", "-d", "lo", "-S", "-N"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_dev_required() {
        assert!(Cli::try_parse_from(["xdpctl", "-U"]).is_err());
    }

    #[test]
    fn test_unload_with_id() {
        let cli = parse(&["-d", "lo", "-U", "--id", "42"]);
        assert_eq!(cli.action(), Action::Unload);
        assert_eq!(cli.id, 42);
    }

    #[test]
    fn test_stats_only_enables_stats() {
        let config = parse(&["-d", "lo", "--stats-only", "--format", "json", "--interval", "1"])
            .into_config()
            .expect("config");
        assert_eq!(config.action, Action::StatsOnly);
        assert!(config.stats.enabled);
        assert_eq!(config.stats.format, OutputFormat::Json);
        assert_eq!(config.stats.interval, Duration::from_secs(1));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = parse(&["-d", "lo", "--interval", "0"]).into_config().unwrap_err();
        assert!(matches!(err, XdpctlError::ConfigError(_)));
    }
}
