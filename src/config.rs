//! Loader configuration
//!
//! A [`Config`] is built once from the command line and never mutated
//! afterwards. Interface resolution happens while building it, so every
//! later stage can rely on a valid ifindex.

use crate::{Result, XdpctlError};
use std::ffi::CString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum interface name length including the trailing NUL
const IF_NAMESIZE: usize = 16;

pub const DEFAULT_OBJECT: &str = "xdp_prog_kern.o";
pub const DEFAULT_PIN_BASEDIR: &str = "/sys/fs/bpf";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// XDP attach flags as understood by the kernel (`XDP_FLAGS_*`)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct XdpFlags(u32);

impl XdpFlags {
    pub const UPDATE_IF_NOEXIST: XdpFlags = XdpFlags(1 << 0);
    pub const SKB_MODE: XdpFlags = XdpFlags(1 << 1);
    pub const DRV_MODE: XdpFlags = XdpFlags(1 << 2);
    pub const HW_MODE: XdpFlags = XdpFlags(1 << 3);
    pub const REPLACE: XdpFlags = XdpFlags(1 << 4);
    pub const MODES: XdpFlags = XdpFlags(Self::SKB_MODE.0 | Self::DRV_MODE.0 | Self::HW_MODE.0);

    pub const fn empty() -> Self {
        XdpFlags(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        XdpFlags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: XdpFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: XdpFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: XdpFlags) -> Self {
        XdpFlags(self.0 | other.0)
    }

    pub const fn difference(self, other: XdpFlags) -> Self {
        XdpFlags(self.0 & !other.0)
    }

    /// Replace the mode bits with `mode`, leaving every other bit untouched
    pub const fn with_mode(self, mode: XdpFlags) -> Self {
        XdpFlags((self.0 & !Self::MODES.0) | (mode.0 & Self::MODES.0))
    }

    /// Mode bits currently set
    pub const fn mode(self) -> XdpFlags {
        XdpFlags(self.0 & Self::MODES.0)
    }

    /// Flags addressing the other software mode (skb <-> driver)
    ///
    /// Returns `None` for hardware offload, which has no software
    /// counterpart to clear.
    pub const fn opposite_software_mode(self) -> Option<XdpFlags> {
        if self.intersects(Self::HW_MODE) {
            None
        } else if self.intersects(Self::SKB_MODE) {
            Some(self.with_mode(Self::DRV_MODE))
        } else {
            Some(self.with_mode(Self::SKB_MODE))
        }
    }

    pub fn mode_name(self) -> &'static str {
        if self.intersects(Self::HW_MODE) {
            "offload"
        } else if self.intersects(Self::SKB_MODE) {
            "skb"
        } else if self.intersects(Self::DRV_MODE) {
            "native"
        } else {
            "auto"
        }
    }
}

impl std::ops::BitOr for XdpFlags {
    type Output = XdpFlags;

    fn bitor(self, rhs: XdpFlags) -> XdpFlags {
        self.union(rhs)
    }
}

impl fmt::Debug for XdpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "XdpFlags({:#x}, {})", self.0, self.mode_name())
    }
}

/// A network interface resolved to its kernel index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub index: u32,
}

impl Interface {
    /// Resolve an interface name with `if_nametoindex`
    pub fn resolve(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(XdpctlError::ConfigError(
                "interface name is empty".to_string(),
            ));
        }
        if name.len() >= IF_NAMESIZE {
            return Err(XdpctlError::ConfigError(format!(
                "interface name {} too long (max {} bytes)",
                name,
                IF_NAMESIZE - 1
            )));
        }

        let c_name = CString::new(name).map_err(|_| {
            XdpctlError::ConfigError(format!("interface name {:?} contains NUL", name))
        })?;

        // SAFETY: c_name is a valid NUL-terminated string for the duration of the call
        let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
        if index == 0 {
            return Err(XdpctlError::InterfaceNotFound {
                name: name.to_string(),
                source: std::io::Error::last_os_error(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            index,
        })
    }
}

/// Telemetry output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown format {} (expected text or json)", other)),
        }
    }
}

/// What the loader does once the configuration is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Load, attach and optionally pin/poll
    Load,
    /// Detach whatever (or the expected program) is bound
    Unload,
    /// Poll an already pinned counter map
    StatsOnly,
}

#[derive(Debug, Clone)]
pub struct StatsConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub format: OutputFormat,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: DEFAULT_INTERVAL,
            format: OutputFormat::Text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub interface: Interface,
    pub action: Action,
    pub object_path: PathBuf,
    pub program_section: Option<String>,
    pub xdp_flags: XdpFlags,
    pub pin_basedir: PathBuf,
    pub map_name: String,
    pub reuse_maps: bool,
    pub need_pin: bool,
    pub expected_prog_id: u32,
    pub stats: StatsConfig,
}

impl Config {
    /// Default flags: refuse to replace an existing program, driver mode
    pub const DEFAULT_FLAGS: XdpFlags = XdpFlags::UPDATE_IF_NOEXIST.union(XdpFlags::DRV_MODE);

    pub fn new(interface: Interface) -> Self {
        Self {
            interface,
            action: Action::Load,
            object_path: PathBuf::from(DEFAULT_OBJECT),
            program_section: None,
            xdp_flags: Self::DEFAULT_FLAGS,
            pin_basedir: PathBuf::from(DEFAULT_PIN_BASEDIR),
            map_name: xdpctl_common::stats_map::NAME.to_string(),
            reuse_maps: false,
            need_pin: false,
            expected_prog_id: 0,
            stats: StatsConfig::default(),
        }
    }

    /// Directory holding this interface's pinned maps
    pub fn pin_dir(&self) -> PathBuf {
        pin_dir(&self.pin_basedir, &self.interface.name)
    }
}

/// `base/ifname`
pub fn pin_dir(base: &Path, ifname: &str) -> PathBuf {
    base.join(ifname)
}

/// `base/ifname/map`
pub fn pin_path(base: &Path, ifname: &str, map_name: &str) -> PathBuf {
    pin_dir(base, ifname).join(map_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opposite_software_mode() {
        let skb = XdpFlags::UPDATE_IF_NOEXIST | XdpFlags::SKB_MODE;
        let toggled = skb.opposite_software_mode().expect("skb has a software opposite");
        assert_eq!(toggled, XdpFlags::UPDATE_IF_NOEXIST | XdpFlags::DRV_MODE);

        let drv = XdpFlags::DRV_MODE;
        assert_eq!(drv.opposite_software_mode(), Some(XdpFlags::SKB_MODE));

        // No explicit mode behaves like driver mode
        assert_eq!(
            XdpFlags::empty().opposite_software_mode(),
            Some(XdpFlags::SKB_MODE)
        );

        assert_eq!(XdpFlags::HW_MODE.opposite_software_mode(), None);
    }

    #[test]
    fn test_with_mode_keeps_other_bits() {
        let flags = XdpFlags::REPLACE | XdpFlags::UPDATE_IF_NOEXIST | XdpFlags::DRV_MODE;
        let skb = flags.with_mode(XdpFlags::SKB_MODE);
        assert!(skb.contains(XdpFlags::REPLACE));
        assert!(skb.contains(XdpFlags::UPDATE_IF_NOEXIST));
        assert_eq!(skb.mode(), XdpFlags::SKB_MODE);
    }

    #[test]
    fn test_pin_paths() {
        let base = Path::new("/sys/fs/bpf");
        assert_eq!(pin_dir(base, "eth0"), PathBuf::from("/sys/fs/bpf/eth0"));
        assert_eq!(
            pin_path(base, "eth0", "xdp_stat_map"),
            PathBuf::from("/sys/fs/bpf/eth0/xdp_stat_map")
        );
    }

    #[test]
    fn test_resolve_rejects_long_name() {
        let err = Interface::resolve("a-very-long-interface-name").unwrap_err();
        assert!(matches!(err, XdpctlError::ConfigError(_)));
    }

    #[test]
    fn test_resolve_loopback() {
        let lo = Interface::resolve("lo").expect("loopback exists");
        assert!(lo.index > 0);
    }

    #[test]
    fn test_resolve_unknown_interface() {
        let err = Interface::resolve("nosuchif0").unwrap_err();
        assert!(matches!(err, XdpctlError::InterfaceNotFound { .. }));
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }
}
