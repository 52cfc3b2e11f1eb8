use anyhow::Result;
use std::process;
use xdpctl::error::exit_code;

#[cfg(not(target_os = "linux"))]
fn main() -> Result<()> {
    eprintln!("Error: xdpctl requires Linux to load XDP programs");
    process::exit(exit_code::FAIL);
}

/// Exit status for an error chain, generic failure unless a typed error is inside
#[cfg(target_os = "linux")]
fn status_of(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<xdpctl::XdpctlError>()
        .map(|e| e.exit_code())
        .unwrap_or(exit_code::FAIL)
}

#[cfg(target_os = "linux")]
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    use anyhow::Context;
    use clap::Parser;
    use tracing::{error, info};
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    use xdpctl::cli::Cli;

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                exit_code::ACQUIRE_OPT_FAIL
            } else {
                exit_code::OK
            };
            let _ = e.print();
            process::exit(code);
        }
    };

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Starting xdpctl v{}", xdpctl::VERSION);

    let result = async {
        let config = cli.into_config().context("Failed to acquire options")?;
        let ifname = config.interface.name.clone();
        xdpctl::cli::commands::run(config)
            .await
            .with_context(|| format!("xdpctl failed on {}", ifname))?;
        anyhow::Ok(())
    }
    .await;

    if let Err(e) = result {
        error!("{:#}", e);
        process::exit(status_of(&e));
    }

    Ok(())
}
