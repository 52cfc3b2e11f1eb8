pub mod cli;
pub mod config;
pub mod ebpf;
pub mod error;
pub mod metrics;

pub use config::{Config, XdpFlags};
pub use error::{Result, XdpctlError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
