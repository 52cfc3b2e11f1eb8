use std::path::PathBuf;
use thiserror::Error;

/// Process exit codes surfaced to orchestration scripts
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const ACQUIRE_OPT_FAIL: i32 = 1;
    pub const FAIL_XDP: i32 = 2;
    pub const FAIL: i32 = 3;
    pub const FAIL_BPF: i32 = 4;
}

#[derive(Error, Debug)]
pub enum XdpctlError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unknown interface {name}: {source}")]
    InterfaceNotFound {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open BPF object {path}: {reason}")]
    ObjectOpenFailed { path: PathBuf, reason: String },

    #[error("Program section {section:?} not found in {path} (available: {available:?})")]
    ProgramNotFound {
        path: PathBuf,
        section: String,
        available: Vec<String>,
    },

    #[error("BPF object {0} declares no programs")]
    NoPrograms(PathBuf),

    #[error("Verifier rejected program {program}: {reason}\n{log}")]
    VerifierRejected {
        program: String,
        reason: String,
        log: String,
    },

    #[error("Failed to load BPF object: {0}")]
    ProgramLoadFailed(String),

    #[error("Pinned map {path} is missing: {source}")]
    PinnedMapMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to rebind map {map}: {reason}")]
    RebindFailed { map: String, reason: String },

    #[error("Map {map}: {field} mismatch, expected {expected}, found {found}")]
    ShapeMismatch {
        map: String,
        field: &'static str,
        expected: u32,
        found: u32,
    },

    #[error("Map {0} not found in loaded object")]
    MapNotFound(String),

    #[error("Failed to pin map at {path}: {source}")]
    PinFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to unpin map at {path}: {source}")]
    UnpinFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("XDP program already attached to ifindex {ifindex}: {source}")]
    AttachRejected {
        ifindex: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("XDP mode not supported on ifindex {ifindex}: {source}")]
    AttachUnsupported {
        ifindex: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to attach XDP program to ifindex {ifindex}: {source}")]
    AttachFailed {
        ifindex: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to query XDP program on ifindex {ifindex}: {source}")]
    QueryFailed {
        ifindex: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Attached program id {current} does not match expected {expected}, not removing")]
    IdMismatch { expected: u32, current: u32 },

    #[error("Failed to detach XDP program from ifindex {ifindex}: {source}")]
    DetachFailed {
        ifindex: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported counter map type {0}")]
    UnsupportedMapType(u32),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl XdpctlError {
    /// Exit status reported by the binary for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            XdpctlError::ConfigError(_) | XdpctlError::InterfaceNotFound { .. } => {
                exit_code::ACQUIRE_OPT_FAIL
            }
            XdpctlError::AttachRejected { .. }
            | XdpctlError::AttachUnsupported { .. }
            | XdpctlError::AttachFailed { .. }
            | XdpctlError::QueryFailed { .. }
            | XdpctlError::DetachFailed { .. } => exit_code::FAIL_XDP,
            XdpctlError::ObjectOpenFailed { .. }
            | XdpctlError::ProgramNotFound { .. }
            | XdpctlError::NoPrograms(_)
            | XdpctlError::VerifierRejected { .. }
            | XdpctlError::ProgramLoadFailed(_)
            | XdpctlError::PinnedMapMissing { .. }
            | XdpctlError::RebindFailed { .. }
            | XdpctlError::MapNotFound(_)
            | XdpctlError::PinFailed { .. }
            | XdpctlError::UnpinFailed { .. } => exit_code::FAIL_BPF,
            XdpctlError::IdMismatch { .. }
            | XdpctlError::ShapeMismatch { .. }
            | XdpctlError::UnsupportedMapType(_)
            | XdpctlError::IoError(_) => exit_code::FAIL,
        }
    }
}

pub type Result<T> = std::result::Result<T, XdpctlError>;
