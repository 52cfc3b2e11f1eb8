//! Shared types between the XDP stats program (kernel) and userspace
//!
//! The counter table is an array indexed by XDP action code. Each slot holds
//! a [`DataRec`], which must be:
//! - `#[repr(C)]` for stable memory layout
//! - `no_std` compatible for eBPF
//! - identical on both sides of the map

#![cfg_attr(not(feature = "userspace"), no_std)]

/// Per-action counter record stored in the stats map
///
/// Layout (8 bytes total, 8-byte aligned):
/// - rx_packets: packets that returned this action
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "userspace", derive(PartialEq, Eq))]
pub struct DataRec {
    pub rx_packets: u64,
}

/// Outcome codes returned by an XDP program
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum XdpAction {
    Aborted = 0,
    Drop = 1,
    Pass = 2,
    Tx = 3,
    Redirect = 4,
    /// Slot reserved for return codes outside the kernel's known set
    Unknown = 5,
}

/// Number of slots in the stats map (one per [`XdpAction`])
pub const ACTION_MAX: u32 = XdpAction::Unknown as u32 + 1;

impl XdpAction {
    pub const ALL: [XdpAction; ACTION_MAX as usize] = [
        XdpAction::Aborted,
        XdpAction::Drop,
        XdpAction::Pass,
        XdpAction::Tx,
        XdpAction::Redirect,
        XdpAction::Unknown,
    ];

    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(XdpAction::Aborted),
            1 => Some(XdpAction::Drop),
            2 => Some(XdpAction::Pass),
            3 => Some(XdpAction::Tx),
            4 => Some(XdpAction::Redirect),
            5 => Some(XdpAction::Unknown),
            _ => None,
        }
    }

    pub const fn code(self) -> u32 {
        self as u32
    }

    pub const fn label(self) -> &'static str {
        match self {
            XdpAction::Aborted => "XDP_ABORTED",
            XdpAction::Drop => "XDP_DROP",
            XdpAction::Pass => "XDP_PASS",
            XdpAction::Tx => "XDP_TX",
            XdpAction::Redirect => "XDP_REDIRECT",
            XdpAction::Unknown => "XDP_UNKNOWN",
        }
    }
}

/// Label for a raw action code, `None` for codes outside the table
pub const fn action_label(code: u32) -> Option<&'static str> {
    match XdpAction::from_code(code) {
        Some(action) => Some(action.label()),
        None => None,
    }
}

/// Stats map constants
pub mod stats_map {
    /// Default name of the counter table declared by the stats program
    pub const NAME: &str = "xdp_stat_map";
    /// Key is a `u32` action code
    pub const KEY_SIZE: u32 = 4;
    /// Value is one [`crate::DataRec`]
    pub const VALUE_SIZE: u32 = core::mem::size_of::<crate::DataRec>() as u32;
    pub const MAX_ENTRIES: u32 = crate::ACTION_MAX;
}

#[cfg(feature = "userspace")]
const _: () = {
    assert!(
        core::mem::size_of::<DataRec>() == 8,
        "DataRec must be exactly 8 bytes"
    );
    assert!(
        core::mem::align_of::<DataRec>() == 8,
        "DataRec must be 8-byte aligned"
    );
};

// Typed map access in the loader (`aya::maps::Array<_, DataRec>`)
#[cfg(all(feature = "userspace", target_os = "linux"))]
mod user_impls {
    use super::DataRec;

    // SAFETY: repr(C), a single u64 field, no padding
    unsafe impl aya::Pod for DataRec {}
}
