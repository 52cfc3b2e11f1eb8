//! Binding and unbinding XDP programs on an interface
//!
//! The kernel refuses to enable a program in one mode while the other
//! software mode is still bound on the same interface. When that happens
//! (and the caller did not ask for update-if-none-exists semantics) the
//! controller clears the stale binding once and retries.

use super::{ProgramHandle, XdpLink};
use crate::config::XdpFlags;
use crate::{Result, XdpctlError};
use std::io;
use std::os::fd::AsFd;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    /// Attached after clearing a binding in the opposite mode
    AttachedAfterFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachOutcome {
    NothingAttached,
    Detached { prog_id: u32 },
}

pub struct AttachController<L> {
    link: L,
}

impl<L: XdpLink> AttachController<L> {
    pub fn new(link: L) -> Self {
        Self { link }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }

    /// Attach `program` to `ifindex` with `flags`
    pub fn attach(
        &mut self,
        ifindex: u32,
        program: &ProgramHandle,
        flags: XdpFlags,
    ) -> Result<AttachOutcome> {
        let fd = program.as_fd();

        let err = match self.link.set_xdp_fd(ifindex, Some(fd), flags) {
            Ok(()) => {
                info!(
                    "Attached XDP program id {} to ifindex {} ({} mode)",
                    program.id(),
                    ifindex,
                    flags.mode_name()
                );
                return Ok(AttachOutcome::Attached);
            }
            Err(err) => err,
        };

        if err.raw_os_error() != Some(libc::EEXIST)
            || flags.contains(XdpFlags::UPDATE_IF_NOEXIST)
        {
            return Err(attach_error(ifindex, err));
        }

        let Some(clear_flags) = flags.opposite_software_mode() else {
            return Err(attach_error(ifindex, err));
        };

        warn!(
            "ifindex {} already bound in {} mode, clearing it before retrying",
            ifindex,
            clear_flags.mode_name()
        );

        self.link
            .set_xdp_fd(ifindex, None, clear_flags)
            .map_err(|e| attach_error(ifindex, e))?;

        self.link
            .set_xdp_fd(ifindex, Some(fd), flags)
            .map_err(|e| attach_error(ifindex, e))?;

        info!(
            "Attached XDP program id {} to ifindex {} ({} mode) after clearing {} mode",
            program.id(),
            ifindex,
            flags.mode_name(),
            clear_flags.mode_name()
        );
        Ok(AttachOutcome::AttachedAfterFallback)
    }

    /// Detach the program bound on `ifindex`
    ///
    /// With a non-zero `expected_id` only that program is removed; any other
    /// program is left in place and the call fails.
    pub fn detach(
        &mut self,
        ifindex: u32,
        flags: XdpFlags,
        expected_id: u32,
    ) -> Result<DetachOutcome> {
        // update-if-none-exists makes the kernel refuse to clear a bound program
        let flags = flags.difference(XdpFlags::UPDATE_IF_NOEXIST);

        let current = self.attached_id(ifindex, flags)?;
        if current == 0 {
            info!("No XDP program on ifindex {}, nothing to detach", ifindex);
            return Ok(DetachOutcome::NothingAttached);
        }

        if expected_id != 0 && current != expected_id {
            error!(
                "Expected program id {} but ifindex {} runs {}, not removing",
                expected_id, ifindex, current
            );
            return Err(XdpctlError::IdMismatch {
                expected: expected_id,
                current,
            });
        }

        self.link
            .set_xdp_fd(ifindex, None, flags)
            .map_err(|source| XdpctlError::DetachFailed { ifindex, source })?;

        info!("Removed XDP program id {} from ifindex {}", current, ifindex);
        Ok(DetachOutcome::Detached { prog_id: current })
    }

    /// Id of the program currently bound, 0 if none
    pub fn attached_id(&mut self, ifindex: u32, flags: XdpFlags) -> Result<u32> {
        self.link
            .query_xdp_id(ifindex, flags)
            .map_err(|source| XdpctlError::QueryFailed { ifindex, source })
    }
}

fn attach_error(ifindex: u32, source: io::Error) -> XdpctlError {
    match source.raw_os_error() {
        Some(libc::EEXIST) | Some(libc::EBUSY) => {
            warn!("Hint: XDP program already loaded on ifindex {}", ifindex);
            XdpctlError::AttachRejected { ifindex, source }
        }
        Some(libc::EOPNOTSUPP) => {
            warn!("Hint: requested XDP mode not supported on ifindex {}", ifindex);
            XdpctlError::AttachUnsupported { ifindex, source }
        }
        _ => XdpctlError::AttachFailed { ifindex, source },
    }
}
