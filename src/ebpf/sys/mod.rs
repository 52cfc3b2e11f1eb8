//! Linux kernel backends for the loader traits

pub mod counters;
pub mod netlink;
pub mod object;

use super::maps::MapHandle;
use super::MapStore;
use aya::maps::{MapData, MapError};
use aya::pin::PinError;
use std::io;
use std::os::fd::AsFd;
use std::path::Path;

pub use counters::CounterMap;
pub use netlink::NetlinkXdp;
pub use object::{AyaObject, AyaObjectOpener};

/// Keep the errno of a failed map syscall
pub(crate) fn map_io_error(err: MapError) -> io::Error {
    match err {
        MapError::SyscallError(err) => err.io_error,
        other => io::Error::other(other),
    }
}

fn pin_io_error(err: PinError) -> io::Error {
    match err {
        PinError::SyscallError(err) => err.io_error,
        other => io::Error::other(other),
    }
}

/// Maps pinned on a bpffs mount
#[derive(Debug, Default, Clone, Copy)]
pub struct BpfFsStore;

impl MapStore for BpfFsStore {
    fn pin(&self, map: &MapHandle, path: &Path) -> io::Result<()> {
        match map.map_data() {
            Some(data) => data.pin(path).map_err(pin_io_error),
            None => {
                let data = MapData::from_fd(map.as_fd().try_clone_to_owned()?)
                    .map_err(map_io_error)?;
                data.pin(path).map_err(pin_io_error)
            }
        }
    }

    fn open_pinned(&self, path: &Path) -> io::Result<MapHandle> {
        let data = MapData::from_pin(path).map_err(map_io_error)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(MapHandle::from_map_data(name, data)
            .map_err(map_io_error)?
            .with_pinned_at(path))
    }
}
