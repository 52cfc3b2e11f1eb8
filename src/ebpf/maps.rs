use crate::{Result, XdpctlError};
use std::fmt;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};

/// Kernel map type tags (`BPF_MAP_TYPE_*`) the loader cares about
pub mod map_type {
    pub const HASH: u32 = 1;
    pub const ARRAY: u32 = 2;
    pub const PERCPU_HASH: u32 = 5;
    pub const PERCPU_ARRAY: u32 = 6;
}

/// Shape of a map as reported by the kernel or declared in an object
///
/// In an *expected* shape a zero field means "don't check".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapShape {
    pub map_type: u32,
    pub key_size: u32,
    pub value_size: u32,
    pub max_entries: u32,
}

impl MapShape {
    pub const fn new(map_type: u32, key_size: u32, value_size: u32, max_entries: u32) -> Self {
        Self {
            map_type,
            key_size,
            value_size,
            max_entries,
        }
    }

    /// Shape of the stats counter table; type is left open so both plain
    /// and per-CPU arrays are accepted
    pub const fn stats_table() -> Self {
        use xdpctl_common::stats_map;
        Self::new(
            0,
            stats_map::KEY_SIZE,
            stats_map::VALUE_SIZE,
            stats_map::MAX_ENTRIES,
        )
    }

    /// Check `self` (what was found) against `expected`
    pub fn verify(&self, map: &str, expected: &MapShape) -> Result<()> {
        let checks = [
            ("key size", expected.key_size, self.key_size),
            ("value size", expected.value_size, self.value_size),
            ("max entries", expected.max_entries, self.max_entries),
            ("map type", expected.map_type, self.map_type),
        ];

        for (field, expected, found) in checks {
            if expected != 0 && expected != found {
                return Err(XdpctlError::ShapeMismatch {
                    map: map.to_string(),
                    field,
                    expected,
                    found,
                });
            }
        }

        Ok(())
    }
}

impl fmt::Display for MapShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type={} key={} value={} max_entries={}",
            self.map_type, self.key_size, self.value_size, self.max_entries
        )
    }
}

/// Kernel object behind a [`MapHandle`]
#[derive(Debug)]
enum Backing {
    #[cfg(target_os = "linux")]
    Aya(aya::maps::MapData),
    Fd(OwnedFd),
}

/// Owned reference to a kernel map
///
/// The descriptor is closed when the handle is dropped.
#[derive(Debug)]
pub struct MapHandle {
    name: String,
    id: u32,
    shape: MapShape,
    backing: Backing,
    pinned_at: Option<PathBuf>,
}

impl MapHandle {
    pub fn new(name: impl Into<String>, fd: OwnedFd, id: u32, shape: MapShape) -> Self {
        Self {
            name: name.into(),
            id,
            shape,
            backing: Backing::Fd(fd),
            pinned_at: None,
        }
    }

    /// Record the bpffs path this handle was opened from
    pub fn with_pinned_at(mut self, path: impl Into<PathBuf>) -> Self {
        self.pinned_at = Some(path.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kernel map id
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn shape(&self) -> &MapShape {
        &self.shape
    }

    pub fn pinned_at(&self) -> Option<&Path> {
        self.pinned_at.as_deref()
    }
}

#[cfg(target_os = "linux")]
impl MapHandle {
    /// Wrap a map aya loaded or opened; id and shape come from the kernel
    pub fn from_map_data(
        name: impl Into<String>,
        data: aya::maps::MapData,
    ) -> std::result::Result<Self, aya::maps::MapError> {
        let info = data.info()?;
        let shape = MapShape::new(
            info.map_type()? as u32,
            info.key_size(),
            info.value_size(),
            info.max_entries(),
        );

        Ok(Self {
            name: name.into(),
            id: info.id(),
            shape,
            backing: Backing::Aya(data),
            pinned_at: None,
        })
    }

    pub fn map_data(&self) -> Option<&aya::maps::MapData> {
        match &self.backing {
            Backing::Aya(data) => Some(data),
            Backing::Fd(_) => None,
        }
    }

    /// Hand the map over to aya, adopting a bare descriptor if needed
    pub fn into_map_data(self) -> std::result::Result<aya::maps::MapData, aya::maps::MapError> {
        match self.backing {
            Backing::Aya(data) => Ok(data),
            Backing::Fd(fd) => aya::maps::MapData::from_fd(fd),
        }
    }
}

impl AsFd for MapHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match &self.backing {
            #[cfg(target_os = "linux")]
            Backing::Aya(data) => data.fd().as_fd(),
            Backing::Fd(fd) => fd.as_fd(),
        }
    }
}
