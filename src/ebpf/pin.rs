//! Pinning maps under `base/ifname/` so later runs can reuse them

use super::maps::MapHandle;
use super::MapStore;
use crate::config::{pin_dir, pin_path};
use crate::{Result, XdpctlError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub struct MapPinner<S> {
    store: S,
    base_dir: PathBuf,
}

impl<S: MapStore> MapPinner<S> {
    pub fn new(store: S, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn pin_dir(&self, ifname: &str) -> PathBuf {
        pin_dir(&self.base_dir, ifname)
    }

    /// Replace whatever is pinned for `ifname` with `maps`
    ///
    /// Stale entries are removed first. If any pin fails, the entries pinned
    /// by this call are removed again and the failing path is reported.
    pub fn pin_maps(&self, ifname: &str, maps: &[MapHandle]) -> Result<Vec<PathBuf>> {
        let dir = self.pin_dir(ifname);

        if dir.is_dir() {
            let removed = self.unpin_all(ifname)?;
            if removed > 0 {
                info!("Unpinned {} stale maps from {}", removed, dir.display());
            }
        }

        fs::create_dir_all(&dir).map_err(|source| XdpctlError::PinFailed {
            path: dir.clone(),
            source,
        })?;

        let mut pinned = Vec::with_capacity(maps.len());
        for map in maps {
            let path = pin_path(&self.base_dir, ifname, map.name());
            if let Err(source) = self.store.pin(map, &path) {
                self.rollback(&pinned);
                return Err(XdpctlError::PinFailed { path, source });
            }
            debug!("Pinned map {} at {}", map.name(), path.display());
            pinned.push(path);
        }

        info!("Pinned {} maps under {}", pinned.len(), dir.display());
        Ok(pinned)
    }

    /// Remove every entry in the interface's pin directory
    ///
    /// Returns the number of entries removed; a missing directory counts as
    /// empty. Stops at the first entry that can't be removed.
    pub fn unpin_all(&self, ifname: &str) -> Result<usize> {
        let dir = self.pin_dir(ifname);

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(source) => return Err(XdpctlError::UnpinFailed { path: dir, source }),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| XdpctlError::UnpinFailed {
                path: dir.clone(),
                source,
            })?;
            paths.push(entry.path());
        }
        paths.sort();

        for path in &paths {
            self.store
                .unpin(path)
                .map_err(|source| XdpctlError::UnpinFailed {
                    path: path.clone(),
                    source,
                })?;
            debug!("Unpinned {}", path.display());
        }

        Ok(paths.len())
    }

    /// Open one pinned map of `ifname`
    pub fn open_pinned(&self, ifname: &str, map_name: &str) -> Result<MapHandle> {
        let path = pin_path(&self.base_dir, ifname, map_name);
        self.store
            .open_pinned(&path)
            .map_err(|source| XdpctlError::PinnedMapMissing { path, source })
    }

    fn rollback(&self, pinned: &[PathBuf]) {
        for path in pinned.iter().rev() {
            if let Err(e) = self.store.unpin(path) {
                warn!("Failed to remove {} during rollback: {}", path.display(), e);
            }
        }
    }
}
