//! Opening an object file, choosing the entry program and loading it

use super::maps::MapHandle;
use super::{BpfObject, MapStore, ObjectOpener, ProgramHandle, ProgramSpec};
use crate::config::{pin_path, Config};
use crate::{Result, XdpctlError};
use std::path::Path;
use tracing::{debug, info};

/// Kernel objects of a successful load
#[derive(Debug)]
pub struct LoadedProgram {
    program: ProgramHandle,
    maps: Vec<MapHandle>,
    reused_maps: bool,
}

impl LoadedProgram {
    /// Section the entry program was taken from
    pub fn section(&self) -> &str {
        self.program.section()
    }

    pub fn program(&self) -> &ProgramHandle {
        &self.program
    }

    /// Declared maps in file order
    pub fn maps(&self) -> &[MapHandle] {
        &self.maps
    }

    pub fn map(&self, name: &str) -> Option<&MapHandle> {
        self.maps.iter().find(|m| m.name() == name)
    }

    /// Whether the maps are backed by previously pinned storage
    pub fn reused_maps(&self) -> bool {
        self.reused_maps
    }

    /// Remove a map from the set, handing ownership to the caller
    pub fn take_map(&mut self, name: &str) -> Option<MapHandle> {
        let pos = self.maps.iter().position(|m| m.name() == name)?;
        Some(self.maps.remove(pos))
    }
}

/// Pick the entry program: exact section match, or the first one declared
pub fn select_program<'a>(
    programs: &'a [ProgramSpec],
    section: Option<&str>,
    path: &Path,
) -> Result<&'a ProgramSpec> {
    match section {
        Some(section) => programs
            .iter()
            .find(|p| p.section == section)
            .ok_or_else(|| XdpctlError::ProgramNotFound {
                path: path.to_path_buf(),
                section: section.to_string(),
                available: programs.iter().map(|p| p.section.clone()).collect(),
            }),
        None => programs
            .first()
            .ok_or_else(|| XdpctlError::NoPrograms(path.to_path_buf())),
    }
}

pub struct ProgramLoader<O, S> {
    opener: O,
    store: S,
}

impl<O: ObjectOpener, S: MapStore> ProgramLoader<O, S> {
    pub fn new(opener: O, store: S) -> Self {
        Self { opener, store }
    }

    pub fn load(&self, config: &Config) -> Result<LoadedProgram> {
        let reuse = config
            .reuse_maps
            .then(|| (config.pin_basedir.as_path(), config.interface.name.as_str()));

        self.load_with(
            &config.object_path,
            config.program_section.as_deref(),
            reuse,
        )
    }

    /// Load `path`; `reuse` is `(pin base dir, interface name)` when maps
    /// should be rebound to existing pins
    pub fn load_with(
        &self,
        path: &Path,
        section: Option<&str>,
        reuse: Option<(&Path, &str)>,
    ) -> Result<LoadedProgram> {
        debug!("Opening BPF object {}", path.display());
        let mut object = self.opener.open(path)?;

        let entry = select_program(object.programs(), section, object.path())?.clone();
        debug!("Selected program {} in section {}", entry.name, entry.section);

        if let Some((base, ifname)) = reuse {
            self.rebind_pinned(&mut object, base, ifname)?;
        }

        let loaded = object.load(&entry)?;
        info!(
            "Loaded {} (section {}, prog id {}, {} maps)",
            path.display(),
            loaded.program.section(),
            loaded.program.id(),
            loaded.maps.len()
        );

        Ok(LoadedProgram {
            program: loaded.program,
            maps: loaded.maps,
            reused_maps: reuse.is_some(),
        })
    }

    /// Open and verify every pinned map before touching the object
    fn rebind_pinned(&self, object: &mut O::Object, base: &Path, ifname: &str) -> Result<()> {
        let mut pinned = Vec::with_capacity(object.maps().len());

        for spec in object.maps() {
            let path = pin_path(base, ifname, &spec.name);
            let handle = self
                .store
                .open_pinned(&path)
                .map_err(|source| XdpctlError::PinnedMapMissing {
                    path: path.clone(),
                    source,
                })?;
            handle.shape().verify(&spec.name, &spec.shape)?;
            pinned.push((spec.name.clone(), handle));
        }

        for (name, handle) in pinned {
            debug!("Reusing pinned map {} (id {})", name, handle.id());
            object.rebind_map(&name, handle)?;
        }

        info!("Reusing pinned maps under {}", base.join(ifname).display());
        Ok(())
    }
}
