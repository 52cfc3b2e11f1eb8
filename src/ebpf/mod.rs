pub mod attach;
pub mod loader;
pub mod maps;
pub mod pin;
#[cfg(target_os = "linux")]
pub mod sys;

use crate::config::XdpFlags;
use crate::Result;
use maps::{MapHandle, MapShape};
use std::io;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::Path;

pub use attach::{AttachController, AttachOutcome, DetachOutcome};
pub use loader::{LoadedProgram, ProgramLoader};
pub use pin::MapPinner;

/// Owned reference to the loaded entry program
#[derive(Debug)]
pub struct ProgramHandle {
    section: String,
    name: String,
    id: u32,
    fd: OwnedFd,
}

impl ProgramHandle {
    pub fn new(section: impl Into<String>, name: impl Into<String>, id: u32, fd: OwnedFd) -> Self {
        Self {
            section: section.into(),
            name: name.into(),
            id,
            fd,
        }
    }

    /// ELF section the program was found in
    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kernel program id
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl AsFd for ProgramHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Interface-level XDP operations (rtnetlink in production)
pub trait XdpLink {
    /// Bind `prog` to the interface, or unbind when `prog` is `None`
    fn set_xdp_fd(
        &mut self,
        ifindex: u32,
        prog: Option<BorrowedFd<'_>>,
        flags: XdpFlags,
    ) -> io::Result<()>;

    /// Id of the program bound in the mode selected by `flags`, 0 if none
    fn query_xdp_id(&mut self, ifindex: u32, flags: XdpFlags) -> io::Result<u32>;
}

impl<L: XdpLink + ?Sized> XdpLink for &mut L {
    fn set_xdp_fd(
        &mut self,
        ifindex: u32,
        prog: Option<BorrowedFd<'_>>,
        flags: XdpFlags,
    ) -> io::Result<()> {
        (**self).set_xdp_fd(ifindex, prog, flags)
    }

    fn query_xdp_id(&mut self, ifindex: u32, flags: XdpFlags) -> io::Result<u32> {
        (**self).query_xdp_id(ifindex, flags)
    }
}

/// Persistent map storage (bpffs in production)
pub trait MapStore {
    fn pin(&self, map: &MapHandle, path: &Path) -> io::Result<()>;

    fn open_pinned(&self, path: &Path) -> io::Result<MapHandle>;

    fn unpin(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}

impl<S: MapStore + ?Sized> MapStore for &S {
    fn pin(&self, map: &MapHandle, path: &Path) -> io::Result<()> {
        (**self).pin(map, path)
    }

    fn open_pinned(&self, path: &Path) -> io::Result<MapHandle> {
        (**self).open_pinned(path)
    }

    fn unpin(&self, path: &Path) -> io::Result<()> {
        (**self).unpin(path)
    }
}

/// A program declared in an object file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSpec {
    pub section: String,
    pub name: String,
}

/// A map declared in an object file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapSpec {
    pub name: String,
    pub shape: MapShape,
}

/// Kernel objects produced by finalizing a [`BpfObject`]
#[derive(Debug)]
pub struct LoadedObject {
    pub program: ProgramHandle,
    pub maps: Vec<MapHandle>,
}

/// An opened but not yet loaded object file
pub trait BpfObject {
    fn path(&self) -> &Path;

    /// Declared programs in file order
    fn programs(&self) -> &[ProgramSpec];

    /// Declared maps in file order
    fn maps(&self) -> &[MapSpec];

    /// Back the declared map `name` with an existing pinned map
    fn rebind_map(&mut self, name: &str, pinned: MapHandle) -> Result<()>;

    /// Run the object through the verifier and return the entry program
    fn load(self, entry: &ProgramSpec) -> Result<LoadedObject>
    where
        Self: Sized;
}

pub trait ObjectOpener {
    type Object: BpfObject;

    fn open(&self, path: &Path) -> Result<Self::Object>;
}
