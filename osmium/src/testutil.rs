//! Shared fixtures for the unit tests.

use crate::fs::{traits, FsId, InodeNumber, Stat, Vnode, VnodeKind};
use crate::proc::Process;
use crate::KernelError;

/// A root directory with no entries, enough to hang a process off.
struct BareRoot {
    fsid: FsId,
}

impl traits::Vnode for BareRoot {
    fn fsid(&self) -> FsId {
        self.fsid
    }

    fn ino(&self) -> InodeNumber {
        InodeNumber::new(1).unwrap()
    }

    fn kind(&self) -> VnodeKind {
        VnodeKind::Directory
    }

    fn size(&self) -> usize {
        0
    }

    fn stat(&self) -> Result<Stat, KernelError> {
        Ok(Stat {
            ino: 1,
            kind: VnodeKind::Directory,
            size: 0,
            nlink: 2,
            blocks: 0,
        })
    }

    fn lookup(&self, _name: &str) -> Result<Vnode, KernelError> {
        Err(KernelError::NoSuchEntry)
    }
}

/// A vnode usable as a process root in tests that never touch a real file
/// system.
pub fn bare_root() -> Vnode {
    Vnode::new(BareRoot { fsid: FsId::alloc() })
}

/// A fresh process on a bare root.
pub fn new_process(name: &str) -> Process {
    Process::new(name, bare_root())
}
