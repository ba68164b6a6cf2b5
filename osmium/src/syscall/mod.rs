//! System-call handlers.
//!
//! The dispatch surface (trap entry, argument fetch from user registers,
//! copying strings and buffers across the user boundary) belongs to the
//! layer above. These functions are the handlers themselves: they get
//! parsed arguments, validate them, and delegate to the owning subsystem.
//! Results travel back as `Result`; the dispatcher flattens a
//! [`KernelError`] into the conventional negated errno.
//!
//! Every handler restores the process to its prior state on failure:
//! nothing is left half-mapped, half-opened, or half-forked.

pub mod flags;

use alloc::sync::Arc;

use bedrock::{
    addressing::{Va, PAGE_MASK, PAGE_SHIFT, USER_HIGH, USER_LOW},
    interrupt::Registers,
};

use crate::{
    fs::{
        file::{openable, FileDescriptor, FileMode, OpenFile, Whence},
        path, Stat, Vnode, VnodeKind,
    },
    mm::{page_table::Permission, tlb, vmmap::AreaKind, vmmap::Direction},
    proc::Process,
    KernelError,
};
use flags::{MapFlags, OpenFlags, Prot};

fn file_mode(oflags: OpenFlags) -> Result<FileMode, KernelError> {
    let mut mode = match oflags.bits() & 0x3 {
        0 => FileMode::READ,
        1 => FileMode::WRITE,
        2 => FileMode::READ | FileMode::WRITE,
        _ => return Err(KernelError::InvalidArgument),
    };
    if oflags.contains(OpenFlags::APPEND) {
        mode |= FileMode::APPEND;
    }
    Ok(mode)
}

/// Opens `path` and returns the new descriptor.
///
/// The access mode comes from the low bits of `oflags`
/// (`O_RDONLY`/`O_WRONLY`/`O_RDWR`) plus `O_APPEND`; `O_CREAT` creates a
/// missing regular file. Opening a directory for writing fails with
/// [`KernelError::IsDirectory`].
pub fn do_open(proc: &mut Process, path: &str, oflags: OpenFlags) -> Result<FileDescriptor, KernelError> {
    let mode = file_mode(oflags)?;
    // Reserve the slot first so descriptor exhaustion wins over
    // resolution errors and nothing needs undoing on failure.
    if proc.files.len() >= crate::fs::file::NFILES {
        return Err(KernelError::TooManyOpenFile);
    }
    let vnode = path::open_namev(
        &proc.cwd,
        &proc.root,
        path,
        oflags.contains(OpenFlags::CREAT),
    )?;
    openable(vnode.kind(), mode)?;
    let file = Arc::new(OpenFile::new(vnode, mode));
    proc.files.install(file)
}

/// Closes a descriptor.
pub fn do_close(proc: &mut Process, fd: FileDescriptor) -> Result<(), KernelError> {
    proc.files.remove(fd).map(|_| ())
}

/// Duplicates a descriptor onto the lowest free slot.
///
/// Both descriptors share one open-file description, so there is one
/// seek position between them.
pub fn do_dup(proc: &mut Process, fd: FileDescriptor) -> Result<FileDescriptor, KernelError> {
    let file = proc.files.get(fd)?.clone();
    proc.files.install(file)
}

/// Reads from a descriptor at its current position.
pub fn do_read(proc: &mut Process, fd: FileDescriptor, buf: &mut [u8]) -> Result<usize, KernelError> {
    proc.files.get(fd)?.read(buf)
}

/// Writes to a descriptor at its current position (end of file in append
/// mode).
pub fn do_write(proc: &mut Process, fd: FileDescriptor, buf: &[u8]) -> Result<usize, KernelError> {
    proc.files.get(fd)?.write(buf)
}

/// Repositions a descriptor.
pub fn do_seek(
    proc: &mut Process,
    fd: FileDescriptor,
    off: isize,
    whence: Whence,
) -> Result<usize, KernelError> {
    proc.files.get(fd)?.seek(off, whence)
}

/// Stats the object at `path`.
pub fn do_stat(proc: &Process, path: &str) -> Result<Stat, KernelError> {
    path::lookup_namev(&proc.cwd, &proc.root, path)?.stat()
}

/// Creates a directory at `path`.
pub fn do_mkdir(proc: &Process, path: &str) -> Result<(), KernelError> {
    let (parent, name) = path::dir_namev(&proc.cwd, &proc.root, path)?;
    parent.mkdir(name).map(|_| ())
}

/// Removes the empty directory at `path`.
pub fn do_rmdir(proc: &Process, path: &str) -> Result<(), KernelError> {
    let (parent, name) = path::dir_namev(&proc.cwd, &proc.root, path)?;
    parent.rmdir(name)
}

/// Removes the non-directory entry at `path`.
pub fn do_unlink(proc: &Process, path: &str) -> Result<(), KernelError> {
    let (parent, name) = path::dir_namev(&proc.cwd, &proc.root, path)?;
    parent.unlink(name)
}

/// Creates a hard link `newpath` referring to the file at `oldpath`.
pub fn do_link(proc: &Process, oldpath: &str, newpath: &str) -> Result<(), KernelError> {
    let target = path::lookup_namev(&proc.cwd, &proc.root, oldpath)?;
    let (parent, name) = path::dir_namev(&proc.cwd, &proc.root, newpath)?;
    parent.link(name, &target)
}

/// Creates a device node at `path`.
pub fn do_mknod(proc: &Process, path: &str, kind: VnodeKind) -> Result<(), KernelError> {
    match kind {
        VnodeKind::CharDevice(_) | VnodeKind::BlockDevice(_) => {}
        _ => return Err(KernelError::InvalidArgument),
    }
    let (parent, name) = path::dir_namev(&proc.cwd, &proc.root, path)?;
    parent.mknod(name, kind).map(|_| ())
}

fn prot_to_perm(prot: Prot) -> Permission {
    let mut perm = Permission::empty();
    if prot.contains(Prot::READ) {
        perm |= Permission::READ;
    }
    if prot.contains(Prot::WRITE) {
        perm |= Permission::WRITE;
    }
    if prot.contains(Prot::EXEC) {
        perm |= Permission::EXECUTABLE;
    }
    perm
}

/// Maps `len` bytes at `addr` (or at a kernel-chosen address when `addr`
/// is zero) and returns the mapped address.
///
/// Argument laws, checked in order:
/// - `addr`, `len`, `off` must be page-aligned and `len` nonzero;
/// - a nonzero `addr` must put `[addr, addr + len)` inside the user
///   window;
/// - exactly one of `MAP_PRIVATE` and `MAP_SHARED` must be given;
/// - a non-anonymous mapping needs `fd` open for reading, write
///   permission on the file for `MAP_SHARED | PROT_WRITE`, and refuses
///   `PROT_WRITE` on append-only descriptors.
pub fn do_mmap(
    proc: &mut Process,
    addr: usize,
    len: usize,
    prot: Prot,
    mapflags: MapFlags,
    fd: i32,
    off: usize,
) -> Result<usize, KernelError> {
    if len == 0
        || addr & PAGE_MASK != 0
        || len & PAGE_MASK != 0
        || off & PAGE_MASK != 0
    {
        return Err(KernelError::InvalidArgument);
    }
    if mapflags.contains(MapFlags::PRIVATE) == mapflags.contains(MapFlags::SHARED) {
        return Err(KernelError::InvalidArgument);
    }
    if addr != 0 {
        let end = addr.checked_add(len).ok_or(KernelError::InvalidArgument)?;
        if addr < USER_LOW || end > USER_HIGH {
            return Err(KernelError::InvalidArgument);
        }
    }

    let vnode: Option<Vnode> = if mapflags.contains(MapFlags::ANON) {
        None
    } else {
        let file = proc.files.get(FileDescriptor(fd))?;
        if !file.mode().contains(FileMode::READ) {
            return Err(KernelError::InvalidAccess);
        }
        if mapflags.contains(MapFlags::SHARED)
            && prot.contains(Prot::WRITE)
            && !file.mode().contains(FileMode::WRITE)
        {
            return Err(KernelError::InvalidAccess);
        }
        if prot.contains(Prot::WRITE) && file.mode().contains(FileMode::APPEND) {
            return Err(KernelError::InvalidAccess);
        }
        if file.vnode().kind() != VnodeKind::Regular {
            return Err(KernelError::InvalidAccess);
        }
        Some(file.vnode().clone())
    };

    let kind = if mapflags.contains(MapFlags::PRIVATE) {
        AreaKind::Private
    } else {
        AreaKind::Shared
    };

    let crate::mm::Mm { vmmap, page_table } = &mut proc.mm;
    let start = vmmap.map(
        page_table,
        vnode.as_ref(),
        addr >> PAGE_SHIFT,
        len >> PAGE_SHIFT,
        prot_to_perm(prot),
        kind,
        off >> PAGE_SHIFT,
        Direction::HighToLow,
    )?;

    let start_va = Va::from_page_number(start);
    tlb::shootdown(start_va..start_va + len);
    Ok(start_va.into_usize())
}

/// Unmaps `[addr, addr + len)`.
///
/// Portions of the range that are not mapped are ignored; unmapping an
/// already-unmapped range succeeds.
pub fn do_munmap(proc: &mut Process, addr: usize, len: usize) -> Result<(), KernelError> {
    if len == 0 || addr & PAGE_MASK != 0 || len & PAGE_MASK != 0 {
        return Err(KernelError::InvalidArgument);
    }
    let end = addr.checked_add(len).ok_or(KernelError::InvalidArgument)?;
    if addr < USER_LOW || end > USER_HIGH {
        return Err(KernelError::InvalidArgument);
    }

    let crate::mm::Mm { vmmap, page_table } = &mut proc.mm;
    vmmap.remove(page_table, addr >> PAGE_SHIFT, len >> PAGE_SHIFT);
    let start_va = Va::from_page_number(addr >> PAGE_SHIFT);
    tlb::shootdown(start_va..start_va + len);
    Ok(())
}

/// Forks the calling process.
///
/// Returns the child; the parent's syscall return value is the child's
/// pid and the child's saved frame reports zero.
pub fn do_fork(proc: &mut Process, regs: &Registers) -> Result<Process, KernelError> {
    proc.fork(regs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use bedrock::addressing::PAGE_SIZE;

    #[test]
    fn mmap_error_wall() {
        let mut p = testutil::new_process("mmap-errs");

        // Length not page aligned.
        assert_eq!(
            do_mmap(&mut p, 0, 1, Prot::READ, MapFlags::SHARED | MapFlags::ANON, -1, 0),
            Err(KernelError::InvalidArgument)
        );
        // Unaligned fixed address at the top of the user window.
        assert_eq!(
            do_mmap(
                &mut p,
                USER_HIGH - PAGE_SIZE + 1,
                PAGE_SIZE,
                Prot::READ,
                MapFlags::SHARED | MapFlags::ANON,
                -1,
                0
            ),
            Err(KernelError::InvalidArgument)
        );
        // Private and shared together.
        assert_eq!(
            do_mmap(
                &mut p,
                0,
                PAGE_SIZE,
                Prot::READ,
                MapFlags::PRIVATE | MapFlags::SHARED | MapFlags::ANON,
                -1,
                0
            ),
            Err(KernelError::InvalidArgument)
        );
        // Neither private nor shared.
        assert_eq!(
            do_mmap(&mut p, 0, PAGE_SIZE, Prot::READ, MapFlags::ANON, -1, 0),
            Err(KernelError::InvalidArgument)
        );
        // Zero length.
        assert_eq!(
            do_mmap(&mut p, 0, 0, Prot::READ, MapFlags::PRIVATE | MapFlags::ANON, -1, 0),
            Err(KernelError::InvalidArgument)
        );
        // File-backed mapping with a bad descriptor.
        assert_eq!(
            do_mmap(&mut p, 0, PAGE_SIZE, Prot::READ, MapFlags::PRIVATE, 7, 0),
            Err(KernelError::BadFileDescriptor)
        );
    }

    #[test]
    fn anonymous_mmap_places_high_and_works() {
        let mut p = testutil::new_process("mmap-anon");
        let addr = do_mmap(
            &mut p,
            0,
            2 * PAGE_SIZE,
            Prot::READ | Prot::WRITE,
            MapFlags::PRIVATE | MapFlags::ANON,
            -1,
            0,
        )
        .unwrap();
        assert_eq!(addr & PAGE_MASK, 0);
        assert_eq!(addr + 2 * PAGE_SIZE, USER_HIGH);

        let va = Va::new(addr).unwrap();
        p.mm.copy_out(va, b"hello").unwrap();
        let mut back = [0u8; 5];
        p.mm.copy_in(va, &mut back).unwrap();
        assert_eq!(&back, b"hello");
    }

    #[test]
    fn munmap_is_idempotent() {
        let mut p = testutil::new_process("munmap");
        let addr = do_mmap(
            &mut p,
            0,
            4 * PAGE_SIZE,
            Prot::READ | Prot::WRITE,
            MapFlags::PRIVATE | MapFlags::ANON,
            -1,
            0,
        )
        .unwrap();

        do_munmap(&mut p, addr, 2 * PAGE_SIZE).unwrap();
        // The second unmap covers nothing but still succeeds.
        do_munmap(&mut p, addr, 2 * PAGE_SIZE).unwrap();
        // And the tail of the area is still usable.
        let va = Va::new(addr + 2 * PAGE_SIZE).unwrap();
        p.mm.copy_out(va, &[1]).unwrap();

        // Alignment and range checks still apply.
        assert_eq!(
            do_munmap(&mut p, addr + 1, PAGE_SIZE),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(
            do_munmap(&mut p, 0, PAGE_SIZE),
            Err(KernelError::InvalidArgument)
        );
    }

    #[test]
    fn dup_shares_the_description() {
        let mut p = testutil::new_process("dup");
        let file = Arc::new(OpenFile::new(p.root.clone(), FileMode::READ));
        let fd = p.files.install(file).unwrap();
        let fd2 = do_dup(&mut p, fd).unwrap();
        assert_ne!(fd, fd2);
        assert!(Arc::ptr_eq(
            p.files.get(fd).unwrap(),
            p.files.get(fd2).unwrap()
        ));
        do_close(&mut p, fd).unwrap();
        assert_eq!(do_close(&mut p, fd), Err(KernelError::BadFileDescriptor));
        do_close(&mut p, fd2).unwrap();
    }
}
