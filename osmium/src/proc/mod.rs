//! Processes.
//!
//! A process owns the resources a program runs against: a descriptor
//! table, a current working directory (and its root), an address space
//! (the [`Mm`] pair of map and page table), heap bounds, a name, and its
//! kernel threads.
//!
//! ## Fork
//!
//! [`Process::fork`] is where the virtual-memory machinery earns its keep.
//! Cloning the address-space map shares every memory object between parent
//! and child; for *private* areas that sharing must end at the moment of
//! the fork, which is done by pushing a **fresh shadow object** in front
//! of the area's object on *both* sides. The object that was on top now
//! sits below two new shadows (one per side): pages written before the
//! fork stay visible to both, pages written after land in the writer's own
//! shadow. Repeated forks stack further shadows, which is exactly the
//! chain the fault handler walks.
//!
//! After the split the parent's installed translations are stale (they
//! still point at frames that may now be shared copy-on-write), so the
//! parent's user page table is cleared and the TLB flushed; both sides
//! refault through their new chains on next touch.

use alloc::{string::String, vec::Vec};
use core::ops::Range;

use bedrock::interrupt::Registers;

use crate::{
    fs::{file::FdTable, Vnode},
    mm::{vmmap::AreaKind, Mm},
    sync::atomic::AtomicUsize,
    thread::{sched, Thread},
    KernelError,
};

static NEXT_PID: AtomicUsize = AtomicUsize::new(1);

/// Process identifier.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub struct Pid(pub u32);

/// A process.
pub struct Process {
    /// Process identifier.
    pub pid: Pid,
    /// Process name, for diagnostics.
    pub name: String,
    /// Open-file descriptor table.
    pub files: FdTable,
    /// Current working directory.
    pub cwd: Vnode,
    /// Root directory for absolute path resolution.
    pub root: Vnode,
    /// Address space: the area map and the page table.
    pub mm: Mm,
    /// Heap bounds, in page numbers.
    pub heap: Range<usize>,
    /// Kernel threads of this process.
    pub threads: Vec<Thread>,
}

impl Process {
    /// Creates a fresh process with an empty address space rooted at
    /// `root`.
    pub fn new(name: impl Into<String>, root: Vnode) -> Self {
        Self {
            pid: Pid(NEXT_PID.fetch_add(1) as u32),
            name: name.into(),
            files: FdTable::new(),
            cwd: root.clone(),
            root,
            mm: Mm::new(),
            heap: 0..0,
            threads: Vec::new(),
        }
    }

    /// Forks this process.
    ///
    /// The child gets a clone of the address-space map with fresh shadows
    /// interposed over every private area (on both sides), a shared copy
    /// of every open-file description, the parent's working directory and
    /// name, and one thread primed to return to user mode through `regs`
    /// with a zero return value. The child is handed to the scheduler; the
    /// parent's return value is the child's pid.
    pub fn fork(&mut self, regs: &Registers) -> Result<Process, KernelError> {
        // Clone the map first: every area's object picks up the child's
        // reference.
        let mut child_mm = Mm {
            vmmap: self.mm.vmmap.clone(),
            page_table: crate::mm::page_table::PageTable::new(),
        };

        // Split every private area into two chains. Both new shadows hang
        // below-ward off the same object, which keeps all pre-fork pages
        // reachable from either side.
        for (parent_area, child_area) in self
            .mm
            .vmmap
            .iter_mut()
            .zip(child_mm.vmmap.iter_mut())
        {
            if parent_area.kind == AreaKind::Private {
                let shared_below = parent_area.obj.clone();
                parent_area.obj = crate::mm::mmobj::MemObject::shadow_of(shared_below.clone());
                child_area.obj = crate::mm::mmobj::MemObject::shadow_of(shared_below);
            }
        }

        // The parent's installed translations predate the split; tear
        // them down so the next touch refaults through the new shadows.
        self.mm.page_table.clear();
        crate::mm::tlb::shootdown_all();

        // Child thread: first schedule pops the saved frame and returns
        // to user mode reporting 0.
        let mut child_regs = *regs;
        child_regs.eax = 0;
        let thread = Thread::new_user_return(&child_regs);
        sched::make_runnable(&thread);

        Ok(Process {
            pid: Pid(NEXT_PID.fetch_add(1) as u32),
            name: self.name.clone(),
            files: self.files.clone(),
            cwd: self.cwd.clone(),
            root: self.root.clone(),
            mm: child_mm,
            heap: self.heap.clone(),
            threads: alloc::vec![thread],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mm::page_table::Permission,
        mm::vmmap::Direction,
        testutil,
    };
    use bedrock::addressing::Va;

    fn write_byte(p: &mut Process, va: Va, b: u8) {
        p.mm.copy_out(va, &[b]).unwrap();
    }

    fn read_byte(p: &mut Process, va: Va) -> u8 {
        let mut buf = [0u8; 1];
        p.mm.copy_in(va, &mut buf).unwrap();
        buf[0]
    }

    fn map_private_anon(p: &mut Process, npages: usize) -> Va {
        let Mm { vmmap, page_table } = &mut p.mm;
        let start = vmmap
            .map(
                page_table,
                None,
                0,
                npages,
                Permission::READ | Permission::WRITE,
                AreaKind::Private,
                0,
                Direction::HighToLow,
            )
            .unwrap();
        Va::from_page_number(start)
    }

    #[test]
    fn fork_isolates_private_writes() {
        let mut parent = testutil::new_process("cow");
        let va = map_private_anon(&mut parent, 1);

        write_byte(&mut parent, va, b'A');
        let mut child = parent.fork(&Registers::default()).unwrap();

        // Pre-fork data is visible on both sides.
        assert_eq!(read_byte(&mut parent, va), b'A');
        assert_eq!(read_byte(&mut child, va), b'A');

        // Post-fork writes diverge.
        write_byte(&mut child, va, b'B');
        assert_eq!(read_byte(&mut child, va), b'B');
        assert_eq!(read_byte(&mut parent, va), b'A');

        write_byte(&mut parent, va, b'C');
        assert_eq!(read_byte(&mut parent, va), b'C');
        assert_eq!(read_byte(&mut child, va), b'B');
    }

    #[test]
    fn fork_interposes_shadows_on_both_sides() {
        let mut parent = testutil::new_process("shadows");
        let va = map_private_anon(&mut parent, 1);
        write_byte(&mut parent, va, 1);

        let parent_chain_before = parent.mm.vmmap.lookup(va.page_number()).unwrap().obj.chain_len();
        let child = parent.fork(&Registers::default()).unwrap();

        let parent_area = parent.mm.vmmap.lookup(va.page_number()).unwrap();
        let child_area = child.mm.vmmap.lookup(va.page_number()).unwrap();
        assert_eq!(parent_area.obj.chain_len(), parent_chain_before + 1);
        assert_eq!(child_area.obj.chain_len(), parent_chain_before + 1);
        assert_ne!(parent_area.obj.id(), child_area.obj.id());
        // Both chains converge on the same object one level down.
        assert_eq!(
            parent_area.obj.shadowed().unwrap().id(),
            child_area.obj.shadowed().unwrap().id()
        );

        // The parent's translations were torn down at the split.
        assert!(parent.mm.page_table.is_empty());
    }

    #[test]
    fn nested_forks_keep_grandparent_data() {
        let mut gp = testutil::new_process("gen0");
        let va = map_private_anon(&mut gp, 1);
        write_byte(&mut gp, va, 10);

        let mut p = gp.fork(&Registers::default()).unwrap();
        write_byte(&mut p, va, 20);

        let mut c = p.fork(&Registers::default()).unwrap();
        assert_eq!(read_byte(&mut c, va), 20);
        write_byte(&mut c, va, 30);

        assert_eq!(read_byte(&mut gp, va), 10);
        assert_eq!(read_byte(&mut p, va), 20);
        assert_eq!(read_byte(&mut c, va), 30);
    }

    #[test]
    fn shared_areas_stay_shared_across_fork() {
        let mut parent = testutil::new_process("shared");
        let va = {
            let Mm { vmmap, page_table } = &mut parent.mm;
            let start = vmmap
                .map(
                    page_table,
                    None,
                    0,
                    1,
                    Permission::READ | Permission::WRITE,
                    AreaKind::Shared,
                    0,
                    Direction::HighToLow,
                )
                .unwrap();
            Va::from_page_number(start)
        };

        write_byte(&mut parent, va, 1);
        let mut child = parent.fork(&Registers::default()).unwrap();
        write_byte(&mut child, va, 2);
        assert_eq!(read_byte(&mut parent, va), 2);
    }

    #[test]
    fn fork_shares_open_file_descriptions_and_queues_child() {
        let mut parent = testutil::new_process("files");
        let file = alloc::sync::Arc::new(crate::fs::file::OpenFile::new(
            parent.root.clone(),
            crate::fs::file::FileMode::READ,
        ));
        let fd = parent.files.install(file.clone()).unwrap();

        let child = parent.fork(&Registers::default()).unwrap();
        assert!(alloc::sync::Arc::ptr_eq(
            child.files.get(fd).unwrap(),
            parent.files.get(fd).unwrap()
        ));
        assert_ne!(child.pid, parent.pid);
        assert_eq!(child.threads.len(), 1);
        assert!(sched::is_runnable(child.threads[0].tid));
        // The child reports 0 from the fork.
        assert_eq!(child.threads[0].saved_frame().eax, 0);
    }
}
