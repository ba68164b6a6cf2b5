//! Memory management.
//!
//! The subsystem is built from four pieces, leaves first:
//!
//! - [`Page`]: one refcounted physical frame, the unit everything else
//!   trades in.
//! - [`pframe`]: the page cache: resident frames keyed by
//!   (memory object, page number), with pin/dirty/busy bookkeeping.
//! - [`mmobj`]: memory objects, the polymorphic page sources: anonymous
//!   memory, copy-on-write shadow chains, block devices, and file vnodes.
//! - [`vmmap`]: the per-process map of virtual-memory areas, each naming
//!   the object its pages come from.
//!
//! A user fault threads through all of them: the address-space map finds
//! the area, the area names the object, the object chain resolves to a
//! frame in the page cache (reading through the file system if needed),
//! and the frame is installed in the page table with the permissions the
//! fault allows. [`fault`] implements that path.
//!
//! [`Mm`] bundles the two per-process pieces, the address-space map and
//! the page table, the way a process carries them.

pub mod fault;
pub mod mmobj;
pub mod page_table;
pub mod pframe;
pub mod tlb;
pub mod vmmap;

use alloc::{alloc::handle_alloc_error, sync::Arc};
use core::{alloc::Layout, ptr::NonNull};

use bedrock::addressing::{Kva, PAGE_SIZE};

use crate::KernelError;
use page_table::PageTable;
use vmmap::VmMap;

#[repr(C, align(0x1000))]
struct PageData([u8; PAGE_SIZE]);

const PAGE_LAYOUT: Layout = Layout::new::<PageData>();

struct PageBuf {
    ptr: NonNull<u8>,
}

unsafe impl Send for PageBuf {}
unsafe impl Sync for PageBuf {}

impl Drop for PageBuf {
    fn drop(&mut self) {
        unsafe { alloc::alloc::dealloc(self.ptr.as_ptr(), PAGE_LAYOUT) }
    }
}

/// A representation of one physical memory page.
///
/// The frame behind a `Page` is reference counted: [`Page::clone`] yields a
/// second handle to the *same* memory, and the frame is freed when the last
/// handle drops. A frame mapped into two address spaces, or held by both
/// the page cache and a page table, is therefore one `Page` cloned: writes
/// through one handle are visible through the other, which is exactly what
/// shared mappings require.
///
/// A fresh page is zero-filled.
pub struct Page(Arc<PageBuf>);

impl Page {
    /// Allocate a new, zeroed page.
    ///
    /// Panics if the machine is out of memory; page allocation failure is
    /// not a recoverable condition in this kernel.
    pub fn new() -> Self {
        let ptr = unsafe { alloc::alloc::alloc_zeroed(PAGE_LAYOUT) };
        let Some(ptr) = NonNull::new(ptr) else {
            handle_alloc_error(PAGE_LAYOUT)
        };
        Page(Arc::new(PageBuf { ptr }))
    }

    /// The kernel virtual address of the frame.
    #[inline]
    pub fn kva(&self) -> Kva {
        Kva::new(self.0.ptr.as_ptr() as usize).unwrap()
    }

    /// Number of live handles to this frame, including this one.
    #[inline]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Read-only view of the frame's contents.
    pub fn inner(&self) -> &[u8; PAGE_SIZE] {
        unsafe { &*(self.0.ptr.as_ptr() as *const [u8; PAGE_SIZE]) }
    }

    /// Mutable view of the frame's contents.
    pub fn inner_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        unsafe { &mut *(self.0.ptr.as_ptr() as *mut [u8; PAGE_SIZE]) }
    }

    /// Overwrites the frame with zeros.
    pub fn zero(&mut self) {
        self.inner_mut().fill(0);
    }

    /// Copies the contents of `src` into this frame.
    pub fn copy_from(&mut self, src: &Page) {
        self.inner_mut().copy_from_slice(src.inner());
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Page {
    fn clone(&self) -> Self {
        Page(self.0.clone())
    }
}

/// The memory state of a process: its address-space map and its page
/// table.
///
/// The map is the authority on what *should* be mapped; the page table
/// records what *is* mapped right now. Faults reconcile the two lazily.
pub struct Mm {
    /// The ordered set of virtual-memory areas.
    pub vmmap: VmMap,
    /// Installed translations.
    pub page_table: PageTable,
}

impl Mm {
    /// Creates an empty memory state.
    pub fn new() -> Self {
        Self {
            vmmap: VmMap::new(),
            page_table: PageTable::new(),
        }
    }

    /// Copies `buf` into this address space at `va`, faulting pages in as
    /// needed.
    ///
    /// Fails with [`KernelError::BadAddress`] if any page of the
    /// destination is not writably mapped.
    pub fn copy_out(&mut self, va: bedrock::addressing::Va, buf: &[u8]) -> Result<(), KernelError> {
        let mut addr = va;
        let mut copied = 0usize;
        while copied < buf.len() {
            let page_va = addr.page_down();
            let off = addr.offset();
            let n = core::cmp::min(PAGE_SIZE - off, buf.len() - copied);
            let mut page = self.resolve_user_page(page_va, true)?;
            page.inner_mut()[off..off + n].copy_from_slice(&buf[copied..copied + n]);
            copied += n;
            addr = addr + n;
        }
        Ok(())
    }

    /// Copies bytes out of this address space at `va` into `buf`, faulting
    /// pages in as needed.
    pub fn copy_in(&mut self, va: bedrock::addressing::Va, buf: &mut [u8]) -> Result<(), KernelError> {
        let mut addr = va;
        let mut copied = 0usize;
        while copied < buf.len() {
            let page_va = addr.page_down();
            let off = addr.offset();
            let n = core::cmp::min(PAGE_SIZE - off, buf.len() - copied);
            let page = self.resolve_user_page(page_va, false)?;
            buf[copied..copied + n].copy_from_slice(&page.inner()[off..off + n]);
            copied += n;
            addr = addr + n;
        }
        Ok(())
    }

    /// Resolves the page mapped at page-aligned `va`, taking a fault if it
    /// is absent or (for writes) mapped read-only.
    fn resolve_user_page(
        &mut self,
        va: bedrock::addressing::Va,
        write: bool,
    ) -> Result<Page, KernelError> {
        if let Ok((page, perm)) = self.page_table.walk(va) {
            if !write || perm.contains(page_table::Permission::WRITE) {
                return Ok(page.clone());
            }
        }
        let reason = fault::PageFaultReason {
            addr: va,
            write,
            exec: false,
            present: self.page_table.walk(va).is_ok(),
            user: true,
        };
        self.handle_page_fault(&reason)
            .map_err(|_| KernelError::BadAddress)?;
        let (page, _) = self
            .page_table
            .walk(va)
            .map_err(|_| KernelError::BadAddress)?;
        Ok(page.clone())
    }
}

impl Default for Mm {
    fn default() -> Self {
        Self::new()
    }
}
