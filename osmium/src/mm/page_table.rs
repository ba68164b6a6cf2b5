//! The per-process page table.
//!
//! The hardware two-level x86 table (the page directory, its entries, the
//! `cr3` load) belongs to the paging bring-up outside this tree. The
//! kernel core manipulates translations through this [`PageTable`] type,
//! and the boot layer mirrors them into the hardware format through its
//! `pt_map` family of primitives.
//!
//! A [`PageTable`] owns a reference on every frame it maps. That reference
//! is what keeps a mapped frame resident: the page cache refuses to evict
//! any frame with handles outside the cache.
//!
//! Operations that remove or narrow a translation return a
//! [`StaleTlbEntry`]; the CPU may still hold the old translation until the
//! caller invalidates it. Nothing re-enters user mode between a narrowing
//! and its invalidation.

use alloc::collections::BTreeMap;
use core::ops::Range;

use bedrock::addressing::Va;

use crate::mm::{tlb, Page};

bitflags::bitflags! {
    /// Access permissions of a mapping.
    pub struct Permission: usize {
        /// The page can be read.
        const READ = 1 << 0;
        /// The page can be written.
        const WRITE = 1 << 1;
        /// The page can be executed.
        const EXECUTABLE = 1 << 2;
        /// The page is accessible from user mode.
        const USER = 1 << 3;
    }
}

/// Ways a page-table operation can fail.
#[derive(Debug, Eq, PartialEq)]
pub enum PageTableMappingError {
    /// The given virtual address is not page-aligned.
    NotAligned,
    /// No translation is installed for the given virtual address.
    Unmapped,
}

impl From<PageTableMappingError> for crate::KernelError {
    fn from(_: PageTableMappingError) -> Self {
        crate::KernelError::BadAddress
    }
}

/// A translation that may linger in the TLB after its page-table entry was
/// removed or narrowed.
///
/// The holder must call [`invalidate`](Self::invalidate) before any thread
/// re-enters user mode with this address space active.
#[must_use]
pub struct StaleTlbEntry {
    va: Va,
}

impl StaleTlbEntry {
    /// Invalidates the stale translation.
    pub fn invalidate(self) {
        tlb::invalidate(self.va);
    }
}

struct Pte {
    page: Page,
    perm: Permission,
}

/// A per-process page table.
pub struct PageTable {
    entries: BTreeMap<usize, Pte>,
}

impl PageTable {
    /// Creates an empty page table.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Installs a translation from page-aligned `va` to `page`.
    ///
    /// Replacing an existing translation returns the stale entry for the
    /// caller to invalidate.
    pub fn map(
        &mut self,
        va: Va,
        page: Page,
        perm: Permission,
    ) -> Result<Option<StaleTlbEntry>, PageTableMappingError> {
        if va.offset() != 0 {
            return Err(PageTableMappingError::NotAligned);
        }
        let old = self.entries.insert(va.page_number(), Pte { page, perm });
        Ok(old.map(|_| StaleTlbEntry { va }))
    }

    /// Removes the translation at page-aligned `va`.
    pub fn unmap(&mut self, va: Va) -> Result<StaleTlbEntry, PageTableMappingError> {
        if va.offset() != 0 {
            return Err(PageTableMappingError::NotAligned);
        }
        self.entries
            .remove(&va.page_number())
            .map(|_| StaleTlbEntry { va })
            .ok_or(PageTableMappingError::Unmapped)
    }

    /// Removes every translation whose page number falls in `pages`.
    ///
    /// Returns the number of translations removed. The caller is
    /// responsible for the TLB shootdown over the range.
    pub fn unmap_range(&mut self, pages: Range<usize>) -> usize {
        let victims: alloc::vec::Vec<usize> = self
            .entries
            .range(pages)
            .map(|(pn, _)| *pn)
            .collect();
        let count = victims.len();
        for pn in victims {
            self.entries.remove(&pn);
        }
        count
    }

    /// Looks up the translation at page-aligned `va`.
    pub fn walk(&self, va: Va) -> Result<(&Page, Permission), PageTableMappingError> {
        if va.offset() != 0 {
            return Err(PageTableMappingError::NotAligned);
        }
        self.entries
            .get(&va.page_number())
            .map(|pte| (&pte.page, pte.perm))
            .ok_or(PageTableMappingError::Unmapped)
    }

    /// Drops every translation.
    ///
    /// The caller is responsible for the full TLB shootdown that must
    /// follow.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of installed translations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no translations are installed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}
