//! Address-space maps.
//!
//! A [`VmMap`] is the ordered set of virtual-memory areas of one process.
//! Each [`VmArea`] covers a half-open range of page numbers inside the
//! user window, carries its protection and sharing mode, and names the
//! memory object its pages come from together with the page offset into
//! that object.
//!
//! Invariants the map maintains:
//! - areas are disjoint and sorted by start page;
//! - every area lies inside `[USER_LOW_PAGE, USER_HIGH_PAGE)`;
//! - a private area's object is always the top of its own shadow chain,
//!   a shared area names the bottom object directly.

use alloc::vec::Vec;
use core::ops::Range;

use bedrock::addressing::{USER_HIGH_PAGE, USER_LOW_PAGE};

use crate::{
    fs::Vnode,
    mm::{mmobj::MemObject, page_table::PageTable, page_table::Permission},
    KernelError,
};

/// Sharing mode of an area.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AreaKind {
    /// Writes are private to this address space (copy-on-write through the
    /// area's shadow chain).
    Private,
    /// Writes go to the underlying object and are visible to every map of
    /// it.
    Shared,
}

/// Search direction for placing an unplaced mapping.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Direction {
    /// Prefer the lowest usable addresses.
    LowToHigh,
    /// Prefer the highest usable addresses.
    HighToLow,
}

/// One contiguous mapped range of a process's address space.
#[derive(Clone)]
pub struct VmArea {
    /// Covered page numbers, `[start, end)`.
    pub span: Range<usize>,
    /// Protection bits of the area (READ/WRITE/EXECUTABLE).
    pub perm: Permission,
    /// Sharing mode.
    pub kind: AreaKind,
    /// Source of this area's pages.
    pub obj: MemObject,
    /// Offset in pages into `obj` at which the area begins.
    pub off: usize,
}

impl VmArea {
    /// Translates a page number inside the area into the object's page
    /// numbering.
    #[inline]
    pub fn obj_pageno(&self, pageno: usize) -> usize {
        debug_assert!(self.span.contains(&pageno));
        pageno - self.span.start + self.off
    }

    fn npages(&self) -> usize {
        self.span.end - self.span.start
    }
}

/// The ordered collection of a process's [`VmArea`]s.
#[derive(Clone, Default)]
pub struct VmMap {
    areas: Vec<VmArea>,
}

impl VmMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self { areas: Vec::new() }
    }

    /// Iterates the areas in ascending order of start page.
    pub fn iter(&self) -> impl Iterator<Item = &VmArea> {
        self.areas.iter()
    }

    /// Mutable iteration in ascending order of start page.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut VmArea> {
        self.areas.iter_mut()
    }

    /// Number of areas in the map.
    pub fn len(&self) -> usize {
        self.areas.len()
    }

    /// Whether the map has no areas.
    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    /// Finds the area containing page number `pageno`.
    pub fn lookup(&self, pageno: usize) -> Option<&VmArea> {
        self.areas.iter().find(|a| a.span.contains(&pageno))
    }

    /// Mutable [`lookup`](Self::lookup).
    pub fn lookup_mut(&mut self, pageno: usize) -> Option<&mut VmArea> {
        self.areas.iter_mut().find(|a| a.span.contains(&pageno))
    }

    /// Whether `[lopage, lopage + npages)` overlaps no existing area.
    pub fn is_range_empty(&self, lopage: usize, npages: usize) -> bool {
        let range = lopage..lopage + npages;
        !self
            .areas
            .iter()
            .any(|a| a.span.start < range.end && range.start < a.span.end)
    }

    /// Finds a hole of `npages` pages inside the user window.
    ///
    /// `LowToHigh` returns the lowest-addressed fit, `HighToLow` the
    /// highest. Fails with [`KernelError::NoMemory`] when no hole is big
    /// enough.
    pub fn find_hole(&self, npages: usize, dir: Direction) -> Result<usize, KernelError> {
        if npages == 0 || npages > USER_HIGH_PAGE - USER_LOW_PAGE {
            return Err(KernelError::NoMemory);
        }
        // Walk the gaps between areas (plus the two window edges); the
        // area list is sorted so one pass suffices.
        let mut holes: Vec<Range<usize>> = Vec::new();
        let mut cursor = USER_LOW_PAGE;
        for area in &self.areas {
            if area.span.start > cursor {
                holes.push(cursor..area.span.start);
            }
            cursor = area.span.end;
        }
        if cursor < USER_HIGH_PAGE {
            holes.push(cursor..USER_HIGH_PAGE);
        }

        match dir {
            Direction::LowToHigh => holes
                .iter()
                .find(|h| h.end - h.start >= npages)
                .map(|h| h.start)
                .ok_or(KernelError::NoMemory),
            Direction::HighToLow => holes
                .iter()
                .rev()
                .find(|h| h.end - h.start >= npages)
                .map(|h| h.end - npages)
                .ok_or(KernelError::NoMemory),
        }
    }

    /// Maps `npages` pages backed by `vnode` (or fresh anonymous memory)
    /// into this address space.
    ///
    /// With a nonzero `lopage` the mapping is placed exactly there,
    /// evicting whatever overlaps; with `lopage == 0` a hole is searched
    /// in direction `dir`. For a private mapping a fresh shadow object is
    /// interposed in front of the backing object, so writes never reach
    /// it. Returns the start page of the new area.
    ///
    /// The caller owns TLB coherence for any evicted range.
    #[allow(clippy::too_many_arguments)]
    pub fn map(
        &mut self,
        pt: &mut PageTable,
        vnode: Option<&Vnode>,
        lopage: usize,
        npages: usize,
        perm: Permission,
        kind: AreaKind,
        off: usize,
        dir: Direction,
    ) -> Result<usize, KernelError> {
        if npages == 0 {
            return Err(KernelError::InvalidArgument);
        }

        let start = if lopage == 0 {
            self.find_hole(npages, dir)?
        } else {
            if lopage < USER_LOW_PAGE || lopage + npages > USER_HIGH_PAGE {
                return Err(KernelError::InvalidArgument);
            }
            if !self.is_range_empty(lopage, npages) {
                self.remove(pt, lopage, npages);
            }
            lopage
        };

        let bottom = match vnode {
            None => MemObject::anonymous(),
            Some(vnode) => vnode.mmobj()?,
        };
        let obj = match kind {
            AreaKind::Private => MemObject::shadow_of(bottom),
            AreaKind::Shared => bottom,
        };

        let area = VmArea {
            span: start..start + npages,
            perm,
            kind,
            obj,
            off,
        };
        let pos = self
            .areas
            .iter()
            .position(|a| a.span.start > start)
            .unwrap_or(self.areas.len());
        self.areas.insert(pos, area);
        debug_assert!(self.check_sorted_disjoint());
        Ok(start)
    }

    /// Unmaps `[lopage, lopage + npages)`.
    ///
    /// Overlapping areas are deleted, truncated, or split so that exactly
    /// the requested range becomes unmapped; unmapping an already-unmapped
    /// portion is a no-op. Installed translations in the range are
    /// removed; the caller is responsible for the TLB shootdown.
    pub fn remove(&mut self, pt: &mut PageTable, lopage: usize, npages: usize) {
        let range = lopage..lopage + npages;
        let mut out: Vec<VmArea> = Vec::with_capacity(self.areas.len() + 1);
        for area in self.areas.drain(..) {
            if area.span.end <= range.start || range.end <= area.span.start {
                // No overlap.
                out.push(area);
            } else if range.start <= area.span.start && area.span.end <= range.end {
                // Fully covered: drop (the object reference goes with it).
            } else if area.span.start < range.start && range.end < area.span.end {
                // Split into two; both halves keep a reference on the
                // object.
                let mut front = area.clone();
                front.span = area.span.start..range.start;
                let mut back = area;
                back.off += range.end - back.span.start;
                back.span = range.end..back.span.end;
                out.push(front);
                out.push(back);
            } else if range.start <= area.span.start {
                // Overlap at the front: cut the head off.
                let mut back = area;
                back.off += range.end - back.span.start;
                back.span = range.end..back.span.end;
                out.push(back);
            } else {
                // Overlap at the back: cut the tail off.
                let mut front = area;
                front.span = front.span.start..range.start;
                out.push(front);
            }
        }
        self.areas = out;
        pt.unmap_range(range);
        debug_assert!(self.check_sorted_disjoint());
    }

    /// Total pages covered by the map.
    pub fn mapped_pages(&self) -> usize {
        self.areas.iter().map(|a| a.npages()).sum()
    }

    fn check_sorted_disjoint(&self) -> bool {
        self.areas.windows(2).all(|w| w[0].span.end <= w[1].span.start)
            && self
                .areas
                .iter()
                .all(|a| a.span.start >= USER_LOW_PAGE && a.span.end <= USER_HIGH_PAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anon_map(
        map: &mut VmMap,
        pt: &mut PageTable,
        lopage: usize,
        npages: usize,
        kind: AreaKind,
    ) -> usize {
        map.map(
            pt,
            None,
            lopage,
            npages,
            Permission::READ | Permission::WRITE,
            kind,
            0,
            Direction::HighToLow,
        )
        .unwrap()
    }

    #[test]
    fn areas_stay_sorted_and_disjoint() {
        let (mut map, mut pt) = (VmMap::new(), PageTable::new());
        anon_map(&mut map, &mut pt, USER_LOW_PAGE + 10, 5, AreaKind::Private);
        anon_map(&mut map, &mut pt, USER_LOW_PAGE, 5, AreaKind::Private);
        anon_map(&mut map, &mut pt, USER_LOW_PAGE + 20, 5, AreaKind::Shared);
        let starts: Vec<usize> = map.iter().map(|a| a.span.start).collect();
        assert_eq!(
            starts,
            [USER_LOW_PAGE, USER_LOW_PAGE + 10, USER_LOW_PAGE + 20]
        );
    }

    #[test]
    fn hole_search_directions() {
        let (mut map, mut pt) = (VmMap::new(), PageTable::new());
        let low = map.find_hole(4, Direction::LowToHigh).unwrap();
        assert_eq!(low, USER_LOW_PAGE);
        let high = map.find_hole(4, Direction::HighToLow).unwrap();
        assert_eq!(high, USER_HIGH_PAGE - 4);

        anon_map(&mut map, &mut pt, USER_HIGH_PAGE - 4, 4, AreaKind::Private);
        let next = map.find_hole(4, Direction::HighToLow).unwrap();
        assert_eq!(next, USER_HIGH_PAGE - 8);
    }

    #[test]
    fn private_area_gets_shadow_object() {
        let (mut map, mut pt) = (VmMap::new(), PageTable::new());
        let start = anon_map(&mut map, &mut pt, 0, 4, AreaKind::Private);
        let area = map.lookup(start).unwrap();
        assert!(area.obj.is_shadow());

        let shared = anon_map(&mut map, &mut pt, 0, 4, AreaKind::Shared);
        assert!(!map.lookup(shared).unwrap().obj.is_shadow());
    }

    #[test]
    fn remove_splits_and_truncates() {
        let (mut map, mut pt) = (VmMap::new(), PageTable::new());
        let s = anon_map(&mut map, &mut pt, USER_LOW_PAGE, 10, AreaKind::Private);

        // Punch a hole in the middle.
        map.remove(&mut pt, s + 4, 2);
        assert_eq!(map.len(), 2);
        assert!(map.lookup(s + 4).is_none());
        assert!(map.lookup(s + 5).is_none());
        let back = map.lookup(s + 6).unwrap();
        assert_eq!(back.off, 6);

        // Removing an unmapped range is a no-op.
        map.remove(&mut pt, s + 4, 2);
        assert_eq!(map.len(), 2);

        // Truncate the front of the back half.
        map.remove(&mut pt, s + 6, 1);
        assert_eq!(map.lookup(s + 7).unwrap().off, 7);
    }

    #[test]
    fn exact_placement_evicts_overlap() {
        let (mut map, mut pt) = (VmMap::new(), PageTable::new());
        let s = anon_map(&mut map, &mut pt, USER_LOW_PAGE, 8, AreaKind::Private);
        let old_obj_refs = map.lookup(s).unwrap().obj.ref_count();
        assert_eq!(old_obj_refs, 1);

        anon_map(&mut map, &mut pt, s + 2, 4, AreaKind::Private);
        // front [s, s+2), new [s+2, s+6), back [s+6, s+8)
        assert_eq!(map.len(), 3);
        assert_eq!(map.lookup(s + 2).unwrap().span, (s + 2)..(s + 6));
    }
}
