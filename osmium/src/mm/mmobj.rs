//! Memory objects.
//!
//! A memory object is a source of pages. Four kinds exist, and everything
//! that can be mapped into an address space is one of them:
//!
//! - **Anonymous**: pages materialize zero-filled and have no backing
//!   store. Anonymous objects are always at the bottom of a chain.
//! - **Shadow**: overlays another object: pages resident in the shadow
//!   mask the pages of the object below it. Shadows are what make
//!   copy-on-write compose across nested forks: each fork pushes a fresh
//!   shadow on both sides, so neither side observes the other's later
//!   writes.
//! - **Block device**: pages are 1:1 with device blocks; filling reads the
//!   block, cleaning writes it back.
//! - **Vnode**: pages belong to a file; filling and cleaning delegate to
//!   the file system through the vnode's page operations.
//!
//! The dispatch is data-driven: an object's behaviour is its kind
//! variant, not a vtable installed at creation.
//!
//! A shadow chain is a finite, acyclic sequence ending at exactly one
//! non-shadow bottom object. The chain is kept acyclic by construction:
//! a shadow owns a strong handle *down* to the object it shadows and
//! nothing points back up.
//!
//! Objects are identified in the page cache by [`ObjectId`]. Anonymous and
//! shadow objects get a fresh id at creation; device and vnode objects
//! derive theirs from the device id or the (file system, inode) pair, so
//! every handle to the same file shares one set of cached pages.

use alloc::sync::Arc;

use crate::{
    dev::{BlockDevice, DevId},
    fs::{FsId, InodeNumber, Vnode},
    mm::{pframe, Page},
    sync::atomic::AtomicU64,
    KernelError,
};

static NEXT_PRIVATE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a memory object in the page cache.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub enum ObjectId {
    /// A private anonymous object.
    Anon(u64),
    /// A shadow object.
    Shadow(u64),
    /// A block device; all objects for one device share pages.
    Block(DevId),
    /// A file; all objects for one (file system, inode) share pages.
    Vnode(FsId, InodeNumber),
}

enum ObjectKind {
    Anonymous,
    Shadow { below: MemObject },
    Block { dev: Arc<dyn BlockDevice> },
    Vnode { vnode: Vnode },
}

struct MemObjectInner {
    id: ObjectId,
    kind: ObjectKind,
}

impl Drop for MemObjectInner {
    fn drop(&mut self) {
        // Pages of a dead private object can never be looked up again;
        // release their frames. Backed objects keep their pages cached;
        // the device or file outlives any one handle.
        match self.kind {
            ObjectKind::Anonymous | ObjectKind::Shadow { .. } => {
                pframe::invalidate_object(self.id);
            }
            _ => {}
        }
    }
}

/// A handle to a memory object.
///
/// Cloning the handle shares the object; the object dies with its last
/// handle. For anonymous and shadow objects that also releases their
/// resident pages.
pub struct MemObject(Arc<MemObjectInner>);

impl Clone for MemObject {
    fn clone(&self) -> Self {
        MemObject(self.0.clone())
    }
}

impl core::fmt::Debug for MemObject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "MemObject({:?})", self.0.id)
    }
}

impl MemObject {
    /// Creates a fresh anonymous object.
    pub fn anonymous() -> Self {
        MemObject(Arc::new(MemObjectInner {
            id: ObjectId::Anon(NEXT_PRIVATE_ID.fetch_add(1)),
            kind: ObjectKind::Anonymous,
        }))
    }

    /// Creates a shadow object overlaying `below`.
    pub fn shadow_of(below: MemObject) -> Self {
        MemObject(Arc::new(MemObjectInner {
            id: ObjectId::Shadow(NEXT_PRIVATE_ID.fetch_add(1)),
            kind: ObjectKind::Shadow { below },
        }))
    }

    /// Creates the object exposing a block device's blocks as pages.
    pub fn device(devid: DevId, dev: Arc<dyn BlockDevice>) -> Self {
        MemObject(Arc::new(MemObjectInner {
            id: ObjectId::Block(devid),
            kind: ObjectKind::Block { dev },
        }))
    }

    /// Creates the object exposing a file's pages.
    pub fn for_vnode(vnode: Vnode) -> Self {
        MemObject(Arc::new(MemObjectInner {
            id: ObjectId::Vnode(vnode.fsid(), vnode.ino()),
            kind: ObjectKind::Vnode { vnode },
        }))
    }

    /// The page-cache identity of this object.
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    /// Number of live handles to this object.
    #[inline]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// The object this shadow overlays, if this is a shadow.
    pub fn shadowed(&self) -> Option<&MemObject> {
        match &self.0.kind {
            ObjectKind::Shadow { below } => Some(below),
            _ => None,
        }
    }

    /// Whether this object is a shadow.
    pub fn is_shadow(&self) -> bool {
        matches!(self.0.kind, ObjectKind::Shadow { .. })
    }

    /// The non-shadow object at the bottom of this chain.
    ///
    /// For a non-shadow object, that is the object itself.
    pub fn bottom(&self) -> &MemObject {
        let mut cur = self;
        while let Some(below) = cur.shadowed() {
            cur = below;
        }
        cur
    }

    /// Length of the chain from this object to (and including) the bottom.
    pub fn chain_len(&self) -> usize {
        let mut len = 1;
        let mut cur = self;
        while let Some(below) = cur.shadowed() {
            len += 1;
            cur = below;
        }
        len
    }

    /// Resolves a page for reading: the first object in the chain holding
    /// a resident frame wins, and the bottom object fills on a miss.
    ///
    /// No frame is created in any shadow; a private read maps the hit
    /// read-only and the write fault later copies it up.
    pub fn lookup_page(&self, pageno: usize) -> Result<Page, KernelError> {
        let mut cur = self;
        loop {
            if cur.shadowed().is_none() {
                // Bottom object: fill on miss.
                return pframe::get(cur, pageno);
            }
            if let Some(page) = pframe::lookup(cur, pageno) {
                return Ok(page);
            }
            cur = cur.shadowed().unwrap();
        }
    }

    /// Populates `page` with the contents of page `pageno` of this object.
    ///
    /// Called by the page cache on a miss, with the frame's busy flag held.
    pub(crate) fn fill_page(&self, pageno: usize, page: &mut Page) -> Result<(), KernelError> {
        match &self.0.kind {
            ObjectKind::Anonymous => {
                page.zero();
                Ok(())
            }
            ObjectKind::Shadow { below } => {
                let src = below.lookup_page(pageno)?;
                page.copy_from(&src);
                Ok(())
            }
            ObjectKind::Block { dev } => dev.read_block(pageno, page.inner_mut()),
            ObjectKind::Vnode { vnode } => vnode.fillpage(pageno, page.inner_mut()),
        }
    }

    /// Tells the backing store a page is about to be written.
    ///
    /// Only vnode objects care: the file system uses this to reserve a
    /// block for a sparse region before the write dirties the frame.
    pub(crate) fn dirty_page(&self, pageno: usize) -> Result<(), KernelError> {
        match &self.0.kind {
            ObjectKind::Vnode { vnode } => vnode.dirtypage(pageno),
            _ => Ok(()),
        }
    }

    /// The writeback capability the page cache stores with each frame.
    pub(crate) fn frame_source(&self) -> pframe::FrameSource {
        match &self.0.kind {
            ObjectKind::Anonymous | ObjectKind::Shadow { .. } => pframe::FrameSource::Unbacked,
            ObjectKind::Block { dev } => pframe::FrameSource::Device(dev.clone()),
            ObjectKind::Vnode { vnode } => pframe::FrameSource::File(vnode.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_has_unique_bottom() {
        let anon = MemObject::anonymous();
        let s1 = MemObject::shadow_of(anon.clone());
        let s2 = MemObject::shadow_of(s1.clone());
        assert_eq!(s2.chain_len(), 3);
        assert_eq!(s2.bottom().id(), anon.id());
        assert_eq!(s1.bottom().id(), anon.id());
        assert!(!anon.is_shadow());
    }

    #[test]
    fn shadow_ids_are_distinct() {
        let anon = MemObject::anonymous();
        let a = MemObject::shadow_of(anon.clone());
        let b = MemObject::shadow_of(anon);
        assert_ne!(a.id(), b.id());
    }
}
