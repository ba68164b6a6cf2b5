//! The page cache.
//!
//! One global cache holds every resident page frame in the system, keyed
//! by (memory object, page number). There is at most one frame per key:
//! whoever asks for a page of an object gets a handle on the same frame,
//! which is what makes a shared file mapping coherent with `read`/`write`
//! of the same file.
//!
//! ## Frame states
//!
//! A frame carries three pieces of bookkeeping:
//!
//! - **busy**: set while the frame's contents are being filled. Fills run
//!   with the cache lock *dropped* (they do disk I/O); concurrent lookups
//!   of the same key wait on the busy flag rather than stalling the whole
//!   cache.
//! - **dirty**: the frame has modifications the backing store has not
//!   seen. Cleaning writes the frame back through its source and clears
//!   the flag.
//! - **pin count**: pins nest; a pinned frame is never evicted or written
//!   back behind the pinner's back.
//!
//! ## Eviction
//!
//! The cache trims itself back toward [`CACHE_TARGET`] after each insert:
//! victims are clean, unpinned frames of *backed* objects (block device or
//! file) to which the cache holds the only handle, least recently used
//! first. Frames of anonymous and shadow objects have no backing store and
//! stay resident until their object dies. Dirty frames are only written
//! back by explicit cleaning; eviction never initiates I/O.

use alloc::sync::Arc;

use crate::{
    dev::BlockDevice,
    fs::Vnode,
    mm::{
        mmobj::{MemObject, ObjectId},
        Page,
    },
    sync::SpinLock,
    util::lru::LruMap,
    KernelError,
};

/// Frame count the cache trims itself back toward.
pub const CACHE_TARGET: usize = 512;

/// Where a frame's contents go on writeback.
pub(crate) enum FrameSource {
    /// No backing store (anonymous or shadow pages).
    Unbacked,
    /// A block device; page N is block N.
    Device(Arc<dyn BlockDevice>),
    /// A file; writeback goes through the vnode's page operations.
    File(Vnode),
}

impl FrameSource {
    fn is_backed(&self) -> bool {
        !matches!(self, FrameSource::Unbacked)
    }

    fn writeback(&self, pageno: usize, page: &Page) -> Result<(), KernelError> {
        match self {
            FrameSource::Unbacked => Ok(()),
            FrameSource::Device(dev) => dev.write_block(pageno, page.inner()),
            FrameSource::File(vnode) => vnode.cleanpage(pageno, page.inner()),
        }
    }
}

struct Frame {
    page: Page,
    source: FrameSource,
    pin_count: usize,
    dirty: bool,
    busy: bool,
}

impl Frame {
    fn evictable(&self) -> bool {
        self.source.is_backed()
            && self.pin_count == 0
            && !self.busy
            && !self.dirty
            && self.page.ref_count() == 1
    }
}

static FRAMES: SpinLock<LruMap<(ObjectId, usize), Frame>> = SpinLock::new(LruMap::new());

fn trim(frames: &mut LruMap<(ObjectId, usize), Frame>) {
    while frames.len() > CACHE_TARGET {
        if frames.pop_lru_where(|_, f| f.evictable()).is_none() {
            break;
        }
    }
}

/// Returns the resident frame for (`obj`, `pageno`), filling it from the
/// object on a miss.
///
/// May block on disk I/O. The returned [`Page`] shares memory with the
/// cached frame; holding it keeps the frame from being evicted.
pub fn get(obj: &MemObject, pageno: usize) -> Result<Page, KernelError> {
    let key = (obj.id(), pageno);
    loop {
        // Hit, miss, or mid-fill; decide under the lock, act after it.
        let mut frames = FRAMES.lock();
        let hit = match frames.get(&key) {
            Some(frame) if frame.busy => None,
            Some(frame) => Some(Ok(frame.page.clone())),
            None => {
                // Miss: reserve the key with a busy frame, then fill
                // with the cache lock dropped.
                let page = Page::new();
                frames.put(
                    key,
                    Frame {
                        page: page.clone(),
                        source: obj.frame_source(),
                        pin_count: 0,
                        dirty: false,
                        busy: true,
                    },
                );
                Some(Err(page))
            }
        };
        frames.unlock();

        let mut page = match hit {
            // Another thread is filling this frame; wait for it.
            None => {
                crate::thread::yield_now();
                continue;
            }
            Some(Ok(page)) => return Ok(page),
            Some(Err(page)) => page,
        };

        let filled = obj.fill_page(pageno, &mut page);

        let mut frames = FRAMES.lock();
        match filled {
            Ok(()) => {
                if let Some(frame) = frames.peek(&key) {
                    frame.busy = false;
                }
                trim(&mut frames);
                frames.unlock();
                return Ok(page);
            }
            Err(e) => {
                frames.remove(&key);
                frames.unlock();
                return Err(e);
            }
        }
    }
}

/// Returns the resident frame for (`obj`, `pageno`) if there is one.
///
/// Never fills. A frame mid-fill is waited for; an absent frame returns
/// `None`.
pub fn lookup(obj: &MemObject, pageno: usize) -> Option<Page> {
    let key = (obj.id(), pageno);
    loop {
        let mut frames = FRAMES.lock();
        let state = match frames.get(&key) {
            Some(frame) if frame.busy => None,
            Some(frame) => Some(Some(frame.page.clone())),
            None => Some(None),
        };
        frames.unlock();
        match state {
            // Mid-fill; wait for the filler to finish.
            None => crate::thread::yield_now(),
            Some(page) => return page,
        }
    }
}

/// Marks the frame for (`obj`, `pageno`) dirty.
///
/// The object is told first via its dirty-page hook so the backing store
/// can reserve space (a sparse file region gets its block here); only on
/// success is the frame flagged. The frame is faulted in if absent.
pub fn dirty(obj: &MemObject, pageno: usize) -> Result<(), KernelError> {
    let _page = get(obj, pageno)?;
    obj.dirty_page(pageno)?;
    let mut frames = FRAMES.lock();
    if let Some(frame) = frames.peek(&(obj.id(), pageno)) {
        frame.dirty = true;
    }
    frames.unlock();
    Ok(())
}

/// Writes the frame for (`obj`, `pageno`) back to its source if dirty.
pub fn clean(obj: &MemObject, pageno: usize) -> Result<(), KernelError> {
    clean_key((obj.id(), pageno))
}

fn clean_key(key: (ObjectId, usize)) -> Result<(), KernelError> {
    let mut frames = FRAMES.lock();
    let work = match frames.peek(&key) {
        Some(frame) if frame.dirty => {
            // Hold a pin across the writeback so the frame cannot vanish
            // while the lock is dropped.
            frame.pin_count += 1;
            Some((
                frame.page.clone(),
                match &frame.source {
                    FrameSource::Unbacked => FrameSource::Unbacked,
                    FrameSource::Device(dev) => FrameSource::Device(dev.clone()),
                    FrameSource::File(vnode) => FrameSource::File(vnode.clone()),
                },
            ))
        }
        _ => None,
    };
    frames.unlock();
    let Some((page, source)) = work else {
        return Ok(());
    };

    let result = source.writeback(key.1, &page);

    let mut frames = FRAMES.lock();
    if let Some(frame) = frames.peek(&key) {
        frame.pin_count -= 1;
        if result.is_ok() {
            frame.dirty = false;
        }
    }
    frames.unlock();
    result
}

/// Pins the resident frame for (`obj`, `pageno`). Pins nest.
pub fn pin(obj: &MemObject, pageno: usize) {
    let mut frames = FRAMES.lock();
    if let Some(frame) = frames.peek(&(obj.id(), pageno)) {
        frame.pin_count += 1;
    }
    frames.unlock();
}

/// Drops one pin from the frame for (`obj`, `pageno`).
pub fn unpin(obj: &MemObject, pageno: usize) {
    let mut frames = FRAMES.lock();
    if let Some(frame) = frames.peek(&(obj.id(), pageno)) {
        debug_assert!(frame.pin_count > 0);
        frame.pin_count -= 1;
    }
    frames.unlock();
}

/// Whether a frame is resident for (`obj`, `pageno`).
pub fn resident(obj: &MemObject, pageno: usize) -> bool {
    let mut frames = FRAMES.lock();
    let hit = frames.peek(&(obj.id(), pageno)).is_some();
    frames.unlock();
    hit
}

/// Number of resident frames belonging to `id`.
pub fn resident_count(id: ObjectId) -> usize {
    let mut frames = FRAMES.lock();
    let mut count = 0;
    for ((obj_id, _), _) in frames.iter_mut() {
        if *obj_id == id {
            count += 1;
        }
    }
    frames.unlock();
    count
}

/// Writes back every dirty frame of `id`.
pub fn flush_object(id: ObjectId) -> Result<(), KernelError> {
    let mut frames = FRAMES.lock();
    let keys: alloc::vec::Vec<(ObjectId, usize)> = frames
        .iter_mut()
        .filter(|((obj_id, _), frame)| *obj_id == id && frame.dirty)
        .map(|(key, _)| *key)
        .collect();
    frames.unlock();

    for key in keys {
        clean_key(key)?;
    }
    Ok(())
}

/// Drops every frame of `id` without writeback.
///
/// Used when the object's pages can never be reached again: a dying
/// anonymous or shadow object, or a file whose last link and reference
/// are gone.
pub fn invalidate_object(id: ObjectId) {
    let mut frames = FRAMES.lock();
    frames.retain(|(obj_id, _), _| *obj_id != id);
    frames.unlock();
}

/// Drops the single frame for (`id`, `pageno`) without writeback.
///
/// For pages that have changed identity under the cache, such as a block
/// leaving the free list to become file data.
pub fn discard(id: ObjectId, pageno: usize) {
    let mut frames = FRAMES.lock();
    frames.remove(&(id, pageno));
    frames.unlock();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::mmobj::MemObject;

    #[test]
    fn anonymous_pages_fill_zeroed_and_stay_resident() {
        let obj = MemObject::anonymous();
        let page = get(&obj, 0).unwrap();
        assert!(page.inner().iter().all(|&b| b == 0));
        assert!(resident(&obj, 0));

        // The same key resolves to the same frame.
        let again = get(&obj, 0).unwrap();
        assert_eq!(page.kva(), again.kva());
    }

    #[test]
    fn dead_private_object_releases_frames() {
        let obj = MemObject::anonymous();
        let id = obj.id();
        let _ = get(&obj, 0).unwrap();
        let _ = get(&obj, 3).unwrap();
        assert_eq!(resident_count(id), 2);
        drop(obj);
        assert_eq!(resident_count(id), 0);
    }

    #[test]
    fn pinned_frames_survive_eviction_pressure() {
        use crate::dev::MemDisk;
        use alloc::sync::Arc;

        let disk = MemDisk::new(CACHE_TARGET + 128);
        let obj = MemObject::device(
            crate::dev::DevId::new(1, u16::MAX),
            Arc::new(disk) as Arc<dyn crate::dev::BlockDevice>,
        );

        let first = get(&obj, 0).unwrap();
        pin(&obj, 0);
        drop(first);

        // Flood the cache well past its target; clean unpinned frames of
        // this object become victims, the pinned one must not.
        for pageno in 1..CACHE_TARGET + 128 {
            drop(get(&obj, pageno).unwrap());
        }
        assert!(resident_count(obj.id()) < CACHE_TARGET + 128);
        assert!(resident(&obj, 0));

        unpin(&obj, 0);
        invalidate_object(obj.id());
    }

    #[test]
    fn shadow_fill_copies_from_below() {
        let anon = MemObject::anonymous();
        let mut bottom_page = get(&anon, 7).unwrap();
        bottom_page.inner_mut()[0] = 0xaa;

        let shadow = MemObject::shadow_of(anon.clone());
        // Read path: first hit is the bottom frame, no shadow copy made.
        let read = shadow.lookup_page(7).unwrap();
        assert_eq!(read.kva(), bottom_page.kva());
        assert!(!resident(&shadow, 7));

        // Write path: the shadow gets its own copy.
        let mut copied = get(&shadow, 7).unwrap();
        assert_ne!(copied.kva(), bottom_page.kva());
        assert_eq!(copied.inner()[0], 0xaa);
        copied.inner_mut()[0] = 0xbb;
        assert_eq!(bottom_page.inner()[0], 0xaa);
    }
}
