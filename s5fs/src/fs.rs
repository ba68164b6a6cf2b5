//! The mounted file system.
//!
//! [`S5FileSystem`] owns everything one mounted instance needs: the block
//! device and the memory object that pages its metadata blocks, the
//! in-memory superblock behind the per-file-system mutex, and the vnode
//! table.
//!
//! ## Metadata paging
//!
//! Inode blocks, indirect blocks, the superblock, and the free-list links
//! are read and modified through the *device's* pages in the kernel page
//! cache ([`block_page`]/[`dirty_block`]): a metadata update dirties the
//! page and writeback happens on [`sync`], on unmount, or when the cache
//! evicts. File contents never come through here; they page through each
//! file's own memory object.
//!
//! ## The vnode table
//!
//! [`get_vnode`] keeps the at-most-one-vnode-per-inode invariant: a hit
//! returns the cached node, a miss loads the on-disk inode *outside* the
//! table lock and inserts. Unlinked inodes are freed once nothing refers
//! to them (no directory entry, no handle, no cached page), which is
//! checked at unlink time and again at [`sync`] for files that were still
//! open when unlinked.
//!
//! [`block_page`]: S5FileSystemInner::block_page
//! [`dirty_block`]: S5FileSystemInner::dirty_block
//! [`get_vnode`]: S5FileSystemInner::get_vnode
//! [`sync`]: S5FileSystemInner::sync

use alloc::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    vec::Vec,
};

use osmium::{
    dev::{self, BlockDevice, DevId},
    fs::{traits, FsId, InodeNumber, Vnode},
    mm::{mmobj::MemObject, mmobj::ObjectId, pframe, Page},
    sync::{Mutex, SpinLock},
    KernelError,
};

use crate::{
    disk_layout::{inode_block, inode_offset, RawInode, RawInodeType, RawSuperblock},
    node::S5Node,
    S5_CURRENT_VERSION, S5_MAGIC, S5_SUPER_BLOCK,
};

/// In-memory copy of the superblock.
///
/// Guarded by the per-file-system mutex; every free-list mutation runs
/// under it.
pub(crate) struct Superblock {
    pub ninodes: u32,
    pub free_inode: u32,
    pub free_block: u32,
    pub root_ino: u32,
    pub nblocks: u32,
}

pub(crate) struct S5FileSystemInner {
    fsid: FsId,
    pub(crate) devid: DevId,
    pub(crate) dev: Arc<dyn BlockDevice>,
    /// The device's pages in the page cache; all metadata goes through
    /// this object.
    dev_obj: MemObject,
    sb: Mutex<Superblock>,
    vnodes: SpinLock<BTreeMap<InodeNumber, Arc<S5Node>>>,
}

/// A mounted S5 file system.
#[derive(Clone)]
pub struct S5FileSystem(pub(crate) Arc<S5FileSystemInner>);

impl core::fmt::Debug for S5FileSystem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("S5FileSystem")
            .field("devid", &self.0.devid)
            .finish()
    }
}

impl S5FileSystem {
    /// Mounts the file system on the block device registered under
    /// `devid`.
    ///
    /// Panics if the superblock does not carry the S5 magic and current
    /// version: a device that claims to be S5 and is not is corruption,
    /// and corruption is fatal.
    pub fn mount(devid: DevId) -> Result<Self, KernelError> {
        let bdev = dev::get_bdev(devid).ok_or(KernelError::NoSuchDevice)?;
        let dev_obj = MemObject::device(devid, bdev.clone());

        let page = pframe::get(&dev_obj, S5_SUPER_BLOCK)?;
        let raw = unsafe { &*(page.inner().as_ptr() as *const RawSuperblock) };
        if raw.magic != S5_MAGIC {
            panic!("s5fs: bad superblock magic on {:?}", devid);
        }
        if raw.version != S5_CURRENT_VERSION {
            panic!(
                "s5fs: superblock version {} (expected {}) on {:?}",
                raw.version, S5_CURRENT_VERSION, devid
            );
        }

        let inner = S5FileSystemInner {
            fsid: FsId::alloc(),
            devid,
            dev: bdev,
            dev_obj,
            sb: Mutex::new(Superblock {
                ninodes: raw.ninodes,
                free_inode: raw.free_inode,
                free_block: raw.free_block,
                root_ino: raw.root_ino,
                nblocks: raw.nblocks,
            }),
            vnodes: SpinLock::new(BTreeMap::new()),
        };
        info!(
            "s5fs: mounted {:?}: {} inodes, {} blocks",
            devid, raw.ninodes, raw.nblocks
        );
        Ok(S5FileSystem(Arc::new(inner)))
    }
}

impl S5FileSystemInner {
    pub(crate) fn fsid(&self) -> FsId {
        self.fsid
    }

    /// The page-cache identity of a file's pages.
    pub(crate) fn file_obj_id(&self, ino: InodeNumber) -> ObjectId {
        ObjectId::Vnode(self.fsid, ino)
    }

    /// The cached page holding metadata block `blockno`.
    pub(crate) fn block_page(&self, blockno: usize) -> Result<Page, KernelError> {
        pframe::get(&self.dev_obj, blockno)
    }

    /// Marks metadata block `blockno` dirty in the page cache.
    pub(crate) fn dirty_block(&self, blockno: usize) -> Result<(), KernelError> {
        pframe::dirty(&self.dev_obj, blockno)
    }

    /// Reads the on-disk inode `ino`.
    pub(crate) fn read_raw_inode(&self, ino: u32) -> Result<RawInode, KernelError> {
        let page = self.block_page(inode_block(ino))?;
        let raw = unsafe {
            core::ptr::read(page.inner()[inode_offset(ino)..].as_ptr() as *const RawInode)
        };
        Ok(raw)
    }

    /// Writes the on-disk inode `ino` and dirties its block.
    pub(crate) fn write_raw_inode(&self, ino: u32, raw: &RawInode) -> Result<(), KernelError> {
        let mut page = self.block_page(inode_block(ino))?;
        unsafe {
            core::ptr::write(
                page.inner_mut()[inode_offset(ino)..].as_mut_ptr() as *mut RawInode,
                *raw,
            );
        }
        self.dirty_block(inode_block(ino))
    }

    /// Allocates a zeroed data block off the free chain.
    pub(crate) fn alloc_block(&self) -> Result<u32, KernelError> {
        let mut sb = self.sb.lock();
        let head = sb.free_block;
        if head == 0 {
            sb.unlock();
            return Err(KernelError::NoSpace);
        }
        // The free block's first word links to the next one.
        let next = match self.block_page(head as usize) {
            Ok(page) => u32::from_le_bytes(page.inner()[..4].try_into().unwrap()),
            Err(e) => {
                sb.unlock();
                return Err(e);
            }
        };
        sb.free_block = next;
        sb.unlock();

        // The block stops being metadata the moment it leaves the free
        // list: drop the cached link page so a stale copy can never be
        // written over the block's new contents, and zero it on disk for
        // whoever reads it next (an indirect block must start empty).
        pframe::discard(self.dev_obj.id(), head as usize);
        let zeroes = alloc::boxed::Box::new([0u8; osmium::dev::BLOCK_SIZE]);
        self.dev.write_block(head as usize, &zeroes)?;
        Ok(head)
    }

    /// Returns a data block to the free chain.
    pub(crate) fn free_block(&self, blockno: u32) -> Result<(), KernelError> {
        let mut sb = self.sb.lock();
        let result = self.block_page(blockno as usize).map(|mut page| {
            page.inner_mut().fill(0);
            page.inner_mut()[..4].copy_from_slice(&sb.free_block.to_le_bytes());
        });
        match result.and_then(|()| self.dirty_block(blockno as usize)) {
            Ok(()) => {
                sb.free_block = blockno;
                sb.unlock();
                Ok(())
            }
            Err(e) => {
                sb.unlock();
                Err(e)
            }
        }
    }

    /// Allocates an inode of type `typ` off the free-inode list.
    ///
    /// For device inodes `extra` is the device id; it lands in the
    /// indirect slot.
    pub(crate) fn alloc_inode(
        &self,
        typ: RawInodeType,
        extra: u32,
    ) -> Result<InodeNumber, KernelError> {
        let mut sb = self.sb.lock();
        let ino = sb.free_inode;
        if ino == 0 {
            sb.unlock();
            return Err(KernelError::NoSpace);
        }
        // The free inode's indirect slot links to the next free one.
        let result = self.read_raw_inode(ino).and_then(|raw| {
            debug_assert_eq!(raw.typ, RawInodeType::Free as u16);
            sb.free_inode = raw.indirect;
            self.write_raw_inode(
                ino,
                &RawInode {
                    typ: typ as u16,
                    nlink: 0,
                    size: 0,
                    direct: [0; crate::S5_NDIRECT],
                    indirect: extra,
                    _pad: 0,
                },
            )
        });
        sb.unlock();
        result.map(|()| InodeNumber::new(ino).unwrap())
    }

    /// Frees an inode: its data blocks first, then the inode itself back
    /// onto the free-inode list.
    pub(crate) fn free_inode(&self, ino: InodeNumber) -> Result<(), KernelError> {
        let raw = self.read_raw_inode(ino.into_u32())?;
        let typ = RawInodeType::try_from(raw.typ)
            .map_err(|_| KernelError::FilesystemCorrupted("unknown inode type"))?;

        // Device inodes keep their device id in the indirect slot; there
        // are no data blocks behind them.
        if matches!(typ, RawInodeType::Data | RawInodeType::Dir) {
            for blockno in raw.direct.iter().filter(|&&b| b != 0) {
                self.free_block(*blockno)?;
            }
            if raw.indirect != 0 {
                let entries: Vec<u32> = {
                    let page = self.block_page(raw.indirect as usize)?;
                    page.inner()
                        .chunks_exact(4)
                        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
                        .filter(|&b| b != 0)
                        .collect()
                };
                for blockno in entries {
                    self.free_block(blockno)?;
                }
                self.free_block(raw.indirect)?;
            }
        }

        pframe::invalidate_object(self.file_obj_id(ino));

        let mut sb = self.sb.lock();
        let result = self.write_raw_inode(
            ino.into_u32(),
            &RawInode {
                typ: RawInodeType::Free as u16,
                nlink: 0,
                size: 0,
                direct: [0; crate::S5_NDIRECT],
                indirect: sb.free_inode,
                _pad: 0,
            },
        );
        if result.is_ok() {
            sb.free_inode = ino.into_u32();
        }
        sb.unlock();
        result
    }

    /// The unique in-memory node for `ino`, loading it on a miss.
    pub(crate) fn get_node(self: &Arc<Self>, ino: InodeNumber) -> Result<Arc<S5Node>, KernelError> {
        let vnodes = self.vnodes.lock();
        if let Some(node) = vnodes.get(&ino) {
            let node = node.clone();
            vnodes.unlock();
            return Ok(node);
        }
        vnodes.unlock();

        // Load outside the table lock; racing loaders are reconciled
        // below.
        let raw = self.read_raw_inode(ino.into_u32())?;
        let node = Arc::new(S5Node::from_raw(Arc::downgrade(self), self.fsid, ino, &raw)?);

        let mut vnodes = self.vnodes.lock();
        let node = vnodes.entry(ino).or_insert(node).clone();
        vnodes.unlock();
        Ok(node)
    }

    /// The vnode handle for `ino`.
    pub(crate) fn node_vnode(self: &Arc<Self>, ino: InodeNumber) -> Result<Vnode, KernelError> {
        Ok(Vnode(self.get_node(ino)?))
    }

    /// Drops the in-memory node for `ino` without touching the disk.
    ///
    /// For error paths that allocated an inode, loaded it, and then
    /// failed to link it anywhere.
    pub(crate) fn forget_node(&self, ino: InodeNumber) {
        let mut vnodes = self.vnodes.lock();
        vnodes.remove(&ino);
        vnodes.unlock();
    }

    /// Frees `ino` if it has no links, no outside references, and no
    /// cached pages beyond what the cache itself holds.
    pub(crate) fn try_reap(self: &Arc<Self>, ino: InodeNumber) -> Result<(), KernelError> {
        let vnodes = self.vnodes.lock();
        let Some(node) = vnodes.get(&ino).cloned() else {
            vnodes.unlock();
            return Ok(());
        };
        vnodes.unlock();

        if node.nlink() > 0 {
            return Ok(());
        }
        // Two handles are ours (table + local); cached frames of the file
        // hold one each.
        let frames = pframe::resident_count(self.file_obj_id(ino));
        if Arc::strong_count(&node) > 2 + frames {
            return Ok(());
        }

        pframe::invalidate_object(self.file_obj_id(ino));
        let mut vnodes = self.vnodes.lock();
        vnodes.remove(&ino);
        vnodes.unlock();
        drop(node);
        self.free_inode(ino)
    }

    /// Reaps every unlinked, unreferenced inode still in the table.
    fn reap_orphans(self: &Arc<Self>) -> Result<(), KernelError> {
        let vnodes = self.vnodes.lock();
        let inos: Vec<InodeNumber> = vnodes.keys().copied().collect();
        vnodes.unlock();
        for ino in inos {
            self.try_reap(ino)?;
        }
        Ok(())
    }

    /// Writes every dirty page and inode back to the device.
    pub(crate) fn sync(self: &Arc<Self>) -> Result<(), KernelError> {
        self.reap_orphans()?;

        // File pages first, then the inodes that describe them, then the
        // superblock, then the metadata pages that carry both.
        let vnodes = self.vnodes.lock();
        let nodes: Vec<Arc<S5Node>> = vnodes.values().cloned().collect();
        vnodes.unlock();

        for node in &nodes {
            pframe::flush_object(self.file_obj_id(node.ino()))?;
            node.update()?;
        }

        let sb = self.sb.lock();
        let raw = RawSuperblock {
            magic: S5_MAGIC,
            version: S5_CURRENT_VERSION,
            ninodes: sb.ninodes,
            free_inode: sb.free_inode,
            free_block: sb.free_block,
            root_ino: sb.root_ino,
            nblocks: sb.nblocks,
        };
        sb.unlock();
        let mut page = self.block_page(S5_SUPER_BLOCK)?;
        unsafe {
            core::ptr::write(page.inner_mut().as_mut_ptr() as *mut RawSuperblock, raw);
        }
        self.dirty_block(S5_SUPER_BLOCK)?;

        pframe::flush_object(self.dev_obj.id())
    }

    /// Validates that on-disk link counts agree with the directory tree.
    ///
    /// Walks every directory reachable from the root, counting the
    /// entries that refer to each inode (`.` entries do not contribute),
    /// and compares the counts against the on-disk inodes.
    pub(crate) fn check_refcounts(self: &Arc<Self>) -> Result<(), KernelError> {
        self.sync()?;

        let root = {
            let sb = self.sb.lock();
            let root = sb.root_ino;
            sb.unlock();
            root
        };

        let mut counted: BTreeMap<u32, u16> = BTreeMap::new();
        let mut visited: BTreeSet<u32> = BTreeSet::new();
        let mut pending: Vec<u32> = alloc::vec![root];

        while let Some(dir_ino) = pending.pop() {
            if !visited.insert(dir_ino) {
                continue;
            }
            let dir = self.get_node(
                InodeNumber::new(dir_ino)
                    .ok_or(KernelError::FilesystemCorrupted("entry names inode zero"))?,
            )?;
            for entry in dir.dirents()? {
                let Some(name) = entry.name() else {
                    return Err(KernelError::FilesystemCorrupted("bad entry name"));
                };
                if name == "." {
                    continue;
                }
                *counted.entry(entry.ino).or_insert(0) += 1;
                if name == ".." {
                    continue;
                }
                let raw = self.read_raw_inode(entry.ino)?;
                if raw.typ == RawInodeType::Dir as u16 {
                    pending.push(entry.ino);
                }
            }
        }

        // Every allocated inode must be referenced exactly its link
        // count's worth, and nothing unreachable may stay allocated.
        let ninodes = {
            let sb = self.sb.lock();
            let n = sb.ninodes;
            sb.unlock();
            n
        };
        for ino in 1..=ninodes {
            let raw = self.read_raw_inode(ino)?;
            if raw.typ == RawInodeType::Free as u16 {
                continue;
            }
            let expect = counted.get(&ino).copied().unwrap_or(0);
            if raw.nlink != expect {
                return Err(KernelError::FilesystemCorrupted("link count mismatch"));
            }
        }
        Ok(())
    }

    /// Flushes everything, validates link counts, and drops the caches.
    pub(crate) fn unmount(self: &Arc<Self>) -> Result<(), KernelError> {
        self.sync()?;
        if self.check_refcounts().is_err() {
            panic!("s5fs: link count mismatch during unmount of {:?}", self.devid);
        }

        let mut vnodes = self.vnodes.lock();
        let nodes: Vec<InodeNumber> = vnodes.keys().copied().collect();
        vnodes.clear();
        vnodes.unlock();
        for ino in nodes {
            pframe::invalidate_object(self.file_obj_id(ino));
        }
        pframe::invalidate_object(self.dev_obj.id());
        Ok(())
    }
}

impl traits::FileSystem for S5FileSystem {
    fn fsid(&self) -> FsId {
        self.0.fsid
    }

    fn root(&self) -> Result<Vnode, KernelError> {
        let root = {
            let sb = self.0.sb.lock();
            let root = sb.root_ino;
            sb.unlock();
            root
        };
        self.0
            .node_vnode(InodeNumber::new(root).ok_or(KernelError::FilesystemCorrupted(
                "superblock names no root inode",
            ))?)
    }

    fn get_vnode(&self, ino: InodeNumber) -> Result<Vnode, KernelError> {
        self.0.node_vnode(ino)
    }

    fn sync(&self) -> Result<(), KernelError> {
        self.0.sync()
    }

    fn check_refcounts(&self) -> Result<(), KernelError> {
        self.0.check_refcounts()
    }

    fn unmount(&self) -> Result<(), KernelError> {
        self.0.unmount()
    }
}
