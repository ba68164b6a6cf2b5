//! File-system formatting.
//!
//! [`mkfs`] lays a fresh, empty file system onto a block device: the
//! superblock, the inode table threaded onto the free-inode list, the
//! chained free-block list, and a root directory holding `.` and `..`.
//! Writes go straight to the device; there is nothing cached to keep
//! coherent before the first mount.

use osmium::{dev::BlockDevice, KernelError};

use crate::{
    disk_layout::{RawDirent, RawInode, RawInodeType, RawSuperblock, S5_INODES_PER_BLOCK},
    S5_BLOCK_SIZE, S5_CURRENT_VERSION, S5_INODE_START, S5_MAGIC, S5_NDIRECT, S5_SUPER_BLOCK,
};

/// Inode number of the root directory.
pub const S5_ROOT_INO: u32 = 1;

/// Formats `dev` with `ninodes` inodes.
///
/// Everything previously on the device is gone. Fails with
/// [`KernelError::InvalidArgument`] if the device cannot hold the
/// metadata plus at least the root directory's block.
pub fn mkfs(dev: &dyn BlockDevice, ninodes: u32) -> Result<(), KernelError> {
    let nblocks = dev.block_count();
    if ninodes == 0 {
        return Err(KernelError::InvalidArgument);
    }
    let inode_blocks = (ninodes as usize).div_ceil(S5_INODES_PER_BLOCK);
    let root_block = S5_INODE_START + inode_blocks;
    if nblocks <= root_block + 1 {
        return Err(KernelError::InvalidArgument);
    }

    let mut buf = [0u8; S5_BLOCK_SIZE];

    // Inode table. Inode 1 is the root directory; the rest thread onto
    // the free list through their indirect slots.
    for blk in 0..inode_blocks {
        buf.fill(0);
        for slot in 0..S5_INODES_PER_BLOCK {
            let ino = (blk * S5_INODES_PER_BLOCK + slot + 1) as u32;
            if ino > ninodes {
                break;
            }
            let raw = if ino == S5_ROOT_INO {
                RawInode {
                    typ: RawInodeType::Dir as u16,
                    // Only the root's own `..` refers to it so far.
                    nlink: 1,
                    size: (2 * crate::disk_layout::S5_DIRENT_SIZE) as u32,
                    direct: {
                        let mut direct = [0u32; S5_NDIRECT];
                        direct[0] = root_block as u32;
                        direct
                    },
                    indirect: 0,
                    _pad: 0,
                }
            } else {
                RawInode {
                    typ: RawInodeType::Free as u16,
                    nlink: 0,
                    size: 0,
                    direct: [0; S5_NDIRECT],
                    indirect: if ino < ninodes { ino + 1 } else { 0 },
                    _pad: 0,
                }
            };
            unsafe {
                core::ptr::write(
                    buf[slot * crate::disk_layout::S5_INODE_SIZE..].as_mut_ptr()
                        as *mut RawInode,
                    raw,
                );
            }
        }
        dev.write_block(S5_INODE_START + blk, &buf)?;
    }

    // The root directory's one data block.
    buf.fill(0);
    let dot = RawDirent::new(S5_ROOT_INO, ".").unwrap();
    let dotdot = RawDirent::new(S5_ROOT_INO, "..").unwrap();
    unsafe {
        core::ptr::write(buf.as_mut_ptr() as *mut RawDirent, dot);
        core::ptr::write(
            buf[crate::disk_layout::S5_DIRENT_SIZE..].as_mut_ptr() as *mut RawDirent,
            dotdot,
        );
    }
    dev.write_block(root_block, &buf)?;

    // Chain the remaining blocks onto the free list; each free block's
    // first word names the next.
    let first_free = root_block + 1;
    for blockno in first_free..nblocks {
        buf.fill(0);
        let next = if blockno + 1 < nblocks {
            (blockno + 1) as u32
        } else {
            0
        };
        buf[..4].copy_from_slice(&next.to_le_bytes());
        dev.write_block(blockno, &buf)?;
    }

    // The superblock last: a crash mid-format leaves no magic behind.
    buf.fill(0);
    let sb = RawSuperblock {
        magic: S5_MAGIC,
        version: S5_CURRENT_VERSION,
        ninodes,
        free_inode: if ninodes >= 2 { 2 } else { 0 },
        free_block: first_free as u32,
        root_ino: S5_ROOT_INO,
        nblocks: nblocks as u32,
    };
    unsafe {
        core::ptr::write(buf.as_mut_ptr() as *mut RawSuperblock, sb);
    }
    dev.write_block(S5_SUPER_BLOCK, &buf)?;
    Ok(())
}
