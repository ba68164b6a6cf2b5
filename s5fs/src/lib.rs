//! # S5FS: a System-V-style file system.
//!
//! The on-disk layer behind the kernel's VFS. The kernel sees only vnodes;
//! this crate supplies them, backed by a fixed, little-endian disk format
//! of 4 KiB blocks:
//!
//! ```text
//! +--------------------+  block 0
//! | boot block         |  untouched by the file system
//! +--------------------+  block 1
//! | superblock         |  magic, version, free-list heads, root inode
//! +--------------------+  block 2
//! | inode blocks       |  fixed-size inodes, 64 per block
//! |   ...              |
//! +--------------------+
//! | data blocks        |  file contents, directories, indirect blocks,
//! |   ...              |  and the chained free list
//! +--------------------+
//! ```
//!
//! Every layer of a file operation is visible from here down:
//!
//! ```text
//! +-----------------------------+
//! | osmium::fs (vnode, open     |
//! |   files, path walk)         |
//! +-------------+---------------+
//!               |
//! +-------------v---------------+
//! | S5Node (vnode operations,   |
//! |   directory entries)        |
//! +-------------+---------------+
//!               |
//! +-------------v---------------+
//! | inode block maps            |
//! |   (direct + indirect)       |
//! +-------------+---------------+
//!               |
//! +-------------v---------------+
//! | page cache / block device   |
//! +-----------------------------+
//! ```
//!
//! File contents and directory tables are read and written through each
//! file's memory object in the kernel page cache; inode blocks, indirect
//! blocks, and the superblock page through the *device's* memory object.
//! Writeback of either happens on `sync`, on unmount, or when the cache
//! evicts.

#![cfg_attr(not(test), no_std)]
#![deny(rustdoc::broken_intra_doc_links)]

extern crate alloc;

#[allow(unused_imports)]
#[macro_use]
extern crate bedrock;

macro_rules! const_assert {
    ($($tt:tt)*) => {
        const _: () = assert!($($tt)*);
    }
}

pub mod disk_layout;
pub mod fs;
pub mod mkfs;
pub mod node;

pub use fs::S5FileSystem;
pub use mkfs::mkfs;

use osmium::{dev, fs::Vnode, KernelError};

/// File-system magic, first word of the superblock.
pub const S5_MAGIC: u32 = 0x5335_4653;

/// Current on-disk format version.
pub const S5_CURRENT_VERSION: u32 = 1;

/// Size of one file-system block in bytes.
pub const S5_BLOCK_SIZE: usize = 4096;
const_assert!(S5_BLOCK_SIZE == osmium::dev::BLOCK_SIZE);

/// Number of direct block pointers in an inode.
pub const S5_NDIRECT: usize = 12;

/// Number of block pointers in an indirect block.
pub const S5_NINDIRECT: usize = S5_BLOCK_SIZE / core::mem::size_of::<u32>();

/// Largest possible file, in blocks.
pub const S5_MAX_FILE_BLOCKS: usize = S5_NDIRECT + S5_NINDIRECT;

/// Longest stored name of a directory entry.
pub const S5_NAME_LEN: usize = 28;

/// Block number of the superblock.
pub const S5_SUPER_BLOCK: usize = 1;

/// First inode block.
pub const S5_INODE_START: usize = 2;

/// Mounts the root file system named on the kernel command line.
///
/// The root device is the token `diskN` (minor `N` on the disk major);
/// a `root=` prefix is accepted. Returns the mounted file system and its
/// root vnode.
pub fn boot_mount(cmdline: &str) -> Result<(S5FileSystem, Vnode), KernelError> {
    let name = cmdline
        .split_whitespace()
        .map(|tok| tok.strip_prefix("root=").unwrap_or(tok))
        .find(|tok| tok.starts_with("disk"))
        .ok_or(KernelError::NoSuchDevice)?;
    let devid = dev::resolve_disk_name(name)?;
    let fs = S5FileSystem::mount(devid)?;
    let root = osmium::fs::traits::FileSystem::root(&fs)?;
    Ok((fs, root))
}
