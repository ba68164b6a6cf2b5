//! Shared setup for the integration tests.
//!
//! Every test formats its own RAM disk and registers it under a fresh
//! minor number, so the suite can run in parallel against the shared
//! kernel page cache.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use osmium::{
    dev::{self, DevId, MemDisk, DISK_MAJOR},
    fs::{traits::FileSystem as _, Vnode},
    proc::Process,
};
use s5fs::S5FileSystem;

static NEXT_MINOR: AtomicU16 = AtomicU16::new(0);

pub struct Fixture {
    pub fs: S5FileSystem,
    pub root: Vnode,
    pub devid: DevId,
    pub disk: MemDisk,
}

/// Formats and mounts a fresh file system.
pub fn fresh_fs(blocks: usize, inodes: u32) -> Fixture {
    let minor = NEXT_MINOR.fetch_add(1, Ordering::SeqCst);
    let devid = DevId::new(DISK_MAJOR, minor);
    let disk = MemDisk::new(blocks);
    s5fs::mkfs(&disk, inodes).unwrap();
    dev::register_bdev(devid, Arc::new(disk.clone()));

    let fs = S5FileSystem::mount(devid).unwrap();
    let root = fs.root().unwrap();
    Fixture {
        fs,
        root,
        devid,
        disk,
    }
}

/// A process whose root and cwd are the fixture's root directory.
pub fn process_on(root: &Vnode) -> Process {
    Process::new("test", root.clone())
}
