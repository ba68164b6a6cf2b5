//! Block devices.
//!
//! Devices are addressed by a `(major, minor)` pair packed into a
//! [`DevId`]. The kernel core sees a block device as nothing more than a
//! [`traits::BlockDevice`]: an array of [`BLOCK_SIZE`]-byte blocks with
//! synchronous read and write. Driver internals such as request queues,
//! interrupt handling, and the controller itself live behind that trait in
//! the driver layer.
//!
//! Registered devices are looked up through [`get_bdev`], and a device can
//! be exposed to the VM system as a memory object (its pages 1:1 with its
//! blocks) via [`MemObject::device`].
//!
//! [`MemObject::device`]: crate::mm::mmobj::MemObject::device

use alloc::{boxed::Box, collections::BTreeMap, sync::Arc, vec};

use crate::{sync::SpinLock, KernelError};

/// Size of one device block in bytes. Equal to the page size: the page
/// cache maps device pages straight onto blocks.
pub const BLOCK_SIZE: usize = bedrock::addressing::PAGE_SIZE;

/// Major number of the disk driver class.
pub const DISK_MAJOR: u16 = 1;

/// Device identity: a `(major, minor)` pair.
///
/// The major number selects the driver class, the minor number the
/// instance.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub struct DevId {
    major: u16,
    minor: u16,
}

impl DevId {
    /// Packs a `(major, minor)` pair into a [`DevId`].
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// The driver-class number.
    #[inline]
    pub const fn major(self) -> u16 {
        self.major
    }

    /// The instance number.
    #[inline]
    pub const fn minor(self) -> u16 {
        self.minor
    }

    /// The packed 32-bit form, major in the high half.
    #[inline]
    pub const fn into_u32(self) -> u32 {
        ((self.major as u32) << 16) | self.minor as u32
    }

    /// Unpacks a [`DevId`] from its 32-bit form.
    pub const fn from_u32(raw: u32) -> Self {
        Self {
            major: (raw >> 16) as u16,
            minor: raw as u16,
        }
    }
}

/// Traits implemented by device drivers.
pub mod traits {
    use super::BLOCK_SIZE;
    use crate::KernelError;

    /// A synchronous block device.
    ///
    /// Both operations may suspend the calling thread until the transfer
    /// completes; they must therefore never be called from interrupt
    /// context.
    pub trait BlockDevice: Send + Sync {
        /// Reads block `block` into `buf`.
        fn read_block(&self, block: usize, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), KernelError>;

        /// Writes `buf` to block `block`.
        fn write_block(&self, block: usize, buf: &[u8; BLOCK_SIZE]) -> Result<(), KernelError>;

        /// Number of blocks on the device.
        fn block_count(&self) -> usize;
    }
}

pub use traits::BlockDevice;

static BDEVS: SpinLock<BTreeMap<DevId, Arc<dyn BlockDevice>>> = SpinLock::new(BTreeMap::new());

/// Registers a block device under `devid`, replacing any previous
/// registration.
pub fn register_bdev(devid: DevId, dev: Arc<dyn BlockDevice>) {
    let mut bdevs = BDEVS.lock();
    bdevs.insert(devid, dev);
    bdevs.unlock();
}

/// Looks up the block device registered under `devid`.
pub fn get_bdev(devid: DevId) -> Option<Arc<dyn BlockDevice>> {
    let bdevs = BDEVS.lock();
    let dev = bdevs.get(&devid).cloned();
    bdevs.unlock();
    dev
}

/// Resolves a root-device name of the form `"diskN"` to its [`DevId`] on
/// the disk major.
pub fn resolve_disk_name(name: &str) -> Result<DevId, KernelError> {
    let minor = name
        .strip_prefix("disk")
        .and_then(|n| n.parse::<u16>().ok())
        .ok_or(KernelError::NoSuchDevice)?;
    Ok(DevId::new(DISK_MAJOR, minor))
}

/// A RAM-backed block device.
///
/// Stands in for a disk wherever one is needed without hardware: the
/// test suites format file systems on it, and cloning the handle yields a
/// second view of the *same* storage, which is how a remount observes what
/// a previous mount wrote.
#[derive(Clone)]
pub struct MemDisk {
    blocks: Arc<SpinLock<Box<[u8]>>>,
    block_count: usize,
}

impl MemDisk {
    /// Creates a zero-filled RAM disk of `block_count` blocks.
    pub fn new(block_count: usize) -> Self {
        Self {
            blocks: Arc::new(SpinLock::new(
                vec![0u8; block_count * BLOCK_SIZE].into_boxed_slice(),
            )),
            block_count,
        }
    }
}

impl traits::BlockDevice for MemDisk {
    fn read_block(&self, block: usize, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), KernelError> {
        if block >= self.block_count {
            return Err(KernelError::InvalidArgument);
        }
        let blocks = self.blocks.lock();
        buf.copy_from_slice(&blocks[block * BLOCK_SIZE..(block + 1) * BLOCK_SIZE]);
        blocks.unlock();
        Ok(())
    }

    fn write_block(&self, block: usize, buf: &[u8; BLOCK_SIZE]) -> Result<(), KernelError> {
        if block >= self.block_count {
            return Err(KernelError::InvalidArgument);
        }
        let mut blocks = self.blocks.lock();
        blocks[block * BLOCK_SIZE..(block + 1) * BLOCK_SIZE].copy_from_slice(buf);
        blocks.unlock();
        Ok(())
    }

    fn block_count(&self) -> usize {
        self.block_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_names_resolve_to_the_disk_major() {
        assert_eq!(resolve_disk_name("disk0").unwrap(), DevId::new(1, 0));
        assert_eq!(resolve_disk_name("disk7").unwrap(), DevId::new(1, 7));
        assert_eq!(
            resolve_disk_name("floppy0"),
            Err(KernelError::NoSuchDevice)
        );
        assert_eq!(resolve_disk_name("disk"), Err(KernelError::NoSuchDevice));
    }

    #[test]
    fn memdisk_round_trips_blocks() {
        let disk = MemDisk::new(8);
        let mut buf = [0u8; BLOCK_SIZE];
        buf[0] = 0x5a;
        buf[BLOCK_SIZE - 1] = 0xa5;
        disk.write_block(3, &buf).unwrap();

        let view = disk.clone();
        let mut back = [0u8; BLOCK_SIZE];
        view.read_block(3, &mut back).unwrap();
        assert_eq!(buf, back);
        assert!(disk.read_block(8, &mut back).is_err());
    }
}
