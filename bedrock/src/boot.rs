//! Multiboot hand-off.
//!
//! The kernel image is a multiboot object: the loader finds the header in
//! the first pages of the image, checks [`HEADER_MAGIC`], honours the flags,
//! and enters the kernel with `%eax` = [`BOOTLOADER_MAGIC`] and `%ebx`
//! pointing at a [`RawInfo`] block. The entry stub preserves that pointer
//! across the switch to the high half and hands it to the kernel proper,
//! which calls [`BootInfo::parse`] exactly once to lift the raw block into
//! owned structures before the low identity mapping goes away.

use core::ops::Range;

use arrayvec::ArrayVec;

use crate::addressing::Pa;

/// Magic value the multiboot header must carry.
pub const HEADER_MAGIC: u32 = 0x1bad_b002;

/// Magic value the loader leaves in `%eax` at kernel entry.
pub const BOOTLOADER_MAGIC: u32 = 0x2bad_b002;

bitflags::bitflags! {
    /// Header flags requested from the loader.
    pub struct HeaderFlags: u32 {
        /// Align boot modules on page boundaries.
        const PAGE_ALIGN = 1 << 0;
        /// Pass memory information.
        const MEMORY_INFO = 1 << 1;
    }
}

bitflags::bitflags! {
    /// Validity flags of the fields in [`RawInfo`].
    pub struct InfoFlags: u32 {
        /// `mem_lower`/`mem_upper` are valid.
        const MEMORY = 1 << 0;
        /// `boot_device` is valid.
        const BOOTDEV = 1 << 1;
        /// `cmdline` is valid.
        const CMDLINE = 1 << 2;
        /// `mmap_length`/`mmap_addr` are valid.
        const MMAP = 1 << 6;
    }
}

/// The information block as the loader lays it out in memory.
#[repr(C)]
pub struct RawInfo {
    /// Field-validity flags; see [`InfoFlags`].
    pub flags: u32,
    /// KiB of conventional memory below 1 MiB.
    pub mem_lower: u32,
    /// KiB of memory above 1 MiB.
    pub mem_upper: u32,
    /// BIOS boot device.
    pub boot_device: u32,
    /// Physical address of the NUL-terminated command line.
    pub cmdline: u32,
    /// Count of boot modules.
    pub mods_count: u32,
    /// Physical address of the module list.
    pub mods_addr: u32,
    syms: [u32; 4],
    /// Total size of the memory-map buffer.
    pub mmap_length: u32,
    /// Physical address of the memory-map buffer.
    pub mmap_addr: u32,
}

/// One entry of the loader's memory map.
///
/// Entries are variable-sized on disk: `size` counts the bytes that follow
/// it, so the next entry lives at `size + 4` bytes past the current one.
#[repr(C, packed)]
struct RawMmapEntry {
    size: u32,
    addr: u64,
    len: u64,
    typ: u32,
}

const MMAP_AVAILABLE: u32 = 1;

/// A contiguous physical memory region reported by the loader.
#[derive(Clone)]
pub struct Region {
    /// Physical address range of the region.
    pub addr: Range<Pa>,
    /// Whether the region is usable RAM.
    pub usable: bool,
}

/// The loader's view of physical memory.
pub struct Regions(ArrayVec<Region, 32>);

impl Regions {
    /// Iterates over the reported regions.
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.0.iter()
    }
}

/// Owned boot information, lifted out of the loader's buffers.
pub struct BootInfo {
    /// The physical memory map.
    pub regions: Regions,
    /// The kernel command line, without the trailing NUL.
    pub cmdline: Option<&'static [u8]>,
}

impl BootInfo {
    /// Parses the raw information block.
    ///
    /// # Safety
    /// `raw` must point at a live multiboot information block and the
    /// loader's buffers (memory map, command line) must still be mapped at
    /// their physical addresses.
    pub unsafe fn parse(raw: &'static RawInfo) -> Self {
        let flags = InfoFlags::from_bits_truncate(raw.flags);
        let mut regions = ArrayVec::new();

        if flags.contains(InfoFlags::MMAP) {
            let mut off = 0usize;
            while off < raw.mmap_length as usize && !regions.is_full() {
                let entry = unsafe {
                    &*((raw.mmap_addr as usize + off) as *const RawMmapEntry)
                };
                let base = entry.addr as usize;
                let len = entry.len as usize;
                if let (Some(start), Some(end)) = (Pa::new(base), Pa::new(base + len)) {
                    regions.push(Region {
                        addr: start..end,
                        usable: entry.typ == MMAP_AVAILABLE,
                    });
                }
                off += entry.size as usize + 4;
            }
        } else if flags.contains(InfoFlags::MEMORY) {
            // No full map; synthesize the two classic ranges.
            let low_end = Pa::new(raw.mem_lower as usize * 1024).unwrap_or(Pa::ZERO);
            regions.push(Region {
                addr: Pa::ZERO..low_end,
                usable: true,
            });
            if let (Some(start), Some(end)) = (
                Pa::new(0x10_0000),
                Pa::new(0x10_0000 + raw.mem_upper as usize * 1024),
            ) {
                regions.push(Region {
                    addr: start..end,
                    usable: true,
                });
            }
        }

        let cmdline = if flags.contains(InfoFlags::CMDLINE) && raw.cmdline != 0 {
            let base = raw.cmdline as usize as *const u8;
            let mut len = 0usize;
            unsafe {
                while *base.add(len) != 0 {
                    len += 1;
                }
                Some(core::slice::from_raw_parts(base, len))
            }
        } else {
            None
        };

        BootInfo {
            regions: Regions(regions),
            cmdline,
        }
    }
}
