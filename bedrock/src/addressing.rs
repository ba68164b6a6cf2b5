//! Physical and virtual memory addressing for the 32-bit x86 layout.
//!
//! The kernel lives in the high part of every address space: virtual
//! addresses from [`KERNEL_BASE`] up are kernel mappings shared by all
//! processes, and the kernel image itself is direct-mapped so that a kernel
//! virtual address and the physical frame behind it differ by the constant
//! [`KERNEL_BASE`] offset. Everything below [`USER_HIGH`] belongs to user
//! mappings; the first few megabytes are kept unmapped so that null and
//! near-null dereferences fault.
//!
//! Three address newtypes keep the kinds apart:
//! - [`Pa`]: a physical address.
//! - [`Va`]: a user virtual address, the kind that appears in system-call
//!   arguments and page faults.
//! - [`Kva`]: a kernel virtual address, the kind a resident page frame is
//!   reachable at.
//!
//! All three support page rounding and plain arithmetic. Conversions between
//! [`Pa`] and [`Kva`] are constant-offset arithmetic and exist only for the
//! direct-mapped region.

/// The size of a single page in memory, in bytes.
pub const PAGE_SIZE: usize = 0x1000;

/// Log2 of [`PAGE_SIZE`]; shift an address right by this to get its page
/// number.
pub const PAGE_SHIFT: usize = 12;

/// Mask extracting the byte offset within a page.
pub const PAGE_MASK: usize = 0xfff;

/// First virtual address of the kernel half.
///
/// User mappings live strictly below this; the kernel is mapped at and above
/// it in every address space.
pub const KERNEL_BASE: usize = 0xc000_0000;

/// Lowest virtual address usable by user mappings.
///
/// The region below stays unmapped so stray near-null pointers fault instead
/// of silently reading the zero page.
pub const USER_LOW: usize = 0x0040_0000;

/// One past the highest virtual address usable by user mappings.
pub const USER_HIGH: usize = KERNEL_BASE;

/// Page number of [`USER_LOW`].
pub const USER_LOW_PAGE: usize = USER_LOW >> PAGE_SHIFT;

/// Page number of [`USER_HIGH`].
pub const USER_HIGH_PAGE: usize = USER_HIGH >> PAGE_SHIFT;

/// Represents a physical address.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord)]
pub struct Pa(usize);

impl Pa {
    /// The physical address `0`.
    pub const ZERO: Self = Self(0);

    /// Creates a new physical address.
    ///
    /// Returns `None` if the address does not fit the 32-bit physical
    /// address space.
    pub const fn new(addr: usize) -> Option<Self> {
        if addr as u64 <= u32::MAX as u64 {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// Cast into usize.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Converts into the kernel virtual address that direct-maps this frame.
    #[inline]
    pub const fn into_kva(self) -> Kva {
        Kva(self.0.wrapping_add(KERNEL_BASE))
    }

    /// Round down to the nearest page boundary.
    #[inline]
    pub const fn page_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Round up to the nearest page boundary.
    #[inline]
    pub const fn page_up(self) -> Self {
        Self(self.0.wrapping_add(PAGE_MASK) & !PAGE_MASK)
    }

    /// The byte offset within the containing page.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0 & PAGE_MASK
    }
}

/// Represents a kernel virtual address.
///
/// Unlike [`Va`], a `Kva` is not range-checked: the direct map covers the
/// machine's memory and the kernel heap, wherever the platform put them.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord)]
pub struct Kva(usize);

impl Kva {
    /// Creates a new kernel virtual address.
    ///
    /// Returns `None` for the null address.
    pub const fn new(addr: usize) -> Option<Self> {
        if addr != 0 { Some(Self(addr)) } else { None }
    }

    /// Cast into usize.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Converts into the physical address behind the direct map.
    #[inline]
    pub const fn into_pa(self) -> Pa {
        Pa(self.0.wrapping_sub(KERNEL_BASE))
    }

    /// Round down to the nearest page boundary.
    #[inline]
    pub const fn page_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Round up to the nearest page boundary.
    #[inline]
    pub const fn page_up(self) -> Self {
        Self(self.0.wrapping_add(PAGE_MASK) & !PAGE_MASK)
    }

    /// The byte offset within the containing page.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0 & PAGE_MASK
    }
}

/// Represents a user virtual address.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord)]
pub struct Va(usize);

impl Va {
    /// Creates a new user virtual address.
    ///
    /// Any value below [`USER_HIGH`] is representable; whether it is mapped
    /// is a question for the owning address-space map.
    pub const fn new(addr: usize) -> Option<Self> {
        if addr < USER_HIGH { Some(Self(addr)) } else { None }
    }

    /// Cast into usize.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Round down to the nearest page boundary.
    #[inline]
    pub const fn page_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Round up to the nearest page boundary.
    #[inline]
    pub const fn page_up(self) -> Self {
        Self((self.0.wrapping_add(PAGE_MASK)) & !PAGE_MASK)
    }

    /// The byte offset within the containing page.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0 & PAGE_MASK
    }

    /// The page number this address falls in.
    #[inline]
    pub const fn page_number(self) -> usize {
        self.0 >> PAGE_SHIFT
    }

    /// The first address of the page numbered `pn`.
    #[inline]
    pub const fn from_page_number(pn: usize) -> Self {
        Self(pn << PAGE_SHIFT)
    }
}

macro_rules! impl_addr_ops {
    ($t:ty) => {
        impl core::ops::Add<usize> for $t {
            type Output = Self;
            fn add(self, rhs: usize) -> Self {
                Self(self.0 + rhs)
            }
        }
        impl core::ops::AddAssign<usize> for $t {
            fn add_assign(&mut self, rhs: usize) {
                self.0 += rhs;
            }
        }
        impl core::ops::Sub<usize> for $t {
            type Output = Self;
            fn sub(self, rhs: usize) -> Self {
                Self(self.0 - rhs)
            }
        }
        impl core::ops::Sub<Self> for $t {
            type Output = usize;
            fn sub(self, rhs: Self) -> usize {
                self.0 - rhs.0
            }
        }
        impl core::ops::BitAnd<usize> for $t {
            type Output = Self;
            fn bitand(self, rhs: usize) -> Self {
                Self(self.0 & rhs)
            }
        }
        impl core::ops::BitOr<usize> for $t {
            type Output = Self;
            fn bitor(self, rhs: usize) -> Self {
                Self(self.0 | rhs)
            }
        }
    };
}

impl_addr_ops!(Pa);
impl_addr_ops!(Kva);
impl_addr_ops!(Va);

impl core::fmt::Debug for Pa {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Pa(0x{:08x})", self.0)
    }
}

impl core::fmt::Debug for Kva {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Kva(0x{:08x})", self.0)
    }
}

impl core::fmt::Debug for Va {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Va(0x{:08x})", self.0)
    }
}

impl core::fmt::Display for Va {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
