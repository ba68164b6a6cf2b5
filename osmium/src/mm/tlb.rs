//! TLB invalidation.
//!
//! The CPU caches translations; the page table is not consulted again for
//! an address the TLB already knows. Any operation that removes or narrows
//! a translation must therefore be followed by one of these calls before a
//! thread re-enters user mode, or the old mapping stays reachable.
//!
//! Single CPU: no cross-processor shootdown protocol is needed, only the
//! local invalidation instructions.

use core::ops::Range;

use bedrock::addressing::Va;

/// Invalidates the translation of a single page.
#[inline]
pub fn invalidate(va: Va) {
    let _ = va;
    #[cfg(target_arch = "x86")]
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va.into_usize(), options(nostack));
    }
}

/// Invalidates every translation in a virtual address range.
pub fn shootdown(range: Range<Va>) {
    let mut va = range.start.page_down();
    while va < range.end {
        invalidate(va);
        va = va + bedrock::addressing::PAGE_SIZE;
    }
}

/// Invalidates all translations.
#[inline]
pub fn shootdown_all() {
    #[cfg(target_arch = "x86")]
    unsafe {
        // Reloading cr3 flushes the whole TLB.
        core::arch::asm!(
            "mov {tmp}, cr3",
            "mov cr3, {tmp}",
            tmp = out(reg) _,
            options(nostack)
        );
    }
}
