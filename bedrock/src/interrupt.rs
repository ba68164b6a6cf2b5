//! Trap frames, exception numbers, and interrupt nesting.
//!
//! The entry stubs that vector hardware traps into the kernel are part of
//! the boot layer and live outside this tree; what the kernel core needs is
//! the shape of the saved machine state ([`Registers`]), the meaning of the
//! page-fault error code ([`PfErrorCode`]), and a way to hold interrupts off
//! across a critical section ([`InterruptGuard`]).

use core::sync::atomic::{AtomicUsize, Ordering};

use num_enum::TryFromPrimitive;

/// Saved machine state at kernel entry.
///
/// Layout matches what the trap stub pushes: the `pusha` block, the
/// segment selectors, the vector and error code, and the `iret` frame. The
/// fork path builds one of these by hand for the child and a trampoline
/// pops it to enter user mode.
#[repr(C)]
#[derive(Clone, Copy, Default, Debug)]
pub struct Registers {
    /// General purpose registers, in `pusha` order.
    pub edi: u32,
    /// See `edi`.
    pub esi: u32,
    /// Frame pointer.
    pub ebp: u32,
    /// Stack pointer at the time of `pusha`; ignored by `popa`.
    pub esp_dummy: u32,
    /// General purpose register.
    pub ebx: u32,
    /// General purpose register.
    pub edx: u32,
    /// General purpose register.
    pub ecx: u32,
    /// General purpose register; carries system-call return values.
    pub eax: u32,
    /// Interrupt vector that brought us here.
    pub int_no: u32,
    /// Hardware error code, or zero for vectors that push none.
    pub err_code: u32,
    /// Return instruction pointer.
    pub eip: u32,
    /// Return code segment selector.
    pub cs: u32,
    /// Saved flags.
    pub eflags: u32,
    /// Return stack pointer (only pushed for privilege transitions).
    pub useresp: u32,
    /// Return stack segment selector (only pushed for privilege
    /// transitions).
    pub ss: u32,
}

bitflags::bitflags! {
    /// The error code pushed by the CPU on a page fault.
    pub struct PfErrorCode: u32 {
        /// The fault was a protection violation on a present page (clear
        /// means the translation was absent).
        const PRESENT = 1 << 0;
        /// The faulting access was a write.
        const WRITE_ACCESS = 1 << 1;
        /// The fault happened while the CPU was in user mode.
        const USER = 1 << 2;
        /// A reserved bit was set in a paging structure.
        const RESERVED = 1 << 3;
        /// The faulting access was an instruction fetch.
        const INSTRUCTION_FETCH = 1 << 4;
    }
}

/// CPU exception vectors the kernel distinguishes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum Exception {
    /// `#DE`, divide error.
    DivideError = 0,
    /// `#BP`, breakpoint.
    Breakpoint = 3,
    /// `#UD`, invalid opcode.
    InvalidOpcode = 6,
    /// `#DF`, double fault.
    DoubleFault = 8,
    /// `#GP`, general protection fault.
    GeneralProtection = 13,
    /// `#PF`, page fault. The faulting address is in `cr2`.
    PageFault = 14,
}

static INTR_DEPTH: AtomicUsize = AtomicUsize::new(0);

/// Holds interrupts disabled for its lifetime.
///
/// Guards nest: interrupts are re-enabled only when the outermost guard
/// drops. Must never be held across a suspension point.
pub struct InterruptGuard {
    _private: (),
}

impl InterruptGuard {
    /// Disables interrupts (if this is the outermost guard) and returns the
    /// guard.
    pub fn new() -> Self {
        if INTR_DEPTH.fetch_add(1, Ordering::SeqCst) == 0 {
            disable();
        }
        InterruptGuard { _private: () }
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if INTR_DEPTH.fetch_sub(1, Ordering::SeqCst) == 1 {
            enable();
        }
    }
}

#[inline]
fn disable() {
    #[cfg(target_arch = "x86")]
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack));
    }
}

#[inline]
fn enable() {
    #[cfg(target_arch = "x86")]
    unsafe {
        core::arch::asm!("sti", options(nomem, nostack));
    }
}
