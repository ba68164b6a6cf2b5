//! Page-fault resolution.
//!
//! Every page of user memory is installed lazily: `mmap` records intent in
//! the address-space map and the first touch of each page lands here. The
//! handler walks map → area → object chain → page cache, then installs the
//! translation the access is entitled to:
//!
//! - a **read of a private area** maps the first resident page of the
//!   shadow chain *read-only*, creating no copy; many address spaces may
//!   share that frame;
//! - a **write to a private area** materializes a frame in the topmost
//!   shadow (copying from the chain below on first touch), marks it dirty,
//!   and maps it writable;
//! - any access to a **shared area** goes straight to the underlying
//!   object's frame with the area's own protection.
//!
//! A fault that no area covers, or that asks for more than the area's
//! protection allows, is a segmentation violation: the handler returns
//! [`KernelError::InvalidAccess`] and the caller kills the process.

use bedrock::{
    addressing::Va,
    interrupt::PfErrorCode,
};

use crate::{
    mm::{page_table::Permission, pframe, tlb, vmmap::AreaKind, Mm},
    KernelError,
};

/// Decoded cause of a page fault.
#[derive(Debug)]
pub struct PageFaultReason {
    /// The faulting virtual address (`cr2`).
    pub addr: Va,
    /// The access was a write.
    pub write: bool,
    /// The access was an instruction fetch.
    pub exec: bool,
    /// A translation was present (the fault is a protection violation
    /// rather than a miss).
    pub present: bool,
    /// The CPU was in user mode.
    pub user: bool,
}

impl PageFaultReason {
    /// Decodes the hardware error code and `cr2` into a
    /// [`PageFaultReason`].
    pub fn new(ec: PfErrorCode, cr2: Va) -> Self {
        PageFaultReason {
            addr: cr2,
            write: ec.contains(PfErrorCode::WRITE_ACCESS),
            exec: ec.contains(PfErrorCode::INSTRUCTION_FETCH),
            present: ec.contains(PfErrorCode::PRESENT),
            user: ec.contains(PfErrorCode::USER),
        }
    }
}

impl Mm {
    /// Resolves a user page fault.
    ///
    /// On success the faulting address is mapped with sufficient
    /// permissions for the access and the stale translation, if any, has
    /// been invalidated. On failure the address space is unchanged and the
    /// fault is a segmentation violation.
    pub fn handle_page_fault(&mut self, reason: &PageFaultReason) -> Result<(), KernelError> {
        let pageno = reason.addr.page_number();
        let area = self
            .vmmap
            .lookup(pageno)
            .ok_or(KernelError::InvalidAccess)?;

        if reason.write && !area.perm.contains(Permission::WRITE) {
            return Err(KernelError::InvalidAccess);
        }
        if reason.exec && !area.perm.contains(Permission::EXECUTABLE) {
            return Err(KernelError::InvalidAccess);
        }
        if !reason.write && !reason.exec && !area.perm.contains(Permission::READ) {
            return Err(KernelError::InvalidAccess);
        }

        let off = area.obj_pageno(pageno);
        let (page, perm) = match (area.kind, reason.write) {
            (AreaKind::Private, false) => {
                // First hit down the chain, mapped read-only; the write
                // fault later copies it into the top shadow.
                let page = area.obj.lookup_page(off)?;
                (page, area.perm & !Permission::WRITE)
            }
            (AreaKind::Private, true) => {
                // Materialize (or find) the frame in the topmost shadow.
                let page = pframe::get(&area.obj, off)?;
                pframe::dirty(&area.obj, off)?;
                (page, area.perm)
            }
            (AreaKind::Shared, write) => {
                let page = pframe::get(&area.obj, off)?;
                if write {
                    pframe::dirty(&area.obj, off)?;
                }
                (page, area.perm)
            }
        };

        let va = reason.addr.page_down();
        if let Some(stale) = self
            .page_table
            .map(va, page, perm | Permission::USER)?
        {
            stale.invalidate();
        }
        tlb::invalidate(va);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::vmmap::Direction;
    use bedrock::addressing::{PAGE_SIZE, USER_LOW_PAGE};

    fn fault(mm: &mut Mm, va: Va, write: bool) -> Result<(), KernelError> {
        let present = mm.page_table.walk(va.page_down()).is_ok();
        mm.handle_page_fault(&PageFaultReason {
            addr: va,
            write,
            exec: false,
            present,
            user: true,
        })
    }

    fn map_anon(mm: &mut Mm, npages: usize, kind: AreaKind) -> Va {
        let Mm { vmmap, page_table } = mm;
        let start = vmmap
            .map(
                page_table,
                None,
                0,
                npages,
                Permission::READ | Permission::WRITE,
                kind,
                0,
                Direction::HighToLow,
            )
            .unwrap();
        Va::from_page_number(start)
    }

    #[test]
    fn unmapped_address_faults() {
        let mut mm = Mm::new();
        let va = Va::from_page_number(USER_LOW_PAGE + 123);
        assert_eq!(fault(&mut mm, va, false), Err(KernelError::InvalidAccess));
    }

    #[test]
    fn write_to_readonly_area_faults() {
        let mut mm = Mm::new();
        let Mm { vmmap, page_table } = &mut mm;
        let start = vmmap
            .map(
                page_table,
                None,
                0,
                1,
                Permission::READ,
                AreaKind::Private,
                0,
                Direction::HighToLow,
            )
            .unwrap();
        let va = Va::from_page_number(start);
        assert_eq!(fault(&mut mm, va, true), Err(KernelError::InvalidAccess));
        assert!(fault(&mut mm, va, false).is_ok());
    }

    #[test]
    fn private_read_installs_readonly_shared_frame() {
        let mut mm = Mm::new();
        let va = map_anon(&mut mm, 1, AreaKind::Private);
        fault(&mut mm, va, false).unwrap();
        let (_, perm) = mm.page_table.walk(va).unwrap();
        assert!(!perm.contains(Permission::WRITE));

        // A later write fault upgrades the mapping to a private copy.
        fault(&mut mm, va, true).unwrap();
        let (_, perm) = mm.page_table.walk(va).unwrap();
        assert!(perm.contains(Permission::WRITE));
    }

    #[test]
    fn copy_in_out_round_trip() {
        let mut mm = Mm::new();
        let va = map_anon(&mut mm, 2, AreaKind::Private);
        let msg = b"paging is lazy until it is not";
        // Straddle a page boundary on purpose.
        let addr = va + (PAGE_SIZE - 7);
        mm.copy_out(addr, msg).unwrap();
        let mut back = [0u8; 30];
        mm.copy_in(addr, &mut back).unwrap();
        assert_eq!(&back, msg);
    }

    #[test]
    fn copy_out_to_unmapped_is_bad_address() {
        let mut mm = Mm::new();
        let va = Va::from_page_number(USER_LOW_PAGE + 5);
        assert_eq!(
            mm.copy_out(va, b"nope"),
            Err(KernelError::BadAddress)
        );
    }
}
