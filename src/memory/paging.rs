use core::ptr::NonNull;

use thiserror::Error;
use x86_64::{
    structures::paging::{
        page_table::PageTableEntry, PageTable, PageTableFlags, PhysFrame,
    },
    PhysAddr, VirtAddr,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WalkError {
    #[error("level {level} entry for {vaddr:?} is not present")]
    NotPresent { level: u8, vaddr: VirtAddr },
    #[error("level {level} entry for {vaddr:?} maps a huge page")]
    HugePage { level: u8, vaddr: VirtAddr },
}

/// Finds the leaf page-table entry that maps a virtual address.
///
/// # Safety
/// A returned pointer must refer to a live entry inside the page table rooted
/// at `page_table`, valid for as long as that address space stays mapped.
pub unsafe trait PageTableWalker {
    fn leaf_entry(
        &self,
        page_table: PhysFrame,
        vaddr: VirtAddr,
    ) -> Result<NonNull<PageTableEntry>, WalkError>;

    /// Reports whether the access bit was set, clearing it if so.
    fn take_accessed(&self, page_table: PhysFrame, vaddr: VirtAddr) -> Result<bool, WalkError> {
        let mut entry = self.leaf_entry(page_table, vaddr)?;
        let entry = unsafe { entry.as_mut() };

        let mut flags = entry.flags();
        let accessed = flags.contains(PageTableFlags::ACCESSED);
        if accessed {
            flags.remove(PageTableFlags::ACCESSED);
            entry.set_flags(flags);
        }

        Ok(accessed)
    }
}

/// Walks 4-level x86_64 tables through a linear map of all physical memory.
#[derive(Debug, Clone, Copy)]
pub struct OffsetWalker {
    phys_offset: VirtAddr,
}

impl OffsetWalker {
    /// # Safety
    /// All physical memory must be mapped at `phys_offset`.
    pub unsafe fn new(phys_offset: VirtAddr) -> Self {
        Self { phys_offset }
    }

    fn table(&self, addr: PhysAddr) -> *mut PageTable {
        (self.phys_offset + addr.as_u64()).as_mut_ptr()
    }
}

unsafe impl PageTableWalker for OffsetWalker {
    fn leaf_entry(
        &self,
        page_table: PhysFrame,
        vaddr: VirtAddr,
    ) -> Result<NonNull<PageTableEntry>, WalkError> {
        let mut table = self.table(page_table.start_address());

        for (level, index) in [(4, vaddr.p4_index()), (3, vaddr.p3_index()), (2, vaddr.p2_index())] {
            let entry = unsafe { &(&*table)[index] };
            let flags = entry.flags();

            if !flags.contains(PageTableFlags::PRESENT) {
                return Err(WalkError::NotPresent { level, vaddr });
            }
            if flags.contains(PageTableFlags::HUGE_PAGE) {
                return Err(WalkError::HugePage { level, vaddr });
            }

            table = self.table(entry.addr());
        }

        let entry = unsafe { &mut (&mut *table)[vaddr.p1_index()] };
        if !entry.flags().contains(PageTableFlags::PRESENT) {
            return Err(WalkError::NotPresent { level: 1, vaddr });
        }

        Ok(NonNull::from(entry))
    }
}
