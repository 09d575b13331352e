// Physical page allocator and clock-based page replacement.

use core::ops::Range;

use x86_64::{structures::paging::PhysFrame, PhysAddr, VirtAddr};

pub mod descriptor;
pub mod free_list;
pub mod lru;
pub mod manager;
pub mod paging;

pub use manager::{Kmem, KmemFrames, NoSwap, SwapOut, SwapStat, Victim};
pub use paging::{OffsetWalker, PageTableWalker, WalkError};

pub const PAGE_SIZE: usize = 4096;

/// Top of usable physical memory on the reference machine.
pub const PHYSTOP: usize = 0xE00_0000;

/// Descriptor slots in the global allocator, one per frame below `PHYSTOP`.
pub const FRAME_COUNT: usize = PHYSTOP / PAGE_SIZE;

/// Written over every byte of a frame when it is freed.
pub const JUNK_BYTE: u8 = 0x01;

/// The global allocator. Seed it with [`Kmem::init_phase_one`] and
/// [`Kmem::init_phase_two`] during boot.
pub static KMEM: Kmem<FRAME_COUNT> = Kmem::new();

/// Where physical memory sits and how the kernel reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    /// Physical address described by descriptor 0.
    pub phys_base: PhysAddr,
    /// First physical byte after the loaded kernel image.
    pub kernel_end: PhysAddr,
    /// Exclusive upper bound of usable physical memory.
    pub phys_top: PhysAddr,
    /// Virtual address at which physical address 0 is mapped.
    pub phys_offset: VirtAddr,
}

impl MemoryLayout {
    pub fn frame_count(&self) -> usize {
        ((self.phys_top - self.phys_base) as usize) / PAGE_SIZE
    }

    /// Checks the layout against a descriptor table of `slots` entries.
    pub fn validate(&self, slots: usize) {
        let page = PAGE_SIZE as u64;
        if !self.phys_base.is_aligned(page) || !self.phys_top.is_aligned(page) {
            panic!("kinit: layout bounds not page aligned: {:?}", self);
        }
        if self.phys_top < self.phys_base || self.kernel_end < self.phys_base {
            panic!("kinit: inverted layout: {:?}", self);
        }
        if self.frame_count() > slots {
            panic!(
                "kinit: {} frames below phys_top but only {} descriptors",
                self.frame_count(),
                slots
            );
        }
    }

    /// Whether `addr` may be handed to `free`.
    pub fn is_freeable(&self, addr: PhysAddr) -> bool {
        addr.is_aligned(PAGE_SIZE as u64) && addr >= self.kernel_end && addr < self.phys_top
    }

    /// Descriptor slot for `frame`.
    pub fn index_of(&self, frame: PhysFrame) -> usize {
        let addr = frame.start_address();
        if addr < self.phys_base || addr >= self.phys_top {
            panic!("kmem: frame {:#x} outside managed memory", addr.as_u64());
        }

        ((addr - self.phys_base) as usize) / PAGE_SIZE
    }

    pub fn frame_at(&self, index: usize) -> PhysFrame {
        PhysFrame::containing_address(self.phys_base + (index * PAGE_SIZE) as u64)
    }

    /// Kernel-visible pointer to the first byte of `frame`.
    pub fn frame_ptr(&self, frame: PhysFrame) -> *mut u8 {
        (self.phys_offset + frame.start_address().as_u64()).as_mut_ptr()
    }
}

/// Whole pages inside `range`, start rounded up to a page boundary.
pub fn page_frames(range: Range<PhysAddr>) -> impl Iterator<Item = PhysFrame> {
    let page = PAGE_SIZE as u64;
    let start = range.start.align_up(page).as_u64();
    let end = range.end.as_u64();

    (start..end)
        .step_by(PAGE_SIZE)
        .take_while(move |addr| addr + page <= end)
        .map(|addr| PhysFrame::containing_address(PhysAddr::new(addr)))
}

#[cfg(test)]
pub(crate) mod testing;
