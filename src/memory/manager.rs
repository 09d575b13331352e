use core::ops::Range;

use log::{info, warn};
use spin::Once;
use x86_64::{
    structures::paging::{FrameAllocator, FrameDeallocator, PhysFrame, Size4KiB},
    PhysAddr, VirtAddr,
};

use super::{
    descriptor::Mapping,
    free_list::{self, FreeList},
    lru::LruRing,
    page_frames,
    paging::PageTableWalker,
    MemoryLayout,
};
use crate::sync::KernelMutex;

/// The eviction path: writes one resident page to backing store, marks it
/// not present, and hands its frame back with
/// [`Kmem::deregister_from_eviction`] followed by [`Kmem::free`].
pub trait SwapOut {
    /// Returns `false` when nothing could be evicted.
    fn swap_out(&self) -> bool;
}

/// For contexts without a backing store.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSwap;

impl SwapOut for NoSwap {
    fn swap_out(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwapStat {
    pub free_pages: usize,
    pub lru_pages: usize,
}

/// A frame picked by the clock scan. It is still in the LRU ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Victim {
    pub frame: PhysFrame,
    pub page_table: PhysFrame,
    pub vaddr: VirtAddr,
}

/// Physical frame allocator with clock replacement over `N` descriptors.
///
/// The free list and the LRU ring have separate locks and no operation holds
/// both. Until [`Kmem::init_phase_two`] the free-list lock runs in boot mode.
pub struct Kmem<const N: usize> {
    layout: Once<MemoryLayout>,
    free: KernelMutex<FreeList>,
    lru: KernelMutex<LruRing<N>>,
}

impl<const N: usize> Kmem<N> {
    pub const fn new() -> Self {
        Self {
            layout: Once::new(),
            free: KernelMutex::new_deferred(FreeList::new()),
            lru: KernelMutex::new(LruRing::new()),
        }
    }

    /// Seeds the pages in `range` while only the boot CPU runs and only the
    /// boot page table is installed.
    pub fn init_phase_one(&self, layout: MemoryLayout, range: Range<PhysAddr>) {
        layout.validate(N);

        let mut fresh = false;
        self.layout.call_once(|| {
            fresh = true;
            layout
        });
        if !fresh {
            panic!("kinit1: allocator already initialised");
        }

        self.free_range(range);
        let free = self.free.lock().len();
        info!("kinit1: {} frames free", free);
    }

    /// Seeds the rest of memory once the full kernel mapping is live on every
    /// CPU, then turns on locking for good.
    pub fn init_phase_two(&self, range: Range<PhysAddr>) {
        if self.free.is_enabled() {
            panic!("kinit2: allocator already in locked mode");
        }

        self.free_range(range);
        self.free.enable();
        let free = self.free.lock().len();
        info!("kinit2: {} frames free", free);
    }

    pub fn is_locking(&self) -> bool {
        self.free.is_enabled()
    }

    pub fn layout(&self) -> MemoryLayout {
        match self.layout.get() {
            Some(layout) => *layout,
            None => panic!("kmem: used before kinit1"),
        }
    }

    /// Returns a frame to the pool, filling it with junk first.
    ///
    /// Panics if `addr` is not page aligned, lies inside the kernel image, or
    /// is at or above the top of usable memory.
    pub fn free(&self, addr: PhysAddr) {
        let layout = self.layout();
        if !layout.is_freeable(addr) {
            panic!(
                "kfree: bad frame {:#x} (kernel end {:#x}, phys top {:#x})",
                addr.as_u64(),
                layout.kernel_end.as_u64(),
                layout.phys_top.as_u64()
            );
        }

        let frame = PhysFrame::containing_address(addr);
        unsafe {
            free_list::poison(frame, &layout);
            self.free.lock().push(frame, &layout);
        }
    }

    /// Takes a free frame, asking `swap` to evict a page whenever the list is
    /// empty. `None` means out of memory: the list was empty and nothing was
    /// evictable.
    pub fn allocate<S: SwapOut + ?Sized>(&self, swap: &S) -> Option<PhysFrame> {
        let layout = self.layout();

        loop {
            // The guard is dropped at the end of this statement. swap_out
            // frees into the same list and would deadlock otherwise.
            let frame = unsafe { self.free.lock().pop(&layout) };
            if frame.is_some() {
                return frame;
            }

            if !swap.swap_out() {
                warn!("kalloc: out of memory");
                return None;
            }
        }
    }

    /// Makes a mapped user frame eligible for eviction.
    pub fn register_for_eviction(&self, frame: PhysFrame, page_table: PhysFrame, vaddr: VirtAddr) {
        let index = self.layout().index_of(frame);
        self.lru.lock().insert(index, Mapping { page_table, vaddr });
    }

    /// Drops `frame` from eviction tracking. Returns `false` if it was not
    /// tracked.
    pub fn deregister_from_eviction(&self, frame: PhysFrame) -> bool {
        let index = self.layout().index_of(frame);
        self.lru.lock().remove(index).is_some()
    }

    pub fn is_tracked(&self, frame: PhysFrame) -> bool {
        let index = self.layout().index_of(frame);
        self.lru.lock().contains(index)
    }

    /// Runs the clock over the LRU ring, clearing access bits through
    /// `walker`. The victim stays in the ring until the caller deregisters it.
    ///
    /// Panics if a ring member's mapping can no longer be resolved: the page
    /// was unmapped without being deregistered.
    pub fn select_victim<W: PageTableWalker + ?Sized>(&self, walker: &W) -> Option<Victim> {
        let layout = self.layout();
        let mut lru = self.lru.lock();

        let index = lru.select_victim(|index, mapping| {
            match walker.take_accessed(mapping.page_table, mapping.vaddr) {
                Ok(accessed) => accessed,
                Err(err) => panic!(
                    "select_victim: frame {:#x} is in the LRU ring but {}",
                    layout.frame_at(index).start_address().as_u64(),
                    err
                ),
            }
        })?;

        let mapping = lru.descriptor(index).mapping?;
        Some(Victim {
            frame: layout.frame_at(index),
            page_table: mapping.page_table,
            vaddr: mapping.vaddr,
        })
    }

    pub fn swap_stat(&self) -> SwapStat {
        let free_pages = self.free.lock().len();
        let lru_pages = self.lru.lock().len();

        SwapStat {
            free_pages,
            lru_pages,
        }
    }

    /// Like [`Kmem::swap_stat`], but walks both structures and panics if a
    /// counter disagrees with what is actually linked.
    pub fn audit(&self) -> SwapStat {
        let layout = self.layout();

        let free_pages = {
            let free = self.free.lock();
            let walked = unsafe { free.frames(&layout) }.count();
            assert_eq!(
                walked,
                free.len(),
                "kmem: free count {} but {} frames linked",
                free.len(),
                walked
            );
            walked
        };

        let lru_pages = {
            let lru = self.lru.lock();
            lru.check();
            lru.len()
        };

        SwapStat {
            free_pages,
            lru_pages,
        }
    }

    /// Adapter for `x86_64`'s mapper, so page-table pages come from here too.
    pub fn frames<'a, S: SwapOut + ?Sized>(&'a self, swap: &'a S) -> KmemFrames<'a, N, S> {
        KmemFrames { kmem: self, swap }
    }

    fn free_range(&self, range: Range<PhysAddr>) {
        for frame in page_frames(range) {
            self.free(frame.start_address());
        }
    }
}

pub struct KmemFrames<'a, const N: usize, S: ?Sized> {
    kmem: &'a Kmem<N>,
    swap: &'a S,
}

unsafe impl<'a, const N: usize, S: SwapOut + ?Sized> FrameAllocator<Size4KiB>
    for KmemFrames<'a, N, S>
{
    fn allocate_frame(&mut self) -> Option<PhysFrame> {
        self.kmem.allocate(self.swap)
    }
}

impl<'a, const N: usize, S: SwapOut + ?Sized> FrameDeallocator<Size4KiB> for KmemFrames<'a, N, S> {
    unsafe fn deallocate_frame(&mut self, frame: PhysFrame) {
        self.kmem.free(frame.start_address());
    }
}
