// Host-side stand-ins for physical memory, page tables and the swap device.
// Physical addresses are host addresses and `phys_offset` is zero.

use std::{ptr::NonNull, sync::Mutex};

use x86_64::{
    structures::paging::{PageTable, PageTableFlags, PhysFrame},
    PhysAddr, VirtAddr,
};

use super::{
    manager::{Kmem, SwapOut},
    paging::{OffsetWalker, PageTableWalker},
    MemoryLayout, PAGE_SIZE,
};

#[repr(C, align(4096))]
#[derive(Clone)]
pub struct Page(pub [u8; PAGE_SIZE]);

/// Page-aligned block of "physical" frames.
pub struct Arena {
    pages: NonNull<Page>,
    len: usize,
}

unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    pub fn new(len: usize) -> Self {
        let pages = vec![Page([0; PAGE_SIZE]); len].into_boxed_slice();
        let pages = NonNull::new(Box::into_raw(pages).cast::<Page>()).unwrap();

        Self { pages, len }
    }

    pub fn base(&self) -> PhysAddr {
        PhysAddr::new(self.pages.as_ptr() as u64)
    }

    pub fn end(&self) -> PhysAddr {
        self.base() + (self.len * PAGE_SIZE) as u64
    }

    pub fn frame(&self, index: usize) -> PhysFrame {
        assert!(index < self.len);
        PhysFrame::containing_address(self.base() + (index * PAGE_SIZE) as u64)
    }

    /// The whole arena is managed memory; nothing is reserved for a kernel image.
    pub fn layout(&self) -> MemoryLayout {
        MemoryLayout {
            phys_base: self.base(),
            kernel_end: self.base(),
            phys_top: self.end(),
            phys_offset: VirtAddr::new(0),
        }
    }

    pub fn bytes(&self, frame: PhysFrame) -> &[u8] {
        let addr = frame.start_address();
        assert!(addr >= self.base() && addr < self.end());
        unsafe { std::slice::from_raw_parts(addr.as_u64() as *const u8, PAGE_SIZE) }
    }

    pub fn fill(&self, frame: PhysFrame, byte: u8) {
        let addr = frame.start_address();
        assert!(addr >= self.base() && addr < self.end());
        unsafe { std::ptr::write_bytes(addr.as_u64() as *mut u8, byte, PAGE_SIZE) };
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        let slice = std::ptr::slice_from_raw_parts_mut(self.pages.as_ptr(), self.len);
        drop(unsafe { Box::from_raw(slice) });
    }
}

pub fn user_flags() -> PageTableFlags {
    PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER_ACCESSIBLE
}

/// A real 4-level x86_64 page table living on the host heap.
pub struct PageTables {
    tables: Vec<*mut PageTable>,
}

unsafe impl Send for PageTables {}
unsafe impl Sync for PageTables {}

impl PageTables {
    pub fn new() -> Self {
        Self {
            tables: vec![Box::into_raw(Box::new(PageTable::new()))],
        }
    }

    pub fn root(&self) -> PhysFrame {
        PhysFrame::containing_address(PhysAddr::new(self.tables[0] as u64))
    }

    pub fn map(&mut self, vaddr: VirtAddr, frame: PhysFrame, flags: PageTableFlags) {
        let table = self.descend(vaddr, 1);
        unsafe { (&mut *table)[vaddr.p1_index()].set_frame(frame, flags) };
    }

    /// Installs a 2 MiB mapping at the page-directory level.
    pub fn map_huge(&mut self, vaddr: VirtAddr, start: PhysFrame) {
        let table = self.descend(vaddr, 2);
        unsafe {
            (&mut *table)[vaddr.p2_index()]
                .set_addr(start.start_address(), user_flags() | PageTableFlags::HUGE_PAGE)
        };
    }

    /// Leaf flags for `vaddr`, present or not.
    pub fn flags(&self, vaddr: VirtAddr) -> PageTableFlags {
        let mut table = self.tables[0];
        for index in [vaddr.p4_index(), vaddr.p3_index(), vaddr.p2_index()] {
            table = unsafe { (&*table)[index].addr().as_u64() as *mut PageTable };
        }
        unsafe { (&*table)[vaddr.p1_index()].flags() }
    }

    pub fn set_accessed(&self, vaddr: VirtAddr, accessed: bool) {
        let walker = unsafe { OffsetWalker::new(VirtAddr::new(0)) };
        let mut entry = walker.leaf_entry(self.root(), vaddr).unwrap();
        let entry = unsafe { entry.as_mut() };

        let mut flags = entry.flags();
        flags.set(PageTableFlags::ACCESSED, accessed);
        entry.set_flags(flags);
    }

    // Returns the table at `level`, creating intermediate tables on the way.
    fn descend(&mut self, vaddr: VirtAddr, level: u8) -> *mut PageTable {
        let mut table = self.tables[0];
        let indices = [vaddr.p4_index(), vaddr.p3_index(), vaddr.p2_index()];

        for index in indices.into_iter().take(4 - level as usize) {
            let entry = unsafe { &mut (&mut *table)[index] };
            if entry.is_unused() {
                let child = Box::into_raw(Box::new(PageTable::new()));
                self.tables.push(child);
                entry.set_addr(PhysAddr::new(child as u64), user_flags());
            }
            table = entry.addr().as_u64() as *mut PageTable;
        }

        table
    }
}

impl Drop for PageTables {
    fn drop(&mut self) {
        for table in self.tables.drain(..) {
            drop(unsafe { Box::from_raw(table) });
        }
    }
}

/// A page that was written out by [`RamSwap`].
#[derive(Debug, Clone)]
pub struct SwappedPage {
    pub page_table: PhysFrame,
    pub vaddr: VirtAddr,
    pub frame: PhysFrame,
    pub contents: Vec<u8>,
}

/// Backing store kept in host memory, evicting the way the kernel's swap
/// path does: pick a victim, copy it out, mark the PTE not present,
/// deregister, free.
pub struct RamSwap<'a, const N: usize> {
    kmem: &'a Kmem<N>,
    walker: OffsetWalker,
    pub swapped: Mutex<Vec<SwappedPage>>,
}

impl<'a, const N: usize> RamSwap<'a, N> {
    pub fn new(kmem: &'a Kmem<N>) -> Self {
        Self {
            kmem,
            walker: unsafe { OffsetWalker::new(VirtAddr::new(0)) },
            swapped: Mutex::new(Vec::new()),
        }
    }

    pub fn walker(&self) -> &OffsetWalker {
        &self.walker
    }

    pub fn swapped_count(&self) -> usize {
        self.swapped.lock().unwrap().len()
    }
}

impl<'a, const N: usize> SwapOut for RamSwap<'a, N> {
    fn swap_out(&self) -> bool {
        let Some(victim) = self.kmem.select_victim(&self.walker) else {
            return false;
        };

        let layout = self.kmem.layout();
        let contents = unsafe {
            std::slice::from_raw_parts(layout.frame_ptr(victim.frame), PAGE_SIZE).to_vec()
        };

        let mut entry = self
            .walker
            .leaf_entry(victim.page_table, victim.vaddr)
            .unwrap();
        let entry = unsafe { entry.as_mut() };
        let mut flags = entry.flags();
        flags.remove(PageTableFlags::PRESENT);
        entry.set_flags(flags);

        assert!(self.kmem.deregister_from_eviction(victim.frame));
        self.kmem.free(victim.frame.start_address());

        self.swapped.lock().unwrap().push(SwappedPage {
            page_table: victim.page_table,
            vaddr: victim.vaddr,
            frame: victim.frame,
            contents,
        });

        true
    }
}
