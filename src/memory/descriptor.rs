use core::ops::{Index, IndexMut};

use x86_64::{structures::paging::PhysFrame, VirtAddr};

/// Where a ring-tracked frame is mapped. The page table is not owned here;
/// it belongs to whichever address space registered the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub page_table: PhysFrame,
    pub vaddr: VirtAddr,
}

/// Per-frame metadata. `prev`/`next` are descriptor slots in the LRU ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageDescriptor {
    pub mapping: Option<Mapping>,
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

impl PageDescriptor {
    pub const EMPTY: Self = Self {
        mapping: None,
        prev: None,
        next: None,
    };

    pub fn is_linked(&self) -> bool {
        self.next.is_some()
    }
}

/// Fixed array of descriptors indexed by frame number.
pub struct DescriptorTable<const N: usize> {
    slots: [PageDescriptor; N],
}

impl<const N: usize> DescriptorTable<N> {
    pub const fn new() -> Self {
        Self {
            slots: [PageDescriptor::EMPTY; N],
        }
    }
}

impl<const N: usize> Index<usize> for DescriptorTable<N> {
    type Output = PageDescriptor;

    fn index(&self, index: usize) -> &Self::Output {
        match self.slots.get(index) {
            Some(descriptor) => descriptor,
            None => panic!("lru: descriptor {} out of range ({} slots)", index, N),
        }
    }
}

impl<const N: usize> IndexMut<usize> for DescriptorTable<N> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        match self.slots.get_mut(index) {
            Some(descriptor) => descriptor,
            None => panic!("lru: descriptor {} out of range ({} slots)", index, N),
        }
    }
}
