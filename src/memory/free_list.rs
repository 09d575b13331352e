use volatile::Volatile;
use x86_64::{structures::paging::PhysFrame, PhysAddr};

use super::{MemoryLayout, JUNK_BYTE, PAGE_SIZE};

// stored in the link word of the last free frame
const END_OF_LIST: u64 = u64::MAX;

const JUNK_WORD: u64 = u64::from_ne_bytes([JUNK_BYTE; 8]);

/// Stack of unused frames. Each free frame's first word holds the physical
/// address of the next one, so the list needs no storage of its own.
#[derive(Debug)]
pub struct FreeList {
    head: Option<PhysFrame>,
    len: usize,
}

impl FreeList {
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// # Safety
    /// `frame` must be unused, not already on the list, and reachable through
    /// `layout.frame_ptr`.
    pub unsafe fn push(&mut self, frame: PhysFrame, layout: &MemoryLayout) {
        let next = self
            .head
            .map_or(END_OF_LIST, |head| head.start_address().as_u64());

        unsafe { link_word(frame, layout) }.write(next);

        self.head = Some(frame);
        self.len += 1;
    }

    /// Takes the most recently freed frame. Its link word is overwritten with
    /// junk so the whole page reads back as junk.
    ///
    /// # Safety
    /// `layout` must be the one every frame on the list was pushed with.
    pub unsafe fn pop(&mut self, layout: &MemoryLayout) -> Option<PhysFrame> {
        let frame = self.head?;

        let mut link = unsafe { link_word(frame, layout) };
        let next = link.read();
        link.write(JUNK_WORD);

        self.head = if next == END_OF_LIST {
            None
        } else {
            Some(PhysFrame::containing_address(PhysAddr::new(next)))
        };
        self.len -= 1;

        Some(frame)
    }

    /// Walks the chain without modifying it.
    ///
    /// # Safety
    /// Same as [`FreeList::pop`].
    pub unsafe fn frames<'a>(&self, layout: &'a MemoryLayout) -> Frames<'a> {
        Frames {
            current: self.head,
            layout,
        }
    }
}

pub struct Frames<'a> {
    current: Option<PhysFrame>,
    layout: &'a MemoryLayout,
}

impl<'a> Iterator for Frames<'a> {
    type Item = PhysFrame;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = self.current?;
        let next = unsafe { link_word(frame, self.layout) }.read();

        self.current = (next != END_OF_LIST)
            .then(|| PhysFrame::containing_address(PhysAddr::new(next)));

        Some(frame)
    }
}

/// Fills `frame` with [`JUNK_BYTE`] so stale references read garbage.
///
/// # Safety
/// `frame` must be unused and reachable through `layout.frame_ptr`.
pub unsafe fn poison(frame: PhysFrame, layout: &MemoryLayout) {
    unsafe { core::ptr::write_bytes(layout.frame_ptr(frame), JUNK_BYTE, PAGE_SIZE) };
}

unsafe fn link_word<'a>(frame: PhysFrame, layout: &MemoryLayout) -> Volatile<&'a mut u64> {
    Volatile::new(unsafe { &mut *layout.frame_ptr(frame).cast::<u64>() })
}
