use super::descriptor::{DescriptorTable, Mapping, PageDescriptor};

/// Circular doubly-linked list of resident, swappable frames, threaded
/// through the descriptor table. Links are descriptor slots, not pointers.
///
/// The head is the most recently inserted frame. The clock hand always
/// starts at the head; frames given a second chance are rotated to the tail.
pub struct LruRing<const N: usize> {
    descriptors: DescriptorTable<N>,
    head: Option<usize>,
    len: usize,
}

impl<const N: usize> LruRing<N> {
    pub const fn new() -> Self {
        Self {
            descriptors: DescriptorTable::new(),
            head: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn head(&self) -> Option<usize> {
        self.head
    }

    pub fn descriptor(&self, index: usize) -> &PageDescriptor {
        &self.descriptors[index]
    }

    pub fn contains(&self, index: usize) -> bool {
        self.descriptors[index].is_linked()
    }

    /// Records where `index` is mapped and links it in as the new head.
    pub fn insert(&mut self, index: usize, mapping: Mapping) {
        let descriptor = &mut self.descriptors[index];
        if descriptor.is_linked() || descriptor.mapping.is_some() {
            panic!("lru: frame {} is already tracked", index);
        }
        descriptor.mapping = Some(mapping);

        match self.head {
            None => {
                descriptor.prev = Some(index);
                descriptor.next = Some(index);
            }
            Some(head) => self.link_before(index, head),
        }

        self.head = Some(index);
        self.len += 1;
    }

    /// Unlinks `index` and forgets its mapping. Returns `None` if the frame
    /// was not in the ring.
    pub fn remove(&mut self, index: usize) -> Option<Mapping> {
        if !self.descriptors[index].is_linked() {
            return None;
        }

        let next = self.next_of(index);
        if next == index {
            self.head = None;
        } else {
            if self.head == Some(index) {
                self.head = Some(next);
            }
            self.unlink(index);
        }

        let descriptor = &mut self.descriptors[index];
        descriptor.prev = None;
        descriptor.next = None;
        self.len -= 1;

        descriptor.mapping.take()
    }

    /// Clock scan. `take_accessed` must report whether the frame's access bit
    /// was set and clear it. The first frame found with the bit clear is
    /// returned and left in the ring; every frame passed over is rotated to
    /// the tail.
    pub fn select_victim<F>(&mut self, mut take_accessed: F) -> Option<usize>
    where
        F: FnMut(usize, &Mapping) -> bool,
    {
        let mut cursor = self.head?;

        loop {
            let next = self.next_of(cursor);
            let mapping = self.mapping_of(cursor);

            if !take_accessed(cursor, &mapping) {
                return Some(cursor);
            }

            self.move_to_tail(cursor);
            cursor = next;
        }
    }

    /// Slots from head to tail.
    pub fn iter(&self) -> Iter<'_, N> {
        Iter {
            ring: self,
            cursor: self.head,
            remaining: self.len,
        }
    }

    /// Panics unless the ring is a well-formed cycle of exactly `len` nodes.
    pub fn check(&self) {
        let Some(head) = self.head else {
            assert_eq!(self.len, 0, "lru: empty ring with len {}", self.len);
            return;
        };

        let mut cursor = head;
        for step in 0..self.len {
            let next = self.next_of(cursor);
            assert_eq!(
                self.prev_of(next),
                cursor,
                "lru: prev of {} does not point back at {}",
                next,
                cursor
            );
            assert!(
                self.descriptors[cursor].mapping.is_some(),
                "lru: linked frame {} has no mapping",
                cursor
            );
            if next == head && step + 1 != self.len {
                panic!("lru: cycle closed after {} of {} nodes", step + 1, self.len);
            }
            cursor = next;
        }

        assert_eq!(cursor, head, "lru: {} steps did not return to head", self.len);
    }

    fn move_to_tail(&mut self, index: usize) {
        let head = match self.head {
            Some(head) => head,
            None => panic!("lru: rotating {} in an empty ring", index),
        };

        if head == index {
            // the old head becomes the tail just by advancing the head
            self.head = Some(self.next_of(index));
        } else {
            self.unlink(index);
            self.link_before(index, head);
        }
    }

    // Places `index` between `anchor` and its predecessor.
    fn link_before(&mut self, index: usize, anchor: usize) {
        let tail = self.prev_of(anchor);

        self.descriptors[tail].next = Some(index);
        self.descriptors[index].prev = Some(tail);
        self.descriptors[index].next = Some(anchor);
        self.descriptors[anchor].prev = Some(index);
    }

    // Joins the neighbours of `index`. Leaves its own links and the head alone.
    fn unlink(&mut self, index: usize) {
        let prev = self.prev_of(index);
        let next = self.next_of(index);

        self.descriptors[prev].next = Some(next);
        self.descriptors[next].prev = Some(prev);
    }

    fn next_of(&self, index: usize) -> usize {
        match self.descriptors[index].next {
            Some(next) => next,
            None => panic!("lru: frame {} has no next link", index),
        }
    }

    fn prev_of(&self, index: usize) -> usize {
        match self.descriptors[index].prev {
            Some(prev) => prev,
            None => panic!("lru: frame {} has no prev link", index),
        }
    }

    fn mapping_of(&self, index: usize) -> Mapping {
        match self.descriptors[index].mapping {
            Some(mapping) => mapping,
            None => panic!("lru: frame {} is linked without a mapping", index),
        }
    }
}

pub struct Iter<'a, const N: usize> {
    ring: &'a LruRing<N>,
    cursor: Option<usize>,
    remaining: usize,
}

impl<'a, const N: usize> Iterator for Iter<'a, N> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let current = self.cursor?;
        self.cursor = Some(self.ring.next_of(current));
        self.remaining -= 1;

        Some(current)
    }
}
