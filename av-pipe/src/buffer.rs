/// Fixed-capacity ring of reusable slots.
///
/// Read and write cursors advance modulo the capacity. Slots are allocated once
/// when the ring is built and never grow, so a full ring refuses new items
/// instead of reallocating.
pub struct SlotRing<T> {
    slots: Vec<Option<T>>,
    rindex: usize,
    windex: usize,
    size: usize,
}

impl<T> SlotRing<T> {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be positive");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            rindex: 0,
            windex: 0,
            size: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size == self.slots.len()
    }

    /// Store `item` at the write cursor. A full ring hands the item back.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.slots[self.windex] = Some(item);
        self.windex = (self.windex + 1) % self.slots.len();
        self.size += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = self.slots[self.rindex].take();
        self.rindex = (self.rindex + 1) % self.slots.len();
        self.size -= 1;
        item
    }

    pub fn peek(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        self.slots[self.rindex].as_ref()
    }

    /// Drop every stored item and rewind both cursors.
    pub fn clear(&mut self) {
        while self.pop().is_some() {}
        self.rindex = 0;
        self.windex = 0;
    }

    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        std::iter::from_fn(move || self.pop())
    }
}

/// Pool of spare items handed out before falling back to a fresh default.
pub struct BufferPool<T> {
    spares: SlotRing<T>,
    created: usize,
}

impl<T: Default> BufferPool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            spares: SlotRing::with_capacity(capacity),
            created: 0,
        }
    }

    pub fn acquire(&mut self) -> T {
        match self.spares.pop() {
            Some(item) => item,
            None => {
                self.created += 1;
                T::default()
            }
        }
    }

    /// Keep `item` for a later `acquire`. Returns false when the pool was full
    /// and the item was dropped.
    pub fn release(&mut self, item: T) -> bool {
        self.spares.push(item).is_ok()
    }

    pub fn spare_count(&self) -> usize {
        self.spares.len()
    }

    /// Items built from scratch because no spare was available.
    pub fn created(&self) -> usize {
        self.created
    }

    pub fn clear(&mut self) {
        self.spares.clear();
    }
}
