//! Contiguous backing store for an object's field buffers.

/// Location of one field buffer inside the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot {
    pub start: usize,
    pub len: usize,
}

impl Slot {
    fn end(&self) -> usize {
        self.start + self.len
    }
}

#[derive(Debug, Default)]
pub(crate) struct Arena {
    data: Vec<u8>,
    /// Bytes held by released slots
    dead: usize,
}

impl Arena {
    /// Append a zeroed buffer of `len` bytes.
    pub fn alloc(&mut self, len: usize) -> Slot {
        let start = self.data.len();
        self.data.resize(start + len, 0);
        Slot { start, len }
    }

    pub fn release(&mut self, slot: Slot) {
        self.dead += slot.len;
    }

    /// Bytes held, live or released
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn live(&self) -> usize {
        self.data.len() - self.dead
    }

    /// Whether released space outweighs live space
    pub fn needs_compaction(&self) -> bool {
        self.dead > 0 && self.dead >= self.live()
    }

    pub fn get(&self, slot: Slot) -> &[u8] {
        &self.data[slot.start..slot.end()]
    }

    pub fn get_mut(&mut self, slot: Slot) -> &mut [u8] {
        &mut self.data[slot.start..slot.end()]
    }

    /// Borrow several disjoint slots mutably at once.
    ///
    /// `slots` must be sorted by start and non-overlapping; results follow the
    /// same order.
    pub fn split_mut(&mut self, slots: &[Slot]) -> Vec<&mut [u8]> {
        let mut out = Vec::with_capacity(slots.len());
        let mut rest: &mut [u8] = &mut self.data;
        let mut cursor = 0;
        for slot in slots {
            debug_assert!(slot.start >= cursor, "slots must be sorted and disjoint");
            let (_, tail) = std::mem::take(&mut rest).split_at_mut(slot.start - cursor);
            let (buffer, tail) = tail.split_at_mut(slot.len);
            out.push(buffer);
            rest = tail;
            cursor = slot.end();
        }
        out
    }

    /// Repack live slots contiguously, updating them in place.
    pub fn compact<'a, I>(&mut self, slots: I)
    where
        I: IntoIterator<Item = &'a mut Slot>,
    {
        let mut slots: Vec<&mut Slot> = slots.into_iter().collect();
        slots.sort_by_key(|slot| slot.start);

        let mut data = Vec::with_capacity(self.live());
        for slot in slots {
            let start = data.len();
            data.extend_from_slice(&self.data[slot.start..slot.end()]);
            slot.start = start;
        }
        self.data = data;
        self.dead = 0;
    }
}
