/// Fixed-capacity ring buffer that overwrites its oldest entry when full.
///
/// Indices passed to [`get`](HistoryBuffer::get) and
/// [`remove_range`](HistoryBuffer::remove_range) count from the oldest
/// retained entry.
#[derive(Debug, Clone)]
pub struct HistoryBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> HistoryBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a value, evicting the oldest one on overflow.
    pub fn add(&mut self, value: T) {
        let capacity = self.capacity();
        let tail = (self.head + self.len) % capacity;
        self.slots[tail] = Some(value);
        if self.len == capacity {
            self.head = (self.head + 1) % capacity;
        } else {
            self.len += 1;
        }
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        self.slots[self.physical(index)].as_ref()
    }

    /// Most recent entry.
    pub fn last(&self) -> Option<&T> {
        self.len.checked_sub(1).and_then(|i| self.get(i))
    }

    /// Remove `count` entries starting at `start`, closing the hole so the
    /// survivors keep their relative order. Out-of-range parts are ignored.
    pub fn remove_range(&mut self, start: usize, count: usize) {
        if start >= self.len || count == 0 {
            return;
        }
        let end = start.saturating_add(count).min(self.len);
        let removed = end - start;

        // Shift the entries after the hole down over it.
        for i in end..self.len {
            let from = self.physical(i);
            let to = self.physical(i - removed);
            self.slots[to] = self.slots[from].take();
        }
        for i in (self.len - removed)..self.len {
            let slot = self.physical(i);
            self.slots[slot] = None;
        }
        self.len -= removed;
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.len = 0;
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }

    fn physical(&self, index: usize) -> usize {
        (self.head + index) % self.capacity()
    }
}
