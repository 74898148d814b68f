//! Dense, bounded slot table.
//!
//! Occupied slots are always `0..len`. Removing a slot moves the last
//! occupant into the freed index, so removal is O(1) and iteration never
//! sees gaps.

/// Bounded array of sessions with swap-based compaction.
#[derive(Debug)]
pub struct SlotTable<T> {
    slots: Vec<T>,
    capacity: usize,
}

impl<T> SlotTable<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    /// Append to the first free slot; hands the item back when full.
    pub fn push(&mut self, item: T) -> Result<usize, T> {
        if self.is_full() {
            return Err(item);
        }
        self.slots.push(item);
        Ok(self.slots.len() - 1)
    }

    /// Remove every slot matching `pred`, compacting as it goes.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> Vec<T> {
        let mut removed = Vec::new();
        let mut idx = 0;
        while idx < self.slots.len() {
            if pred(&self.slots[idx]) {
                removed.push(self.slots.swap_remove(idx));
            } else {
                idx += 1;
            }
        }
        removed
    }

    pub fn position(&self, pred: impl FnMut(&T) -> bool) -> Option<usize> {
        self.slots.iter().position(pred)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.slots.iter()
    }

    /// Empty the table, in slot order.
    pub fn drain(&mut self) -> Vec<T> {
        std::mem::take(&mut self.slots)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn push_stops_at_capacity() {
        let mut table = SlotTable::with_capacity(2);
        assert_eq!(table.push('a'), Ok(0));
        assert_eq!(table.push('b'), Ok(1));
        assert!(table.is_full());
        assert_eq!(table.push('c'), Err('c'));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn remove_moves_last_into_hole() {
        let mut table = SlotTable::with_capacity(4);
        for c in ['a', 'b', 'c', 'd'] {
            table.push(c).unwrap();
        }
        assert_eq!(table.remove_where(|c| *c == 'b'), vec!['b']);
        assert_eq!(table.iter().copied().collect::<Vec<_>>(), vec!['a', 'd', 'c']);
        assert!(table.remove_where(|c| *c == 'z').is_empty());
        assert!(!table.is_full());
    }

    #[test]
    fn remove_where_handles_swapped_in_matches() {
        let mut table = SlotTable::with_capacity(5);
        for n in [1, 2, 3, 4, 6] {
            table.push(n).unwrap();
        }
        let mut removed = table.remove_where(|n| n % 2 == 0);
        removed.sort_unstable();
        assert_eq!(removed, vec![2, 4, 6]);
        assert_eq!(table.iter().copied().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn freed_slot_is_reusable() {
        let mut table = SlotTable::with_capacity(1);
        table.push("first").unwrap();
        assert_eq!(table.remove_where(|_| true), vec!["first"]);
        assert!(table.is_empty());
        assert_eq!(table.push("second"), Ok(0));
        assert_eq!(table.position(|s| *s == "second"), Some(0));
    }
}
