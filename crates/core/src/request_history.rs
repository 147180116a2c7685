//! Fixed-size ring of past capacity requests

/// Ring buffer keeping the last N requests with a running sum and minimum.
///
/// A history built with capacity 0 keeps only the last value and always
/// reports a sum of 0, meaning "no averaging requested".
#[derive(Debug, Clone)]
pub struct RequestHistory {
    slots: Box<[u32]>,
    next: usize,
    filled: usize,
    sum: u64,
    min: u32,
    summing: bool,
    current: u32,
    previous: u32,
}

impl RequestHistory {
    pub fn new(capacity: usize) -> Self {
        let summing = capacity > 0;
        let capacity = capacity.max(1);
        Self {
            slots: vec![0; capacity].into_boxed_slice(),
            next: 0,
            filled: 0,
            sum: 0,
            min: 0,
            summing,
            current: 0,
            previous: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of valid entries in the window.
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn push(&mut self, value: u32) {
        let capacity = self.slots.len();
        let full = self.filled == capacity;
        let evicted = self.slots[self.next];

        if full {
            self.sum -= evicted as u64;
        } else {
            self.filled += 1;
        }
        self.sum += value as u64;
        self.slots[self.next] = value;
        self.next = (self.next + 1) % capacity;

        if self.filled == 1 || value <= self.min {
            self.min = value;
        } else if full && evicted == self.min {
            self.min = self.iter_recent().min().unwrap_or(value);
        }

        self.previous = self.current;
        self.current = value;
    }

    /// Sum of the values in the window, 0 when averaging is disabled.
    pub fn sum(&self) -> u64 {
        if self.summing {
            self.sum
        } else {
            0
        }
    }

    /// Smallest value in the window, 0 when empty.
    pub fn min(&self) -> u32 {
        self.min
    }

    /// Most recently pushed value.
    pub fn current(&self) -> u32 {
        self.current
    }

    /// Value pushed just before [`RequestHistory::current`].
    pub fn previous(&self) -> u32 {
        self.previous
    }

    /// Oldest value still in the window.
    pub fn oldest(&self) -> Option<u32> {
        if self.filled == 0 {
            return None;
        }
        let capacity = self.slots.len();
        let index = (self.next + capacity - self.filled) % capacity;
        Some(self.slots[index])
    }

    pub fn mean(&self) -> f64 {
        if self.filled == 0 {
            return 0.0;
        }
        self.sum() as f64 / self.filled as f64
    }

    /// Sum of the `count` most recent values.
    pub fn partial_sum(&self, count: usize) -> u64 {
        if !self.summing {
            return 0;
        }
        self.iter_recent().take(count).map(u64::from).sum()
    }

    /// Values from the most recent to the oldest.
    pub fn iter_recent(&self) -> impl Iterator<Item = u32> + '_ {
        let capacity = self.slots.len();
        (1..=self.filled).map(move |back| self.slots[(self.next + capacity - back) % capacity])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_tracks_last_n_values() {
        let values = [5u32, 0, 17, 3, 3, 250, 1, 9, 42, 7, 0, 11];
        for capacity in 1..6 {
            let mut history = RequestHistory::new(capacity);
            for (i, value) in values.iter().enumerate() {
                history.push(*value);
                let start = (i + 1).saturating_sub(capacity);
                let expected: u64 = values[start..=i].iter().map(|v| *v as u64).sum();
                assert_eq!(history.sum(), expected, "capacity {} after {} pushes", capacity, i + 1);
                assert_eq!(history.len(), (i + 1).min(capacity));
            }
        }
    }

    #[test]
    fn test_zero_capacity_never_sums() {
        let mut history = RequestHistory::new(0);
        assert_eq!(history.capacity(), 1);
        for value in [10u32, 20, 4000, 1] {
            history.push(value);
            assert_eq!(history.sum(), 0);
            assert_eq!(history.partial_sum(4), 0);
        }
        assert_eq!(history.current(), 1);
        assert_eq!(history.previous(), 4000);
    }

    #[test]
    fn test_min_follows_window() {
        let values = [8u32, 3, 9, 12, 7, 15, 15, 2, 20, 21, 22];
        let capacity = 3;
        let mut history = RequestHistory::new(capacity);
        for (i, value) in values.iter().enumerate() {
            history.push(*value);
            let start = (i + 1).saturating_sub(capacity);
            let expected = *values[start..=i].iter().min().unwrap();
            assert_eq!(history.min(), expected, "after {} pushes", i + 1);
        }
    }

    #[test]
    fn test_accessors() {
        let mut history = RequestHistory::new(4);
        assert!(history.is_empty());
        assert_eq!(history.oldest(), None);
        for value in [1u32, 2, 3, 4, 5, 6] {
            history.push(value);
        }
        assert_eq!(history.current(), 6);
        assert_eq!(history.previous(), 5);
        assert_eq!(history.oldest(), Some(3));
        assert_eq!(history.partial_sum(2), 11);
        assert_eq!(history.partial_sum(10), 18);
        assert!((history.mean() - 4.5).abs() < f64::EPSILON);
        assert_eq!(history.iter_recent().collect::<Vec<_>>(), vec![6, 5, 4, 3]);
    }
}
