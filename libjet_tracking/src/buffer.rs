use std::collections::VecDeque;

use super::error::BufferError;

/// Fixed length FIFO window of the most recent values.
///
/// The buffer is created full of zeros and every push evicts the oldest value, so its
/// length always equals its capacity.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingBuffer {
    values: VecDeque<f64>,
}

impl RollingBuffer {
    /// Create a zero-filled buffer. A capacity of zero is a configuration error
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        if capacity == 0 {
            return Err(BufferError::ZeroCapacity);
        }
        Ok(Self {
            values: VecDeque::from(vec![0.0; capacity]),
        })
    }

    /// Append a value, evicting the oldest
    pub fn push(&mut self, value: f64) {
        self.values.pop_front();
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Most recently pushed value
    pub fn latest(&self) -> f64 {
        // Never empty: the constructor rejects zero capacity
        self.values.back().copied().unwrap_or_default()
    }

    /// Number of entries that are not exactly zero
    pub fn count_nonzero(&self) -> usize {
        self.values.iter().filter(|v| **v != 0.0).count()
    }

    /// Copy the window, oldest first
    pub fn to_vec(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    /// Mean of the entries whose slot in `mask` is zero. Buffers of different capacity are
    /// aligned on their newest entries. None when every entry is masked.
    pub fn masked_mean(&self, mask: &RollingBuffer) -> Option<f64> {
        let mut sum = 0.0;
        let mut n = 0usize;
        for (value, flag) in self.values.iter().rev().zip(mask.values.iter().rev()) {
            if *flag == 0.0 {
                sum += value;
                n += 1;
            }
        }
        if n == 0 {
            None
        } else {
            Some(sum / n as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(RollingBuffer::new(0), Err(BufferError::ZeroCapacity)));
    }

    #[test]
    fn test_prefilled_with_zeros() {
        let buffer = RollingBuffer::new(4).unwrap();
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.to_vec(), vec![0.0; 4]);
        assert_eq!(buffer.count_nonzero(), 0);
    }

    #[test]
    fn test_keeps_last_capacity_values() {
        let capacity = 300;
        let k = 17;
        let mut buffer = RollingBuffer::new(capacity).unwrap();
        for i in 0..(capacity + k) {
            buffer.push(i as f64);
        }
        assert_eq!(buffer.len(), capacity);
        let expected: Vec<f64> = (k..(capacity + k)).map(|i| i as f64).collect();
        assert_eq!(buffer.to_vec(), expected);
        assert_eq!(buffer.latest(), (capacity + k - 1) as f64);
    }

    #[test]
    fn test_masked_mean_skips_flagged() {
        let mut values = RollingBuffer::new(4).unwrap();
        let mut mask = RollingBuffer::new(4).unwrap();
        for (v, f) in [(1.0, 0.0), (100.0, 100.0), (3.0, 0.0), (5.0, 0.0)] {
            values.push(v);
            mask.push(f);
        }
        assert_eq!(values.masked_mean(&mask), Some(3.0));

        let mut all_masked = RollingBuffer::new(2).unwrap();
        all_masked.push(1.0);
        all_masked.push(1.0);
        let mut short = RollingBuffer::new(2).unwrap();
        short.push(9.0);
        assert_eq!(short.masked_mean(&all_masked), None);
    }
}
