//! Bounded FIFO history with averaging

use std::collections::VecDeque;

/// Default number of samples kept per tracked signal
pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// Fixed-capacity history of recent values.
///
/// Pushing past capacity evicts exactly the oldest entry.
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    values: VecDeque<T>,
    capacity: usize,
}

impl<T> RollingWindow<T> {
    /// Create a window holding at most `capacity` values (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a value, returning the evicted one if the window was full
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = if self.values.len() == self.capacity {
            self.values.pop_front()
        } else {
            None
        };
        self.values.push_back(value);
        evicted
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the window has been filled once
    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn latest(&self) -> Option<&T> {
        self.values.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.values.iter()
    }

    /// Mean of a projection over the held values
    pub fn average_by<F>(&self, f: F) -> Option<f64>
    where
        F: Fn(&T) -> f64,
    {
        if self.values.is_empty() {
            return None;
        }
        let sum: f64 = self.values.iter().map(f).sum();
        Some(sum / self.values.len() as f64)
    }
}

impl RollingWindow<f64> {
    /// Mean of the held values, `0.0` when empty
    pub fn average(&self) -> f64 {
        self.average_by(|v| *v).unwrap_or(0.0)
    }
}

impl<T> Default for RollingWindow<T> {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}
