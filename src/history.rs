//! Bounded per-device reading history

use std::collections::VecDeque;

use crate::sensors::{DeviceReading, SampleField};

/// Time-ordered readings of one device; the oldest is evicted when full.
#[derive(Debug, Clone)]
pub struct DeviceHistory {
    readings: VecDeque<DeviceReading>,
    capacity: usize,
}

impl DeviceHistory {
    /// Create a history holding at most `capacity` readings (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            readings: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append a reading, evicting the oldest when at capacity
    pub fn push(&mut self, reading: DeviceReading) {
        if self.readings.len() == self.capacity {
            self.readings.pop_front();
        }
        self.readings.push_back(reading);
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.readings.clear();
    }

    /// Most recent reading
    pub fn last(&self) -> Option<&DeviceReading> {
        self.readings.back()
    }

    /// Up to `n` most recent readings, oldest first
    pub fn latest(&self, n: usize) -> Vec<DeviceReading> {
        let skip = self.readings.len().saturating_sub(n);
        self.readings.iter().skip(skip).cloned().collect()
    }

    /// All readings, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &DeviceReading> {
        self.readings.iter()
    }

    /// Mean of `field` over the last `window` readings.
    ///
    /// Readings that do not carry the field are skipped; `None` if no reading
    /// in the window does.
    pub fn moving_average(&self, field: SampleField, window: usize) -> Option<f64> {
        let skip = self.readings.len().saturating_sub(window);
        let (sum, count) = self
            .readings
            .iter()
            .skip(skip)
            .filter_map(|r| r.sample.field(field))
            .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));

        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }
}
