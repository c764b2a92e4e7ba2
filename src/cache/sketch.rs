//! Access frequency estimation for cache admission.
//!
//! A count-min sketch with four rows of 4-bit saturating counters. Every
//! `reset_at` increments all counters are halved so that old popularity
//! decays and the sketch tracks recent traffic.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::cache::key::CacheKey;

const ROWS: usize = 4;
const MAX_COUNT: u8 = 15;
const MIN_WIDTH: usize = 64;
const MAX_WIDTH: usize = 1 << 22;

/// Approximate per-key access counter.
#[derive(Debug)]
pub struct FrequencySketch {
    rows: [Box<[AtomicU8]>; ROWS],
    mask: usize,
    additions: AtomicU64,
    reset_at: u64,
}

impl FrequencySketch {
    /// Size the sketch for roughly `capacity` distinct hot keys.
    pub fn new(capacity: u64) -> Self {
        let width = usize::try_from(capacity)
            .unwrap_or(MAX_WIDTH)
            .clamp(MIN_WIDTH, MAX_WIDTH)
            .next_power_of_two();
        let rows = std::array::from_fn(|_| (0..width).map(|_| AtomicU8::new(0)).collect());
        Self {
            rows,
            mask: width - 1,
            additions: AtomicU64::new(0),
            reset_at: width as u64 * 10,
        }
    }

    /// Record one access of `key`.
    pub fn increment(&self, key: &CacheKey) {
        for (row, counters) in self.rows.iter().enumerate() {
            let counter = &counters[self.index(key, row)];
            let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n < MAX_COUNT).then_some(n + 1)
            });
        }
        // Exactly one caller observes the threshold and ages the counters.
        if self.additions.fetch_add(1, Ordering::Relaxed) + 1 == self.reset_at {
            self.halve();
            self.additions.store(0, Ordering::Relaxed);
        }
    }

    /// Estimated number of recent accesses of `key`.
    pub fn estimate(&self, key: &CacheKey) -> u8 {
        self.rows
            .iter()
            .enumerate()
            .map(|(row, counters)| counters[self.index(key, row)].load(Ordering::Relaxed))
            .min()
            .unwrap_or(0)
    }

    fn halve(&self) {
        for counters in &self.rows {
            for counter in counters.iter() {
                let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n >> 1));
            }
        }
    }

    fn index(&self, key: &CacheKey, row: usize) -> usize {
        (key.word(row) as usize) & self.mask
    }
}
