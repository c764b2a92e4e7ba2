//! Bounded, sharded in-memory response store.
//!
//! # Responsibilities
//! - Enforce the object-count and byte-cost budgets
//! - Decide admission when the store is full
//! - Hide and reclaim expired entries
//!
//! # Design Decisions
//! - Keys map to one of N shards, each behind its own `RwLock`; reads of
//!   different keys never serialize on each other
//! - Budgets are global atomics. An insert reserves its count and cost
//!   before the entry is published, evicting first if needed, so the
//!   totals can never overshoot
//! - Eviction samples a handful of entries from a random shard. Expired
//!   samples go first; otherwise the least frequently used sample is the
//!   victim, and only if the newcomer is at least as popular (TinyLFU)
//! - Replacing a stored key reuses its budget; a refused replacement
//!   leaves the stored version in place
//! - No lock is held while another shard is locked

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::cache::entry::CacheEntry;
use crate::cache::key::CacheKey;
use crate::cache::sketch::FrequencySketch;
use crate::cache::ttl::Ttl;
use crate::cache::Cache;

const MAX_SHARDS: usize = 64;
const SAMPLE_SIZE: usize = 5;
const MAX_EVICTIONS_PER_SET: usize = 1024;

/// Error type for store construction.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cache max_objects must be greater than zero")]
    ZeroObjects,
    #[error("cache max_cost must be greater than zero")]
    ZeroCost,
}

/// Store limits and defaults.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of live entries.
    pub max_objects: u64,
    /// Maximum aggregate body bytes.
    pub max_cost: u64,
    /// Lifetime for entries whose headers give none. `None` never expires.
    pub default_ttl: Option<Duration>,
}

#[derive(Debug)]
struct Slot {
    entry: Arc<CacheEntry>,
    expires_at: Option<Instant>,
    /// Index of the key in `Shard::keys`.
    position: usize,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Entries of one shard plus a dense key list, so eviction can sample
/// without walking the map.
#[derive(Debug, Default)]
struct Shard {
    slots: HashMap<CacheKey, Slot>,
    keys: Vec<CacheKey>,
}

impl Shard {
    fn get(&self, key: &CacheKey) -> Option<&Slot> {
        self.slots.get(key)
    }

    /// Publish `entry` under `key`, returning the entry it replaced.
    fn insert(
        &mut self,
        key: CacheKey,
        entry: Arc<CacheEntry>,
        expires_at: Option<Instant>,
    ) -> Option<Arc<CacheEntry>> {
        if let Some(slot) = self.slots.get_mut(&key) {
            slot.expires_at = expires_at;
            return Some(std::mem::replace(&mut slot.entry, entry));
        }
        let position = self.keys.len();
        self.keys.push(key);
        self.slots.insert(
            key,
            Slot {
                entry,
                expires_at,
                position,
            },
        );
        None
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let slot = self.slots.remove(key)?;
        self.keys.swap_remove(slot.position);
        if let Some(moved) = self.keys.get(slot.position) {
            if let Some(moved_slot) = self.slots.get_mut(moved) {
                moved_slot.position = slot.position;
            }
        }
        Some(slot.entry)
    }

    /// Up to `SAMPLE_SIZE` neighbouring keys from a random position.
    fn sample(&self) -> impl Iterator<Item = (&CacheKey, &Slot)> + '_ {
        let len = self.keys.len();
        let start = if len == 0 { 0 } else { fastrand::usize(..len) };
        (0..SAMPLE_SIZE.min(len)).filter_map(move |i| {
            let key = &self.keys[(start + i) % len];
            self.slots.get(key).map(|slot| (key, slot))
        })
    }

    fn expired_keys(&self, now: Instant) -> Vec<CacheKey> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.is_expired(now))
            .map(|(key, _)| *key)
            .collect()
    }
}

enum Eviction {
    Evicted,
    Rejected,
    Empty,
}

enum Replacement {
    Done,
    Absent,
    NeedsRoom { old_cost: u64 },
}

/// Concurrent cost-bounded cache.
#[derive(Debug)]
pub struct CacheStore {
    shards: Box<[RwLock<Shard>]>,
    shard_mask: usize,
    admission: FrequencySketch,
    max_objects: u64,
    max_cost: u64,
    used_objects: AtomicU64,
    used_cost: AtomicU64,
    default_ttl: Option<Duration>,
}

impl CacheStore {
    /// Create an empty store.
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        if config.max_objects == 0 {
            return Err(StoreError::ZeroObjects);
        }
        if config.max_cost == 0 {
            return Err(StoreError::ZeroCost);
        }

        let shard_count = usize::try_from(config.max_objects)
            .unwrap_or(MAX_SHARDS)
            .clamp(1, MAX_SHARDS)
            .next_power_of_two();
        let shards = (0..shard_count).map(|_| RwLock::new(Shard::default())).collect();

        tracing::debug!(
            max_objects = config.max_objects,
            max_cost = config.max_cost,
            shards = shard_count,
            "Cache store created"
        );

        Ok(Self {
            shards,
            shard_mask: shard_count - 1,
            admission: FrequencySketch::new(config.max_objects),
            max_objects: config.max_objects,
            max_cost: config.max_cost,
            used_objects: AtomicU64::new(0),
            used_cost: AtomicU64::new(0),
            default_ttl: config.default_ttl,
        })
    }

    /// Number of stored entries, including expired ones not yet reclaimed.
    pub fn len(&self) -> u64 {
        self.used_objects.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate cost of stored entries.
    pub fn cost(&self) -> u64 {
        self.used_cost.load(Ordering::Acquire)
    }

    pub fn max_objects(&self) -> u64 {
        self.max_objects
    }

    pub fn max_cost(&self) -> u64 {
        self.max_cost
    }

    /// Look up a live entry.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.admission.increment(key);
        let now = Instant::now();
        let shard = self.shard(key);
        {
            let guard = shard.read();
            match guard.get(key) {
                None => return None,
                Some(slot) if !slot.is_expired(now) => return Some(slot.entry.clone()),
                Some(_) => {}
            }
        }
        // Expired: reclaim it now rather than waiting for the sweeper.
        let mut guard = shard.write();
        if guard.get(key).is_some_and(|slot| slot.is_expired(now)) {
            if let Some(entry) = guard.remove(key) {
                self.release(entry.cost());
            }
        }
        None
    }

    /// Insert using the lifetime derived from the entry's headers.
    /// Entries marked do-not-cache are dropped.
    pub fn set(&self, key: CacheKey, entry: CacheEntry) -> bool {
        match Ttl::from_headers(entry.headers()) {
            Ttl::DoNotCache => false,
            Ttl::Default => self.insert(key, entry, self.default_ttl),
            Ttl::Explicit(ttl) => self.insert(key, entry, Some(ttl)),
        }
    }

    /// Insert with an explicit lifetime.
    pub fn set_with_ttl(&self, key: CacheKey, entry: CacheEntry, ttl: Duration) -> bool {
        self.insert(key, entry, Some(ttl))
    }

    /// Remove an entry, releasing its budget.
    pub fn remove(&self, key: &CacheKey) -> bool {
        let removed = self.shard(key).write().remove(key);
        match removed {
            Some(entry) => {
                self.release(entry.cost());
                true
            }
            None => false,
        }
    }

    /// Drop every expired entry and return how many were reclaimed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut reclaimed = 0;
        for shard in self.shards.iter() {
            let mut guard = shard.write();
            for key in guard.expired_keys(now) {
                if let Some(entry) = guard.remove(&key) {
                    self.release(entry.cost());
                    reclaimed += 1;
                }
            }
        }
        reclaimed
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `interval` until
    /// shutdown is signalled.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let reclaimed = self.sweep_expired();
                        if reclaimed > 0 {
                            tracing::debug!(
                                reclaimed,
                                objects = self.len(),
                                cost = self.cost(),
                                "Expired cache entries swept"
                            );
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Cache sweeper stopping");
                        break;
                    }
                }
            }
        })
    }

    fn insert(&self, key: CacheKey, entry: CacheEntry, ttl: Option<Duration>) -> bool {
        let cost = entry.cost();
        self.admission.increment(&key);

        if cost > self.max_cost {
            tracing::debug!(key = ?key, cost, max_cost = self.max_cost, "Entry larger than cache budget");
            return false;
        }

        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        let entry = Arc::new(entry);

        match self.replace_in_place(&key, &entry, expires_at) {
            Replacement::Done => return true,
            Replacement::NeedsRoom { old_cost } => {
                return self.grow_and_replace(key, entry, expires_at, old_cost)
            }
            Replacement::Absent => {}
        }

        if !self.reserve_with_eviction(&key, 1, cost) {
            tracing::debug!(key = ?key, cost, "Cache admission rejected");
            return false;
        }

        let replaced = self.shard(&key).write().insert(key, entry, expires_at);
        // A concurrent set of the same key may have landed in between.
        if let Some(old) = replaced {
            self.release(old.cost());
        }
        true
    }

    /// Swap a stored entry for its new version when the budget allows it
    /// without evicting anything.
    fn replace_in_place(
        &self,
        key: &CacheKey,
        entry: &Arc<CacheEntry>,
        expires_at: Option<Instant>,
    ) -> Replacement {
        let mut guard = self.shard(key).write();
        let Some(old_cost) = guard.get(key).map(|slot| slot.entry.cost()) else {
            return Replacement::Absent;
        };
        let cost = entry.cost();
        if cost > old_cost && !self.try_reserve(0, cost - old_cost) {
            return Replacement::NeedsRoom { old_cost };
        }
        guard.insert(*key, entry.clone(), expires_at);
        if cost < old_cost {
            self.used_cost.fetch_sub(old_cost - cost, Ordering::AcqRel);
        }
        Replacement::Done
    }

    /// Evict for the extra cost of a larger version of a stored entry. The
    /// stored version stays if admission refuses.
    fn grow_and_replace(
        &self,
        key: CacheKey,
        entry: Arc<CacheEntry>,
        expires_at: Option<Instant>,
        old_cost: u64,
    ) -> bool {
        let extra = entry.cost() - old_cost;
        if !self.reserve_with_eviction(&key, 0, extra) {
            tracing::debug!(key = ?key, extra, "Cache admission rejected, keeping stored version");
            return false;
        }

        let mut guard = self.shard(&key).write();
        match guard.get(&key).map(|slot| slot.entry.cost()) {
            Some(current) if current == old_cost => {
                guard.insert(key, entry, expires_at);
                true
            }
            _ => {
                // Removed or rewritten concurrently; the newer state wins.
                drop(guard);
                self.used_cost.fetch_sub(extra, Ordering::AcqRel);
                false
            }
        }
    }

    fn reserve_with_eviction(&self, key: &CacheKey, objects: u64, cost: u64) -> bool {
        let incoming = self.admission.estimate(key);
        let mut empty_rounds = 0;
        for _ in 0..MAX_EVICTIONS_PER_SET {
            if self.try_reserve(objects, cost) {
                return true;
            }
            match self.evict_one(key, incoming) {
                Eviction::Evicted => {}
                Eviction::Rejected => return false,
                Eviction::Empty => {
                    // Budget is held by in-flight inserts on other tasks.
                    empty_rounds += 1;
                    if empty_rounds > self.shards.len() {
                        return false;
                    }
                }
            }
        }
        false
    }

    fn try_reserve(&self, objects: u64, cost: u64) -> bool {
        let max_objects = self.max_objects;
        let max_cost = self.max_cost;
        if objects > 0
            && self
                .used_objects
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    n.checked_add(objects).filter(|&total| total <= max_objects)
                })
                .is_err()
        {
            return false;
        }
        if self
            .used_cost
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                c.checked_add(cost).filter(|&total| total <= max_cost)
            })
            .is_err()
        {
            self.used_objects.fetch_sub(objects, Ordering::AcqRel);
            return false;
        }
        true
    }

    fn release(&self, cost: u64) {
        self.used_objects.fetch_sub(1, Ordering::AcqRel);
        self.used_cost.fetch_sub(cost, Ordering::AcqRel);
    }

    /// Evict one sampled entry other than `protected`, unless it is more
    /// popular than the incoming one.
    fn evict_one(&self, protected: &CacheKey, incoming: u8) -> Eviction {
        let now = Instant::now();
        let start = fastrand::usize(..self.shards.len());
        for offset in 0..self.shards.len() {
            let shard = &self.shards[(start + offset) & self.shard_mask];
            let mut guard = shard.write();

            let mut victim: Option<(CacheKey, u8)> = None;
            for (key, slot) in guard.sample() {
                if key == protected {
                    continue;
                }
                if slot.is_expired(now) {
                    victim = Some((*key, 0));
                    break;
                }
                let frequency = self.admission.estimate(key);
                if victim.map_or(true, |(_, f)| frequency < f) {
                    victim = Some((*key, frequency));
                }
            }

            let Some((victim_key, frequency)) = victim else {
                continue;
            };
            let expired = guard.get(&victim_key).is_some_and(|slot| slot.is_expired(now));
            if !expired && incoming < frequency {
                return Eviction::Rejected;
            }
            if let Some(entry) = guard.remove(&victim_key) {
                self.release(entry.cost());
            }
            return Eviction::Evicted;
        }
        Eviction::Empty
    }

    fn shard(&self, key: &CacheKey) -> &RwLock<Shard> {
        &self.shards[(key.word(0) as usize) & self.shard_mask]
    }
}

impl Cache for CacheStore {
    fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        CacheStore::get(self, key)
    }

    fn set(&self, key: CacheKey, entry: CacheEntry) -> bool {
        CacheStore::set(self, key, entry)
    }

    fn set_with_ttl(&self, key: CacheKey, entry: CacheEntry, ttl: Duration) -> bool {
        CacheStore::set_with_ttl(self, key, entry, ttl)
    }

    fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }
}
