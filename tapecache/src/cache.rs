// Copyright 2025 tapecache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{fmt::Debug, hash::Hash, sync::Arc, time::SystemTime};

use equivalent::Equivalent;
use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tapecache_common::{
    alert::{AlertSink, Severity, TracingAlertSink},
    code::Key,
    event::{EvictionListener, NoopEvictionListener},
    executor::{Executor, ThreadExecutor},
};

use crate::{
    config::CapacityConfig,
    entry::{timestamp_millis, CacheEntry},
    error::{Error, Result},
    eviction,
    index::LruIndex,
    judge::{EvictAll, EvictionJudgeFactory},
};

/// An entry confirmed while an eviction cycle was running. It joins the index when the cycle finishes.
#[derive(Debug)]
pub(crate) struct PendingEntry<K>
where
    K: Key,
{
    pub(crate) entry: CacheEntry<K>,
    pub(crate) sequence: u64,
}

/// Everything guarded by the cache lock.
///
/// A key lives in at most one of `reserved`, `pending` and `index`. `weights` holds the weight of every pending and
/// indexed key, and `current_capacity` is the sum of all weights of the three tiers.
#[derive(Debug)]
pub(crate) struct CacheState<K>
where
    K: Key,
{
    pub(crate) index: LruIndex<K>,
    pub(crate) weights: HashMap<K, i64>,
    pub(crate) pending: HashMap<K, PendingEntry<K>>,
    pub(crate) reserved: HashMap<K, CacheEntry<K>>,
    pub(crate) current_capacity: i64,
    pub(crate) eviction_running: bool,
    pending_sequence: u64,
}

impl<K> CacheState<K>
where
    K: Key,
{
    pub(crate) fn new() -> Self {
        Self {
            index: LruIndex::new(),
            weights: HashMap::new(),
            pending: HashMap::new(),
            reserved: HashMap::new(),
            current_capacity: 0,
            eviction_running: false,
            pending_sequence: 0,
        }
    }

    fn load(&mut self, entry: CacheEntry<K>) -> Result<()> {
        if entry.weight() <= 0 {
            return Err(Error::InvalidInitialEntry(format!(
                "entry {:?} weight must be positive, weight: {}",
                entry.key(),
                entry.weight()
            )));
        }
        if self.index.contains(entry.key()) {
            return Err(Error::InvalidInitialEntry(format!("duplicate key {:?}", entry.key())));
        }
        let Some(current_capacity) = self.current_capacity.checked_add(entry.weight()) else {
            return Err(Error::InvalidInitialEntry(format!(
                "entry {:?} overflows the cache capacity",
                entry.key()
            )));
        };

        tracing::debug!(
            "[lru cache]: added entry {:?} with weight {} and last access time {:?} during initialization",
            entry.key(),
            entry.weight(),
            entry.last_access()
        );

        let timestamp = entry.timestamp();
        let weight = entry.weight();
        let key = entry.into_key();
        self.index.add(key.clone(), timestamp)?;
        self.weights.insert(key, weight);
        self.current_capacity = current_capacity;
        Ok(())
    }

    fn is_known<Q>(&self, key: &Q) -> bool
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.index.contains(key) || self.pending.contains_key(key) || self.reserved.contains_key(key)
    }

    /// Returns `true` if the caller must schedule an eviction cycle.
    fn reserve(&mut self, entry: CacheEntry<K>, config: &CapacityConfig) -> Result<bool> {
        if self.is_known(entry.key()) {
            return Err(Error::duplicate_key(entry.key()));
        }

        if self.current_capacity.saturating_add(entry.weight()) >= config.max_capacity {
            return Err(Error::CapacityExceeded {
                key: format!("{:?}", entry.key()),
                weight: entry.weight(),
                current_capacity: self.current_capacity,
                max_capacity: config.max_capacity,
                eviction_capacity: config.eviction_capacity,
                safe_capacity: config.safe_capacity,
            });
        }

        self.current_capacity += entry.weight();
        self.reserved.insert(entry.key().clone(), entry);
        Ok(self.try_start_eviction(config))
    }

    fn confirm<Q>(&mut self, key: &Q) -> Result<()>
    where
        Q: Hash + Equivalent<K> + Debug + ?Sized,
    {
        let Some((key, entry)) = self.reserved.remove_entry(key) else {
            return Err(Error::no_such_reservation(key));
        };

        self.weights.insert(key.clone(), entry.weight());
        if self.eviction_running {
            // The running cycle iterates a stable view of the index, new entries wait until it finishes.
            let sequence = self.pending_sequence;
            self.pending_sequence += 1;
            self.pending.insert(key, PendingEntry { entry, sequence });
            Ok(())
        } else {
            self.index.add(key, entry.timestamp())
        }
    }

    fn cancel<Q>(&mut self, key: &Q) -> Result<()>
    where
        Q: Hash + Equivalent<K> + Debug + ?Sized,
    {
        let Some(entry) = self.reserved.remove(key) else {
            return Err(Error::no_such_reservation(key));
        };
        self.current_capacity -= entry.weight();
        Ok(())
    }

    fn touch<Q>(&mut self, key: &Q, last_access: SystemTime) -> bool
    where
        Q: Hash + Equivalent<K> + Debug + ?Sized,
    {
        if let Some(entry) = self.reserved.get_mut(key) {
            entry.set_last_access(last_access);
            tracing::debug!("[lru cache]: updated reserved entry {key:?} access time to {last_access:?}");
            return true;
        }
        if let Some(pending) = self.pending.get_mut(key) {
            pending.entry.set_last_access(last_access);
            tracing::debug!("[lru cache]: updated pending entry {key:?} access time to {last_access:?}");
            return true;
        }
        if self.index.update(key, timestamp_millis(last_access)) {
            tracing::debug!("[lru cache]: updated entry {key:?} access time to {last_access:?}");
            return true;
        }
        tracing::debug!("[lru cache]: ignore entry {key:?}, entry not found in cache, concurrent eviction?");
        false
    }

    fn remove<Q>(&mut self, key: &Q) -> bool
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        if self.pending.remove(key).is_none() && !self.index.remove(key) {
            return false;
        }
        if let Some(weight) = self.weights.remove(key) {
            self.current_capacity -= weight;
        }
        true
    }

    fn try_start_eviction(&mut self, config: &CapacityConfig) -> bool {
        if self.current_capacity < config.eviction_capacity || self.eviction_running {
            return false;
        }
        self.eviction_running = true;
        tracing::info!(
            "[lru cache]: cache capacity exceeded, background eviction process started. max capacity: {}, eviction \
             capacity: {}, safe capacity: {}, current capacity: {}",
            config.max_capacity,
            config.eviction_capacity,
            config.safe_capacity,
            self.current_capacity
        );
        true
    }

    fn usage(&self, config: &CapacityConfig) -> CacheUsage {
        CacheUsage {
            max_capacity: config.max_capacity,
            eviction_capacity: config.eviction_capacity,
            safe_capacity: config.safe_capacity,
            current_capacity: self.current_capacity,
            entries: self.index.len(),
            pending_entries: self.pending.len(),
            reserved_entries: self.reserved.len(),
            eviction_running: self.eviction_running,
        }
    }
}

/// Point-in-time capacity usage of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheUsage {
    /// Max capacity threshold.
    pub max_capacity: i64,
    /// Eviction capacity threshold.
    pub eviction_capacity: i64,
    /// Safe capacity threshold.
    pub safe_capacity: i64,
    /// Sum of the weights of reserved, pending and indexed entries.
    pub current_capacity: i64,
    /// Number of entries in the ordered index.
    pub entries: usize,
    /// Number of entries confirmed during the running eviction cycle.
    pub pending_entries: usize,
    /// Number of reserved entries.
    pub reserved_entries: usize,
    /// Whether an eviction cycle is scheduled or running.
    pub eviction_running: bool,
}

pub(crate) struct Inner<K>
where
    K: Key,
{
    pub(crate) config: CapacityConfig,
    pub(crate) state: Mutex<CacheState<K>>,
    pub(crate) judge_factory: Arc<dyn EvictionJudgeFactory<K>>,
    pub(crate) listener: Arc<dyn EvictionListener<K>>,
    pub(crate) alert_sink: Arc<dyn AlertSink>,
    pub(crate) executor: Arc<dyn Executor>,
}

/// Weighted LRU staging cache with capacity reservations and filtered background eviction.
///
/// The cache only accounts for capacity, it never touches the cached payloads. Callers reserve capacity before writing
/// an object to the staging area, then confirm the reservation once the write succeeded, or cancel it if the write
/// failed. Confirmed entries are evictable.
///
/// When the capacity reaches the eviction threshold, one background eviction cycle is submitted to the executor. The
/// cycle asks a freshly created [`EvictionJudge`](crate::judge::EvictionJudge) about each entry, oldest first, and
/// evicts the allowed ones until the capacity drops below the safe threshold.
///
/// All operations are serialized by a single lock. The cache is cheap to clone, clones share the same state.
pub struct LruCache<K>
where
    K: Key,
{
    inner: Arc<Inner<K>>,
}

impl<K> Clone for LruCache<K>
where
    K: Key,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K> Debug for LruCache<K>
where
    K: Key,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("usage", &self.usage())
            .field("executor", &self.inner.executor)
            .finish()
    }
}

impl<K> LruCache<K>
where
    K: Key,
{
    /// Create a builder with the given capacity thresholds.
    pub fn builder(config: CapacityConfig) -> LruCacheBuilder<K> {
        LruCacheBuilder::new(config)
    }

    /// Reserve capacity for a new entry.
    ///
    /// The reservation must later be confirmed with [`LruCache::confirm`] or canceled with [`LruCache::cancel`].
    /// Reserved entries are neither visible to [`LruCache::contains`] nor evictable.
    ///
    /// Fails with [`Error::DuplicateKey`] if the key is reserved, pending or cached, and with
    /// [`Error::CapacityExceeded`] if the reservation would bring the capacity to the max capacity or above. The
    /// latter also raises an error alert.
    pub fn reserve(&self, entry: CacheEntry<K>) -> Result<()> {
        if entry.weight() <= 0 {
            return Err(Error::InvalidEntry(format!(
                "entry {:?} weight must be positive, weight: {}",
                entry.key(),
                entry.weight()
            )));
        }

        let res = self.inner.state.lock().reserve(entry, &self.inner.config);
        match res {
            Ok(schedule) => {
                if schedule {
                    eviction::schedule(&self.inner);
                }
                Ok(())
            }
            Err(e @ Error::CapacityExceeded { .. }) => {
                self.inner.alert_sink.alert(Severity::Error, &e.to_string());
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Confirm a reservation and add the entry to the cache.
    ///
    /// If an eviction cycle is running, the entry is held apart and joins the ordered index when the cycle finishes.
    /// It is visible to [`LruCache::contains`] either way.
    pub fn confirm<Q>(&self, key: &Q) -> Result<()>
    where
        Q: Hash + Equivalent<K> + Debug + ?Sized,
    {
        self.inner.state.lock().confirm(key)
    }

    /// Cancel a reservation and release its capacity.
    pub fn cancel<Q>(&self, key: &Q) -> Result<()>
    where
        Q: Hash + Equivalent<K> + Debug + ?Sized,
    {
        self.inner.state.lock().cancel(key)
    }

    /// Refresh the last access time of a reserved, pending or cached entry.
    ///
    /// Returns `false` if the entry is unknown, e.g. it has been evicted concurrently.
    pub fn touch<Q>(&self, key: &Q, last_access: SystemTime) -> bool
    where
        Q: Hash + Equivalent<K> + Debug + ?Sized,
    {
        self.inner.state.lock().touch(key, last_access)
    }

    /// Remove a cached or pending entry and release its capacity, without notifying the eviction listener.
    ///
    /// Reserved entries are not affected, use [`LruCache::cancel`] for them. Returns `false` if nothing was removed.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.inner.state.lock().remove(key)
    }

    /// Returns `true` if the entry is confirmed, cached or pending. Reserved entries are not contained yet.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let state = self.inner.state.lock();
        state.index.contains(key) || state.pending.contains_key(key)
    }

    /// Returns `true` if the entry is reserved.
    pub fn is_reserved<Q>(&self, key: &Q) -> bool
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.inner.state.lock().reserved.contains_key(key)
    }

    /// Get a copy of the reserved entry.
    pub fn get_reservation<Q>(&self, key: &Q) -> Option<CacheEntry<K>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.inner.state.lock().reserved.get(key).cloned()
    }

    /// Max capacity threshold. Reservations reaching it are rejected.
    pub fn max_capacity(&self) -> i64 {
        self.inner.config.max_capacity
    }

    /// Eviction capacity threshold. Reaching it starts a background eviction cycle.
    pub fn eviction_capacity(&self) -> i64 {
        self.inner.config.eviction_capacity
    }

    /// Safe capacity threshold. A running eviction cycle stops below it.
    pub fn safe_capacity(&self) -> i64 {
        self.inner.config.safe_capacity
    }

    /// Sum of the weights of reserved, pending and cached entries.
    pub fn current_capacity(&self) -> i64 {
        self.inner.state.lock().current_capacity
    }

    /// Returns `true` while an eviction cycle is scheduled or running.
    pub fn is_eviction_running(&self) -> bool {
        self.inner.state.lock().eviction_running
    }

    /// Snapshot of the capacity usage.
    pub fn usage(&self) -> CacheUsage {
        self.inner.state.lock().usage(&self.inner.config)
    }

    #[cfg(test)]
    pub(crate) fn indexed_timestamp<Q>(&self, key: &Q) -> Option<i64>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.inner.state.lock().index.timestamp(key)
    }

    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        let state = self.inner.state.lock();

        for key in state.reserved.keys() {
            assert!(!state.pending.contains_key(key), "{key:?} is both reserved and pending");
            assert!(!state.index.contains(key), "{key:?} is both reserved and cached");
        }
        for key in state.pending.keys() {
            assert!(!state.index.contains(key), "{key:?} is both pending and cached");
        }
        assert_eq!(state.weights.len(), state.pending.len() + state.index.len());
        for key in state.index.iter().chain(state.pending.keys()) {
            assert!(state.weights.contains_key(key), "{key:?} has no weight");
        }
        if !state.eviction_running {
            assert!(state.pending.is_empty());
        }

        let reserved: i64 = state.reserved.values().map(|entry| entry.weight()).sum();
        let confirmed: i64 = state.weights.values().sum();
        assert_eq!(state.current_capacity, reserved + confirmed);
        assert!(state.current_capacity < self.inner.config.max_capacity);

        let timestamps = state
            .index
            .iter()
            .map(|key| state.index.timestamp(key).unwrap())
            .collect::<Vec<_>>();
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    }
}

/// Builder of [`LruCache`].
pub struct LruCacheBuilder<K>
where
    K: Key,
{
    config: CapacityConfig,
    judge_factory: Arc<dyn EvictionJudgeFactory<K>>,
    listener: Arc<dyn EvictionListener<K>>,
    alert_sink: Arc<dyn AlertSink>,
    executor: Arc<dyn Executor>,
    initial_entries: Vec<CacheEntry<K>>,
}

impl<K> LruCacheBuilder<K>
where
    K: Key,
{
    /// Create a builder with the given capacity thresholds.
    ///
    /// By default every entry may be evicted, evictions are not reported, alerts are logged with `tracing`, and
    /// eviction cycles run on dedicated threads.
    pub fn new(config: CapacityConfig) -> Self {
        Self {
            config,
            judge_factory: Arc::new(EvictAll),
            listener: Arc::new(NoopEvictionListener::default()),
            alert_sink: Arc::new(TracingAlertSink),
            executor: Arc::new(ThreadExecutor::new("lru-cache-eviction")),
            initial_entries: vec![],
        }
    }

    /// Set the factory that creates a fresh eviction judge before each eviction cycle.
    pub fn with_judge_factory(mut self, judge_factory: impl EvictionJudgeFactory<K>) -> Self {
        self.judge_factory = Arc::new(judge_factory);
        self
    }

    /// Set the listener notified of each evicted entry.
    pub fn with_eviction_listener(mut self, listener: impl EvictionListener<K>) -> Self {
        self.listener = Arc::new(listener);
        self
    }

    /// Set the sink of capacity and eviction alerts.
    pub fn with_alert_sink(mut self, alert_sink: impl AlertSink) -> Self {
        self.alert_sink = Arc::new(alert_sink);
        self
    }

    /// Set the executor that runs eviction cycles.
    pub fn with_executor(mut self, executor: impl Executor) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    /// Set the entries already present in the staging area, e.g. found by a directory scan.
    ///
    /// Keys must be distinct and weights positive.
    pub fn with_initial_entries(mut self, entries: impl IntoIterator<Item = CacheEntry<K>>) -> Self {
        self.initial_entries = entries.into_iter().collect();
        self
    }

    /// Build the cache.
    ///
    /// Starts a background eviction cycle right away if the initial entries reach the eviction capacity.
    pub fn build(self) -> Result<LruCache<K>> {
        self.config.validate()?;

        let mut state = CacheState::new();
        for entry in self.initial_entries {
            state.load(entry)?;
        }
        let schedule = state.try_start_eviction(&self.config);

        let inner = Arc::new(Inner {
            config: self.config,
            state: Mutex::new(state),
            judge_factory: self.judge_factory,
            listener: self.listener,
            alert_sink: self.alert_sink,
            executor: self.executor,
        });
        if schedule {
            eviction::schedule(&inner);
        }

        Ok(LruCache { inner })
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use rand::{rngs::SmallRng, Rng, SeedableRng};

    use super::*;
    use crate::test_utils::Harness;

    fn at(ms: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(ms)
    }

    fn entry(key: &'static str, weight: i64, ms: u64) -> CacheEntry<&'static str> {
        CacheEntry::new(key, weight, at(ms))
    }

    fn harness(max: i64, eviction: i64, safe: i64) -> Harness<&'static str> {
        Harness::new(CapacityConfig::new(max, eviction, safe), vec![]).unwrap()
    }

    #[test]
    fn test_build_empty() {
        let h = harness(1000, 900, 800);

        assert_eq!(h.cache.max_capacity(), 1000);
        assert_eq!(h.cache.eviction_capacity(), 900);
        assert_eq!(h.cache.safe_capacity(), 800);
        assert_eq!(h.cache.current_capacity(), 0);
        assert!(!h.cache.is_eviction_running());
        assert_eq!(h.executor.queued(), 0);
        h.cache.assert_invariants();
    }

    #[test]
    fn test_build_with_initial_entries() {
        let h = Harness::new(
            CapacityConfig::new(1000, 900, 800),
            vec![entry("k1", 100, 1), entry("k2", 100, 2), entry("k3", 100, 3), entry("k4", 100, 4)],
        )
        .unwrap();

        assert_eq!(h.cache.current_capacity(), 400);
        for key in ["k1", "k2", "k3", "k4"] {
            assert!(h.cache.contains(key));
            assert!(!h.cache.is_reserved(key));
        }
        assert_eq!(h.executor.queued(), 0);
        assert_eq!(h.judges.created(), 0);
        h.cache.assert_invariants();
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let res = Harness::<&'static str>::new(CapacityConfig::new(1000, 999, 800), vec![]);
        assert!(matches!(res, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_build_rejects_duplicate_initial_entries() {
        let executor = crate::test_utils::ManualExecutor::default();
        let res = LruCache::builder(CapacityConfig::new(1000, 900, 800))
            .with_executor(executor.clone())
            .with_initial_entries(vec![entry("k1", 600, 1), entry("k2", 300, 2), entry("k1", 100, 3)])
            .build();

        assert!(matches!(res, Err(Error::InvalidInitialEntry(_))));
        assert_eq!(executor.queued(), 0);
    }

    #[test]
    fn test_build_rejects_non_positive_initial_weight() {
        for weight in [0, -1] {
            let res = Harness::new(CapacityConfig::new(1000, 900, 800), vec![entry("k1", weight, 1)]);
            assert!(matches!(res, Err(Error::InvalidInitialEntry(_))));
        }
    }

    #[test]
    fn test_reserve() {
        let h = Harness::new(
            CapacityConfig::new(1000, 900, 800),
            vec![entry("k1", 100, 1), entry("k2", 100, 2), entry("k3", 100, 3)],
        )
        .unwrap();

        h.cache.reserve(entry("k4", 100, 4)).unwrap();

        assert_eq!(h.cache.current_capacity(), 400);
        assert!(!h.cache.contains("k4"));
        assert!(h.cache.is_reserved("k4"));
        assert_eq!(h.cache.get_reservation("k4"), Some(entry("k4", 100, 4)));
        assert_eq!(h.cache.get_reservation("k1"), None);
        assert_eq!(h.executor.queued(), 0);
        h.cache.assert_invariants();
    }

    #[test]
    fn test_reserve_duplicate_key() {
        let h = Harness::new(CapacityConfig::new(1000, 900, 800), vec![entry("k1", 100, 1)]).unwrap();
        h.cache.reserve(entry("k2", 100, 2)).unwrap();

        // Cached.
        assert!(matches!(h.cache.reserve(entry("k1", 100, 3)), Err(Error::DuplicateKey(_))));
        // Reserved.
        assert!(matches!(h.cache.reserve(entry("k2", 100, 3)), Err(Error::DuplicateKey(_))));

        assert_eq!(h.cache.current_capacity(), 200);
        assert_eq!(h.cache.get_reservation("k2"), Some(entry("k2", 100, 2)));
        assert!(h.alerts.alerts().is_empty());
        h.cache.assert_invariants();
    }

    #[test]
    fn test_reserve_duplicate_pending_key() {
        let h = Harness::new(CapacityConfig::new(1000, 900, 800), vec![entry("k1", 850, 1)]).unwrap();
        h.cache.reserve(entry("k2", 60, 2)).unwrap();
        assert!(h.cache.is_eviction_running());
        h.cache.confirm("k2").unwrap();

        assert!(matches!(h.cache.reserve(entry("k2", 10, 3)), Err(Error::DuplicateKey(_))));
        assert_eq!(h.cache.current_capacity(), 910);
        h.cache.assert_invariants();
    }

    #[test]
    fn test_reserve_non_positive_weight() {
        let h = harness(1000, 900, 800);
        assert!(matches!(h.cache.reserve(entry("k1", 0, 1)), Err(Error::InvalidEntry(_))));
        assert!(matches!(h.cache.reserve(entry("k1", -5, 1)), Err(Error::InvalidEntry(_))));
        assert_eq!(h.cache.current_capacity(), 0);
        assert!(!h.cache.is_reserved("k1"));
    }

    #[test]
    fn test_reserve_capacity_exceeded() {
        let h = harness(100, 60, 40);

        h.cache.reserve(entry("a", 50, 1)).unwrap();
        assert_eq!(h.cache.current_capacity(), 50);
        assert!(h.alerts.alerts().is_empty());

        // 50 + 50 reaches the max capacity.
        let err = h.cache.reserve(entry("b", 50, 2)).unwrap_err();
        match &err {
            Error::CapacityExceeded {
                key,
                weight,
                current_capacity,
                max_capacity,
                ..
            } => {
                assert_eq!(key, "\"b\"");
                assert_eq!(*weight, 50);
                assert_eq!(*current_capacity, 50);
                assert_eq!(*max_capacity, 100);
            }
            e => panic!("unexpected error: {e}"),
        }

        assert_eq!(h.alerts.severities(), vec![Severity::Error]);
        assert_eq!(h.alerts.alerts()[0].1, err.to_string());
        assert_eq!(h.cache.current_capacity(), 50);
        assert!(!h.cache.is_reserved("b"));
        assert!(h.cache.is_reserved("a"));
        assert_eq!(h.executor.queued(), 0);
        h.cache.assert_invariants();

        // Just below the max capacity is fine.
        h.cache.reserve(entry("c", 49, 3)).unwrap();
        assert_eq!(h.cache.current_capacity(), 99);
    }

    #[test]
    fn test_confirm() {
        let h = harness(1000, 900, 800);
        h.cache.reserve(entry("k1", 100, 1)).unwrap();
        h.cache.confirm("k1").unwrap();

        assert!(h.cache.contains("k1"));
        assert!(!h.cache.is_reserved("k1"));
        assert_eq!(h.cache.get_reservation("k1"), None);
        assert_eq!(h.cache.current_capacity(), 100);

        // Confirming twice is a protocol violation.
        assert!(matches!(h.cache.confirm("k1"), Err(Error::NoSuchReservation(_))));
        assert!(matches!(h.cache.confirm("k2"), Err(Error::NoSuchReservation(_))));
        h.cache.assert_invariants();
    }

    #[test]
    fn test_cancel() {
        let h = harness(100, 60, 40);
        h.cache.reserve(entry("a", 10, 1)).unwrap();
        h.cache.cancel("a").unwrap();

        assert_eq!(h.cache.current_capacity(), 0);
        assert!(!h.cache.is_reserved("a"));
        assert!(!h.cache.contains("a"));
        assert!(matches!(h.cache.confirm("a"), Err(Error::NoSuchReservation(_))));
        assert!(matches!(h.cache.cancel("a"), Err(Error::NoSuchReservation(_))));

        // The key is free again.
        h.cache.reserve(entry("a", 20, 2)).unwrap();
        assert_eq!(h.cache.current_capacity(), 20);
        h.cache.assert_invariants();
    }

    #[test]
    fn test_cancel_confirmed_entry() {
        let h = harness(100, 60, 40);
        h.cache.reserve(entry("a", 10, 1)).unwrap();
        h.cache.confirm("a").unwrap();

        assert!(matches!(h.cache.cancel("a"), Err(Error::NoSuchReservation(_))));
        assert!(h.cache.contains("a"));
        assert_eq!(h.cache.current_capacity(), 10);
    }

    #[test]
    fn test_touch() {
        let h = Harness::new(CapacityConfig::new(1000, 900, 800), vec![entry("k1", 100, 1)]).unwrap();
        h.cache.reserve(entry("k2", 100, 2)).unwrap();

        assert!(h.cache.touch("k2", at(50)));
        assert_eq!(h.cache.get_reservation("k2").unwrap().last_access(), at(50));
        assert!(h.cache.is_reserved("k2"));

        assert!(h.cache.touch("k1", at(60)));
        assert!(h.cache.contains("k1"));

        assert!(!h.cache.touch("k3", at(70)));
        assert!(!h.cache.contains("k3"));
        assert!(!h.cache.is_reserved("k3"));
        h.cache.assert_invariants();
    }

    #[test]
    fn test_touch_reserved_entry_keeps_refreshed_time_on_confirm() {
        let h = Harness::new(CapacityConfig::new(100, 60, 40), vec![entry("old", 30, 10)]).unwrap();
        h.cache.reserve(entry("new", 10, 1)).unwrap();
        h.cache.touch("new", at(20));
        h.cache.confirm("new").unwrap();

        h.cache.reserve(entry("big", 25, 30)).unwrap();
        assert_eq!(h.cache.current_capacity(), 65);
        h.executor.run_all();

        // "new" was refreshed after "old", so "old" goes first and is enough.
        assert_eq!(h.evicted.evicted(), vec!["old"]);
        assert!(h.cache.contains("new"));
        assert_eq!(h.cache.current_capacity(), 35);
    }

    #[test]
    fn test_remove() {
        let h = Harness::new(CapacityConfig::new(1000, 900, 800), vec![entry("k1", 100, 1)]).unwrap();
        h.cache.reserve(entry("k2", 200, 2)).unwrap();

        assert!(h.cache.remove("k1"));
        assert!(!h.cache.remove("k1"));
        assert!(!h.cache.contains("k1"));
        assert_eq!(h.cache.current_capacity(), 200);

        // Reservations are left alone.
        assert!(!h.cache.remove("k2"));
        assert!(h.cache.is_reserved("k2"));

        assert!(h.evicted.evicted().is_empty());
        h.cache.assert_invariants();
    }

    #[test]
    fn test_remove_pending_entry() {
        let h = Harness::new(CapacityConfig::new(1000, 900, 800), vec![entry("k1", 850, 1)]).unwrap();
        h.cache.reserve(entry("k2", 60, 2)).unwrap();
        h.cache.confirm("k2").unwrap();
        assert_eq!(h.cache.usage().pending_entries, 1);

        assert!(h.cache.remove("k2"));
        assert!(!h.cache.contains("k2"));
        assert_eq!(h.cache.current_capacity(), 850);
        h.cache.assert_invariants();

        h.executor.run_all();
        assert!(!h.cache.contains("k2"));
        h.cache.assert_invariants();
    }

    #[test]
    fn test_usage() {
        let h = Harness::new(CapacityConfig::new(1000, 900, 800), vec![entry("k1", 850, 1)]).unwrap();
        h.cache.reserve(entry("k2", 60, 2)).unwrap();
        h.cache.reserve(entry("k3", 10, 3)).unwrap();
        h.cache.confirm("k2").unwrap();

        let usage = h.cache.usage();
        assert_eq!(
            usage,
            CacheUsage {
                max_capacity: 1000,
                eviction_capacity: 900,
                safe_capacity: 800,
                current_capacity: 920,
                entries: 1,
                pending_entries: 1,
                reserved_entries: 1,
                eviction_running: true,
            }
        );

        let json = serde_json::to_value(usage).unwrap();
        assert_eq!(json["current_capacity"], 920);
        assert_eq!(json["eviction_running"], true);
    }

    #[test]
    fn test_borrowed_key_lookups() {
        let h: Harness<String> = Harness::new(CapacityConfig::new(1000, 900, 800), vec![]).unwrap();
        h.cache
            .reserve(CacheEntry::new("bucket/archive.tar".to_string(), 10, at(1)))
            .unwrap();

        assert!(h.cache.is_reserved("bucket/archive.tar"));
        assert!(h.cache.touch("bucket/archive.tar", at(2)));
        h.cache.confirm("bucket/archive.tar").unwrap();
        assert!(h.cache.contains("bucket/archive.tar"));

        h.cache
            .reserve(CacheEntry::new("bucket/failed.tar".to_string(), 20, at(3)))
            .unwrap();
        h.cache.cancel("bucket/failed.tar").unwrap();
        assert!(!h.cache.is_reserved("bucket/failed.tar"));
        assert!(matches!(h.cache.cancel("bucket/failed.tar"), Err(Error::NoSuchReservation(_))));
        assert!(matches!(h.cache.confirm("bucket/failed.tar"), Err(Error::NoSuchReservation(_))));
        assert_eq!(h.cache.current_capacity(), 10);
        h.cache.assert_invariants();
    }

    #[test]
    fn test_clones_share_state() {
        let h = harness(1000, 900, 800);
        let other = h.cache.clone();
        h.cache.reserve(entry("k1", 100, 1)).unwrap();
        other.confirm("k1").unwrap();
        assert!(h.cache.contains("k1"));
        assert!(format!("{other:?}").contains("current_capacity: 100"));
    }

    /// Random protocol traffic interleaved with eviction cycles keeps the bookkeeping consistent.
    #[test_log::test]
    fn test_random_operations_conserve_weight() {
        const KEYS: [&str; 16] = [
            "k0", "k1", "k2", "k3", "k4", "k5", "k6", "k7", "k8", "k9", "k10", "k11", "k12", "k13", "k14", "k15",
        ];

        let h = harness(1000, 700, 400);
        let mut rng = SmallRng::seed_from_u64(42);
        h.judges.veto(["k3", "k7"]);

        for step in 0..5000u64 {
            let key = KEYS[rng.random_range(0..KEYS.len())];
            match rng.random_range(0..7) {
                0 | 1 => {
                    let _ = h.cache.reserve(entry(key, rng.random_range(1..200), step));
                }
                2 | 3 => {
                    let _ = h.cache.confirm(key);
                }
                4 => {
                    let _ = h.cache.cancel(key);
                }
                5 => {
                    h.cache.touch(key, at(step));
                }
                _ => {
                    h.executor.run_next();
                }
            }
            h.cache.assert_invariants();
        }

        h.executor.run_all();
        assert!(!h.cache.is_eviction_running());
        h.cache.assert_invariants();
        assert!(!h.evicted.evicted().contains(&"k3"));
        assert!(!h.evicted.evicted().contains(&"k7"));
    }
}
