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

//! Utilities for testing.

use std::{
    collections::{HashSet, VecDeque},
    fmt::Debug,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tapecache_common::{
    alert::{AlertSink, Severity},
    code::Key,
    event::EvictionListener,
    executor::{Executor, Task},
};

use crate::{
    cache::LruCache,
    config::CapacityConfig,
    entry::CacheEntry,
    error::Result,
    judge::{EvictionJudge, EvictionJudgeFactory, JudgeResult},
};

/// An executor that queues tasks until the test runs them.
#[derive(Clone, Default)]
pub struct ManualExecutor {
    tasks: Arc<Mutex<VecDeque<Task>>>,
}

impl Debug for ManualExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualExecutor").field("queued", &self.queued()).finish()
    }
}

impl Executor for ManualExecutor {
    fn execute(&self, task: Task) {
        self.tasks.lock().push_back(task);
    }
}

impl ManualExecutor {
    /// Number of tasks waiting to run.
    pub fn queued(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Run the oldest queued task on the current thread. Returns `false` if there was none.
    pub fn run_next(&self) -> bool {
        let task = self.tasks.lock().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run queued tasks until the queue is empty, including tasks queued meanwhile. Returns the number of tasks run.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    /// Drop the queued tasks without running them.
    pub fn discard(&self) -> usize {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let discarded = tasks.len();
        drop(tasks);
        discarded
    }
}

/// An eviction listener that records evicted keys.
#[derive(Debug)]
pub struct EvictionRecorder<K> {
    evicted: Arc<Mutex<Vec<K>>>,
}

impl<K> Clone for EvictionRecorder<K> {
    fn clone(&self) -> Self {
        Self {
            evicted: self.evicted.clone(),
        }
    }
}

impl<K> Default for EvictionRecorder<K> {
    fn default() -> Self {
        Self {
            evicted: Default::default(),
        }
    }
}

impl<K> EvictionListener<K> for EvictionRecorder<K>
where
    K: Key,
{
    fn on_evict(&self, key: &K) {
        self.evicted.lock().push(key.clone());
    }
}

impl<K> EvictionRecorder<K>
where
    K: Clone,
{
    /// Evicted keys, in eviction order.
    pub fn evicted(&self) -> Vec<K> {
        self.evicted.lock().clone()
    }
}

/// An alert sink that records alerts.
#[derive(Debug, Clone, Default)]
pub struct AlertRecorder {
    alerts: Arc<Mutex<Vec<(Severity, String)>>>,
}

impl AlertSink for AlertRecorder {
    fn alert(&self, severity: Severity, message: &str) {
        self.alerts.lock().push((severity, message.to_string()));
    }
}

impl AlertRecorder {
    /// Recorded alerts, in order.
    pub fn alerts(&self) -> Vec<(Severity, String)> {
        self.alerts.lock().clone()
    }

    /// Recorded alert severities, in order.
    pub fn severities(&self) -> Vec<Severity> {
        self.alerts.lock().iter().map(|(severity, _)| *severity).collect()
    }
}

/// What [`VetoJudgeFactory`] produces on its next calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryOutcome {
    /// A judge that vetoes the keys registered with [`VetoJudgeFactory::veto`].
    Judge,
    /// No judge.
    Absent,
    /// An error.
    Fail,
    /// A judge that panics when asked.
    PanickingJudge,
    /// A panic in the factory itself.
    PanickingFactory,
}

#[derive(Debug)]
struct VetoJudgeFactoryInner<K> {
    created: AtomicUsize,
    vetoed: Mutex<HashSet<K>>,
    outcome: Mutex<FactoryOutcome>,
    asked: Arc<Mutex<Vec<K>>>,
}

/// A judge factory that counts created judges and vetoes a configurable set of keys.
///
/// Each judge snapshots the vetoed keys when created.
#[derive(Debug)]
pub struct VetoJudgeFactory<K> {
    inner: Arc<VetoJudgeFactoryInner<K>>,
}

impl<K> Clone for VetoJudgeFactory<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K> Default for VetoJudgeFactory<K> {
    fn default() -> Self {
        Self {
            inner: Arc::new(VetoJudgeFactoryInner {
                created: AtomicUsize::new(0),
                vetoed: Mutex::new(HashSet::new()),
                outcome: Mutex::new(FactoryOutcome::Judge),
                asked: Default::default(),
            }),
        }
    }
}

impl<K> VetoJudgeFactory<K>
where
    K: Key,
{
    /// Veto the eviction of the keys in judges created from now on.
    pub fn veto(&self, keys: impl IntoIterator<Item = K>) {
        self.inner.vetoed.lock().extend(keys);
    }

    /// Allow the eviction of every key in judges created from now on.
    pub fn allow_all(&self) {
        self.inner.vetoed.lock().clear();
    }

    /// Set what the next calls produce.
    pub fn set_outcome(&self, outcome: FactoryOutcome) {
        *self.inner.outcome.lock() = outcome;
    }

    /// Number of factory calls.
    pub fn created(&self) -> usize {
        self.inner.created.load(Ordering::SeqCst)
    }

    /// Keys the judges were asked about, in order.
    pub fn asked(&self) -> Vec<K> {
        self.inner.asked.lock().clone()
    }
}

struct VetoJudge<K> {
    vetoed: HashSet<K>,
    asked: Arc<Mutex<Vec<K>>>,
    panic: bool,
}

impl<K> EvictionJudge<K> for VetoJudge<K>
where
    K: Key,
{
    fn can_evict(&self, key: &K) -> bool {
        if self.panic {
            panic!("judge failure on {key:?}");
        }
        self.asked.lock().push(key.clone());
        !self.vetoed.contains(key)
    }
}

impl<K> EvictionJudgeFactory<K> for VetoJudgeFactory<K>
where
    K: Key,
{
    fn create(&self) -> JudgeResult<K> {
        self.inner.created.fetch_add(1, Ordering::SeqCst);
        let outcome = *self.inner.outcome.lock();
        match outcome {
            FactoryOutcome::Absent => Ok(None),
            FactoryOutcome::Fail => Err("lock table unavailable".into()),
            FactoryOutcome::PanickingFactory => panic!("lock table scan failure"),
            FactoryOutcome::Judge | FactoryOutcome::PanickingJudge => Ok(Some(Box::new(VetoJudge {
                vetoed: self.inner.vetoed.lock().clone(),
                asked: self.inner.asked.clone(),
                panic: outcome == FactoryOutcome::PanickingJudge,
            }))),
        }
    }
}

/// A cache wired to recording collaborators and a [`ManualExecutor`].
#[derive(Debug)]
pub struct Harness<K>
where
    K: Key,
{
    /// The cache under test.
    pub cache: LruCache<K>,
    /// Executor holding the scheduled eviction cycles.
    pub executor: ManualExecutor,
    /// Judge factory of the cache.
    pub judges: VetoJudgeFactory<K>,
    /// Listener of the cache.
    pub evicted: EvictionRecorder<K>,
    /// Alert sink of the cache.
    pub alerts: AlertRecorder,
}

impl<K> Harness<K>
where
    K: Key,
{
    /// Build a cache with the given thresholds and initial entries.
    pub fn new(config: CapacityConfig, initial_entries: impl IntoIterator<Item = CacheEntry<K>>) -> Result<Self> {
        let executor = ManualExecutor::default();
        let judges = VetoJudgeFactory::default();
        let evicted = EvictionRecorder::default();
        let alerts = AlertRecorder::default();
        let cache = LruCache::builder(config)
            .with_executor(executor.clone())
            .with_judge_factory(judges.clone())
            .with_eviction_listener(evicted.clone())
            .with_alert_sink(alerts.clone())
            .with_initial_entries(initial_entries)
            .build()?;
        Ok(Self {
            cache,
            executor,
            judges,
            evicted,
            alerts,
        })
    }
}
