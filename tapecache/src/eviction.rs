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

//! Background eviction cycle.
//!
//! A cycle is `Idle -> Running -> Idle`. The running flag is raised under the cache lock by the operation that
//! crosses the eviction capacity, and lowered by the finalization step, which always runs: after a successful cycle,
//! after a failed one, and when the executor drops the task without running it.

use std::{
    any::Any,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use tapecache_common::{alert::Severity, code::Key, event::EvictionListener};

use crate::{
    cache::{CacheState, Inner},
    config::CapacityConfig,
    error::{Error, Result},
    judge::EvictionJudge,
};

/// Outcome of the eviction loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EvictionReport {
    pub(crate) evicted: usize,
    pub(crate) vetoed: usize,
    pub(crate) current_capacity: i64,
}

/// An eviction cycle submitted to the executor.
///
/// Dropping the task finalizes the cycle, whether it ran or not.
struct EvictionTask<K>
where
    K: Key,
{
    inner: Arc<Inner<K>>,
}

impl<K> EvictionTask<K>
where
    K: Key,
{
    fn run(self) {
        let span = tracing::info_span!("lru_cache_eviction");
        let _enter = span.enter();

        let res = catch_unwind(AssertUnwindSafe(|| -> Result<EvictionReport> {
            let judge = self.inner.prepare_judge()?;
            Ok(self.inner.evict(judge.as_ref()))
        }));

        let failure = match res {
            Ok(Ok(report)) => {
                tracing::debug!(
                    "[lru cache]: eviction process done, evicted: {}, vetoed: {}",
                    report.evicted,
                    report.vetoed
                );
                None
            }
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(format!("panicked: {}", panic_message(payload.as_ref()))),
        };
        if let Some(failure) = failure {
            tracing::error!("[lru cache]: cache eviction process failed: {failure}");
            self.inner
                .alert_sink
                .alert(Severity::Error, &format!("Cache eviction process failed: {failure}"));
        }
    }
}

impl<K> Drop for EvictionTask<K>
where
    K: Key,
{
    fn drop(&mut self) {
        self.inner.state.lock().finalize_eviction();
    }
}

/// Submit an eviction cycle. The caller must have raised the running flag and must not hold the cache lock.
pub(crate) fn schedule<K>(inner: &Arc<Inner<K>>)
where
    K: Key,
{
    let task = EvictionTask { inner: inner.clone() };
    inner.executor.execute(Box::new(move || task.run()));
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

impl<K> Inner<K>
where
    K: Key,
{
    /// Create the judge of this cycle. Runs without the cache lock, the factory may be slow.
    fn prepare_judge(&self) -> Result<Box<dyn EvictionJudge<K>>> {
        tracing::debug!("[lru cache]: preparing cache eviction judge");
        let judge = self.judge_factory.create().map_err(Error::Judge)?.ok_or(Error::MissingJudge)?;
        tracing::debug!("[lru cache]: cache eviction judge initialized");
        Ok(judge)
    }

    fn evict(&self, judge: &dyn EvictionJudge<K>) -> EvictionReport {
        let report = self.state.lock().evict(&self.config, judge, self.listener.as_ref());

        if report.current_capacity < self.config.safe_capacity {
            tracing::info!(
                "[lru cache]: enough space freed. max capacity: {}, eviction capacity: {}, safe capacity: {}, current \
                 capacity: {}",
                self.config.max_capacity,
                self.config.eviction_capacity,
                self.config.safe_capacity,
                report.current_capacity
            );
            return report;
        }

        let message = format!(
            "Critical cache level. Max capacity: {}. Eviction capacity: {}. Safe capacity: {}. Current capacity: {}",
            self.config.max_capacity, self.config.eviction_capacity, self.config.safe_capacity, report.current_capacity
        );
        tracing::warn!("[lru cache]: {message}");
        self.alert_sink.alert(Severity::Warn, &message);
        report
    }
}

impl<K> CacheState<K>
where
    K: Key,
{
    /// Evict the oldest entries the judge allows until the capacity drops below the safe capacity.
    ///
    /// Pending and reserved entries are never candidates.
    pub(crate) fn evict(
        &mut self,
        config: &CapacityConfig,
        judge: &dyn EvictionJudge<K>,
        listener: &dyn EvictionListener<K>,
    ) -> EvictionReport {
        tracing::info!(
            "[lru cache]: trying to free some space. max capacity: {}, eviction capacity: {}, safe capacity: {}, \
             current capacity: {}",
            config.max_capacity,
            config.eviction_capacity,
            config.safe_capacity,
            self.current_capacity
        );

        let CacheState {
            index,
            weights,
            current_capacity,
            ..
        } = self;

        let mut report = EvictionReport::default();
        let mut cursor = index.cursor();
        while *current_capacity >= config.safe_capacity {
            let Some(key) = cursor.next() else {
                break;
            };

            if !judge.can_evict(&key) {
                tracing::info!("[lru cache]: entry {key:?} has not been accessed recently, but is not evictable");
                report.vetoed += 1;
                continue;
            }

            tracing::info!("[lru cache]: evicting entry {key:?}");
            let weight = weights.remove(&key);
            debug_assert!(weight.is_some(), "indexed entry {key:?} has no weight");
            *current_capacity -= weight.unwrap_or_default();
            cursor.remove_current();
            report.evicted += 1;

            listener.on_evict(&key);
        }

        report.current_capacity = *current_capacity;
        report
    }

    /// Move the pending entries into the index, in confirmation order, and lower the running flag.
    ///
    /// A pending entry whose key is already indexed is dropped and its weight released. The indexed entry keeps the
    /// weight slot of the key.
    pub(crate) fn finalize_eviction(&mut self) {
        let mut pending = self.pending.drain().map(|(_, pending)| pending).collect::<Vec<_>>();
        pending.sort_by_key(|pending| pending.sequence);

        for pending in pending {
            let timestamp = pending.entry.timestamp();
            let weight = pending.entry.weight();
            if let Err(e) = self.index.add(pending.entry.into_key(), timestamp) {
                tracing::error!("[lru cache]: failed to move pending entry into the cache, entry dropped: {e}");
                self.current_capacity -= weight;
            }
        }
        self.eviction_running = false;
    }
}
