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

use std::fmt::Debug;

use tapecache_common::code::Key;

use crate::error::BoxError;

/// Decides, during one eviction cycle, whether an entry may be evicted.
///
/// Entries that are currently in use by the surrounding storage layer must be vetoed.
pub trait EvictionJudge<K>: Send + Sync + 'static
where
    K: Key,
{
    /// Returns `true` if the entry may be evicted now.
    fn can_evict(&self, key: &K) -> bool;
}

impl<K, F> EvictionJudge<K> for F
where
    K: Key,
    F: Fn(&K) -> bool + Send + Sync + 'static,
{
    fn can_evict(&self, key: &K) -> bool {
        self(key)
    }
}

/// Result of an eviction judge factory. `Ok(None)` stands for an absent judge.
pub type JudgeResult<K> = std::result::Result<Option<Box<dyn EvictionJudge<K>>>, BoxError>;

/// Creates a fresh [`EvictionJudge`] before each eviction cycle.
///
/// The factory runs on the eviction thread without the cache lock held, so it may perform slow or blocking work such
/// as listing the entries that are currently locked. The judge only reflects the state observed when it was created.
///
/// An error or an absent judge aborts the current cycle only.
pub trait EvictionJudgeFactory<K>: Send + Sync + 'static
where
    K: Key,
{
    /// Create the judge for the upcoming eviction cycle.
    fn create(&self) -> JudgeResult<K>;
}

impl<K, F> EvictionJudgeFactory<K> for F
where
    K: Key,
    F: Fn() -> JudgeResult<K> + Send + Sync + 'static,
{
    fn create(&self) -> JudgeResult<K> {
        self()
    }
}

/// Adapts an infallible closure that returns a judge into an [`EvictionJudgeFactory`].
///
/// ```
/// use tapecache::judge::{EvictionJudge, EvictionJudgeFactory, JudgeFn};
///
/// let factory = JudgeFn(|| |key: &String| !key.starts_with("pinned/"));
/// let judge = EvictionJudgeFactory::<String>::create(&factory).unwrap().unwrap();
/// assert!(judge.can_evict(&"bucket/1.tar".to_string()));
/// assert!(!judge.can_evict(&"pinned/2.tar".to_string()));
/// ```
pub struct JudgeFn<F>(pub F);

impl<F> Debug for JudgeFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("JudgeFn").finish()
    }
}

impl<K, F, J> EvictionJudgeFactory<K> for JudgeFn<F>
where
    K: Key,
    F: Fn() -> J + Send + Sync + 'static,
    J: EvictionJudge<K>,
{
    fn create(&self) -> JudgeResult<K> {
        Ok(Some(Box::new((self.0)())))
    }
}

/// Judge and judge factory that allow every eviction.
#[derive(Debug, Default, Clone, Copy)]
pub struct EvictAll;

impl<K> EvictionJudge<K> for EvictAll
where
    K: Key,
{
    fn can_evict(&self, _key: &K) -> bool {
        true
    }
}

impl<K> EvictionJudgeFactory<K> for EvictAll
where
    K: Key,
{
    fn create(&self) -> JudgeResult<K> {
        Ok(Some(Box::new(EvictAll)))
    }
}
