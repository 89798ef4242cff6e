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

use std::marker::PhantomData;

use crate::code::Key;

/// Trait for the customized eviction listener.
pub trait EvictionListener<K>: Send + Sync + 'static
where
    K: Key,
{
    /// Called once for each entry removed by a background eviction cycle.
    ///
    /// The listener runs while the cache lock is held. It must be fast and must not call back into the cache.
    fn on_evict(&self, key: &K);
}

impl<K, F> EvictionListener<K> for F
where
    K: Key,
    F: Fn(&K) + Send + Sync + 'static,
{
    fn on_evict(&self, key: &K) {
        self(key)
    }
}

/// Eviction listener that ignores every event.
#[derive(Debug)]
pub struct NoopEvictionListener<K>(PhantomData<fn(&K)>);

impl<K> Default for NoopEvictionListener<K> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<K> EvictionListener<K> for NoopEvictionListener<K>
where
    K: Key,
{
    fn on_evict(&self, _key: &K) {}
}
