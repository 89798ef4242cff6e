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

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tapecache_common::code::Key;

/// Accounting record of one cached object.
///
/// The entry never owns the object payload, it only carries what the cache needs to account for capacity and recency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<K>
where
    K: Key,
{
    key: K,
    weight: i64,
    last_access: SystemTime,
}

impl<K> CacheEntry<K>
where
    K: Key,
{
    /// Create a new cache entry.
    ///
    /// The weight is validated when the entry is handed to the cache.
    pub fn new(key: K, weight: i64, last_access: SystemTime) -> Self {
        Self {
            key,
            weight,
            last_access,
        }
    }

    /// Key of the entry.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Capacity cost of the entry.
    pub fn weight(&self) -> i64 {
        self.weight
    }

    /// Last access time of the entry.
    pub fn last_access(&self) -> SystemTime {
        self.last_access
    }

    pub(crate) fn set_last_access(&mut self, last_access: SystemTime) {
        self.last_access = last_access;
    }

    pub(crate) fn timestamp(&self) -> i64 {
        timestamp_millis(self.last_access)
    }

    pub(crate) fn into_key(self) -> K {
        self.key
    }
}

/// Milliseconds since the unix epoch, negative for instants before it. Saturates at the `i64` bounds.
pub fn timestamp_millis(instant: SystemTime) -> i64 {
    match instant.duration_since(UNIX_EPOCH) {
        Ok(d) => millis(d),
        Err(e) => millis(e.duration()).saturating_neg(),
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_millis() {
        assert_eq!(timestamp_millis(UNIX_EPOCH), 0);
        assert_eq!(timestamp_millis(UNIX_EPOCH + Duration::from_millis(1_500)), 1_500);
        assert_eq!(timestamp_millis(UNIX_EPOCH - Duration::from_millis(20)), -20);
        // Sub-millisecond precision is truncated.
        assert_eq!(timestamp_millis(UNIX_EPOCH + Duration::from_micros(2_999)), 2);
    }
}
