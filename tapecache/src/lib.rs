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

//! A weighted LRU staging cache that fronts a slow storage tier such as a tape library.
//!
//! The cache is an in-memory index over the capacity of a local staging area. It never reads or writes cached
//! payloads: the storage layer built on top of it reserves capacity before staging an object, confirms the reservation
//! once the object is written, and deletes the object when the cache reports it evicted.
//!
//! ```
//! use std::time::SystemTime;
//!
//! use tapecache::prelude::*;
//!
//! let cache = LruCache::<String>::builder(CapacityConfig::new(1000, 800, 600))
//!     .with_judge_factory(JudgeFn(|| |key: &String| !key.starts_with("pinned/")))
//!     .with_eviction_listener(|key: &String| println!("delete {key} from the staging area"))
//!     .build()
//!     .unwrap();
//!
//! let key = "bucket-0/archive-42.tar".to_string();
//! cache.reserve(CacheEntry::new(key.clone(), 100, SystemTime::now())).unwrap();
//! // ... write the archive to the staging area ...
//! cache.confirm(&key).unwrap();
//!
//! assert!(cache.contains(&key));
//! assert_eq!(cache.current_capacity(), 100);
//! ```

mod cache;
mod config;
mod entry;
mod error;
mod eviction;
/// Keys ordered by last access.
pub mod index;
/// Eviction judges.
pub mod judge;

/// Re-exported items.
pub mod prelude;

/// Utilities for testing.
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use crate::{
    cache::{CacheUsage, LruCache, LruCacheBuilder},
    config::CapacityConfig,
    entry::{timestamp_millis, CacheEntry},
    error::{BoxError, Error, Result},
};
