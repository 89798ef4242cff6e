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

//! Keys ordered by last access timestamp, oldest first.

use std::{
    collections::BTreeMap,
    fmt::Debug,
    hash::Hash,
    ops::Bound::{Excluded, Unbounded},
};

use equivalent::Equivalent;
use hashbrown::HashMap;
use tapecache_common::code::Key;

use crate::error::{Error, Result};

/// Ordering slot of a key: its timestamp, then a sequence number that keeps keys with equal timestamps in insertion
/// order.
type Position = (i64, u64);

/// A set of keys ordered by a mutable `i64` timestamp, oldest first.
///
/// Keys sharing a timestamp are ordered by the time they were added or last updated. All operations are `O(log n)`.
///
/// The index is not synchronized. The owning cache serializes access to it.
pub struct LruIndex<K>
where
    K: Key,
{
    order: BTreeMap<Position, K>,
    positions: HashMap<K, Position>,
    sequence: u64,
}

impl<K> Debug for LruIndex<K>
where
    K: Key,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.order.iter().map(|((ts, _), key)| (key, ts))).finish()
    }
}

impl<K> Default for LruIndex<K>
where
    K: Key,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> LruIndex<K>
where
    K: Key,
{
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            order: BTreeMap::new(),
            positions: HashMap::new(),
            sequence: 0,
        }
    }

    fn next_position(&mut self, timestamp: i64) -> Position {
        let position = (timestamp, self.sequence);
        self.sequence += 1;
        position
    }

    /// Add a key with the given timestamp.
    ///
    /// Fails with [`Error::DuplicateKey`] if the key is already indexed.
    pub fn add(&mut self, key: K, timestamp: i64) -> Result<()> {
        if self.positions.contains_key(&key) {
            return Err(Error::duplicate_key(&key));
        }
        let position = self.next_position(timestamp);
        self.positions.insert(key.clone(), position);
        self.order.insert(position, key);
        Ok(())
    }

    /// Move an indexed key to a new timestamp.
    ///
    /// Returns `false` and does nothing if the key is not indexed.
    pub fn update<Q>(&mut self, key: &Q, timestamp: i64) -> bool
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let Some(position) = self.positions.get_mut(key) else {
            return false;
        };
        let Some(k) = self.order.remove(&*position) else {
            return false;
        };
        *position = (timestamp, self.sequence);
        self.sequence += 1;
        self.order.insert(*position, k);
        true
    }

    /// Returns `true` if the key is indexed.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.positions.contains_key(key)
    }

    /// Timestamp of an indexed key.
    pub fn timestamp<Q>(&self, key: &Q) -> Option<i64>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.positions.get(key).map(|(ts, _)| *ts)
    }

    /// Remove a key. Returns `true` if it was indexed.
    pub fn remove<Q>(&mut self, key: &Q) -> bool
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        match self.positions.remove(key) {
            Some(position) => {
                self.order.remove(&position);
                true
            }
            None => false,
        }
    }

    /// Number of indexed keys.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns `true` if no key is indexed.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Iterate over the keys, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &K> + '_ {
        self.order.values()
    }

    /// Open a cursor positioned before the oldest key.
    ///
    /// Unlike [`LruIndex::iter`], the cursor can remove the key it last returned and keep iterating.
    pub fn cursor(&mut self) -> Cursor<'_, K> {
        Cursor {
            index: self,
            last: None,
            current: None,
        }
    }
}

/// A cursor over an [`LruIndex`], oldest key first, that supports removal of the key it last yielded.
pub struct Cursor<'a, K>
where
    K: Key,
{
    index: &'a mut LruIndex<K>,
    /// Position of the last yielded key. It may no longer be indexed.
    last: Option<Position>,
    /// Position of the key that [`Cursor::remove_current`] would remove.
    current: Option<Position>,
}

impl<K> Cursor<'_, K>
where
    K: Key,
{
    /// Remove the key returned by the latest call to `next`.
    ///
    /// Only valid immediately after a `next` that returned a key. Returns `false` otherwise, including when called
    /// twice in a row.
    pub fn remove_current(&mut self) -> bool {
        let Some(position) = self.current.take() else {
            return false;
        };
        match self.index.order.remove(&position) {
            Some(key) => {
                self.index.positions.remove(&key);
                true
            }
            None => false,
        }
    }
}

impl<K> Iterator for Cursor<'_, K>
where
    K: Key,
{
    type Item = K;

    fn next(&mut self) -> Option<Self::Item> {
        let next = match self.last {
            None => self.index.order.iter().next(),
            Some(last) => self.index.order.range((Excluded(last), Unbounded)).next(),
        };
        match next {
            Some((position, key)) => {
                self.last = Some(*position);
                self.current = Some(*position);
                Some(key.clone())
            }
            None => {
                self.current = None;
                None
            }
        }
    }
}
