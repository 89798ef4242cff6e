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

/// Boxed error returned by user-provided components.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Staging cache error.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Capacity thresholds are not strictly ordered.
    #[error("config error: {0}")]
    InvalidConfig(String),
    /// An entry of the initial entry source was rejected.
    #[error("invalid initial entry: {0}")]
    InvalidInitialEntry(String),
    /// An entry passed to `reserve` was rejected.
    #[error("invalid entry: {0}")]
    InvalidEntry(String),
    /// The key is already known to the cache.
    #[error("entry {0} already exists in the cache")]
    DuplicateKey(String),
    /// The key has no active reservation.
    #[error("no active reservation for entry {0}, reservation already confirmed or canceled?")]
    NoSuchReservation(String),
    /// Admitting the entry would reach the max capacity.
    #[error(
        "cannot add entry {key}, cache capacity exceeded. max capacity: {max_capacity}, eviction capacity: \
         {eviction_capacity}, safe capacity: {safe_capacity}, current capacity: {current_capacity}, \
         entry capacity to reserve: {weight}"
    )]
    CapacityExceeded {
        /// Rejected key.
        key: String,
        /// Weight of the rejected entry.
        weight: i64,
        /// Capacity in use when the reservation was rejected.
        current_capacity: i64,
        /// Max capacity threshold.
        max_capacity: i64,
        /// Eviction capacity threshold.
        eviction_capacity: i64,
        /// Safe capacity threshold.
        safe_capacity: i64,
    },
    /// The eviction judge factory produced no judge.
    #[error("null eviction judge")]
    MissingJudge,
    /// The eviction judge factory failed.
    #[error("eviction judge error: {0}")]
    Judge(#[source] BoxError),
}

impl Error {
    pub(crate) fn duplicate_key(key: &(impl std::fmt::Debug + ?Sized)) -> Self {
        Self::DuplicateKey(format!("{key:?}"))
    }

    pub(crate) fn no_such_reservation(key: &(impl std::fmt::Debug + ?Sized)) -> Self {
        Self::NoSuchReservation(format!("{key:?}"))
    }
}

/// Staging cache result.
pub type Result<T> = std::result::Result<T, Error>;
