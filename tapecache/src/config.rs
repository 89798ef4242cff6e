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

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Capacity thresholds of the staging cache, in weight units (usually bytes).
///
/// The thresholds must satisfy `max_capacity > eviction_capacity + 1`, `eviction_capacity > safe_capacity + 1` and
/// `safe_capacity >= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityConfig {
    /// Reservations that would bring the cache capacity to this value or above are rejected.
    pub max_capacity: i64,
    /// Reaching this capacity starts a background eviction cycle.
    pub eviction_capacity: i64,
    /// A running eviction cycle stops once the capacity drops below this value.
    pub safe_capacity: i64,
}

impl CapacityConfig {
    /// Create a capacity config. Use [`CapacityConfig::validate`] to check it.
    pub fn new(max_capacity: i64, eviction_capacity: i64, safe_capacity: i64) -> Self {
        Self {
            max_capacity,
            eviction_capacity,
            safe_capacity,
        }
    }

    /// Check that the thresholds are strictly ordered.
    pub fn validate(&self) -> Result<()> {
        if self.max_capacity <= self.eviction_capacity.saturating_add(1) {
            return Err(Error::InvalidConfig(format!(
                "max capacity must be greater than eviction capacity + 1, max capacity: {}, eviction capacity: {}",
                self.max_capacity, self.eviction_capacity
            )));
        }
        if self.eviction_capacity <= self.safe_capacity.saturating_add(1) {
            return Err(Error::InvalidConfig(format!(
                "eviction capacity must be greater than safe capacity + 1, eviction capacity: {}, safe capacity: {}",
                self.eviction_capacity, self.safe_capacity
            )));
        }
        if self.safe_capacity < 1 {
            return Err(Error::InvalidConfig(format!(
                "safe capacity must be positive, safe capacity: {}",
                self.safe_capacity
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(CapacityConfig::new(1000, 900, 800).validate().is_ok());
        assert!(CapacityConfig::new(100, 60, 40).validate().is_ok());
        assert!(CapacityConfig::new(5, 3, 1).validate().is_ok());

        let invalid = [
            CapacityConfig::new(900, 900, 800),
            CapacityConfig::new(901, 900, 800),
            CapacityConfig::new(1000, 801, 800),
            CapacityConfig::new(1000, 800, 900),
            CapacityConfig::new(5, 3, 0),
            CapacityConfig::new(5, 2, 0),
            CapacityConfig::new(i64::MAX, i64::MAX, 1),
        ];
        for config in invalid {
            assert!(
                matches!(config.validate(), Err(Error::InvalidConfig(_))),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_deserialize() {
        let config: CapacityConfig = serde_json::from_str(
            r#"{ "max_capacity": 1000000000, "eviction_capacity": 800000000, "safe_capacity": 600000000 }"#,
        )
        .unwrap();
        assert_eq!(config, CapacityConfig::new(1_000_000_000, 800_000_000, 600_000_000));
        config.validate().unwrap();
    }
}
