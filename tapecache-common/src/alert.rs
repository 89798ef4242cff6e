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

use std::fmt::Display;

/// Severity of an alert raised by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// The cache keeps working but needs operator attention.
    Warn,
    /// An operation failed, or the cache is under sustained pressure.
    Error,
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warn => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// Trait for the sink that receives capacity alerts.
///
/// The sink is called on the caller thread for rejected reservations, and on the eviction thread for failed or
/// incomplete eviction cycles. It must not call back into the cache.
pub trait AlertSink: Send + Sync + 'static {
    /// Called when the cache raises an alert.
    fn alert(&self, severity: Severity, message: &str);
}

impl<F> AlertSink for F
where
    F: Fn(Severity, &str) + Send + Sync + 'static,
{
    fn alert(&self, severity: Severity, message: &str) {
        self(severity, message)
    }
}

/// Alert sink that forwards alerts to `tracing` at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn alert(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Warn => tracing::warn!(target: "tapecache::alert", "[alert]: {message}"),
            Severity::Error => tracing::error!(target: "tapecache::alert", "[alert]: {message}"),
        }
    }
}
