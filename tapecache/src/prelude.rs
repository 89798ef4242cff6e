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

pub use tapecache_common::{
    alert::{AlertSink, Severity, TracingAlertSink},
    code::Key,
    event::{EvictionListener, NoopEvictionListener},
    executor::{
        tokio::{TokioHandleExecutor, TokioRuntimeExecutor},
        Executor, Task, ThreadExecutor,
    },
};

pub use crate::{
    cache::{CacheUsage, LruCache, LruCacheBuilder},
    config::CapacityConfig,
    entry::CacheEntry,
    error::{BoxError, Error, Result},
    judge::{EvictAll, EvictionJudge, EvictionJudgeFactory, JudgeFn, JudgeResult},
};
