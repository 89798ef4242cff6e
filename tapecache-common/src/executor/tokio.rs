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

use std::{
    fmt::Debug,
    mem::ManuallyDrop,
    ops::Deref,
    sync::Arc,
};

use tokio::runtime::{Handle, Runtime};

use super::{Executor, Task};

/// A wrapper around [`Runtime`] that shuts down the runtime in the background when dropped.
///
/// This is necessary because directly dropping a nested runtime is not allowed in a parent runtime.
pub struct BackgroundShutdownRuntime(ManuallyDrop<Runtime>);

impl Debug for BackgroundShutdownRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BackgroundShutdownRuntime").finish()
    }
}

impl Drop for BackgroundShutdownRuntime {
    fn drop(&mut self) {
        // Safety: The runtime is only dropped once here.
        let runtime = unsafe { ManuallyDrop::take(&mut self.0) };
        runtime.shutdown_background();
    }
}

impl Deref for BackgroundShutdownRuntime {
    type Target = Runtime;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Runtime> for BackgroundShutdownRuntime {
    fn from(runtime: Runtime) -> Self {
        Self(ManuallyDrop::new(runtime))
    }
}

/// An executor that runs tasks on the blocking pool of a tokio runtime it owns.
#[derive(Debug, Clone)]
pub struct TokioRuntimeExecutor {
    inner: Arc<BackgroundShutdownRuntime>,
}

impl TokioRuntimeExecutor {
    /// Creates a new `TokioRuntimeExecutor` from a `Runtime`.
    pub fn new(inner: Runtime) -> Self {
        Self {
            inner: Arc::new(inner.into()),
        }
    }
}

impl From<Runtime> for TokioRuntimeExecutor {
    fn from(inner: Runtime) -> Self {
        Self::new(inner)
    }
}

impl Executor for TokioRuntimeExecutor {
    fn execute(&self, task: Task) {
        // The join handle is detached on purpose.
        drop(self.inner.spawn_blocking(task));
    }
}

/// An executor that runs tasks on the blocking pool of a tokio runtime it borrows through a [`Handle`].
#[derive(Debug, Clone)]
pub struct TokioHandleExecutor {
    handle: Handle,
}

impl TokioHandleExecutor {
    /// Creates a new `TokioHandleExecutor` from a `Handle`.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Creates a new `TokioHandleExecutor` from the runtime the caller is running in.
    ///
    /// # Panics
    ///
    /// Panics if called outside the context of a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl From<Handle> for TokioHandleExecutor {
    fn from(handle: Handle) -> Self {
        Self::new(handle)
    }
}

impl Executor for TokioHandleExecutor {
    fn execute(&self, task: Task) {
        drop(self.handle.spawn_blocking(task));
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn test_tokio_handle_executor() {
        let executor = TokioHandleExecutor::current();
        let (tx, rx) = oneshot::channel();
        executor.execute(Box::new(move || {
            tx.send(42).unwrap();
        }));
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[test]
    fn test_tokio_runtime_executor() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let executor = TokioRuntimeExecutor::new(runtime);
        let (tx, rx) = std::sync::mpsc::channel();
        executor.execute(Box::new(move || {
            tx.send(7).unwrap();
        }));
        assert_eq!(rx.recv().unwrap(), 7);
    }
}
