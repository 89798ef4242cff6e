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

/// `tokio` executor implementation.
pub mod tokio;

use std::{
    fmt::Debug,
    sync::atomic::{AtomicUsize, Ordering},
};

/// A unit of background work submitted to an [`Executor`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// An executor that runs detached background tasks.
///
/// Tasks may block: they are expected to run on threads that tolerate blocking work. An executor that cannot run a
/// task must drop it; owners of a task release their resources on drop.
pub trait Executor: Debug + Send + Sync + 'static {
    /// Submit a task to the executor.
    fn execute(&self, task: Task);
}

/// An executor that runs each task on a freshly spawned, named OS thread.
#[derive(Debug)]
pub struct ThreadExecutor {
    name: String,
    spawned: AtomicUsize,
}

impl Default for ThreadExecutor {
    fn default() -> Self {
        Self::new("tapecache-worker")
    }
}

impl ThreadExecutor {
    /// Create a thread executor whose threads are named `{name}-{n}`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spawned: AtomicUsize::new(0),
        }
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, task: Task) {
        let id = self.spawned.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{id}", self.name);
        if let Err(e) = std::thread::Builder::new().name(name.clone()).spawn(task) {
            tracing::error!("[thread executor]: failed to spawn thread {name}, task dropped: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn test_thread_executor_names_threads() {
        let executor = ThreadExecutor::new("eviction");
        let (tx, rx) = mpsc::channel();
        for _ in 0..2 {
            let tx = tx.clone();
            executor.execute(Box::new(move || {
                tx.send(std::thread::current().name().map(|s| s.to_string())).unwrap();
            }));
        }
        let mut names = vec![rx.recv().unwrap().unwrap(), rx.recv().unwrap().unwrap()];
        names.sort();
        assert_eq!(names, vec!["eviction-0".to_string(), "eviction-1".to_string()]);
    }
}
