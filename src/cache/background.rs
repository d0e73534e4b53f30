//! Tracked background work: stale-while-revalidate refreshes and
//! write-behind database writes
//!
//! Tasks are held in a `JoinSet` so they can be awaited with
//! [`BackgroundTasks::drain`]. Refreshes are limited to one per key and to
//! a global number of permits; requests beyond either limit are dropped,
//! since the entry being served is still valid for its stale window.
//!
//! Dropping the last handle aborts whatever is still running and logs a
//! warning with the number of tasks lost. Call `drain` before shutdown to
//! let pending database writes finish.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct BackgroundTasks {
    inner: Arc<Inner>,
}

type RefreshingKeys = Arc<StdMutex<HashSet<String>>>;

struct Inner {
    refreshing: RefreshingKeys,
    refresh_permits: Arc<Semaphore>,
    tasks: StdMutex<JoinSet<()>>,
    refreshes_skipped: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let tasks = self
            .tasks
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while tasks.try_join_next().is_some() {}

        if !tasks.is_empty() {
            warn!(
                "Aborting {} background cache tasks on shutdown; pending write-behind writes are lost",
                tasks.len()
            );
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Marks a key as refreshing until dropped
struct RefreshSlot {
    refreshing: RefreshingKeys,
    key: String,
    _permit: OwnedSemaphorePermit,
}

impl Drop for RefreshSlot {
    fn drop(&mut self) {
        lock(&self.refreshing).remove(&self.key);
    }
}

impl BackgroundTasks {
    pub fn new(max_concurrent_refreshes: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                refreshing: Arc::new(StdMutex::new(HashSet::new())),
                refresh_permits: Arc::new(Semaphore::new(max_concurrent_refreshes)),
                tasks: StdMutex::new(JoinSet::new()),
                refreshes_skipped: AtomicU64::new(0),
            }),
        }
    }

    /// Schedule a refresh of `key`
    ///
    /// Returns false without running `task` when a refresh of the same key
    /// is already running or the refresh cap is reached.
    pub fn spawn_refresh<F>(&self, key: &str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !lock(&self.inner.refreshing).insert(key.to_string()) {
            debug!("Refresh already running for {}", key);
            self.inner.refreshes_skipped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let permit = match Arc::clone(&self.inner.refresh_permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                lock(&self.inner.refreshing).remove(key);
                debug!("Refresh cap reached, skipping {}", key);
                self.inner.refreshes_skipped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };

        let slot = RefreshSlot {
            refreshing: Arc::clone(&self.inner.refreshing),
            key: key.to_string(),
            _permit: permit,
        };

        self.spawn(async move {
            let _slot = slot;
            task.await;
        });
        true
    }

    /// Run a tracked task
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = lock(&self.inner.tasks);
        // Reap finished tasks so the set does not grow without bound
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    /// Wait for every tracked task, including ones spawned while waiting
    pub async fn drain(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *lock(&self.inner.tasks));
            if tasks.is_empty() {
                return;
            }

            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    if e.is_panic() {
                        warn!("Background cache task panicked: {}", e);
                    }
                }
            }
        }
    }

    /// Tasks spawned and not yet reaped
    pub fn pending(&self) -> usize {
        lock(&self.inner.tasks).len()
    }

    /// Whether a refresh of `key` is running
    pub fn is_refreshing(&self, key: &str) -> bool {
        lock(&self.inner.refreshing).contains(key)
    }

    pub fn refreshes_skipped(&self) -> u64 {
        self.inner.refreshes_skipped.load(Ordering::Relaxed)
    }
}
