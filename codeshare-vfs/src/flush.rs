//! Debounced per-project flush of the local mirror into durable storage.
//!
//! Every qualifying change calls [`FlushScheduler::schedule`] with the latest
//! item list; only the newest list inside the debounce window is reconciled.
//! A per-project async lock keeps two flushes of one project from ever
//! overlapping, even when a timer fires while `flush_now` is running. Locks
//! exist only while a flush holds or waits for them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use codeshare_core::{Debouncer, Item};
use tokio::sync::Mutex;

use crate::fs::FileSystem;
use crate::reconciler::{Reconciler, SyncReport, VfsError};

#[derive(Debug, Clone)]
pub struct FlushConfig {
    pub debounce: Duration,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1000),
        }
    }
}

type ProjectLocks = Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>;

pub struct FlushScheduler<F> {
    reconciler: Arc<Reconciler<F>>,
    debouncer: Debouncer<String>,
    locks: ProjectLocks,
}

fn project_lock(locks: &ProjectLocks, project: &str) -> Arc<Mutex<()>> {
    let mut locks = locks.lock().unwrap_or_else(|e| e.into_inner());
    Arc::clone(locks.entry(project.to_string()).or_default())
}

/// Give back a lock from [`project_lock`], dropping the entry once unused.
fn release_lock(locks: &ProjectLocks, project: &str, lock: Arc<Mutex<()>>) {
    drop(lock);
    let mut locks = locks.lock().unwrap_or_else(|e| e.into_inner());
    // Clones are only handed out under this mutex.
    if locks.get(project).is_some_and(|l| Arc::strong_count(l) == 1) {
        locks.remove(project);
    }
}

impl<F: FileSystem + 'static> FlushScheduler<F> {
    pub fn new(reconciler: Arc<Reconciler<F>>, config: FlushConfig) -> Self {
        Self {
            reconciler,
            debouncer: Debouncer::new(config.debounce),
            locks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler<F>> {
        &self.reconciler
    }

    /// Queue `items` for `project`, replacing any pending flush.
    pub fn schedule(&self, project: &str, items: Vec<Item>) {
        let reconciler = Arc::clone(&self.reconciler);
        let locks = Arc::clone(&self.locks);
        let key = project.to_string();
        self.debouncer.schedule(project.to_string(), move || async move {
            let lock = project_lock(&locks, &key);
            let result = {
                let _guard = lock.lock().await;
                reconciler.sync(&key, &items).await
            };
            release_lock(&locks, &key, lock);
            match result {
                Ok(report) => log::debug!("Flushed {key}: {} writes", report.writes()),
                Err(e) => log::error!("Flush of {key} failed: {e}"),
            }
        });
    }

    /// Cancel any pending flush and reconcile `items` right away.
    pub async fn flush_now(&self, project: &str, items: &[Item]) -> Result<SyncReport, VfsError> {
        self.debouncer.cancel(&project.to_string());
        let lock = project_lock(&self.locks, project);
        let result = {
            let _guard = lock.lock().await;
            self.reconciler.sync(project, items).await
        };
        release_lock(&self.locks, project, lock);
        result
    }

    pub fn cancel(&self, project: &str) -> bool {
        self.debouncer.cancel(&project.to_string())
    }

    pub fn is_pending(&self, project: &str) -> bool {
        self.debouncer.is_pending(&project.to_string())
    }

    /// Projects with a flush running or waiting on its lock.
    pub fn active_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Drop every pending flush (project switch, unmount).
    pub fn shutdown(&self) {
        if self.debouncer.pending() > 0 {
            log::info!("Discarding {} pending flush(es)", self.debouncer.pending());
        }
        self.debouncer.cancel_all();
    }
}
