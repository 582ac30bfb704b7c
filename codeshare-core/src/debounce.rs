//! Keyed trailing-edge debouncer on the tokio runtime.
//!
//! Each key has at most one armed timer. Scheduling a key aborts its previous
//! timer first, so only the most recent job inside the window runs. When a
//! timer fires, its job is spawned as a separate task: a later reschedule
//! can abort the timer but never a job that is already running.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

struct Pending<K> {
    generation: u64,
    timers: HashMap<K, (u64, JoinHandle<()>)>,
}

pub struct Debouncer<K> {
    delay: Duration,
    state: Arc<Mutex<Pending<K>>>,
}

fn lock<K>(state: &Mutex<Pending<K>>) -> MutexGuard<'_, Pending<K>> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: Arc::new(Mutex::new(Pending {
                generation: 0,
                timers: HashMap::new(),
            })),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arm (or re-arm) the timer for `key`. Must be called inside a tokio
    /// runtime.
    pub fn schedule<F, Fut>(&self, key: K, job: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut pending = lock(&self.state);
        pending.generation += 1;
        let generation = pending.generation;

        if let Some((_, previous)) = pending.timers.remove(&key) {
            previous.abort();
        }

        let state = Arc::clone(&self.state);
        let delay = self.delay;
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut pending = lock(&state);
                match pending.timers.get(&timer_key) {
                    Some((g, _)) if *g == generation => {
                        pending.timers.remove(&timer_key);
                    }
                    // Superseded between wake-up and lock.
                    _ => return,
                }
            }
            tokio::spawn(job());
        });

        pending.timers.insert(key, (generation, timer));
    }

    /// Disarm `key`. Returns true if a timer was pending.
    pub fn cancel(&self, key: &K) -> bool {
        match lock(&self.state).timers.remove(key) {
            Some((_, timer)) => {
                timer.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let mut pending = lock(&self.state);
        for (_, (_, timer)) in pending.timers.drain() {
            timer.abort();
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        lock(&self.state).timers.contains_key(key)
    }

    /// Number of armed timers.
    pub fn pending(&self) -> usize {
        lock(&self.state).timers.len()
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        let mut pending = lock(&self.state);
        for (_, (_, timer)) in pending.timers.drain() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_only_latest_job_runs() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let runs = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(Mutex::new(0));

        for value in 1..=3 {
            let runs = Arc::clone(&runs);
            let last = Arc::clone(&last);
            debouncer.schedule("project", move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                *last.lock().unwrap() = value;
            });
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(*last.lock().unwrap(), 3);
        assert_eq!(debouncer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let runs = Arc::new(AtomicUsize::new(0));

        for key in ["a", "b"] {
            let runs = Arc::clone(&runs);
            debouncer.schedule(key, move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(debouncer.pending(), 2);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_drop_disarm() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let runs = Arc::new(AtomicUsize::new(0));

        let r = Arc::clone(&runs);
        debouncer.schedule(1u32, move || async move {
            r.fetch_add(1, Ordering::SeqCst);
        });
        assert!(debouncer.is_pending(&1));
        assert!(debouncer.cancel(&1));
        assert!(!debouncer.cancel(&1));

        let r = Arc::clone(&runs);
        debouncer.schedule(2u32, move || async move {
            r.fetch_add(1, Ordering::SeqCst);
        });
        drop(debouncer);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
