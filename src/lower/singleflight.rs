//! Per-key single-flight barrier
//!
//! When several tasks lower the same canonical reference concurrently, only
//! one does the work; the others subscribe to the in-flight computation and
//! share its result.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use tokio::sync::broadcast;
use tracing::debug;

pub struct SingleFlight<R: Clone + Send + 'static> {
    inflight: DashMap<String, broadcast::Sender<R>>,
}

impl<R: Clone + Send + 'static> Default for SingleFlight<R> {
    fn default() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }
}

impl<R: Clone + Send + 'static> SingleFlight<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` for `key`, unless a computation for the same key is
    /// already in flight, in which case its result is awaited and shared.
    /// If the in-flight owner goes away without publishing (task aborted),
    /// the waiter retries as the new owner.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        loop {
            let tx = {
                match self.inflight.entry(key.to_string()) {
                    Entry::Occupied(entry) => {
                        let mut rx = entry.get().subscribe();
                        drop(entry);
                        debug!(key, "awaiting in-flight computation");
                        match rx.recv().await {
                            Ok(result) => return result,
                            Err(_) => continue,
                        }
                    }
                    Entry::Vacant(entry) => {
                        let (tx, _) = broadcast::channel(1);
                        entry.insert(tx.clone());
                        tx
                    }
                }
            };

            let result = work().await;
            self.inflight.remove(key);
            let _ = tx.send(result.clone());
            return result;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn duplicate_keys_share_one_computation() {
        let flight = Arc::new(SingleFlight::<usize>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                flight
                    .run("key", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        42
                    })
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), 42);
        }
        // All waiters shared a small number of executions; the barrier only
        // guarantees deduplication of concurrent work.
        assert!(calls.load(Ordering::SeqCst) < 8);
    }

    #[tokio::test]
    async fn distinct_keys_run_independently() {
        let flight = SingleFlight::<&'static str>::new();
        let a = flight.run("a", || async { "a" }).await;
        let b = flight.run("b", || async { "b" }).await;
        assert_eq!((a, b), ("a", "b"));
    }
}
