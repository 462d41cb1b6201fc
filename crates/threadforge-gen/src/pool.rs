//! Bounded worker pool shared by every concurrent phase.
//!
//! One pool is built per phase and dropped at the end of it. Work beyond the pool size
//! queues; results come back in completion order, and a panicking unit of work is turned
//! into a failure record for its own item instead of tearing down the batch.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::time::Duration;

/// Errors from building a worker pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool size must be at least 1")]
    ZeroWorkers,
    #[error("failed to build worker pool: {0}")]
    Build(#[from] rayon::ThreadPoolBuildError),
}

/// A fixed-size pool of named OS threads.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    name: String,
    size: usize,
    dispatch_delay: Duration,
}

impl WorkerPool {
    pub fn new(name: &str, size: usize) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::ZeroWorkers);
        }
        let prefix = name.to_string();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(move |i| format!("{}-{}", prefix, i))
            .build()?;
        Ok(Self {
            pool,
            name: name.to_string(),
            size,
            dispatch_delay: Duration::ZERO,
        })
    }

    /// Pause between consecutive submissions.
    #[must_use]
    pub fn with_dispatch_delay(mut self, delay: Duration) -> Self {
        self.dispatch_delay = delay;
        self
    }

    /// Run `work` over every item; returns one result per item, in completion order.
    ///
    /// If `work` panics for an item, `on_fault(item, message)` produces that item's result.
    /// `on_done` sees each result on the calling thread as it arrives.
    pub fn run<T, R, W, F, D>(&self, items: Vec<T>, work: W, on_fault: F, mut on_done: D) -> Vec<R>
    where
        T: Send,
        R: Send,
        W: Fn(&T) -> R + Sync,
        F: Fn(&T, String) -> R + Sync,
        D: FnMut(&R),
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }
        tracing::debug!(
            "Pool {}: {} task(s) on {} worker(s)",
            self.name,
            total,
            self.size
        );

        let (tx, rx) = mpsc::channel::<R>();
        let work = &work;
        let on_fault = &on_fault;

        self.pool.in_place_scope(|scope| {
            for (i, item) in items.into_iter().enumerate() {
                if i > 0 && !self.dispatch_delay.is_zero() {
                    std::thread::sleep(self.dispatch_delay);
                }
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let result = match catch_unwind(AssertUnwindSafe(|| work(&item))) {
                        Ok(result) => result,
                        Err(payload) => {
                            let msg = panic_message(payload.as_ref());
                            tracing::warn!("Worker fault: {}", msg);
                            on_fault(&item, msg)
                        }
                    };
                    // The receiver lives until every task has reported.
                    let _ = tx.send(result);
                });
            }
            drop(tx);

            let mut results = Vec::with_capacity(total);
            for result in rx {
                on_done(&result);
                results.push(result);
            }
            results
        })
    }
}

/// Best-effort text of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("worker panicked: {}", s)
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(WorkerPool::new("t", 0), Err(PoolError::ZeroWorkers)));
    }

    #[test]
    fn test_every_item_yields_one_result() {
        let pool = WorkerPool::new("t", 2).unwrap();
        let mut seen = 0;
        let mut out = pool.run(
            (0..25).collect(),
            |n: &i32| n * 2,
            |_, _| -1,
            |_| seen += 1,
        );
        out.sort_unstable();
        assert_eq!(seen, 25);
        assert_eq!(out, (0..25).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_panic_becomes_fault_record() {
        let pool = WorkerPool::new("t", 3).unwrap();
        let out = pool.run(
            vec![1, 2, 3, 4, 5],
            |n: &i32| {
                assert!(*n != 3, "boom on {}", n);
                Ok(*n)
            },
            |n, msg| Err((*n, msg)),
            |_| {},
        );
        assert_eq!(out.len(), 5);
        let faults: Vec<_> = out.iter().filter_map(|r| r.as_ref().err()).collect();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].0, 3);
        assert!(faults[0].1.contains("boom on 3"));
    }

    #[test]
    fn test_concurrency_never_exceeds_size() {
        let pool = WorkerPool::new("t", 2).unwrap();
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let out = pool.run(
            (0..8).collect(),
            |_: &i32| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(15));
                active.fetch_sub(1, Ordering::SeqCst);
            },
            |_, _| {},
            |_| {},
        );
        assert_eq!(out.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_empty_input() {
        let pool = WorkerPool::new("t", 1).unwrap();
        let out: Vec<i32> = pool.run(Vec::<i32>::new(), |n| *n, |_, _| 0, |_| {});
        assert!(out.is_empty());
    }
}
