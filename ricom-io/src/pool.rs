//! Bounded worker pool for per-frame integration.
//!
//! Tasks go through a bounded queue: [`WorkerPool::submit`] blocks while
//! the queue is full, so a fast producer stalls instead of buffering
//! frames without limit. Tasks are never dropped; shutdown closes the
//! queue and lets the workers finish everything already submitted.

use crate::{Error, Result};
use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Counters {
    in_flight: Mutex<usize>,
    idle: Condvar,
    executed: AtomicUsize,
    panicked: AtomicUsize,
}

impl Counters {
    fn finish(&self) {
        let mut in_flight = self.in_flight.lock();
        *in_flight -= 1;
        if *in_flight == 0 {
            self.idle.notify_all();
        }
    }
}

/// Fixed-size pool of worker threads draining a bounded task queue.
pub struct WorkerPool {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
    depth: usize,
}

impl WorkerPool {
    /// Spawns `threads` workers behind a queue holding `depth` tasks.
    ///
    /// # Errors
    /// Returns an error if either size is 0 or a thread cannot be spawned.
    pub fn new(threads: usize, depth: usize) -> Result<Self> {
        if threads == 0 || depth == 0 {
            return Err(Error::InvalidConfig(format!(
                "worker pool needs at least one thread and one queue slot (threads={threads}, depth={depth})"
            )));
        }
        let (sender, receiver) = bounded::<Task>(depth);
        let counters = Arc::new(Counters::default());
        let mut pool = Self {
            sender: Some(sender),
            workers: Vec::with_capacity(threads),
            counters,
            depth,
        };
        for index in 0..threads {
            let receiver = receiver.clone();
            let counters = Arc::clone(&pool.counters);
            let handle = thread::Builder::new()
                .name(format!("ricom-worker-{index}"))
                .spawn(move || worker_loop(&receiver, &counters))?;
            pool.workers.push(handle);
        }
        log::debug!("worker pool started: {threads} threads, queue depth {depth}");
        Ok(pool)
    }

    /// Number of worker threads.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Capacity of the task queue.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.depth
    }

    /// Tasks waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.sender.as_ref().map_or(0, Sender::len)
    }

    /// Tasks submitted and not yet finished.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        *self.counters.in_flight.lock()
    }

    /// Tasks that ran to completion.
    #[must_use]
    pub fn executed(&self) -> usize {
        self.counters.executed.load(Ordering::Acquire)
    }

    /// Tasks that panicked.
    #[must_use]
    pub fn panicked(&self) -> usize {
        self.counters.panicked.load(Ordering::Acquire)
    }

    /// Queues a task, blocking while the queue is full.
    ///
    /// # Errors
    /// Returns an error if the pool has no running workers left.
    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = self.sender.as_ref() else {
            return Err(Error::InvalidConfig("worker pool is shut down".to_string()));
        };
        *self.counters.in_flight.lock() += 1;
        if sender.send(Box::new(task)).is_err() {
            self.counters.finish();
            return Err(Error::InvalidConfig(
                "worker pool has no running workers".to_string(),
            ));
        }
        Ok(())
    }

    /// Blocks until every submitted task has finished.
    pub fn drain(&self) {
        let mut in_flight = self.counters.in_flight.lock();
        while *in_flight > 0 {
            self.counters.idle.wait(&mut in_flight);
        }
    }

    /// Finishes all queued tasks and joins the workers.
    ///
    /// # Errors
    /// Returns [`Error::TaskPanicked`] if any task panicked during the
    /// lifetime of the pool.
    pub fn shutdown(mut self) -> Result<()> {
        self.close();
        match self.panicked() {
            0 => Ok(()),
            n => Err(Error::TaskPanicked(n)),
        }
    }

    fn close(&mut self) {
        drop(self.sender.take());
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("worker thread exited abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(receiver: &Receiver<Task>, counters: &Counters) {
    for task in receiver {
        if catch_unwind(AssertUnwindSafe(task)).is_ok() {
            counters.executed.fetch_add(1, Ordering::AcqRel);
        } else {
            counters.panicked.fetch_add(1, Ordering::AcqRel);
            log::error!("integration task panicked");
        }
        counters.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn test_every_task_runs() {
        let pool = WorkerPool::new(4, 2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.drain();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        assert_eq!(pool.executed(), 100);
        assert_eq!(pool.in_flight(), 0);
        pool.shutdown().unwrap();
    }

    #[test]
    fn test_submit_blocks_when_full() {
        let pool = Arc::new(WorkerPool::new(1, 1).unwrap());
        let (release_tx, release_rx) = unbounded::<()>();
        let (started_tx, started_rx) = unbounded::<()>();

        // Occupies the only worker until released
        pool.submit(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
        .unwrap();
        started_rx.recv().unwrap();
        // Fills the queue
        pool.submit(|| {}).unwrap();

        let returned = Arc::new(AtomicBool::new(false));
        let producer = {
            let pool = Arc::clone(&pool);
            let returned = Arc::clone(&returned);
            thread::spawn(move || {
                pool.submit(|| {}).unwrap();
                returned.store(true, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(100));
        assert!(!returned.load(Ordering::SeqCst));

        release_tx.send(()).unwrap();
        producer.join().unwrap();
        assert!(returned.load(Ordering::SeqCst));
        pool.drain();
        assert_eq!(pool.executed(), 3);
    }

    #[test]
    fn test_panicking_task_is_counted() {
        let pool = WorkerPool::new(2, 4).unwrap();
        pool.submit(|| panic!("boom")).unwrap();
        pool.submit(|| {}).unwrap();
        pool.drain();
        assert_eq!(pool.executed(), 1);
        assert_eq!(pool.panicked(), 1);
        assert!(matches!(pool.shutdown(), Err(Error::TaskPanicked(1))));
    }

    #[test]
    fn test_shutdown_finishes_queued_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(1, 8).unwrap();
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.shutdown().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_zero_sizes_rejected() {
        assert!(WorkerPool::new(0, 1).is_err());
        assert!(WorkerPool::new(1, 0).is_err());
    }
}
