/// WorkerPool - thread-pool implementation of the TaskScheduler contract
///
/// Jobs travel through a crossbeam channel to a fixed set of worker threads.
/// Completion state is tracked per token behind a mutex; a worker picking up
/// a job with unmet dependencies parks on a condvar until they complete.
/// Because dependencies must already be scheduled when they are named, and
/// the channel is FIFO, a dependency is always at least as far along as its
/// dependent, so this wait cannot deadlock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use rustc_hash::FxHashSet;

use crate::rt_debug;
use super::scheduler::{TaskFn, TaskScheduler, TaskToken};

struct Job {
    token: TaskToken,
    dependencies: Vec<TaskToken>,
    run: TaskFn,
}

struct Shared {
    completed: Mutex<FxHashSet<TaskToken>>,
    condvar: Condvar,
}

impl Shared {
    fn wait_for(&self, dependencies: &[TaskToken]) {
        let mut completed = self.completed.lock().unwrap();
        while !dependencies.iter().all(|dep| completed.contains(dep)) {
            completed = self.condvar.wait(completed).unwrap();
        }
    }

    fn mark_complete(&self, token: TaskToken) {
        self.completed.lock().unwrap().insert(token);
        self.condvar.notify_all();
    }
}

/// Fixed-size worker pool running fire-and-forget background jobs
pub struct WorkerPool {
    shared: Arc<Shared>,
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    next_token: AtomicU64,
}

impl WorkerPool {
    /// Spawn a pool with `worker_count` threads (minimum 1)
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let shared = Arc::new(Shared {
            completed: Mutex::new(FxHashSet::default()),
            condvar: Condvar::new(),
        });

        let (sender, receiver): (Sender<Job>, Receiver<Job>) = unbounded();
        let workers = (0..worker_count)
            .map(|index| {
                let receiver = receiver.clone();
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("astra-worker-{}", index))
                    .spawn(move || Self::worker_loop(receiver, shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        rt_debug!("astra::tasks", "Worker pool started with {} threads", worker_count);

        Self {
            shared,
            sender: Some(sender),
            workers,
            next_token: AtomicU64::new(1),
        }
    }

    fn worker_loop(receiver: Receiver<Job>, shared: Arc<Shared>) {
        while let Ok(job) = receiver.recv() {
            shared.wait_for(&job.dependencies);
            (job.run)();
            shared.mark_complete(job.token);
        }
    }
}

impl TaskScheduler for WorkerPool {
    fn schedule(&self, job: TaskFn, dependencies: &[TaskToken]) -> TaskToken {
        let token = TaskToken::from_raw(self.next_token.fetch_add(1, Ordering::Relaxed));
        let sender = self
            .sender
            .as_ref()
            .expect("schedule() called on a shut-down pool");
        // Send can only fail after shutdown, which drops the sender first
        let _ = sender.send(Job {
            token,
            dependencies: dependencies.to_vec(),
            run: job,
        });
        token
    }

    fn is_complete(&self, token: TaskToken) -> bool {
        self.shared.completed.lock().unwrap().contains(&token)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets every worker drain remaining jobs and exit
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
#[path = "worker_pool_tests.rs"]
mod tests;
