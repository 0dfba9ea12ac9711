/// InlineScheduler - deterministic scheduler for unit tests
///
/// Jobs are queued, never run on their own; the test decides when the
/// "background" completes by calling run_all(). This gives frame-accurate
/// control over the rebuild handoff without threads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use rustc_hash::FxHashSet;

use super::scheduler::{TaskFn, TaskScheduler, TaskToken};

struct Pending {
    token: TaskToken,
    dependencies: Vec<TaskToken>,
    run: TaskFn,
}

pub struct InlineScheduler {
    pending: Mutex<Vec<Pending>>,
    completed: Mutex<FxHashSet<TaskToken>>,
    next_token: AtomicU64,
}

impl InlineScheduler {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            completed: Mutex::new(FxHashSet::default()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Number of jobs queued and not yet run
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Run every queued job, respecting dependency order.
    ///
    /// Panics if a dependency cycle (or a dependency on a token this
    /// scheduler never saw) leaves jobs stuck.
    pub fn run_all(&self) {
        loop {
            let runnable = {
                let mut pending = self.pending.lock().unwrap();
                if pending.is_empty() {
                    return;
                }
                let completed = self.completed.lock().unwrap();
                let position = pending.iter().position(|job| {
                    job.dependencies.iter().all(|dep| completed.contains(dep))
                });
                match position {
                    Some(index) => pending.remove(index),
                    None => panic!("InlineScheduler: jobs stuck on unmet dependencies"),
                }
            };
            (runnable.run)();
            self.completed.lock().unwrap().insert(runnable.token);
        }
    }
}

impl Default for InlineScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler for InlineScheduler {
    fn schedule(&self, job: TaskFn, dependencies: &[TaskToken]) -> TaskToken {
        let token = TaskToken::from_raw(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.pending.lock().unwrap().push(Pending {
            token,
            dependencies: dependencies.to_vec(),
            run: job,
        });
        token
    }

    fn is_complete(&self, token: TaskToken) -> bool {
        self.completed.lock().unwrap().contains(&token)
    }
}
