/// Task Scheduler collaborator - contract for background work

/// Opaque identifier naming a scheduled unit of work
///
/// Usable as a dependency for later scheduled work: the dependent job runs
/// only after every named token has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskToken(u64);

impl TaskToken {
    /// Construct a token from a raw id (for scheduler implementations)
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A schedulable job
pub type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// Task scheduler trait
///
/// Fire-and-forget: a scheduled job always runs to completion; there is no
/// cancellation. The internal scheduling policy is the implementation's
/// business; only the dependency ordering is contractual.
pub trait TaskScheduler: Send + Sync {
    /// Schedule a job to run after every dependency has completed
    fn schedule(&self, job: TaskFn, dependencies: &[TaskToken]) -> TaskToken;

    /// Whether the named job has finished running
    fn is_complete(&self, token: TaskToken) -> bool;
}
