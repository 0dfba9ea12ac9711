/// Tasks module - background job scheduling

pub mod scheduler;
pub mod worker_pool;

pub use scheduler::*;
pub use worker_pool::WorkerPool;

// Deterministic scheduler for tests (no threads)
#[cfg(test)]
pub mod inline_scheduler;
