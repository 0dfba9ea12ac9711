/// GPU synchronization primitive traits

/// GPU-side semaphore
///
/// Signaled and waited on by command batches recorded through the device;
/// never waited on by the CPU. Destroyed when dropped.
pub trait Semaphore: Send + Sync {}
