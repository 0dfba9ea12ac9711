/// Acceleration structure management: background bottom-level rebuilds,
/// per-frame top-level builds, and deferred resource retirement.

pub mod blas_set;
pub mod deletion_queue;
pub mod manager;
pub mod tlas;

pub use blas_set::{BlasEntry, BlasSet, BlasSetBuilder};
pub use deletion_queue::DeletionQueue;
pub use manager::AccelerationStructureManager;
pub use tlas::{TlasBuilder, TlasSlot, TLAS_RING_SIZE};
