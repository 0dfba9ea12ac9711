/// GpuDevice trait - factory and command interface for GPU resources
///
/// This is the central seam between the acceleration-structure manager and
/// the GPU backend. It is always passed explicitly (never global state), so
/// the manager stays instantiable and testable against a mock device.

use std::sync::Arc;

use crate::error::Result;
use super::buffer::{BufferDesc, DeviceBuffer};
use super::sync::Semaphore;
use super::acceleration::{
    AccelerationStructure, AccelerationStructureDesc,
    BottomLevelBuild, BuildFlags, BuildSizes, CompactionCopy, MeshGeometry,
};

/// Descriptor for one asynchronous top-level build
///
/// The device records two ordered command batches: an instance copy on the
/// transfer queue that signals `upload_semaphore`, and a build on the compute
/// queue that waits on it and signals `build_semaphore` when the structure is
/// ready to trace against. Neither batch is waited on by the CPU.
pub struct TopLevelBuildDesc<'a> {
    pub destination: &'a Arc<dyn AccelerationStructure>,
    /// Host-visible source holding the packed instance records
    pub instance_upload: &'a Arc<dyn DeviceBuffer>,
    /// Device-local destination the build reads instances from
    pub instance_data: &'a Arc<dyn DeviceBuffer>,
    pub instance_count: u32,
    /// Bytes of instance data to copy
    pub upload_size: u64,
    pub scratch: &'a Arc<dyn DeviceBuffer>,
    pub flags: BuildFlags,
    pub upload_semaphore: &'a Arc<dyn Semaphore>,
    pub build_semaphore: &'a Arc<dyn Semaphore>,
}

/// GPU device trait
///
/// Implemented by backend-specific devices (e.g., VulkanDevice) and by the
/// MockDevice used in unit tests. All returned resources are RAII: dropping
/// the last Arc destroys the underlying GPU object.
pub trait GpuDevice: Send + Sync {
    /// Create a buffer
    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn DeviceBuffer>>;

    /// Create an acceleration structure inside a buffer slice
    fn create_acceleration_structure(
        &self,
        desc: &AccelerationStructureDesc,
    ) -> Result<Arc<dyn AccelerationStructure>>;

    /// Create a GPU-side semaphore
    fn create_semaphore(&self) -> Result<Arc<dyn Semaphore>>;

    /// Query size requirements for building one bottom-level structure
    fn bottom_level_build_sizes(
        &self,
        geometry: &MeshGeometry,
        flags: BuildFlags,
    ) -> Result<BuildSizes>;

    /// Query size requirements for building a top-level structure over
    /// `instance_count` instances
    fn top_level_build_sizes(
        &self,
        instance_count: u32,
        flags: BuildFlags,
    ) -> Result<BuildSizes>;

    /// Build a batch of bottom-level structures synchronously
    ///
    /// Records one command batch building every entry plus a compacted-size
    /// query per entry, submits it to the compute queue, and waits for the
    /// fence CPU-side. Returns the compacted sizes in entry order.
    ///
    /// This is the one legitimate CPU wait in the system: the caller must
    /// read the compacted sizes back before it can allocate the compacted
    /// storage. It only ever runs inside the background rebuild task.
    fn build_bottom_level_sync(&self, builds: &[BottomLevelBuild]) -> Result<Vec<u64>>;

    /// Record one compaction copy per entry, submit, and wait
    ///
    /// After this returns the sources are no longer referenced by the GPU
    /// and the caller may free the uncompacted storage.
    fn compact_bottom_level_sync(&self, copies: &[CompactionCopy]) -> Result<()>;

    /// Build a top-level structure asynchronously (no CPU wait)
    fn build_top_level_async(&self, desc: &TopLevelBuildDesc) -> Result<()>;

    /// Required storage-offset alignment for acceleration structures
    ///
    /// Unlike ordinary buffer bindings, a structure's offset inside its
    /// backing buffer must be a multiple of this (256 on Vulkan).
    fn acceleration_structure_offset_alignment(&self) -> u64;

    /// Required offset alignment for build scratch memory
    fn scratch_offset_alignment(&self) -> u64;
}
