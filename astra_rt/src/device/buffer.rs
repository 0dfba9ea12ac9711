/// Buffer trait and buffer descriptor

use crate::error::Result;

/// Buffer usage classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// Backing storage for acceleration structures (device-local)
    AccelerationStructureStorage,
    /// Build scratch memory (device-local)
    Scratch,
    /// Host-visible staging area for instance records
    InstanceUpload,
    /// Device-local instance records consumed by the top-level build
    InstanceData,
    /// Vertex/index source geometry, writable by asset loaders
    Geometry,
}

/// Descriptor for creating a buffer
#[derive(Debug, Clone)]
pub struct BufferDesc {
    /// Size in bytes
    pub size: u64,
    /// Buffer usage
    pub usage: BufferUsage,
}

/// A sub-range ("slice") of a device buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRange {
    /// Offset from the start of the buffer, in bytes
    pub offset: u64,
    /// Size in bytes
    pub size: u64,
}

impl BufferRange {
    /// End of the range (offset + size)
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Whether this range overlaps another
    pub fn overlaps(&self, other: &BufferRange) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// Device buffer trait
///
/// Implemented by backend-specific buffer types (e.g., VulkanBuffer).
/// The buffer is automatically destroyed when dropped.
pub trait DeviceBuffer: Send + Sync {
    /// Buffer size in bytes
    fn size(&self) -> u64;

    /// Write data into the buffer
    ///
    /// Only valid for host-visible buffers (InstanceUpload).
    ///
    /// # Arguments
    ///
    /// * `offset` - Offset into the buffer in bytes
    /// * `data` - Data to write
    fn update(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// GPU virtual address of the start of the buffer
    fn device_address(&self) -> u64;
}
