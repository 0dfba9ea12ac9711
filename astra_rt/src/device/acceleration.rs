/// Acceleration-structure types: handles, build descriptors, instance records

use std::sync::Arc;
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use super::buffer::{BufferRange, DeviceBuffer};

/// Which level of the two-level index a structure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelerationStructureKind {
    /// Per-mesh structure built from triangle geometry
    BottomLevel,
    /// Scene-wide structure built from an instance array
    TopLevel,
}

bitflags! {
    /// Build preference flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BuildFlags: u32 {
        const PREFER_FAST_TRACE = 1 << 0;
        const PREFER_FAST_BUILD = 1 << 1;
        const ALLOW_COMPACTION  = 1 << 2;
        const LOW_MEMORY        = 1 << 3;
    }
}

/// Descriptor for creating an acceleration structure inside a buffer slice
///
/// Unlike ordinary buffer bindings, `range.offset` must be a multiple of
/// [`super::GpuDevice::acceleration_structure_offset_alignment`].
pub struct AccelerationStructureDesc<'a> {
    pub kind: AccelerationStructureKind,
    pub buffer: &'a Arc<dyn DeviceBuffer>,
    pub range: BufferRange,
}

/// Opaque acceleration-structure handle
///
/// Bound to a fixed buffer backing at creation; destroyed when dropped.
pub trait AccelerationStructure: Send + Sync {
    fn kind(&self) -> AccelerationStructureKind;

    /// GPU virtual address used to reference this structure from instances
    /// or trace calls
    fn device_address(&self) -> u64;
}

/// Size requirements reported by a build-size query
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildSizes {
    /// Bytes of backing storage the built structure needs
    pub acceleration_structure_size: u64,
    /// Bytes of scratch memory the build itself needs
    pub build_scratch_size: u64,
}

/// Index element type of a triangle mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    U16,
    U32,
}

/// Triangle-geometry view for one mesh, handed over by the scene collaborator.
///
/// The vertex and index buffers are owned by the external asset store;
/// this view only keeps them alive for the duration of a build.
#[derive(Clone)]
pub struct MeshGeometry {
    pub vertex_buffer: Arc<dyn DeviceBuffer>,
    pub vertex_count: u32,
    pub vertex_stride: u64,
    pub index_buffer: Arc<dyn DeviceBuffer>,
    pub index_count: u32,
    pub index_type: IndexType,
    /// Skip any-hit shading for this geometry
    pub opaque: bool,
}

impl MeshGeometry {
    /// Number of triangles described by the index buffer
    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }
}

/// One entry of a synchronous bottom-level build batch
pub struct BottomLevelBuild<'a> {
    pub geometry: &'a MeshGeometry,
    pub destination: &'a Arc<dyn AccelerationStructure>,
    pub scratch: &'a Arc<dyn DeviceBuffer>,
    pub scratch_offset: u64,
    pub flags: BuildFlags,
}

/// Compaction copy from a built structure into its smaller destination
pub struct CompactionCopy<'a> {
    pub source: &'a Arc<dyn AccelerationStructure>,
    pub destination: &'a Arc<dyn AccelerationStructure>,
}

/// GPU instance record, 64 bytes, matching the layout the top-level build
/// consumes (VkAccelerationStructureInstanceKHR on Vulkan).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuInstance {
    /// Row-major affine 3x4 transform
    pub transform: [f32; 12],
    /// instanceCustomIndex (low 24 bits) | visibility mask (high 8 bits)
    pub custom_index_and_mask: u32,
    /// SBT record offset (low 24 bits) | instance flags (high 8 bits)
    pub sbt_offset_and_flags: u32,
    /// Device address of the referenced bottom-level structure
    pub blas_address: u64,
}

impl GpuInstance {
    /// All geometry visible to every ray mask
    pub const FULL_MASK: u32 = 0xFF;

    /// Pack one instance record
    ///
    /// # Arguments
    ///
    /// * `transform` - World transform (column-major Mat4; the stored form
    ///   is the row-major 3x4 affine part)
    /// * `custom_index` - Caller-visible index recovered by shaders to look
    ///   up per-draw data (24 bits)
    /// * `blas_address` - Device address of the bottom-level structure
    pub fn new(transform: &Mat4, custom_index: u32, blas_address: u64) -> Self {
        let transposed = transform.transpose().to_cols_array();
        let mut rows = [0.0f32; 12];
        rows.copy_from_slice(&transposed[..12]);

        Self {
            transform: rows,
            custom_index_and_mask: (custom_index & 0x00FF_FFFF) | (Self::FULL_MASK << 24),
            sbt_offset_and_flags: 0,
            blas_address,
        }
    }

    /// The caller-visible custom index
    pub fn custom_index(&self) -> u32 {
        self.custom_index_and_mask & 0x00FF_FFFF
    }
}
