/// Top-level pipeline: per-frame instance list assembly and rebuild.
///
/// Slot resources live on the frame ring so a build for frame N never
/// touches buffers the GPU may still read for frame N-1. Buffers grow but
/// never shrink; the structure handle is recreated only when its backing
/// buffer actually grew.

use std::sync::Arc;

use glam::Mat4;

use crate::device::{
    AccelerationStructure, AccelerationStructureDesc, AccelerationStructureKind,
    BufferDesc, BufferRange, BufferUsage, BuildFlags, DeviceBuffer, GpuDevice,
    GpuInstance, Semaphore, TopLevelBuildDesc,
};
use crate::error::Result;
use crate::rt_trace;
use crate::scene::SceneDescription;

use super::blas_set::BlasSet;

/// Ring depth: how many frames of top-level resources rotate
pub const TLAS_RING_SIZE: usize = 2;

// ============================================================================
// TlasSlot
// ============================================================================

/// Per-ring-slot top-level resources
pub struct TlasSlot {
    handle: Option<Arc<dyn AccelerationStructure>>,
    storage: Option<Arc<dyn DeviceBuffer>>,
    scratch: Option<Arc<dyn DeviceBuffer>>,
    instance_upload: Option<Arc<dyn DeviceBuffer>>,
    instance_data: Option<Arc<dyn DeviceBuffer>>,
    upload_semaphore: Arc<dyn Semaphore>,
    build_semaphore: Arc<dyn Semaphore>,
    /// Whether this slot holds a structure built from a non-empty instance
    /// list this frame
    populated: bool,
}

impl TlasSlot {
    /// Semaphores are created eagerly; buffers and the handle are sized on
    /// first use.
    pub fn new(device: &dyn GpuDevice) -> Result<Self> {
        Ok(Self {
            handle: None,
            storage: None,
            scratch: None,
            instance_upload: None,
            instance_data: None,
            upload_semaphore: device.create_semaphore()?,
            build_semaphore: device.create_semaphore()?,
            populated: false,
        })
    }

    /// The slot's structure, only while it holds this frame's build
    pub fn acceleration_structure(&self) -> Option<&Arc<dyn AccelerationStructure>> {
        if self.populated {
            self.handle.as_ref()
        } else {
            None
        }
    }

    pub fn build_semaphore(&self) -> &Arc<dyn Semaphore> {
        &self.build_semaphore
    }
}

/// Grow-only buffer reuse: reallocate only when the required size exceeds
/// the current capacity. Returns true if the buffer was (re)created.
fn ensure_buffer(
    device: &dyn GpuDevice,
    slot: &mut Option<Arc<dyn DeviceBuffer>>,
    size: u64,
    usage: BufferUsage,
) -> Result<bool> {
    match slot {
        Some(buffer) if buffer.size() >= size => Ok(false),
        _ => {
            *slot = Some(device.create_buffer(&BufferDesc { size, usage })?);
            Ok(true)
        }
    }
}

// ============================================================================
// TlasBuilder
// ============================================================================

/// Rebuilds the top-level structure into a ring slot each frame
pub struct TlasBuilder {
    device: Arc<dyn GpuDevice>,
    flags: BuildFlags,
}

impl TlasBuilder {
    pub fn new(device: Arc<dyn GpuDevice>) -> Self {
        Self {
            device,
            // Rebuilt every frame, so favor build speed over trace speed
            flags: BuildFlags::PREFER_FAST_BUILD,
        }
    }

    /// Assemble the instance list from the draw list, against whatever
    /// bottom-level set is current.
    ///
    /// Draws whose mesh has no entry yet are skipped; the instance custom
    /// index carries the draw index so shaders can reach per-draw data.
    pub fn build_instances(
        &self,
        scene: &dyn SceneDescription,
        blas: &BlasSet,
    ) -> Vec<GpuInstance> {
        scene
            .draws()
            .iter()
            .filter_map(|draw| {
                blas.entry_for(draw.mesh).map(|entry| {
                    GpuInstance::new(&draw.transform, draw.draw_index, entry.handle.device_address())
                })
            })
            .collect()
    }

    /// Build the top-level structure for this frame into `slot`.
    ///
    /// An empty instance list is a valid frame: the slot is marked
    /// unpopulated and no GPU work is recorded.
    pub fn build(&self, slot: &mut TlasSlot, instances: &[GpuInstance]) -> Result<()> {
        if instances.is_empty() {
            slot.populated = false;
            return Ok(());
        }

        let instance_count = instances.len() as u32;
        let sizes = self.device.top_level_build_sizes(instance_count, self.flags)?;
        let upload_size = std::mem::size_of_val(instances) as u64;

        ensure_buffer(
            self.device.as_ref(),
            &mut slot.instance_upload,
            upload_size,
            BufferUsage::InstanceUpload,
        )?;
        ensure_buffer(
            self.device.as_ref(),
            &mut slot.instance_data,
            upload_size,
            BufferUsage::InstanceData,
        )?;
        ensure_buffer(
            self.device.as_ref(),
            &mut slot.scratch,
            sizes.build_scratch_size,
            BufferUsage::Scratch,
        )?;
        let storage_grew = ensure_buffer(
            self.device.as_ref(),
            &mut slot.storage,
            sizes.acceleration_structure_size,
            BufferUsage::AccelerationStructureStorage,
        )?;

        // The handle covers the buffer's full capacity so a smaller build
        // next frame can reuse it; recreate only when the storage grew.
        if storage_grew || slot.handle.is_none() {
            let storage = slot.storage.as_ref().ok_or_else(|| {
                crate::error::Error::InvalidResource("top-level storage missing".to_string())
            })?;
            slot.handle = Some(self.device.create_acceleration_structure(
                &AccelerationStructureDesc {
                    kind: AccelerationStructureKind::TopLevel,
                    buffer: storage,
                    range: BufferRange {
                        offset: 0,
                        size: storage.size(),
                    },
                },
            )?);
        }

        let upload = slot.instance_upload.as_ref().ok_or_else(|| {
            crate::error::Error::InvalidResource("instance upload buffer missing".to_string())
        })?;
        upload.update(0, bytemuck::cast_slice(instances))?;

        rt_trace!("astra::tlas", "Top-level build: {} instances", instance_count);

        let (destination, instance_data, scratch) = match (
            slot.handle.as_ref(),
            slot.instance_data.as_ref(),
            slot.scratch.as_ref(),
        ) {
            (Some(handle), Some(data), Some(scratch)) => (handle, data, scratch),
            _ => {
                return Err(crate::error::Error::InvalidResource(
                    "top-level slot resources missing".to_string(),
                ))
            }
        };
        self.device.build_top_level_async(&TopLevelBuildDesc {
            destination,
            instance_upload: upload,
            instance_data,
            instance_count,
            upload_size,
            scratch,
            flags: self.flags,
            upload_semaphore: &slot.upload_semaphore,
            build_semaphore: &slot.build_semaphore,
        })?;

        slot.populated = true;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tlas_tests.rs"]
mod tests;
