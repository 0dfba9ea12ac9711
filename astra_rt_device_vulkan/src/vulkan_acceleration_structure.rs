/// VulkanAccelerationStructure - Vulkan implementation of the
/// AccelerationStructure trait

use astra_rt::device::{AccelerationStructure, AccelerationStructureKind, DeviceBuffer};
use ash::vk;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;

/// Vulkan acceleration structure implementation
///
/// Holds a reference to its backing buffer so the VkBuffer outlives the
/// structure regardless of what the caller drops first.
pub struct VulkanAccelerationStructure {
    ctx: Arc<GpuContext>,
    pub(crate) handle: vk::AccelerationStructureKHR,
    kind: AccelerationStructureKind,
    /// Device address, queried once at creation
    device_address: u64,
    /// Backing storage keep-alive
    _storage: Arc<dyn DeviceBuffer>,
}

impl VulkanAccelerationStructure {
    pub(crate) fn new(
        ctx: Arc<GpuContext>,
        handle: vk::AccelerationStructureKHR,
        kind: AccelerationStructureKind,
        device_address: u64,
        storage: Arc<dyn DeviceBuffer>,
    ) -> Self {
        Self {
            ctx,
            handle,
            kind,
            device_address,
            _storage: storage,
        }
    }
}

impl AccelerationStructure for VulkanAccelerationStructure {
    fn kind(&self) -> AccelerationStructureKind {
        self.kind
    }

    fn device_address(&self) -> u64 {
        self.device_address
    }
}

impl Drop for VulkanAccelerationStructure {
    fn drop(&mut self) {
        unsafe {
            self.ctx
                .accel_loader
                .destroy_acceleration_structure(self.handle, None);
        }
    }
}
