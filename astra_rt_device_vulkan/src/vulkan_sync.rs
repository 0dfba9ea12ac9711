/// VulkanSemaphore - Vulkan implementation of the Semaphore trait

use astra_rt::device::Semaphore;
use ash::vk;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;

/// Binary semaphore signaled and waited on by device submissions
pub struct VulkanSemaphore {
    ctx: Arc<GpuContext>,
    pub(crate) semaphore: vk::Semaphore,
}

impl VulkanSemaphore {
    pub(crate) fn new(ctx: Arc<GpuContext>, semaphore: vk::Semaphore) -> Self {
        Self { ctx, semaphore }
    }

    /// Raw handle for renderers that wait on the top-level build
    pub fn raw(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Semaphore for VulkanSemaphore {}

impl Drop for VulkanSemaphore {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_semaphore(self.semaphore, None);
        }
    }
}
