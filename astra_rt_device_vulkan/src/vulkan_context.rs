/// GpuContext - Shared GPU resources for all Vulkan objects
///
/// Contains everything a resource needs after creation:
/// - Device for Vulkan API calls
/// - Allocator for memory management
/// - Queues for command submission
/// - Acceleration structure extension loader

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

/// Shared GPU context for all Vulkan resources.
///
/// This struct is shared (via `Arc`) by all GPU resources (buffers,
/// acceleration structures, semaphores) to avoid duplicating device and
/// allocator references in each resource.
///
/// Note: Device and instance destruction is handled by VulkanDevice::drop()
/// to avoid issues with drop ordering.
pub struct GpuContext {
    /// Vulkan logical device
    pub device: ash::Device,

    /// GPU memory allocator (shared, requires mutex for thread safety)
    /// Wrapped in ManuallyDrop to ensure it's dropped BEFORE the device is destroyed
    pub allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,

    /// VK_KHR_acceleration_structure function loader
    pub accel_loader: ash::khr::acceleration_structure::Device,

    /// Compute queue, used for build and compaction submissions
    pub compute_queue: vk::Queue,
    pub compute_queue_family: u32,

    /// Transfer queue for instance uploads (may equal the compute queue)
    pub transfer_queue: vk::Queue,
    pub transfer_queue_family: u32,

    /// Command pool for one-shot compute submissions (build, compact).
    /// Behind a mutex: background build tasks allocate from it off-thread.
    pub compute_command_pool: Mutex<vk::CommandPool>,

    /// Command pool for transfer submissions
    pub transfer_command_pool: Mutex<vk::CommandPool>,

    /// Vulkan instance (kept for reference, destroyed by VulkanDevice)
    #[allow(dead_code)]
    instance: ash::Instance,

    /// Debug utils loader (for validation layers)
    #[cfg(feature = "vulkan-validation")]
    pub(crate) debug_utils_loader: Option<ash::ext::debug_utils::Instance>,

    /// Debug messenger handle
    #[cfg(feature = "vulkan-validation")]
    pub(crate) debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl GpuContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: ash::Device,
        allocator: Arc<Mutex<Allocator>>,
        accel_loader: ash::khr::acceleration_structure::Device,
        compute_queue: vk::Queue,
        compute_queue_family: u32,
        transfer_queue: vk::Queue,
        transfer_queue_family: u32,
        compute_command_pool: vk::CommandPool,
        transfer_command_pool: vk::CommandPool,
        instance: ash::Instance,
        #[cfg(feature = "vulkan-validation")]
        debug_utils_loader: Option<ash::ext::debug_utils::Instance>,
        #[cfg(feature = "vulkan-validation")]
        debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    ) -> Self {
        Self {
            device,
            allocator: ManuallyDrop::new(allocator),
            accel_loader,
            compute_queue,
            compute_queue_family,
            transfer_queue,
            transfer_queue_family,
            compute_command_pool: Mutex::new(compute_command_pool),
            transfer_command_pool: Mutex::new(transfer_command_pool),
            instance,
            #[cfg(feature = "vulkan-validation")]
            debug_utils_loader,
            #[cfg(feature = "vulkan-validation")]
            debug_messenger,
        }
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        // NOTE: Device and instance destruction is handled by
        // VulkanDevice::drop() to avoid issues with drop ordering.
        // This Drop impl intentionally does nothing.
    }
}
