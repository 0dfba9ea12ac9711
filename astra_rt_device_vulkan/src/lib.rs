/*!
# Astra RT - Vulkan Device Backend

Vulkan implementation of the Astra RT device traits.

This crate provides a headless Vulkan backend implementing the astra_rt
GpuDevice trait using the Ash library for Vulkan bindings and gpu-allocator
for memory management. Acceleration structures are built through
VK_KHR_acceleration_structure; no surface or swapchain is created.
*/

// Vulkan implementation modules
mod vulkan_context;
mod vulkan_buffer;
mod vulkan_acceleration_structure;
mod vulkan_sync;
mod vulkan_device;

#[cfg(feature = "vulkan-validation")]
mod vulkan_debug;

pub use vulkan_device::{DeviceConfig, VulkanDevice};
pub use vulkan_buffer::VulkanBuffer;
pub use vulkan_acceleration_structure::VulkanAccelerationStructure;
pub use vulkan_sync::VulkanSemaphore;
