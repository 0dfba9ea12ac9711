/// VulkanDevice - headless Vulkan implementation of the GpuDevice trait
///
/// No surface or swapchain is created: the device opens a compute queue for
/// acceleration structure builds and a transfer queue for instance uploads.
/// Synchronous build paths submit and wait on a transient fence; the
/// asynchronous top-level path runs on a two-slot submit ring so a recording
/// never touches command buffers the GPU may still read.

use astra_rt::astra::{Error, Result};
use astra_rt::device::{
    AccelerationStructure, AccelerationStructureDesc, AccelerationStructureKind,
    BottomLevelBuild, BufferDesc, BufferUsage, BuildFlags, BuildSizes,
    CompactionCopy, DeviceBuffer, GpuDevice, IndexType, MeshGeometry, Semaphore,
    TopLevelBuildDesc,
};
use astra_rt::{rt_debug, rt_err, rt_error, rt_info};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::vulkan_acceleration_structure::VulkanAccelerationStructure;
use crate::vulkan_buffer::VulkanBuffer;
use crate::vulkan_context::GpuContext;
use crate::vulkan_sync::VulkanSemaphore;

/// Structure offsets inside a backing buffer must be multiples of this
/// (fixed by the Vulkan specification)
const ACCELERATION_STRUCTURE_OFFSET_ALIGNMENT: u64 = 256;

/// Submit slots for the asynchronous top-level path
const TOP_LEVEL_SUBMITS_IN_FLIGHT: usize = 2;

/// Device configuration
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Enable the Khronos validation layer and debug messenger
    /// (only honored when the `vulkan-validation` feature is compiled in)
    pub enable_validation: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
        }
    }
}

/// Per-slot resources of the top-level submit ring
struct SubmitSlot {
    fence: vk::Fence,
    transfer_cmd: vk::CommandBuffer,
    compute_cmd: vk::CommandBuffer,
}

/// Vulkan device implementation
///
/// Central object for creating resources and submitting acceleration
/// structure work. Thread-safe: build submissions lock the relevant command
/// pool, so the background rebuild task and the frame thread can both talk
/// to it.
pub struct VulkanDevice {
    /// Vulkan entry (keeps the loader alive)
    _entry: ash::Entry,
    /// Vulkan instance (destroyed in Drop)
    _instance: ash::Instance,
    #[allow(dead_code)]
    physical_device: vk::PhysicalDevice,
    /// Logical device reference (stored in GpuContext, kept here for convenience)
    device: ash::Device,

    /// GPU memory allocator reference (stored in GpuContext)
    allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,

    /// Minimum scratch offset alignment reported by the driver
    scratch_alignment: u64,

    /// Submit ring for build_top_level_async. Each slot carries its own
    /// mutex so waiting out one slot's fence never blocks a caller that
    /// landed on the other slot.
    top_level_slots: Vec<Mutex<SubmitSlot>>,
    current_slot: AtomicUsize,

    /// Shared GPU context for all resources (buffers, structures, semaphores).
    /// Owns nothing itself; device and instance destruction happens here.
    ctx: Arc<GpuContext>,
}

// ============================================================================
// Trait-object downcasts
// ============================================================================

// Resources handed to this device were created by this device, so the
// concrete types behind the trait objects are known.

fn vk_buffer(buffer: &dyn DeviceBuffer) -> &VulkanBuffer {
    unsafe { &*(buffer as *const dyn DeviceBuffer as *const VulkanBuffer) }
}

fn vk_structure(structure: &dyn AccelerationStructure) -> &VulkanAccelerationStructure {
    unsafe {
        &*(structure as *const dyn AccelerationStructure as *const VulkanAccelerationStructure)
    }
}

fn vk_semaphore(semaphore: &dyn Semaphore) -> &VulkanSemaphore {
    unsafe { &*(semaphore as *const dyn Semaphore as *const VulkanSemaphore) }
}

// ============================================================================
// Enum conversions
// ============================================================================

fn build_flags_to_vk(flags: BuildFlags) -> vk::BuildAccelerationStructureFlagsKHR {
    let mut vk_flags = vk::BuildAccelerationStructureFlagsKHR::empty();
    if flags.contains(BuildFlags::PREFER_FAST_TRACE) {
        vk_flags |= vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE;
    }
    if flags.contains(BuildFlags::PREFER_FAST_BUILD) {
        vk_flags |= vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD;
    }
    if flags.contains(BuildFlags::ALLOW_COMPACTION) {
        vk_flags |= vk::BuildAccelerationStructureFlagsKHR::ALLOW_COMPACTION;
    }
    if flags.contains(BuildFlags::LOW_MEMORY) {
        vk_flags |= vk::BuildAccelerationStructureFlagsKHR::LOW_MEMORY;
    }
    vk_flags
}

fn index_type_to_vk(index_type: IndexType) -> vk::IndexType {
    match index_type {
        IndexType::U16 => vk::IndexType::UINT16,
        IndexType::U32 => vk::IndexType::UINT32,
    }
}

fn kind_to_vk(kind: AccelerationStructureKind) -> vk::AccelerationStructureTypeKHR {
    match kind {
        AccelerationStructureKind::BottomLevel => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
        AccelerationStructureKind::TopLevel => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
    }
}

/// Families a buffer must be shared across with CONCURRENT sharing mode,
/// or None for EXCLUSIVE.
///
/// Instance data is written by a transfer-queue copy and read by the
/// compute-queue build with only a semaphore between the submits. With a
/// dedicated transfer family an EXCLUSIVE buffer's contents are undefined
/// across the family switch unless ownership is transferred, so these
/// buffers are shared concurrently instead.
fn concurrent_queue_families(
    usage: BufferUsage,
    compute_family: u32,
    transfer_family: u32,
) -> Option<[u32; 2]> {
    match usage {
        BufferUsage::InstanceData if compute_family != transfer_family => {
            Some([compute_family, transfer_family])
        }
        _ => None,
    }
}

/// Allocation alignment for a buffer usage class.
///
/// Scratch device addresses are handed to build commands raw, so the base
/// allocation must already satisfy the driver's scratch offset alignment.
/// The buffer memory requirements alone only guarantee storage-buffer
/// alignment, which can be smaller.
fn buffer_allocation_alignment(usage: BufferUsage, base: u64, scratch_alignment: u64) -> u64 {
    match usage {
        BufferUsage::Scratch => base.max(scratch_alignment),
        _ => base,
    }
}

/// Vulkan usage flags and memory location for a buffer usage class
fn buffer_usage_to_vk(usage: BufferUsage) -> (vk::BufferUsageFlags, MemoryLocation) {
    match usage {
        BufferUsage::AccelerationStructureStorage => (
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
        ),
        BufferUsage::Scratch => (
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
        ),
        BufferUsage::InstanceUpload => {
            (vk::BufferUsageFlags::TRANSFER_SRC, MemoryLocation::CpuToGpu)
        }
        BufferUsage::InstanceData => (
            vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
        ),
        // Host-visible so asset loaders can write vertex and index data
        // directly through DeviceBuffer::update
        BufferUsage::Geometry => (
            vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::INDEX_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::CpuToGpu,
        ),
    }
}

impl VulkanDevice {
    /// Create a new headless Vulkan device
    pub fn new(config: DeviceConfig) -> Result<Self> {
        unsafe {
            // Create Vulkan Entry
            let entry = ash::Entry::load().map_err(|e| {
                rt_error!("astra::vulkan", "Failed to load Vulkan library: {:?}", e);
                Error::InitializationFailed(format!("Failed to load Vulkan library: {:?}", e))
            })?;

            // Application Info
            let app_info = vk::ApplicationInfo::default()
                .application_name(c"AstraRT Application")
                .application_version(vk::make_api_version(0, 1, 0, 0))
                .engine_name(c"AstraRT")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_3);

            #[allow(unused_mut)]
            let mut extension_names: Vec<*const std::os::raw::c_char> = Vec::new();
            #[allow(unused_mut)]
            let mut layer_names: Vec<*const std::os::raw::c_char> = Vec::new();

            #[cfg(feature = "vulkan-validation")]
            if config.enable_validation {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
                layer_names.push(c"VK_LAYER_KHRONOS_validation".as_ptr());
            }

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);

            let instance = entry.create_instance(&create_info, None).map_err(|e| {
                rt_error!("astra::vulkan", "Failed to create Vulkan instance: {:?}", e);
                Error::InitializationFailed(format!("Failed to create instance: {:?}", e))
            })?;

            // Setup debug messenger if validation is enabled
            #[cfg(feature = "vulkan-validation")]
            let (debug_utils_loader, debug_messenger) = if config.enable_validation {
                let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);

                let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                    .message_severity(
                        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                    )
                    .message_type(
                        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                    )
                    .pfn_user_callback(Some(crate::vulkan_debug::vulkan_debug_callback));

                let messenger = debug_utils
                    .create_debug_utils_messenger(&debug_info, None)
                    .map_err(|e| {
                        rt_error!("astra::vulkan", "Failed to create debug messenger: {:?}", e);
                        Error::InitializationFailed(format!(
                            "Failed to create debug messenger: {:?}",
                            e
                        ))
                    })?;

                (Some(debug_utils), Some(messenger))
            } else {
                (None, None)
            };

            #[cfg(not(feature = "vulkan-validation"))]
            let _ = &config;

            // Pick the first physical device carrying the ray tracing extensions
            let physical_devices = instance.enumerate_physical_devices().map_err(|e| {
                rt_error!("astra::vulkan", "Failed to enumerate physical devices: {:?}", e);
                Error::InitializationFailed(format!(
                    "Failed to enumerate physical devices: {:?}",
                    e
                ))
            })?;

            let physical_device = physical_devices
                .into_iter()
                .find(|&candidate| Self::supports_acceleration_structures(&instance, candidate))
                .ok_or_else(|| {
                    rt_error!(
                        "astra::vulkan",
                        "No GPU with VK_KHR_acceleration_structure support found"
                    );
                    Error::InitializationFailed(
                        "No GPU with VK_KHR_acceleration_structure support found".to_string(),
                    )
                })?;

            // Query scratch alignment from the acceleration structure properties
            let mut accel_properties =
                vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
            let mut properties2 =
                vk::PhysicalDeviceProperties2::default().push_next(&mut accel_properties);
            instance.get_physical_device_properties2(physical_device, &mut properties2);
            let scratch_alignment =
                accel_properties.min_acceleration_structure_scratch_offset_alignment as u64;

            // Find Queue Families
            let queue_families =
                instance.get_physical_device_queue_family_properties(physical_device);

            let compute_family = queue_families
                .iter()
                .enumerate()
                .find(|(_, qf)| qf.queue_flags.contains(vk::QueueFlags::COMPUTE))
                .map(|(i, _)| i as u32)
                .ok_or_else(|| {
                    rt_error!("astra::vulkan", "No compute queue family found");
                    Error::InitializationFailed("No compute queue family found".to_string())
                })?;

            // Dedicated transfer family when available, otherwise share compute
            let transfer_family = queue_families
                .iter()
                .enumerate()
                .find(|(_, qf)| {
                    qf.queue_flags.contains(vk::QueueFlags::TRANSFER)
                        && !qf.queue_flags.contains(vk::QueueFlags::COMPUTE)
                        && !qf.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                })
                .map(|(i, _)| i as u32)
                .unwrap_or(compute_family);

            // Create Logical Device
            let queue_priorities = [1.0];
            let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> =
                if compute_family == transfer_family {
                    vec![vk::DeviceQueueCreateInfo::default()
                        .queue_family_index(compute_family)
                        .queue_priorities(&queue_priorities)]
                } else {
                    vec![
                        vk::DeviceQueueCreateInfo::default()
                            .queue_family_index(compute_family)
                            .queue_priorities(&queue_priorities),
                        vk::DeviceQueueCreateInfo::default()
                            .queue_family_index(transfer_family)
                            .queue_priorities(&queue_priorities),
                    ]
                };

            let device_extension_names = vec![
                ash::khr::acceleration_structure::NAME.as_ptr(),
                ash::khr::deferred_host_operations::NAME.as_ptr(),
                ash::khr::ray_query::NAME.as_ptr(),
            ];

            let mut features12 =
                vk::PhysicalDeviceVulkan12Features::default().buffer_device_address(true);
            let mut accel_features = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default()
                .acceleration_structure(true);
            let mut ray_query_features =
                vk::PhysicalDeviceRayQueryFeaturesKHR::default().ray_query(true);

            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&device_extension_names)
                .push_next(&mut features12)
                .push_next(&mut accel_features)
                .push_next(&mut ray_query_features);

            let device = instance
                .create_device(physical_device, &device_create_info, None)
                .map_err(|e| {
                    rt_error!("astra::vulkan", "Failed to create logical device: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create device: {:?}", e))
                })?;

            let compute_queue = device.get_device_queue(compute_family, 0);
            let transfer_queue = device.get_device_queue(transfer_family, 0);

            // Create GPU allocator (device addresses are required for builds)
            let allocator = Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: true,
                allocation_sizes: Default::default(),
            })
            .map_err(|e| {
                rt_error!("astra::vulkan", "Failed to create GPU allocator: {:?}", e);
                Error::InitializationFailed(format!("Failed to create allocator: {:?}", e))
            })?;

            // Command pools (TRANSIENT + RESET for reusable one-shot batches)
            let compute_pool = Self::create_command_pool(&device, compute_family)?;
            let transfer_pool = Self::create_command_pool(&device, transfer_family)?;

            // Submit ring for the asynchronous top-level path
            let mut top_level_slots = Vec::with_capacity(TOP_LEVEL_SUBMITS_IN_FLIGHT);
            let fence_create_info =
                vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
            for _ in 0..TOP_LEVEL_SUBMITS_IN_FLIGHT {
                let fence = device.create_fence(&fence_create_info, None).map_err(|e| {
                    rt_error!("astra::vulkan", "Failed to create submit fence: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create fence: {:?}", e))
                })?;
                let transfer_cmd = Self::allocate_command_buffer(&device, transfer_pool)?;
                let compute_cmd = Self::allocate_command_buffer(&device, compute_pool)?;
                top_level_slots.push(Mutex::new(SubmitSlot {
                    fence,
                    transfer_cmd,
                    compute_cmd,
                }));
            }

            let accel_loader = ash::khr::acceleration_structure::Device::new(&instance, &device);

            let allocator_arc = Arc::new(Mutex::new(allocator));
            let ctx = Arc::new(GpuContext::new(
                device.clone(),
                Arc::clone(&allocator_arc),
                accel_loader,
                compute_queue,
                compute_family,
                transfer_queue,
                transfer_family,
                compute_pool,
                transfer_pool,
                instance.clone(),
                #[cfg(feature = "vulkan-validation")]
                debug_utils_loader,
                #[cfg(feature = "vulkan-validation")]
                debug_messenger,
            ));

            rt_info!(
                "astra::vulkan",
                "Vulkan device ready (compute family {}, transfer family {}, scratch alignment {})",
                compute_family,
                transfer_family,
                scratch_alignment
            );

            Ok(Self {
                _entry: entry,
                _instance: instance,
                physical_device,
                device,
                allocator: ManuallyDrop::new(allocator_arc),
                scratch_alignment,
                top_level_slots,
                current_slot: AtomicUsize::new(0),
                ctx,
            })
        }
    }

    fn supports_acceleration_structures(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> bool {
        let extensions = unsafe {
            match instance.enumerate_device_extension_properties(physical_device) {
                Ok(extensions) => extensions,
                Err(_) => return false,
            }
        };
        let has = |name: &std::ffi::CStr| {
            extensions.iter().any(|ext| {
                ext.extension_name_as_c_str()
                    .map(|ext_name| ext_name == name)
                    .unwrap_or(false)
            })
        };
        has(ash::khr::acceleration_structure::NAME)
            && has(ash::khr::deferred_host_operations::NAME)
            && has(ash::khr::ray_query::NAME)
    }

    fn create_command_pool(device: &ash::Device, family: u32) -> Result<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(family)
            .flags(
                vk::CommandPoolCreateFlags::TRANSIENT
                    | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            );
        unsafe {
            device.create_command_pool(&info, None).map_err(|e| {
                rt_error!("astra::vulkan", "Failed to create command pool: {:?}", e);
                Error::InitializationFailed(format!("Failed to create command pool: {:?}", e))
            })
        }
    }

    fn allocate_command_buffer(
        device: &ash::Device,
        pool: vk::CommandPool,
    ) -> Result<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        unsafe {
            device
                .allocate_command_buffers(&info)
                .map(|buffers| buffers[0])
                .map_err(|e| {
                    rt_error!("astra::vulkan", "Failed to allocate command buffer: {:?}", e);
                    Error::InitializationFailed(format!(
                        "Failed to allocate command buffer: {:?}",
                        e
                    ))
                })
        }
    }

    /// One-shot command batch on the compute queue with a CPU wait.
    ///
    /// Used only by the synchronous bottom-level paths, which run inside the
    /// background rebuild task.
    fn submit_compute_and_wait<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        unsafe {
            let pool = self.ctx.compute_command_pool.lock().unwrap();
            let cmd = Self::allocate_command_buffer(&self.device, *pool)?;

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(|e| rt_err!("astra::vulkan", "Failed to begin command buffer: {:?}", e))?;

            record(cmd)?;

            self.device
                .end_command_buffer(cmd)
                .map_err(|e| rt_err!("astra::vulkan", "Failed to end command buffer: {:?}", e))?;

            let fence = self
                .device
                .create_fence(&vk::FenceCreateInfo::default(), None)
                .map_err(|e| rt_err!("astra::vulkan", "Failed to create fence: {:?}", e))?;

            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
            let submit_result = self
                .device
                .queue_submit(self.ctx.compute_queue, &[submit_info], fence)
                .map_err(|e| rt_err!("astra::vulkan", "Failed to submit to compute queue: {:?}", e));

            let wait_result = submit_result.and_then(|_| {
                self.device
                    .wait_for_fences(&[fence], true, u64::MAX)
                    .map_err(|e| rt_err!("astra::vulkan", "Failed to wait for fence: {:?}", e))
            });

            self.device.destroy_fence(fence, None);
            self.device.free_command_buffers(*pool, &command_buffers);
            wait_result
        }
    }

    /// Triangles geometry description plus primitive count for one mesh
    fn triangles_geometry(
        geometry: &MeshGeometry,
    ) -> (vk::AccelerationStructureGeometryKHR<'static>, u32) {
        let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
            .vertex_format(vk::Format::R32G32B32_SFLOAT)
            .vertex_data(vk::DeviceOrHostAddressConstKHR {
                device_address: geometry.vertex_buffer.device_address(),
            })
            .vertex_stride(geometry.vertex_stride)
            .max_vertex(geometry.vertex_count.saturating_sub(1))
            .index_type(index_type_to_vk(geometry.index_type))
            .index_data(vk::DeviceOrHostAddressConstKHR {
                device_address: geometry.index_buffer.device_address(),
            });

        let flags = if geometry.opaque {
            vk::GeometryFlagsKHR::OPAQUE
        } else {
            vk::GeometryFlagsKHR::empty()
        };

        let vk_geometry = vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
            .flags(flags);

        (vk_geometry, geometry.triangle_count())
    }

    /// Instances geometry description for a top-level build
    fn instances_geometry(
        instance_data_address: u64,
    ) -> vk::AccelerationStructureGeometryKHR<'static> {
        let instances = vk::AccelerationStructureGeometryInstancesDataKHR::default()
            .array_of_pointers(false)
            .data(vk::DeviceOrHostAddressConstKHR {
                device_address: instance_data_address,
            });

        vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { instances })
    }
}

impl GpuDevice for VulkanDevice {
    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn DeviceBuffer>> {
        unsafe {
            let (usage_flags, location) = buffer_usage_to_vk(desc.usage);
            let shared_families = concurrent_queue_families(
                desc.usage,
                self.ctx.compute_queue_family,
                self.ctx.transfer_queue_family,
            );

            let mut buffer_info = vk::BufferCreateInfo::default()
                .size(desc.size)
                .usage(usage_flags)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            if let Some(families) = &shared_families {
                buffer_info = buffer_info
                    .sharing_mode(vk::SharingMode::CONCURRENT)
                    .queue_family_indices(families);
            }

            let buffer = self
                .device
                .create_buffer(&buffer_info, None)
                .map_err(|e| rt_err!("astra::vulkan", "Failed to create buffer: {:?}", e))?;

            let mut requirements = self.device.get_buffer_memory_requirements(buffer);
            requirements.alignment = buffer_allocation_alignment(
                desc.usage,
                requirements.alignment,
                self.scratch_alignment,
            );

            let allocation: Allocation = match self.allocator.lock().unwrap().allocate(
                &AllocationCreateDesc {
                    name: "astra_rt buffer",
                    requirements,
                    location,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                },
            ) {
                Ok(allocation) => allocation,
                Err(e) => {
                    self.device.destroy_buffer(buffer, None);
                    rt_error!("astra::vulkan", "Buffer allocation failed: {:?}", e);
                    return Err(Error::OutOfMemory);
                }
            };

            if let Err(e) =
                self.device
                    .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
            {
                self.allocator.lock().unwrap().free(allocation).ok();
                self.device.destroy_buffer(buffer, None);
                return Err(rt_err!("astra::vulkan", "Failed to bind buffer memory: {:?}", e));
            }

            // Host-visible staging buffers carry no device address
            let device_address = if usage_flags.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
            {
                let address_info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
                self.device.get_buffer_device_address(&address_info)
            } else {
                0
            };

            Ok(Arc::new(VulkanBuffer::new(
                Arc::clone(&self.ctx),
                buffer,
                allocation,
                desc.size,
                device_address,
            )))
        }
    }

    fn create_acceleration_structure(
        &self,
        desc: &AccelerationStructureDesc,
    ) -> Result<Arc<dyn AccelerationStructure>> {
        unsafe {
            let backing = vk_buffer(desc.buffer.as_ref());

            let create_info = vk::AccelerationStructureCreateInfoKHR::default()
                .buffer(backing.buffer)
                .offset(desc.range.offset)
                .size(desc.range.size)
                .ty(kind_to_vk(desc.kind));

            let handle = self
                .ctx
                .accel_loader
                .create_acceleration_structure(&create_info, None)
                .map_err(|e| {
                    rt_err!("astra::vulkan", "Failed to create acceleration structure: {:?}", e)
                })?;

            let address_info =
                vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(handle);
            let device_address = self
                .ctx
                .accel_loader
                .get_acceleration_structure_device_address(&address_info);

            Ok(Arc::new(VulkanAccelerationStructure::new(
                Arc::clone(&self.ctx),
                handle,
                desc.kind,
                device_address,
                Arc::clone(desc.buffer),
            )))
        }
    }

    fn create_semaphore(&self) -> Result<Arc<dyn Semaphore>> {
        unsafe {
            let semaphore = self
                .device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                .map_err(|e| rt_err!("astra::vulkan", "Failed to create semaphore: {:?}", e))?;
            Ok(Arc::new(VulkanSemaphore::new(
                Arc::clone(&self.ctx),
                semaphore,
            )))
        }
    }

    fn bottom_level_build_sizes(
        &self,
        geometry: &MeshGeometry,
        flags: BuildFlags,
    ) -> Result<BuildSizes> {
        unsafe {
            let (vk_geometry, primitive_count) = Self::triangles_geometry(geometry);
            let geometries = [vk_geometry];

            let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
                .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
                .flags(build_flags_to_vk(flags))
                .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
                .geometries(&geometries);

            let mut size_info = vk::AccelerationStructureBuildSizesInfoKHR::default();
            self.ctx.accel_loader.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &[primitive_count],
                &mut size_info,
            );

            Ok(BuildSizes {
                acceleration_structure_size: size_info.acceleration_structure_size,
                build_scratch_size: size_info.build_scratch_size,
            })
        }
    }

    fn top_level_build_sizes(&self, instance_count: u32, flags: BuildFlags) -> Result<BuildSizes> {
        unsafe {
            // Addresses are irrelevant for the size query
            let geometries = [Self::instances_geometry(0)];

            let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
                .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL)
                .flags(build_flags_to_vk(flags))
                .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
                .geometries(&geometries);

            let mut size_info = vk::AccelerationStructureBuildSizesInfoKHR::default();
            self.ctx.accel_loader.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &[instance_count],
                &mut size_info,
            );

            Ok(BuildSizes {
                acceleration_structure_size: size_info.acceleration_structure_size,
                build_scratch_size: size_info.build_scratch_size,
            })
        }
    }

    fn build_bottom_level_sync(&self, builds: &[BottomLevelBuild]) -> Result<Vec<u64>> {
        if builds.is_empty() {
            return Ok(Vec::new());
        }
        unsafe {
            rt_debug!(
                "astra::vulkan",
                "Building {} bottom-level structure(s) synchronously",
                builds.len()
            );

            // Query pool for the compacted-size readback
            let query_pool_info = vk::QueryPoolCreateInfo::default()
                .query_type(vk::QueryType::ACCELERATION_STRUCTURE_COMPACTED_SIZE_KHR)
                .query_count(builds.len() as u32);
            let query_pool = self
                .device
                .create_query_pool(&query_pool_info, None)
                .map_err(|e| rt_err!("astra::vulkan", "Failed to create query pool: {:?}", e))?;

            // Per-build geometry descriptions must outlive the build infos
            let geometries: Vec<[vk::AccelerationStructureGeometryKHR; 1]> = builds
                .iter()
                .map(|build| [Self::triangles_geometry(build.geometry).0])
                .collect();
            let handles: Vec<vk::AccelerationStructureKHR> = builds
                .iter()
                .map(|build| vk_structure(build.destination.as_ref()).handle)
                .collect();

            let build_infos: Vec<vk::AccelerationStructureBuildGeometryInfoKHR> = builds
                .iter()
                .zip(geometries.iter().zip(handles.iter()))
                .map(|(build, (geometry, &handle))| {
                    vk::AccelerationStructureBuildGeometryInfoKHR::default()
                        .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
                        .flags(build_flags_to_vk(build.flags))
                        .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
                        .geometries(geometry)
                        .dst_acceleration_structure(handle)
                        .scratch_data(vk::DeviceOrHostAddressKHR {
                            device_address: build.scratch.device_address() + build.scratch_offset,
                        })
                })
                .collect();

            let range_infos: Vec<[vk::AccelerationStructureBuildRangeInfoKHR; 1]> = builds
                .iter()
                .map(|build| {
                    [vk::AccelerationStructureBuildRangeInfoKHR::default()
                        .primitive_count(build.geometry.triangle_count())]
                })
                .collect();
            let range_refs: Vec<&[vk::AccelerationStructureBuildRangeInfoKHR]> =
                range_infos.iter().map(|range| range.as_slice()).collect();

            let result = self.submit_compute_and_wait(|cmd| {
                self.device
                    .cmd_reset_query_pool(cmd, query_pool, 0, builds.len() as u32);

                self.ctx
                    .accel_loader
                    .cmd_build_acceleration_structures(cmd, &build_infos, &range_refs);

                // Builds must land before the compacted-size queries read them
                let barrier = vk::MemoryBarrier::default()
                    .src_access_mask(vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR)
                    .dst_access_mask(vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR);
                self.device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                    vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                    vk::DependencyFlags::empty(),
                    &[barrier],
                    &[],
                    &[],
                );

                self.ctx.accel_loader.cmd_write_acceleration_structures_properties(
                    cmd,
                    &handles,
                    vk::QueryType::ACCELERATION_STRUCTURE_COMPACTED_SIZE_KHR,
                    query_pool,
                    0,
                );
                Ok(())
            });

            let compacted_sizes = result.and_then(|_| {
                let mut sizes = vec![0u64; builds.len()];
                self.device
                    .get_query_pool_results(
                        query_pool,
                        0,
                        &mut sizes,
                        vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
                    )
                    .map_err(|e| {
                        rt_err!("astra::vulkan", "Failed to read compacted sizes: {:?}", e)
                    })?;
                Ok(sizes)
            });

            self.device.destroy_query_pool(query_pool, None);
            compacted_sizes
        }
    }

    fn compact_bottom_level_sync(&self, copies: &[CompactionCopy]) -> Result<()> {
        if copies.is_empty() {
            return Ok(());
        }
        rt_debug!(
            "astra::vulkan",
            "Compacting {} bottom-level structure(s)",
            copies.len()
        );
        self.submit_compute_and_wait(|cmd| {
            for copy in copies {
                let info = vk::CopyAccelerationStructureInfoKHR::default()
                    .src(vk_structure(copy.source.as_ref()).handle)
                    .dst(vk_structure(copy.destination.as_ref()).handle)
                    .mode(vk::CopyAccelerationStructureModeKHR::COMPACT);
                unsafe {
                    self.ctx.accel_loader.cmd_copy_acceleration_structure(cmd, &info);
                }
            }
            Ok(())
        })
    }

    fn build_top_level_async(&self, desc: &TopLevelBuildDesc) -> Result<()> {
        unsafe {
            let slot_index =
                self.current_slot.fetch_add(1, Ordering::Relaxed) % TOP_LEVEL_SUBMITS_IN_FLIGHT;
            let slot = self.top_level_slots[slot_index].lock().unwrap();

            // Recycle this slot's command buffers once its previous submit
            // retired. Ring depth matches the caller's frame ring, so under
            // normal pacing this wait is already satisfied.
            self.device
                .wait_for_fences(&[slot.fence], true, u64::MAX)
                .map_err(|e| rt_err!("astra::vulkan", "Failed to wait for submit fence: {:?}", e))?;
            self.device
                .reset_fences(&[slot.fence])
                .map_err(|e| rt_err!("astra::vulkan", "Failed to reset submit fence: {:?}", e))?;

            let upload_semaphore = vk_semaphore(desc.upload_semaphore.as_ref()).semaphore;
            let build_semaphore = vk_semaphore(desc.build_semaphore.as_ref()).semaphore;

            // Transfer batch: stage the instance records
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .begin_command_buffer(slot.transfer_cmd, &begin_info)
                .map_err(|e| rt_err!("astra::vulkan", "Failed to begin transfer batch: {:?}", e))?;
            let copy = vk::BufferCopy::default().size(desc.upload_size);
            self.device.cmd_copy_buffer(
                slot.transfer_cmd,
                vk_buffer(desc.instance_upload.as_ref()).buffer,
                vk_buffer(desc.instance_data.as_ref()).buffer,
                &[copy],
            );
            self.device
                .end_command_buffer(slot.transfer_cmd)
                .map_err(|e| rt_err!("astra::vulkan", "Failed to end transfer batch: {:?}", e))?;

            // Compute batch: build the structure over the staged instances
            self.device
                .begin_command_buffer(slot.compute_cmd, &begin_info)
                .map_err(|e| rt_err!("astra::vulkan", "Failed to begin build batch: {:?}", e))?;

            let geometries =
                [Self::instances_geometry(desc.instance_data.device_address())];
            let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
                .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL)
                .flags(build_flags_to_vk(desc.flags))
                .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
                .geometries(&geometries)
                .dst_acceleration_structure(vk_structure(desc.destination.as_ref()).handle)
                .scratch_data(vk::DeviceOrHostAddressKHR {
                    device_address: desc.scratch.device_address(),
                });
            let range_info = [vk::AccelerationStructureBuildRangeInfoKHR::default()
                .primitive_count(desc.instance_count)];
            self.ctx.accel_loader.cmd_build_acceleration_structures(
                slot.compute_cmd,
                &[build_info],
                &[&range_info],
            );

            self.device
                .end_command_buffer(slot.compute_cmd)
                .map_err(|e| rt_err!("astra::vulkan", "Failed to end build batch: {:?}", e))?;

            // Submit: transfer signals the upload semaphore, the build waits
            // on it and signals completion. No CPU wait on either.
            let transfer_cmds = [slot.transfer_cmd];
            let upload_signal = [upload_semaphore];
            let transfer_submit = vk::SubmitInfo::default()
                .command_buffers(&transfer_cmds)
                .signal_semaphores(&upload_signal);
            self.device
                .queue_submit(self.ctx.transfer_queue, &[transfer_submit], vk::Fence::null())
                .map_err(|e| rt_err!("astra::vulkan", "Failed to submit instance upload: {:?}", e))?;

            let compute_cmds = [slot.compute_cmd];
            let upload_wait = [upload_semaphore];
            let wait_stages = [vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR];
            let build_signal = [build_semaphore];
            let compute_submit = vk::SubmitInfo::default()
                .wait_semaphores(&upload_wait)
                .wait_dst_stage_mask(&wait_stages)
                .command_buffers(&compute_cmds)
                .signal_semaphores(&build_signal);
            self.device
                .queue_submit(self.ctx.compute_queue, &[compute_submit], slot.fence)
                .map_err(|e| rt_err!("astra::vulkan", "Failed to submit top-level build: {:?}", e))?;

            Ok(())
        }
    }

    fn acceleration_structure_offset_alignment(&self) -> u64 {
        ACCELERATION_STRUCTURE_OFFSET_ALIGNMENT
    }

    fn scratch_offset_alignment(&self) -> u64 {
        self.scratch_alignment
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            // Wait for device to finish
            self.device.device_wait_idle().ok();

            // 1. Destroy VulkanDevice-owned objects
            for slot in self.top_level_slots.drain(..) {
                let slot = slot.into_inner().unwrap();
                self.device.destroy_fence(slot.fence, None);
            }

            // 2. Destroy command pools from GpuContext (frees their buffers)
            for pool in [
                &self.ctx.compute_command_pool,
                &self.ctx.transfer_command_pool,
            ] {
                let mut pool = pool.lock().unwrap();
                if *pool != vk::CommandPool::null() {
                    self.device.destroy_command_pool(*pool, None);
                    *pool = vk::CommandPool::null();
                }
            }

            // 3. Drop allocator: free VkDeviceMemory pages BEFORE destroying
            //    the device. First this Arc, then GpuContext's ManuallyDrop Arc.
            ManuallyDrop::drop(&mut self.allocator);
            if let Some(ctx) = Arc::get_mut(&mut self.ctx) {
                ManuallyDrop::drop(&mut ctx.allocator);
            }

            // 4. Destroy debug messenger BEFORE device and instance
            #[cfg(feature = "vulkan-validation")]
            if let (Some(debug_utils), Some(messenger)) = (
                &self.ctx.debug_utils_loader,
                &self.ctx.debug_messenger,
            ) {
                debug_utils.destroy_debug_utils_messenger(*messenger, None);
            }

            // 5. Destroy device and instance
            self.device.destroy_device(None);
            self._instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
#[path = "vulkan_device_unit_tests.rs"]
mod tests;
