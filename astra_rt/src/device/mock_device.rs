/// Mock GpuDevice for unit tests (no GPU required)
///
/// Tracks every create/destroy through shared counters so tests can observe
/// resource lifetimes after handles are dropped, serves deterministic build
/// sizes, and can be switched into allocation-failure mode to exercise the
/// degradation policy.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::{Error, Result};
use super::{
    AccelerationStructure, AccelerationStructureDesc, AccelerationStructureKind,
    BottomLevelBuild, BufferDesc, BufferUsage, BuildFlags, BuildSizes,
    CompactionCopy, DeviceBuffer, GpuDevice, MeshGeometry,
    Semaphore, TopLevelBuildDesc,
};

// ============================================================================
// Shared statistics
// ============================================================================

/// Counters shared between the device and every resource it creates
#[derive(Debug, Default)]
pub struct MockStats {
    /// (usage, size) of every buffer created, in creation order
    pub buffers_created: Vec<(BufferUsage, u64)>,
    /// Number of buffers destroyed (dropped)
    pub buffers_destroyed: usize,
    /// Kind of every acceleration structure created, in creation order
    pub structures_created: Vec<AccelerationStructureKind>,
    /// Number of acceleration structures destroyed (dropped)
    pub structures_destroyed: usize,
    /// Number of semaphores created
    pub semaphores_created: usize,
    /// Number of synchronous bottom-level build batches submitted
    pub bottom_build_batches: usize,
    /// Number of compaction-copy batches submitted
    pub compaction_batches: usize,
    /// Instance count of every top-level build, in submission order
    pub top_builds: Vec<u32>,
}

impl MockStats {
    /// Sizes of created buffers filtered by usage, in creation order
    pub fn buffer_sizes(&self, usage: BufferUsage) -> Vec<u64> {
        self.buffers_created
            .iter()
            .filter(|(u, _)| *u == usage)
            .map(|(_, size)| *size)
            .collect()
    }
}

// ============================================================================
// Mock resources
// ============================================================================

pub struct MockBuffer {
    stats: Arc<Mutex<MockStats>>,
    pub size: u64,
    pub usage: BufferUsage,
    address: u64,
    /// Last data written through update(), for assertions
    pub contents: Mutex<Vec<u8>>,
}

impl DeviceBuffer for MockBuffer {
    fn size(&self) -> u64 {
        self.size
    }

    fn update(&self, offset: u64, data: &[u8]) -> Result<()> {
        if offset + data.len() as u64 > self.size {
            return Err(Error::InvalidResource(format!(
                "update out of bounds: {}+{} > {}",
                offset,
                data.len(),
                self.size
            )));
        }
        let mut contents = self.contents.lock().unwrap();
        let end = (offset as usize) + data.len();
        if contents.len() < end {
            contents.resize(end, 0);
        }
        contents[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn device_address(&self) -> u64 {
        self.address
    }
}

impl Drop for MockBuffer {
    fn drop(&mut self) {
        self.stats.lock().unwrap().buffers_destroyed += 1;
    }
}

pub struct MockAccelerationStructure {
    stats: Arc<Mutex<MockStats>>,
    kind: AccelerationStructureKind,
    address: u64,
    pub range_offset: u64,
    pub range_size: u64,
}

impl AccelerationStructure for MockAccelerationStructure {
    fn kind(&self) -> AccelerationStructureKind {
        self.kind
    }

    fn device_address(&self) -> u64 {
        self.address
    }
}

impl Drop for MockAccelerationStructure {
    fn drop(&mut self) {
        self.stats.lock().unwrap().structures_destroyed += 1;
    }
}

pub struct MockSemaphore;

impl Semaphore for MockSemaphore {}

// ============================================================================
// Mock device
// ============================================================================

pub struct MockDevice {
    /// Shared counters, observable after resources are dropped
    pub stats: Arc<Mutex<MockStats>>,
    /// When set, every allocation-like call fails with OutOfMemory
    pub fail_allocations: AtomicBool,
    next_address: AtomicU64,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(Mutex::new(MockStats::default())),
            fail_allocations: AtomicBool::new(false),
            next_address: AtomicU64::new(0x1000),
        }
    }

    pub fn set_fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::SeqCst);
    }

    fn check_allocation(&self) -> Result<()> {
        if self.fail_allocations.load(Ordering::SeqCst) {
            Err(Error::OutOfMemory)
        } else {
            Ok(())
        }
    }

    fn alloc_address(&self, size: u64) -> u64 {
        self.next_address.fetch_add(size.max(1), Ordering::SeqCst)
    }

    /// Number of live (created minus destroyed) acceleration structures
    pub fn live_structures(&self) -> usize {
        let stats = self.stats.lock().unwrap();
        stats.structures_created.len() - stats.structures_destroyed
    }

    /// Number of live (created minus destroyed) buffers
    pub fn live_buffers(&self) -> usize {
        let stats = self.stats.lock().unwrap();
        stats.buffers_created.len() - stats.buffers_destroyed
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuDevice for MockDevice {
    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn DeviceBuffer>> {
        self.check_allocation()?;
        self.stats
            .lock()
            .unwrap()
            .buffers_created
            .push((desc.usage, desc.size));
        Ok(Arc::new(MockBuffer {
            stats: Arc::clone(&self.stats),
            size: desc.size,
            usage: desc.usage,
            address: self.alloc_address(desc.size),
            contents: Mutex::new(Vec::new()),
        }))
    }

    fn create_acceleration_structure(
        &self,
        desc: &AccelerationStructureDesc,
    ) -> Result<Arc<dyn AccelerationStructure>> {
        self.check_allocation()?;
        self.stats
            .lock()
            .unwrap()
            .structures_created
            .push(desc.kind);
        Ok(Arc::new(MockAccelerationStructure {
            stats: Arc::clone(&self.stats),
            kind: desc.kind,
            address: desc.buffer.device_address() + desc.range.offset,
            range_offset: desc.range.offset,
            range_size: desc.range.size,
        }))
    }

    fn create_semaphore(&self) -> Result<Arc<dyn Semaphore>> {
        self.stats.lock().unwrap().semaphores_created += 1;
        Ok(Arc::new(MockSemaphore))
    }

    fn bottom_level_build_sizes(
        &self,
        geometry: &MeshGeometry,
        _flags: BuildFlags,
    ) -> Result<BuildSizes> {
        // Deterministic: 24 bytes per triangle, minimum one alignment unit
        let size = (geometry.triangle_count() as u64 * 24).max(256);
        Ok(BuildSizes {
            acceleration_structure_size: size,
            build_scratch_size: size / 2,
        })
    }

    fn top_level_build_sizes(
        &self,
        instance_count: u32,
        _flags: BuildFlags,
    ) -> Result<BuildSizes> {
        let size = instance_count as u64 * 64 + 256;
        Ok(BuildSizes {
            acceleration_structure_size: size,
            build_scratch_size: size / 2,
        })
    }

    fn build_bottom_level_sync(&self, builds: &[BottomLevelBuild]) -> Result<Vec<u64>> {
        self.stats.lock().unwrap().bottom_build_batches += 1;
        // Compaction reclaims half of the conservative build-size estimate
        builds
            .iter()
            .map(|build| {
                let sizes = self.bottom_level_build_sizes(build.geometry, build.flags)?;
                Ok(sizes.acceleration_structure_size / 2)
            })
            .collect()
    }

    fn compact_bottom_level_sync(&self, copies: &[CompactionCopy]) -> Result<()> {
        let _ = copies;
        self.stats.lock().unwrap().compaction_batches += 1;
        Ok(())
    }

    fn build_top_level_async(&self, desc: &TopLevelBuildDesc) -> Result<()> {
        self.stats.lock().unwrap().top_builds.push(desc.instance_count);
        Ok(())
    }

    fn acceleration_structure_offset_alignment(&self) -> u64 {
        256
    }

    fn scratch_offset_alignment(&self) -> u64 {
        128
    }
}

#[cfg(test)]
#[path = "mock_device_tests.rs"]
mod tests;
