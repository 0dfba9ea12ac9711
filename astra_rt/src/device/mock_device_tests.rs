//! Unit tests for mock_device.rs
//!
//! Verifies the mock's bookkeeping is trustworthy, since every manager test
//! leans on it to observe resource lifetimes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::device::{
    AccelerationStructureDesc, AccelerationStructureKind, BufferDesc, BufferRange,
    BufferUsage, BuildFlags, DeviceBuffer, GpuDevice, IndexType, MeshGeometry,
};
use crate::device::mock_device::MockDevice;
use crate::error::Error;

fn test_geometry(device: &MockDevice, triangles: u32) -> (MeshGeometry, Arc<dyn DeviceBuffer>, Arc<dyn DeviceBuffer>) {
    let vertices = device
        .create_buffer(&BufferDesc {
            size: (triangles as u64 * 3) * 12,
            usage: BufferUsage::Geometry,
        })
        .unwrap();
    let indices = device
        .create_buffer(&BufferDesc {
            size: triangles as u64 * 3 * 4,
            usage: BufferUsage::Geometry,
        })
        .unwrap();
    let geometry = MeshGeometry {
        vertex_buffer: Arc::clone(&vertices),
        vertex_count: triangles * 3,
        vertex_stride: 12,
        index_buffer: Arc::clone(&indices),
        index_count: triangles * 3,
        index_type: IndexType::U32,
        opaque: true,
    };
    (geometry, vertices, indices)
}

// ============================================================================
// BUFFER TESTS
// ============================================================================

#[test]
fn test_buffer_creation_tracked() {
    let device = MockDevice::new();
    let _scratch = device
        .create_buffer(&BufferDesc {
            size: 1024,
            usage: BufferUsage::Scratch,
        })
        .unwrap();

    let stats = device.stats.lock().unwrap();
    assert_eq!(stats.buffers_created, vec![(BufferUsage::Scratch, 1024)]);
    assert_eq!(stats.buffers_destroyed, 0);
}

#[test]
fn test_buffer_destruction_tracked_after_drop() {
    let device = MockDevice::new();
    {
        let _buffer = device
            .create_buffer(&BufferDesc {
                size: 64,
                usage: BufferUsage::InstanceUpload,
            })
            .unwrap();
        assert_eq!(device.live_buffers(), 1);
    }
    assert_eq!(device.live_buffers(), 0);
}

#[test]
fn test_buffer_update_records_contents() {
    let device = MockDevice::new();
    let buffer = device
        .create_buffer(&BufferDesc {
            size: 16,
            usage: BufferUsage::InstanceUpload,
        })
        .unwrap();

    buffer.update(4, &[1, 2, 3, 4]).unwrap();

    // The mock keeps the written bytes for assertions
    assert!(buffer.update(14, &[0; 4]).is_err());
}

#[test]
fn test_buffer_addresses_unique() {
    let device = MockDevice::new();
    let a = device
        .create_buffer(&BufferDesc { size: 256, usage: BufferUsage::Scratch })
        .unwrap();
    let b = device
        .create_buffer(&BufferDesc { size: 256, usage: BufferUsage::Scratch })
        .unwrap();
    assert_ne!(a.device_address(), b.device_address());
}

// ============================================================================
// ACCELERATION STRUCTURE TESTS
// ============================================================================

#[test]
fn test_structure_address_includes_range_offset() {
    let device = MockDevice::new();
    let buffer = device
        .create_buffer(&BufferDesc {
            size: 4096,
            usage: BufferUsage::AccelerationStructureStorage,
        })
        .unwrap();
    let structure = device
        .create_acceleration_structure(&AccelerationStructureDesc {
            kind: AccelerationStructureKind::BottomLevel,
            buffer: &buffer,
            range: BufferRange { offset: 512, size: 1024 },
        })
        .unwrap();

    assert_eq!(structure.kind(), AccelerationStructureKind::BottomLevel);
    assert_eq!(structure.device_address(), buffer.device_address() + 512);
}

#[test]
fn test_structure_destruction_tracked() {
    let device = MockDevice::new();
    let buffer = device
        .create_buffer(&BufferDesc {
            size: 4096,
            usage: BufferUsage::AccelerationStructureStorage,
        })
        .unwrap();
    {
        let _s = device
            .create_acceleration_structure(&AccelerationStructureDesc {
                kind: AccelerationStructureKind::TopLevel,
                buffer: &buffer,
                range: BufferRange { offset: 0, size: 4096 },
            })
            .unwrap();
        assert_eq!(device.live_structures(), 1);
    }
    assert_eq!(device.live_structures(), 0);
}

// ============================================================================
// BUILD SIZE / BUILD TESTS
// ============================================================================

#[test]
fn test_bottom_level_sizes_deterministic() {
    let device = MockDevice::new();
    let (geometry, _v, _i) = test_geometry(&device, 100);

    let sizes = device
        .bottom_level_build_sizes(&geometry, BuildFlags::PREFER_FAST_TRACE)
        .unwrap();
    assert_eq!(sizes.acceleration_structure_size, 2400);
    assert_eq!(sizes.build_scratch_size, 1200);

    // Tiny meshes are clamped to one alignment unit
    let (small, _v2, _i2) = test_geometry(&device, 1);
    let small_sizes = device
        .bottom_level_build_sizes(&small, BuildFlags::PREFER_FAST_TRACE)
        .unwrap();
    assert_eq!(small_sizes.acceleration_structure_size, 256);
}

#[test]
fn test_compacted_size_is_half_of_build_size() {
    let device = MockDevice::new();
    let (geometry, _v, _i) = test_geometry(&device, 100);

    let storage = device
        .create_buffer(&BufferDesc {
            size: 2400,
            usage: BufferUsage::AccelerationStructureStorage,
        })
        .unwrap();
    let scratch = device
        .create_buffer(&BufferDesc { size: 1200, usage: BufferUsage::Scratch })
        .unwrap();
    let destination = device
        .create_acceleration_structure(&AccelerationStructureDesc {
            kind: AccelerationStructureKind::BottomLevel,
            buffer: &storage,
            range: BufferRange { offset: 0, size: 2400 },
        })
        .unwrap();

    let compacted = device
        .build_bottom_level_sync(&[crate::device::BottomLevelBuild {
            geometry: &geometry,
            destination: &destination,
            scratch: &scratch,
            scratch_offset: 0,
            flags: BuildFlags::ALLOW_COMPACTION,
        }])
        .unwrap();

    assert_eq!(compacted, vec![1200]);
    assert_eq!(device.stats.lock().unwrap().bottom_build_batches, 1);
}

#[test]
fn test_allocation_failure_mode() {
    let device = MockDevice::new();
    device.set_fail_allocations(true);

    let result = device.create_buffer(&BufferDesc {
        size: 64,
        usage: BufferUsage::Scratch,
    });
    assert!(matches!(result, Err(Error::OutOfMemory)));

    device.set_fail_allocations(false);
    assert!(device
        .create_buffer(&BufferDesc { size: 64, usage: BufferUsage::Scratch })
        .is_ok());
}

#[test]
fn test_alignments() {
    let device = MockDevice::new();
    assert_eq!(device.acceleration_structure_offset_alignment(), 256);
    assert_eq!(device.scratch_offset_alignment(), 128);
}

#[test]
fn test_stats_shared_across_threads() {
    let device = Arc::new(MockDevice::new());
    let created = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let device = Arc::clone(&device);
            let created = Arc::clone(&created);
            std::thread::spawn(move || {
                for _ in 0..8 {
                    let _b = device
                        .create_buffer(&BufferDesc { size: 32, usage: BufferUsage::Scratch })
                        .unwrap();
                    created.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(created.load(Ordering::SeqCst), 32);
    assert_eq!(device.stats.lock().unwrap().buffers_created.len(), 32);
    assert_eq!(device.live_buffers(), 0);
}
