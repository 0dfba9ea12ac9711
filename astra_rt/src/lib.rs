/*!
# Astra RT

Core traits and types for the Astra hardware ray tracing layer.

This crate provides the platform-agnostic API for acceleration structure
management using trait-based dynamic polymorphism. Backend implementations
(Vulkan, Direct3D 12, etc.) provide concrete types behind the device traits.

## Architecture

- **GpuDevice**: Factory and submission trait for acceleration structure work
- **AccelerationStructure**: Bottom-level and top-level index trait
- **DeviceBuffer**: GPU buffer trait
- **TaskScheduler**: Background work trait for asynchronous rebuilds
- **SceneDescription**: Read-only view of the meshes and draws to index
- **AccelerationStructureManager**: The per-frame pipeline driver

Backend implementations provide concrete types that implement these traits.
*/

// Internal modules
pub mod accel;
pub mod device;
pub mod error;
pub mod log;
pub mod scene;
pub mod tasks;

// Main astra namespace module
pub mod astra {
    // Error types
    pub use crate::error::{Error, Result};

    // Pipeline driver
    pub use crate::accel::AccelerationStructureManager;

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{DefaultLogger, LogEntry, LogSeverity, Logger};
        // Note: rt_* macros are NOT re-exported here - they are internal only
    }

    // Device sub-module with all GPU-facing traits and types
    pub mod device {
        pub use crate::device::*;
    }

    // Acceleration structure sub-module
    pub mod accel {
        pub use crate::accel::*;
    }

    // Scene sub-module
    pub mod scene {
        pub use crate::scene::*;
    }

    // Task sub-module
    pub mod tasks {
        pub use crate::tasks::*;
    }
}

// Re-export math library at crate root
pub use glam;
