/// Device module - GPU-facing traits and descriptors consumed by the manager

// Module declarations
pub mod device;
pub mod buffer;
pub mod acceleration;
pub mod sync;

// Re-export everything from device.rs
pub use device::*;

// Re-export from other modules
pub use buffer::*;
pub use acceleration::*;
pub use sync::*;

// Mock device for tests (no GPU required)
#[cfg(test)]
pub mod mock_device;
