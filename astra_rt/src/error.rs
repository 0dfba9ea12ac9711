//! Error types for the AstraRT acceleration-structure manager
//!
//! This module defines the error types used throughout the crate,
//! covering backend failures, GPU allocation, and resource validation.

use std::fmt;

/// Result type for AstraRT operations
pub type Result<T> = std::result::Result<T, Error>;

/// AstraRT errors
#[derive(Debug, Clone)]
pub enum Error {
    /// Backend-specific error (Vulkan, mock, etc.)
    BackendError(String),

    /// Out of GPU memory
    OutOfMemory,

    /// Invalid resource (buffer, acceleration structure, geometry)
    InvalidResource(String),

    /// Initialization failed (device, worker pool)
    InitializationFailed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// Build an [`Error::BackendError`] and log it at ERROR severity with
/// file:line information.
///
/// # Example
///
/// ```ignore
/// return Err(rt_err!("astra::blas", "Build failed: {:?}", code));
/// ```
#[macro_export]
macro_rules! rt_err {
    ($source:expr, $($arg:tt)*) => {{
        $crate::rt_error!($source, $($arg)*);
        $crate::error::Error::BackendError(format!($($arg)*))
    }};
}

/// Log an error and return early with an [`Error::BackendError`].
#[macro_export]
macro_rules! rt_bail {
    ($source:expr, $($arg:tt)*) => {
        return Err($crate::rt_err!($source, $($arg)*))
    };
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
