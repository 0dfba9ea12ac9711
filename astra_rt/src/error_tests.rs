//! Unit tests for error.rs
//!
//! Tests all Error variants and their implementations (Display, Debug, Clone,
//! std::error::Error), plus the rt_err!/rt_bail! macros.

use crate::error::{Error, Result};

// ============================================================================
// ERROR DISPLAY TESTS
// ============================================================================

#[test]
fn test_backend_error_display() {
    let err = Error::BackendError("vkBuildAccelerationStructuresKHR failed".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Backend error"));
    assert!(display.contains("vkBuildAccelerationStructuresKHR failed"));
}

#[test]
fn test_out_of_memory_display() {
    let err = Error::OutOfMemory;
    assert_eq!(format!("{}", err), "Out of GPU memory");
}

#[test]
fn test_invalid_resource_display() {
    let err = Error::InvalidResource("mesh geometry missing".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Invalid resource"));
    assert!(display.contains("mesh geometry missing"));
}

#[test]
fn test_initialization_failed_display() {
    let err = Error::InitializationFailed("worker pool spawn failed".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Initialization failed"));
    assert!(display.contains("worker pool spawn failed"));
}

// ============================================================================
// ERROR TRAIT IMPLEMENTATIONS
// ============================================================================

#[test]
fn test_error_is_std_error() {
    let err = Error::OutOfMemory;
    let _: &dyn std::error::Error = &err;
}

#[test]
fn test_error_debug() {
    assert!(format!("{:?}", Error::BackendError("x".to_string())).contains("BackendError"));
    assert!(format!("{:?}", Error::OutOfMemory).contains("OutOfMemory"));
    assert!(format!("{:?}", Error::InvalidResource("x".to_string())).contains("InvalidResource"));
    assert!(
        format!("{:?}", Error::InitializationFailed("x".to_string()))
            .contains("InitializationFailed")
    );
}

#[test]
fn test_error_clone() {
    let err1 = Error::BackendError("clone me".to_string());
    let err2 = err1.clone();
    assert_eq!(format!("{}", err1), format!("{}", err2));

    let err3 = Error::OutOfMemory;
    let err4 = err3.clone();
    assert_eq!(format!("{}", err3), format!("{}", err4));
}

// ============================================================================
// RESULT TYPE TESTS
// ============================================================================

#[test]
fn test_result_type_ok() {
    fn returns_ok() -> Result<u64> {
        Ok(256)
    }

    let result = returns_ok();
    assert!(result.is_ok());
    assert_eq!(result.unwrap(), 256);
}

#[test]
fn test_error_propagation_with_question_mark() {
    fn inner() -> Result<u64> {
        Err(Error::OutOfMemory)
    }

    fn outer() -> Result<u64> {
        inner()?;
        Ok(42)
    }

    assert!(outer().is_err());
}

// ============================================================================
// MACRO TESTS
// ============================================================================

#[test]
fn test_rt_err_builds_backend_error() {
    let code = -3;
    let err = crate::rt_err!("astra::test", "Build failed with code {}", code);
    match err {
        Error::BackendError(msg) => assert_eq!(msg, "Build failed with code -3"),
        other => panic!("expected BackendError, got {:?}", other),
    }
}

#[test]
fn test_rt_bail_returns_early() {
    fn failing() -> Result<u64> {
        crate::rt_bail!("astra::test", "nothing to build");
    }

    match failing() {
        Err(Error::BackendError(msg)) => assert_eq!(msg, "nothing to build"),
        other => panic!("expected BackendError, got {:?}", other),
    }
}
