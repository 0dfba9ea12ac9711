//! Unit tests for log.rs
//!
//! Tests Logger trait, LogEntry, LogSeverity, DefaultLogger, and the global
//! logger swap. Tests touching the global logger run serially.

use crate::log::{set_logger, reset_logger, DefaultLogger, LogEntry, Logger, LogSeverity};
use serial_test::serial;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

// ============================================================================
// LOG SEVERITY TESTS
// ============================================================================

#[test]
fn test_log_severity_ordering() {
    assert!(LogSeverity::Trace < LogSeverity::Debug);
    assert!(LogSeverity::Debug < LogSeverity::Info);
    assert!(LogSeverity::Info < LogSeverity::Warn);
    assert!(LogSeverity::Warn < LogSeverity::Error);
}

#[test]
fn test_log_severity_copy() {
    let sev1 = LogSeverity::Info;
    let sev2 = sev1; // Copy, not move
    assert_eq!(sev1, sev2);
    assert_eq!(sev1, LogSeverity::Info);
}

// ============================================================================
// LOG ENTRY TESTS
// ============================================================================

#[test]
fn test_log_entry_creation_without_file_line() {
    let entry = LogEntry {
        severity: LogSeverity::Info,
        timestamp: SystemTime::now(),
        source: "astra::manager".to_string(),
        message: "Manager ready".to_string(),
        file: None,
        line: None,
    };

    assert_eq!(entry.severity, LogSeverity::Info);
    assert_eq!(entry.source, "astra::manager");
    assert!(entry.file.is_none());
    assert!(entry.line.is_none());
}

#[test]
fn test_log_entry_creation_with_file_line() {
    let entry = LogEntry {
        severity: LogSeverity::Error,
        timestamp: SystemTime::now(),
        source: "astra::blas".to_string(),
        message: "Build failed".to_string(),
        file: Some("blas_set.rs"),
        line: Some(42),
    };

    assert_eq!(entry.severity, LogSeverity::Error);
    assert_eq!(entry.file, Some("blas_set.rs"));
    assert_eq!(entry.line, Some(42));
}

// ============================================================================
// CUSTOM LOGGER TESTS
// ============================================================================

/// Captures entries for assertion
struct CaptureLogger {
    entries: Arc<Mutex<Vec<(LogSeverity, String, String)>>>,
}

impl Logger for CaptureLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries
            .lock()
            .unwrap()
            .push((entry.severity, entry.source.clone(), entry.message.clone()));
    }
}

#[test]
#[serial]
fn test_custom_logger_receives_macro_output() {
    let entries = Arc::new(Mutex::new(Vec::new()));
    set_logger(CaptureLogger {
        entries: Arc::clone(&entries),
    });

    crate::rt_info!("astra::test", "built {} entries", 3);
    crate::rt_warn!("astra::test", "falling behind");

    let captured = entries.lock().unwrap().clone();
    assert_eq!(captured.len(), 2);
    assert_eq!(
        captured[0],
        (LogSeverity::Info, "astra::test".to_string(), "built 3 entries".to_string())
    );
    assert_eq!(captured[1].0, LogSeverity::Warn);

    reset_logger();
}

#[test]
#[serial]
fn test_error_macro_attaches_file_line() {
    struct FileLineLogger {
        saw_file_line: Arc<Mutex<bool>>,
    }

    impl Logger for FileLineLogger {
        fn log(&self, entry: &LogEntry) {
            if entry.severity == LogSeverity::Error && entry.file.is_some() && entry.line.is_some()
            {
                *self.saw_file_line.lock().unwrap() = true;
            }
        }
    }

    let saw = Arc::new(Mutex::new(false));
    set_logger(FileLineLogger {
        saw_file_line: Arc::clone(&saw),
    });

    crate::rt_error!("astra::test", "synthetic failure");

    assert!(*saw.lock().unwrap());
    reset_logger();
}

#[test]
#[serial]
fn test_default_logger_does_not_panic() {
    reset_logger();
    // DefaultLogger writes to stdout; just exercise both paths
    DefaultLogger.log(&LogEntry {
        severity: LogSeverity::Debug,
        timestamp: SystemTime::now(),
        source: "astra::test".to_string(),
        message: "plain".to_string(),
        file: None,
        line: None,
    });
    DefaultLogger.log(&LogEntry {
        severity: LogSeverity::Error,
        timestamp: SystemTime::now(),
        source: "astra::test".to_string(),
        message: "detailed".to_string(),
        file: Some("log_tests.rs"),
        line: Some(1),
    });
}
