//! Logging for the GPU-AV instrumentation core
//!
//! This module provides the logging sink used by every part of the crate:
//! - Customizable logger via Logger trait (the host layer plugs its own in)
//! - Severity levels (Trace, Debug, Info, Warn, Error)
//! - Message ids distinguishing each class of report
//! - Colored console output by default
//! - File and line information for detailed ERROR logs

use colored::*;
use std::sync::{OnceLock, RwLock};
use std::time::SystemTime;
use chrono::{DateTime, Local};

/// Message id used for internal errors (the subsystem is being disabled)
pub const INTERNAL_ERROR_ID: &str = "UNASSIGNED-GPU-Assisted-Validation";
/// Message id used for internal warnings
pub const INTERNAL_WARNING_ID: &str = "WARNING-GPU-Assisted-Validation";
/// Message id for internal errors when only debug printf is running
pub const DEBUG_PRINTF_ERROR_ID: &str = "UNASSIGNED-DEBUG-PRINTF";
/// Message id for internal warnings when only debug printf is running
pub const DEBUG_PRINTF_WARNING_ID: &str = "WARNING-DEBUG-PRINTF";
/// Message id used for optimizer diagnostics emitted during instrumentation
pub const INSTRUMENTATION_ERROR_ID: &str = "UNASSIGNED-GPU-Assisted";

/// Global logger (initialized with DefaultLogger)
static LOGGER: OnceLock<RwLock<Box<dyn Logger>>> = OnceLock::new();

/// Logger trait for custom logging implementations
///
/// Implement this trait to route instrumentation reports into the host's
/// own reporting (debug-utils messenger, file, test capture...).
///
/// # Example
///
/// ```no_run
/// use galaxy_gpu_av::gpuav::log::{Logger, LogEntry};
///
/// struct FileLogger {
///     file: std::fs::File,
/// }
///
/// impl Logger for FileLogger {
///     fn log(&self, entry: &LogEntry) {
///         // Write to file...
///     }
/// }
/// ```
pub trait Logger: Send + Sync {
    /// Log an entry
    ///
    /// # Arguments
    ///
    /// * `entry` - The log entry to process
    fn log(&self, entry: &LogEntry);
}

/// Log entry containing all information about a log message
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Severity level (Trace, Debug, Info, Warn, Error)
    pub severity: LogSeverity,

    /// Timestamp when the log was created
    pub timestamp: SystemTime,

    /// Source module (e.g., "gpuav::Instrumentor", "gpuav::vulkan")
    pub source: String,

    /// Message class identifier (e.g., "WARNING-GPU-Assisted-Validation")
    pub message_id: Option<&'static str>,

    /// Log message
    pub message: String,

    /// Source file (only for detailed ERROR logs)
    pub file: Option<&'static str>,

    /// Source line (only for detailed ERROR logs)
    pub line: Option<u32>,
}

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogSeverity {
    /// Very verbose debug information (typically disabled in release)
    Trace,

    /// Development/debugging information
    Debug,

    /// Important informational messages
    Info,

    /// Warning messages (potential issues)
    Warn,

    /// Error messages (critical issues with file:line details)
    Error,
}

/// Default logger implementation using colored console output
///
/// Format:
/// - Normal: `[timestamp] [SEVERITY] [source] {message_id} message`
/// - Error: `[timestamp] [ERROR] [source] {message_id} message (file:line)`
pub struct DefaultLogger;

impl Logger for DefaultLogger {
    fn log(&self, entry: &LogEntry) {
        let datetime: DateTime<Local> = entry.timestamp.into();
        let timestamp = datetime.format("%Y-%m-%d %H:%M:%S%.3f").to_string();

        let severity_str = match entry.severity {
            LogSeverity::Trace => "TRACE".bright_black(),
            LogSeverity::Debug => "DEBUG".cyan(),
            LogSeverity::Info => "INFO ".green(),
            LogSeverity::Warn => "WARN ".yellow(),
            LogSeverity::Error => "ERROR".red().bold(),
        };

        let source = entry.source.bright_blue();
        let message_id = match entry.message_id {
            Some(id) => format!("{{{}}} ", id).magenta().to_string(),
            None => String::new(),
        };

        if let (Some(file), Some(line)) = (entry.file, entry.line) {
            eprintln!(
                "[{}] [{}] [{}] {}{} ({}:{})",
                timestamp,
                severity_str,
                source,
                message_id,
                entry.message,
                file,
                line
            );
        } else {
            eprintln!(
                "[{}] [{}] [{}] {}{}",
                timestamp,
                severity_str,
                source,
                message_id,
                entry.message
            );
        }
    }
}

fn logger() -> &'static RwLock<Box<dyn Logger>> {
    LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger)))
}

/// Set a custom logger
///
/// Replace the default logger with the host layer's reporting sink.
pub fn set_logger<L: Logger + 'static>(logger_impl: L) {
    if let Ok(mut lock) = logger().write() {
        *lock = Box::new(logger_impl);
    }
}

/// Reset logger to default (DefaultLogger)
pub fn reset_logger() {
    if let Ok(mut lock) = logger().write() {
        *lock = Box::new(DefaultLogger);
    }
}

/// Internal logging method (for simple logs without file:line)
///
/// Used by macros like gpuav_info!, gpuav_warn!, gpuav_report!, etc.
pub fn log(
    severity: LogSeverity,
    source: &str,
    message_id: Option<&'static str>,
    message: String,
) {
    if let Ok(lock) = logger().read() {
        lock.log(&LogEntry {
            severity,
            timestamp: SystemTime::now(),
            source: source.to_string(),
            message_id,
            message,
            file: None,
            line: None,
        });
    }
}

/// Internal logging method with file:line information (for ERROR logs)
///
/// Used by gpuav_error! and gpuav_err! to include source location.
pub fn log_detailed(
    severity: LogSeverity,
    source: &str,
    message_id: Option<&'static str>,
    message: String,
    file: &'static str,
    line: u32,
) {
    if let Ok(lock) = logger().read() {
        lock.log(&LogEntry {
            severity,
            timestamp: SystemTime::now(),
            source: source.to_string(),
            message_id,
            message,
            file: Some(file),
            line: Some(line),
        });
    }
}

// ===== LOGGING MACROS =====

/// Log a TRACE message (very verbose, typically disabled)
#[macro_export]
macro_rules! gpuav_trace {
    ($source:expr, $($arg:tt)*) => {
        $crate::log::log(
            $crate::log::LogSeverity::Trace,
            $source,
            None,
            format!($($arg)*)
        )
    };
}

/// Log a DEBUG message (development information)
///
/// # Example
///
/// ```no_run
/// galaxy_gpu_av::gpuav_debug!("gpuav::Instrumentor", "Instrumented {} stages", 3);
/// ```
#[macro_export]
macro_rules! gpuav_debug {
    ($source:expr, $($arg:tt)*) => {
        $crate::log::log(
            $crate::log::LogSeverity::Debug,
            $source,
            None,
            format!($($arg)*)
        )
    };
}

/// Log an INFO message (important events)
#[macro_export]
macro_rules! gpuav_info {
    ($source:expr, $($arg:tt)*) => {
        $crate::log::log(
            $crate::log::LogSeverity::Info,
            $source,
            None,
            format!($($arg)*)
        )
    };
}

/// Log a WARN message (potential issues)
#[macro_export]
macro_rules! gpuav_warn {
    ($source:expr, $($arg:tt)*) => {
        $crate::log::log(
            $crate::log::LogSeverity::Warn,
            $source,
            None,
            format!($($arg)*)
        )
    };
}

/// Log an ERROR message with file:line information
#[macro_export]
macro_rules! gpuav_error {
    ($source:expr, $($arg:tt)*) => {
        $crate::log::log_detailed(
            $crate::log::LogSeverity::Error,
            $source,
            None,
            format!($($arg)*),
            file!(),
            line!()
        )
    };
}

/// Log a message tagged with a message-class id
///
/// Errors carry file:line, everything else is logged plain.
///
/// # Example
///
/// ```no_run
/// use galaxy_gpu_av::gpuav::log::{LogSeverity, INTERNAL_WARNING_ID};
///
/// galaxy_gpu_av::gpuav_report!(LogSeverity::Warn, "gpuav::Instrumentor", INTERNAL_WARNING_ID,
///     "Internal Warning: {}", "slot conflict");
/// ```
#[macro_export]
macro_rules! gpuav_report {
    ($severity:expr, $source:expr, $id:expr, $($arg:tt)*) => {{
        let severity = $severity;
        if severity == $crate::log::LogSeverity::Error {
            $crate::log::log_detailed(severity, $source, Some($id), format!($($arg)*), file!(), line!())
        } else {
            $crate::log::log(severity, $source, Some($id), format!($($arg)*))
        }
    }};
}

/// Log an error and evaluate to an `Error::BackendError` carrying the same text
///
/// # Example
///
/// ```no_run
/// fn create() -> galaxy_gpu_av::gpuav::Result<()> {
///     Err(galaxy_gpu_av::gpuav_err!("gpuav::vulkan", "vkCreateShaderModule failed: {}", -3))
/// }
/// ```
#[macro_export]
macro_rules! gpuav_err {
    ($source:expr, $($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::log::log_detailed(
            $crate::log::LogSeverity::Error,
            $source,
            None,
            message.clone(),
            file!(),
            line!()
        );
        $crate::gpuav::Error::BackendError(message)
    }};
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
