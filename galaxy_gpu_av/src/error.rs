//! Error types for the GPU-AV shader instrumentation core
//!
//! Most failures in this crate are recoverable and never leave the call that
//! produced them: they are logged and the shader simply runs uninstrumented.
//! The variants below cover what does cross a call boundary.

use std::fmt;

/// Result type for instrumentation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Shader instrumentation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Device setup failed, the subsystem cannot run on this device
    InitializationFailed(String),

    /// A call forwarded to the next layer / driver failed
    BackendError(String),

    /// Bytecode could not be interpreted as SPIR-V
    InvalidShader(String),

    /// A pass, the validator or the optimizer rejected a shader
    InstrumentationFailed(String),

    /// No continuation list was seeded for this deferred operation
    DeferredOperationNotTracked(u64),

    /// The subsystem hit an internal error earlier and is disconnected
    SubsystemDisabled,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::InvalidShader(msg) => write!(f, "Invalid shader: {}", msg),
            Error::InstrumentationFailed(msg) => write!(f, "Instrumentation failed: {}", msg),
            Error::DeferredOperationNotTracked(handle) => write!(
                f,
                "Deferred operation {:#x} has no pending post-completion list",
                handle
            ),
            Error::SubsystemDisabled => write!(f, "Shader instrumentation is disabled"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
