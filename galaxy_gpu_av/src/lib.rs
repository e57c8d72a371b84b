/*!
# Galaxy GPU-AV

Shader instrumentation core for GPU-assisted validation.

This crate rewrites application shaders so that, at runtime, they check their
own resource accesses and report violations through a reserved descriptor
set. It is API-agnostic: device calls go through the [`gpuav::DeviceDispatch`]
trait and the SPIR-V rewriting through [`gpuav::InstrumentationToolchain`],
so a backend crate (such as `galaxy_gpu_av_vulkan`) only supplies those two.

## Architecture

- **GpuShaderInstrumentor**: pre/post hooks around layout, shader and pipeline creation
- **PassPipeline**: ordered instrumentation passes for one shader
- **LayoutReservation**: reserved descriptor set slot and layout patching
- **InstrumentedShaderRegistry**: shader id to original code and owner
- **DeferredOperationQueue**: registration for deferred ray tracing pipelines
- **diagnostics**: violation reports to human readable text
*/

// Internal modules
mod error;
pub mod log;
pub mod bytecode;
pub mod cache;
pub mod capabilities;
pub mod context;
pub mod deferred;
pub mod diagnostics;
pub mod dispatch;
pub mod handles;
pub mod instrument;
pub mod instrumentor;
pub mod layout;
pub mod passes;
pub mod registry;
pub mod settings;
pub mod stages;

#[cfg(test)]
mod mock_device;

// Main gpuav namespace module
pub mod gpuav {
    // Error types
    pub use crate::error::{Error, Result};

    // Orchestrator
    pub use crate::instrumentor::{
        CreationResult, GpuShaderInstrumentor, PipelineCreationState, PipelineInstrumentationData,
        ShaderInstrumentationMetadata, ShaderObjectCreationState,
    };

    // Configuration and device state
    pub use crate::capabilities::{make_api_version, DeviceCapabilities, TargetEnv};
    pub use crate::context::{InstrumentationContext, SubsystemState};
    pub use crate::settings::{Settings, ShaderInstrumentationSettings};

    // Seams implemented by backends
    pub use crate::dispatch::DeviceDispatch;
    pub use crate::passes::{
        InstrumentationModule, InstrumentationToolchain, ModuleSettings, ToolMessage,
        ToolMessageLevel, ValidatorOptions,
    };

    // Handles and create infos
    pub use crate::handles::*;
    pub use crate::stages::*;

    // Building blocks
    pub use crate::bytecode::{shader_hash, ShaderId};
    pub use crate::cache::InstrumentationCache;
    pub use crate::deferred::{DeferredContinuation, DeferredOperationQueue};
    pub use crate::diagnostics::{NoObjectNames, ObjectNameLookup, ViolationReport};
    pub use crate::instrument::{dump_file_name, DumpStage, PassOutcome, PassPipeline};
    pub use crate::layout::{
        DescriptorKind, InstrumentationBinding, LayoutPatch, LayoutReservation,
        INSTRUMENTATION_BINDINGS,
    };
    pub use crate::registry::{InstrumentedShader, InstrumentedShaderRegistry};

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{
            reset_logger, set_logger, DefaultLogger, LogEntry, LogSeverity, Logger,
            DEBUG_PRINTF_ERROR_ID, DEBUG_PRINTF_WARNING_ID, INSTRUMENTATION_ERROR_ID,
            INTERNAL_ERROR_ID, INTERNAL_WARNING_ID,
        };
    }
}
