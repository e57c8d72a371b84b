//! Opaque object handles exchanged with the host API layer
//!
//! Every handle is a 64-bit non-dispatchable value, the same representation
//! Vulkan uses, so backends convert with a plain `as_raw()` / `from_raw()`.

use std::fmt;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(u64);

        impl $name {
            /// The null handle
            pub const NULL: Self = Self(0);

            /// Wrap a raw handle value
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Raw handle value
            pub const fn as_raw(self) -> u64 {
                self.0
            }

            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::LowerHex for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }
    };
}

define_handle!(
    /// Descriptor set layout (one binding slot of a pipeline layout)
    DescriptorSetLayoutHandle
);
define_handle!(
    /// Pipeline layout
    PipelineLayoutHandle
);
define_handle!(
    /// Shader module
    ShaderModuleHandle
);
define_handle!(
    /// Pipeline (graphics, compute, ray tracing or pipeline library)
    PipelineHandle
);
define_handle!(
    /// Shader object (pipeline-less shader)
    ShaderObjectHandle
);
define_handle!(
    /// Asynchronous creation request
    DeferredOperationHandle
);
define_handle!(
    /// Command buffer that recorded the failing action
    CommandBufferHandle
);

impl ShaderModuleHandle {
    /// Sentinel recorded when the SPIR-V was inlined in the pipeline stage
    /// create info and no module object exists
    pub const PIPELINE_STAGE_INFO: Self = Self(u64::MAX);
}

#[cfg(test)]
#[path = "handles_tests.rs"]
mod tests;
