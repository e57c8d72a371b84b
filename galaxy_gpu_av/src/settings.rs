/// Instrumentation settings
///
/// Read-only once handed to the instrumentor. The host layer owns loading
/// them (layer settings file, environment, validation features...).
use std::path::PathBuf;

/// Toggles for the individual instrumentation passes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderInstrumentationSettings {
    /// Bounds checks on descriptor arrays plus the non-bindless buffer and
    /// texel-buffer out-of-bounds checks
    pub bindless_descriptor: bool,
    /// Validity checks on raw device-address dereferences
    pub buffer_device_address: bool,
    /// Ray query parameter checks
    pub ray_query: bool,
    /// Record which descriptor array elements were accessed
    pub post_process_descriptor_index: bool,
}

impl Default for ShaderInstrumentationSettings {
    fn default() -> Self {
        Self {
            bindless_descriptor: true,
            buffer_device_address: true,
            ray_query: true,
            post_process_descriptor_index: true,
        }
    }
}

impl ShaderInstrumentationSettings {
    /// All passes off
    pub fn none() -> Self {
        Self {
            bindless_descriptor: false,
            buffer_device_address: false,
            ray_query: false,
            post_process_descriptor_index: false,
        }
    }

    pub fn any_enabled(&self) -> bool {
        self.bindless_descriptor
            || self.buffer_device_address
            || self.ray_query
            || self.post_process_descriptor_index
    }
}

/// Complete settings for the shader instrumentor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Key shaders by content hash and reuse instrumented output
    pub cache_instrumented_shaders: bool,
    /// Only instrument shaders that opted in at creation time
    pub select_instrumented_shaders: bool,
    /// Advertise one fewer bound descriptor set to the application
    pub reserve_binding_slot: bool,
    /// Entry points take the layer lock only when they need it
    pub fine_grained_locking: bool,
    /// Per-pass toggles
    pub shader_instrumentation: ShaderInstrumentationSettings,
    /// Run the debug printf pass
    pub debug_printf_enabled: bool,
    /// Debug printf is the only thing running (no validation passes)
    pub debug_printf_only: bool,
    /// Run spirv-val on every instrumented shader
    pub debug_validate_instrumented_shaders: bool,
    /// Write `dump_<id>_{before,after,opt}.spv` files
    pub debug_dump_instrumented_shaders: bool,
    /// Where dump files go (current directory when `None`)
    pub debug_dump_directory: Option<PathBuf>,
    /// Emit instrumentation info from the passes themselves
    pub debug_print_instrumentation_info: bool,
    /// Cap on instrumented sites per shader (0 = unlimited)
    pub debug_max_instrumentations_count: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_instrumented_shaders: true,
            select_instrumented_shaders: false,
            reserve_binding_slot: false,
            fine_grained_locking: true,
            shader_instrumentation: ShaderInstrumentationSettings::default(),
            debug_printf_enabled: false,
            debug_printf_only: false,
            debug_validate_instrumented_shaders: false,
            debug_dump_instrumented_shaders: false,
            debug_dump_directory: None,
            debug_print_instrumentation_info: false,
            debug_max_instrumentations_count: 0,
        }
    }
}

impl Settings {
    /// Settings for running debug printf alone
    pub fn debug_printf_only() -> Self {
        Self {
            shader_instrumentation: ShaderInstrumentationSettings::none(),
            debug_printf_enabled: true,
            debug_printf_only: true,
            ..Self::default()
        }
    }

    /// Whether any SPIR-V will be rewritten at all
    ///
    /// When false, none of the creation hooks touch anything.
    pub fn is_spirv_modified(&self) -> bool {
        self.shader_instrumentation.any_enabled() || self.debug_printf_enabled
    }

    /// Name used for this layer in internal error reports
    pub fn layer_name(&self) -> &'static str {
        if self.debug_printf_only {
            "DebugPrintf"
        } else {
            "GPU-AV"
        }
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
