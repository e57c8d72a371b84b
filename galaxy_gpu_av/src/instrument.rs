//! Instrumentation pass pipeline for a single shader
//!
//! Order matters. The validity-check passes wrap the code they guard in
//! conditionals, the descriptor-index post process must run after them so its
//! accesses are already guarded, and debug printf runs last so its own code is
//! never wrapped by any check.

use std::path::PathBuf;

use crate::capabilities::DeviceCapabilities;
use crate::error::{Error, Result};
use crate::layout::BINDING_DEBUG_PRINTF_OUTPUT;
use crate::log::{LogSeverity, INSTRUMENTATION_ERROR_ID};
use crate::passes::{InstrumentationToolchain, ModuleSettings, ValidatorOptions};
use crate::settings::Settings;
use crate::bytecode::{has_spirv_magic, ShaderId};
use crate::{gpuav_report, gpuav_trace, gpuav_warn};

/// What became of one shader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Rewritten words to hand to the driver
    Instrumented(Vec<u32>),
    /// No pass found anything to instrument
    Unmodified,
    /// Input is not SPIR-V
    NotSpirv,
}

/// Which of the dump files to write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpStage {
    Before,
    After,
    Optimized,
}

impl DumpStage {
    fn suffix(self) -> &'static str {
        match self {
            DumpStage::Before => "before",
            DumpStage::After => "after",
            DumpStage::Optimized => "opt",
        }
    }
}

/// `dump_<id>_{before,after,opt}.spv`
pub fn dump_file_name(id: ShaderId, stage: DumpStage) -> String {
    format!("dump_{}_{}.spv", id, stage.suffix())
}

/// Runs the passes for one device configuration
pub struct PassPipeline<'a> {
    settings: &'a Settings,
    toolchain: &'a dyn InstrumentationToolchain,
    capabilities: &'a DeviceCapabilities,
    output_set: u32,
}

impl<'a> PassPipeline<'a> {
    pub fn new(
        settings: &'a Settings,
        toolchain: &'a dyn InstrumentationToolchain,
        capabilities: &'a DeviceCapabilities,
        output_set: u32,
    ) -> Self {
        Self {
            settings,
            toolchain,
            capabilities,
            output_set,
        }
    }

    fn module_settings(&self, id: ShaderId, has_bindless_descriptors: bool) -> ModuleSettings {
        ModuleSettings {
            shader_id: id,
            output_buffer_descriptor_set: self.output_set,
            print_debug_info: self.settings.debug_print_instrumentation_info,
            max_instrumentations_count: self.settings.debug_max_instrumentations_count,
            support_non_semantic_info: self.capabilities.shader_non_semantic_info,
            support_int64: self.capabilities.shader_int64,
            support_memory_model_device_scope: self.capabilities.vulkan_memory_model_device_scope,
            has_bindless_descriptors,
        }
    }

    /// Instrument `original`
    ///
    /// `Err` means a pass, the validator or the optimizer failed; the caller
    /// must keep the original words.
    pub fn run(
        &self,
        original: &[u32],
        id: ShaderId,
        has_bindless_descriptors: bool,
    ) -> Result<PassOutcome> {
        if !has_spirv_magic(original) {
            return Ok(PassOutcome::NotSpirv);
        }

        self.dump(id, DumpStage::Before, original);

        let mut module = self
            .toolchain
            .load_module(original, &self.module_settings(id, has_bindless_descriptors))?;

        let passes = &self.settings.shader_instrumentation;
        let mut modified = false;

        if passes.bindless_descriptor {
            modified |= module.run_pass_bindless_descriptor();
            modified |= module.run_pass_non_bindless_oob_buffer();
            modified |= module.run_pass_non_bindless_oob_texel_buffer();
        }
        if passes.buffer_device_address {
            modified |= module.run_pass_buffer_device_address();
        }
        if passes.ray_query {
            modified |= module.run_pass_ray_query();
        }
        if passes.post_process_descriptor_index {
            modified |= module.run_pass_post_process_descriptor_indexing();
        }

        module.link_functions();

        if self.settings.debug_printf_enabled {
            modified |= module.run_pass_debug_printf(BINDING_DEBUG_PRINTF_OUTPUT);
        }

        if !modified {
            gpuav_trace!("gpuav::PassPipeline", "Shader {} left unmodified", id);
            return Ok(PassOutcome::Unmodified);
        }

        module.post_process();
        let mut instrumented = module.to_binary();
        self.dump(id, DumpStage::After, &instrumented);

        let target = self.capabilities.target_env();
        if self.settings.debug_validate_instrumented_shaders {
            let options = ValidatorOptions {
                relax_block_layout: self.capabilities.relaxed_block_layout,
                scalar_block_layout: self.capabilities.scalar_block_layout,
                uniform_buffer_standard_layout: self.capabilities.uniform_buffer_standard_layout,
            };
            if let Err(diagnostic) = self.toolchain.validate(&instrumented, target, &options) {
                return Err(Error::InstrumentationFailed(format!(
                    "Instrumented shader (id {}) is invalid, spirv-val error:\n{} Proceeding with non instrumented shader.",
                    id, diagnostic
                )));
            }
        }

        // Debug printf alone leaves nothing dead
        if !self.settings.debug_printf_only {
            let mut report = |message: &crate::passes::ToolMessage| {
                if message.is_error() {
                    gpuav_report!(
                        LogSeverity::Error,
                        "gpuav::PassPipeline",
                        INSTRUMENTATION_ERROR_ID,
                        "Error during shader instrumentation: line {}: {}",
                        message.position,
                        message.text
                    );
                }
            };
            instrumented = self
                .toolchain
                .eliminate_dead_code(&instrumented, target, &mut report)
                .map_err(|e| {
                    Error::InstrumentationFailed(format!(
                        "Failure to run spirv-opt DCE on instrumented shader ({}). Proceeding with non-instrumented shader.",
                        e
                    ))
                })?;
            self.dump(id, DumpStage::Optimized, &instrumented);
        }

        Ok(PassOutcome::Instrumented(instrumented))
    }

    fn dump(&self, id: ShaderId, stage: DumpStage, words: &[u32]) {
        if !self.settings.debug_dump_instrumented_shaders {
            return;
        }
        let path = self
            .settings
            .debug_dump_directory
            .clone()
            .unwrap_or_else(PathBuf::new)
            .join(dump_file_name(id, stage));
        if let Err(e) = std::fs::write(&path, bytemuck::cast_slice::<u32, u8>(words)) {
            gpuav_warn!("gpuav::PassPipeline", "Could not write {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
#[path = "instrument_tests.rs"]
mod tests;
