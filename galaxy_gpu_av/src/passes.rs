//! Bytecode toolchain interface
//!
//! The rewriting itself (what a bounds check looks like in SPIR-V) lives in
//! the toolchain. The instrumentor only decides which passes run, in which
//! order, and what happens to their output.

use crate::capabilities::TargetEnv;
use crate::error::Result;
use crate::bytecode::ShaderId;

/// Per-module options handed to the toolchain when loading a shader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSettings {
    pub shader_id: ShaderId,
    /// Descriptor set slot the instrumentation bindings live at
    pub output_buffer_descriptor_set: u32,
    pub print_debug_info: bool,
    /// Cap on instrumented sites, 0 for none
    pub max_instrumentations_count: u32,
    pub support_non_semantic_info: bool,
    pub support_int64: bool,
    pub support_memory_model_device_scope: bool,
    /// Consuming layout has unbounded / update-after-bind descriptor arrays
    pub has_bindless_descriptors: bool,
}

/// A loaded shader the passes rewrite in place
///
/// Each `run_pass_*` returns whether it modified the module.
pub trait InstrumentationModule {
    fn run_pass_bindless_descriptor(&mut self) -> bool;
    fn run_pass_non_bindless_oob_buffer(&mut self) -> bool;
    fn run_pass_non_bindless_oob_texel_buffer(&mut self) -> bool;
    fn run_pass_buffer_device_address(&mut self) -> bool;
    fn run_pass_ray_query(&mut self) -> bool;
    fn run_pass_post_process_descriptor_indexing(&mut self) -> bool;
    /// Pull in the helper functions the passes above call
    fn link_functions(&mut self);
    /// Rewrite debug printf calls, writing through `output_binding`
    fn run_pass_debug_printf(&mut self, output_binding: u32) -> bool;
    /// Legality cleanup after the passes
    fn post_process(&mut self);
    fn to_binary(&self) -> Vec<u32>;
}

/// Severity of a toolchain diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ToolMessageLevel {
    Fatal,
    InternalError,
    Error,
    Warning,
    Info,
    Debug,
}

/// Diagnostic emitted while optimizing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolMessage {
    pub level: ToolMessageLevel,
    /// Word index the message refers to
    pub position: usize,
    pub text: String,
}

impl ToolMessage {
    pub fn is_error(&self) -> bool {
        self.level <= ToolMessageLevel::Error
    }
}

/// Layout relaxations the validator applies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidatorOptions {
    pub relax_block_layout: bool,
    pub scalar_block_layout: bool,
    pub uniform_buffer_standard_layout: bool,
}

/// Loader, validator and optimizer
pub trait InstrumentationToolchain: Send + Sync {
    fn load_module(
        &self,
        words: &[u32],
        settings: &ModuleSettings,
    ) -> Result<Box<dyn InstrumentationModule>>;

    /// `Err` carries the validator's diagnostic
    fn validate(
        &self,
        words: &[u32],
        target: TargetEnv,
        options: &ValidatorOptions,
    ) -> std::result::Result<(), String>;

    /// Dead-code elimination, reporting diagnostics through `on_message`
    fn eliminate_dead_code(
        &self,
        words: &[u32],
        target: TargetEnv,
        on_message: &mut dyn FnMut(&ToolMessage),
    ) -> std::result::Result<Vec<u32>, String>;
}
