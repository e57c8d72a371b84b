//! In-memory device and toolchain doubles for unit tests
//!
//! Shaders are a SPIR-V header followed by marker words. The mock passes
//! rewrite markers the way the real passes rewrite instructions: validity
//! checks wrap stores in `GUARD_BEGIN`/`GUARD_END`, debug printf turns call
//! markers into `PRINTF_EMIT` stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use rustc_hash::FxHashSet;
use slotmap::{DefaultKey, Key, KeyData, SlotMap};

use crate::bytecode::HEADER_WORDS;
use crate::capabilities::TargetEnv;
use crate::dispatch::DeviceDispatch;
use crate::error::{Error, Result};
use crate::handles::{DescriptorSetLayoutHandle, PipelineHandle, PipelineLayoutHandle, ShaderModuleHandle};
use crate::layout::InstrumentationBinding;
use crate::passes::{InstrumentationModule, InstrumentationToolchain, ModuleSettings, ToolMessage, ValidatorOptions};
use crate::stages::GraphicsPipelineCreateInfo;

pub(crate) const MARK_BINDLESS_ACCESS: u32 = 0xA000_0001;
pub(crate) const MARK_POINTER_ACCESS: u32 = 0xA000_0002;
pub(crate) const MARK_RAY_QUERY: u32 = 0xA000_0003;
pub(crate) const MARK_PRINTF_CALL: u32 = 0xA000_0004;

pub(crate) const GUARD_BEGIN: u32 = 0xB000_0001;
pub(crate) const GUARD_END: u32 = 0xB000_0002;
pub(crate) const PRINTF_EMIT: u32 = 0xB000_0003;
pub(crate) const LINKED_FUNCTION: u32 = 0xB000_0004;
pub(crate) const INDEX_RECORD: u32 = 0xB000_0005;

/// Header followed by `body`
pub(crate) fn shader(body: &[u32]) -> Vec<u32> {
    let mut words = vec![spirv::MAGIC_NUMBER, 0x0001_0300, 0, 16, 0];
    words.extend_from_slice(body);
    words
}

/// Guard nesting depth of each occurrence of `marker`
pub(crate) fn guard_depths(words: &[u32], marker: u32) -> Vec<usize> {
    let mut depth = 0usize;
    let mut depths = Vec::new();
    for &word in words.iter().skip(HEADER_WORDS) {
        match word {
            GUARD_BEGIN => depth += 1,
            GUARD_END => depth = depth.saturating_sub(1),
            w if w == marker => depths.push(depth),
            _ => {}
        }
    }
    depths
}

pub(crate) type CallLog = Arc<Mutex<Vec<&'static str>>>;

// ============================================================================
// TOOLCHAIN
// ============================================================================

pub(crate) struct MockModule {
    header: Vec<u32>,
    body: Vec<u32>,
    calls: CallLog,
}

impl MockModule {
    fn log(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    /// Wrap top-level `marker` words and stores in a guard
    fn guard(&mut self, marker: u32) -> bool {
        let mut depth = 0usize;
        let mut found = false;
        let mut body = Vec::with_capacity(self.body.len());
        for &word in &self.body {
            match word {
                GUARD_BEGIN => depth += 1,
                GUARD_END => depth = depth.saturating_sub(1),
                _ => {}
            }
            if depth == 0 && (word == marker || word == PRINTF_EMIT) {
                found |= word == marker;
                body.extend_from_slice(&[GUARD_BEGIN, word, GUARD_END]);
            } else {
                body.push(word);
            }
        }
        if found {
            self.body = body;
        }
        found
    }
}

impl InstrumentationModule for MockModule {
    fn run_pass_bindless_descriptor(&mut self) -> bool {
        self.log("bindless_descriptor");
        self.guard(MARK_BINDLESS_ACCESS)
    }

    fn run_pass_non_bindless_oob_buffer(&mut self) -> bool {
        self.log("non_bindless_oob_buffer");
        false
    }

    fn run_pass_non_bindless_oob_texel_buffer(&mut self) -> bool {
        self.log("non_bindless_oob_texel_buffer");
        false
    }

    fn run_pass_buffer_device_address(&mut self) -> bool {
        self.log("buffer_device_address");
        self.guard(MARK_POINTER_ACCESS)
    }

    fn run_pass_ray_query(&mut self) -> bool {
        self.log("ray_query");
        self.guard(MARK_RAY_QUERY)
    }

    fn run_pass_post_process_descriptor_indexing(&mut self) -> bool {
        self.log("post_process_descriptor_indexing");
        let mut found = false;
        let mut body = Vec::with_capacity(self.body.len());
        for &word in &self.body {
            body.push(word);
            if word == MARK_BINDLESS_ACCESS {
                body.push(INDEX_RECORD);
                found = true;
            }
        }
        self.body = body;
        found
    }

    fn link_functions(&mut self) {
        self.log("link_functions");
        let needs_helpers = self.body.iter().any(|&w| w == GUARD_BEGIN || w == INDEX_RECORD);
        if needs_helpers && !self.body.contains(&LINKED_FUNCTION) {
            self.body.push(LINKED_FUNCTION);
        }
    }

    fn run_pass_debug_printf(&mut self, _output_binding: u32) -> bool {
        self.log("debug_printf");
        let mut found = false;
        for word in self.body.iter_mut().filter(|w| **w == MARK_PRINTF_CALL) {
            *word = PRINTF_EMIT;
            found = true;
        }
        found
    }

    fn post_process(&mut self) {
        self.log("post_process");
    }

    fn to_binary(&self) -> Vec<u32> {
        let mut words = self.header.clone();
        words.extend_from_slice(&self.body);
        words
    }
}

#[derive(Default)]
pub(crate) struct MockToolchain {
    pub calls: CallLog,
    pub loads: AtomicUsize,
    pub loaded_settings: Mutex<Vec<ModuleSettings>>,
    pub fail_load: bool,
    pub fail_validation: bool,
    pub fail_dce: bool,
    /// Emitted through the DCE message callback
    pub dce_message: Option<ToolMessage>,
}

impl MockToolchain {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl InstrumentationToolchain for MockToolchain {
    fn load_module(&self, words: &[u32], settings: &ModuleSettings) -> Result<Box<dyn InstrumentationModule>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.loaded_settings.lock().unwrap().push(settings.clone());
        if self.fail_load {
            return Err(Error::InvalidShader("truncated module".to_string()));
        }
        Ok(Box::new(MockModule {
            header: words[..HEADER_WORDS].to_vec(),
            body: words[HEADER_WORDS..].to_vec(),
            calls: Arc::clone(&self.calls),
        }))
    }

    fn validate(&self, _words: &[u32], _target: TargetEnv, _options: &ValidatorOptions) -> std::result::Result<(), String> {
        self.calls.lock().unwrap().push("validate");
        if self.fail_validation {
            Err("OpStore pointer is not a storage class".to_string())
        } else {
            Ok(())
        }
    }

    fn eliminate_dead_code(
        &self,
        words: &[u32],
        _target: TargetEnv,
        on_message: &mut dyn FnMut(&ToolMessage),
    ) -> std::result::Result<Vec<u32>, String> {
        self.calls.lock().unwrap().push("eliminate_dead_code");
        if let Some(message) = &self.dce_message {
            on_message(message);
        }
        if self.fail_dce {
            Err("invalid id".to_string())
        } else {
            Ok(words.to_vec())
        }
    }
}

// ============================================================================
// DEVICE
// ============================================================================

#[derive(Debug, Clone)]
pub(crate) enum MockObject {
    SetLayout(Vec<InstrumentationBinding>),
    PipelineLayout(Vec<DescriptorSetLayoutHandle>),
    ShaderModule(Vec<u32>),
    PipelineLibrary(GraphicsPipelineCreateInfo),
}

#[derive(Default)]
pub(crate) struct MockDevice {
    objects: Mutex<SlotMap<DefaultKey, MockObject>>,
    failing: Mutex<FxHashSet<&'static str>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call to `operation` fail
    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    pub fn live_objects(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn object(&self, raw: u64) -> Option<MockObject> {
        let key: DefaultKey = KeyData::from_ffi(raw).into();
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn shader_module_code(&self, module: ShaderModuleHandle) -> Option<Vec<u32>> {
        match self.object(module.as_raw()) {
            Some(MockObject::ShaderModule(code)) => Some(code),
            _ => None,
        }
    }

    fn create(&self, operation: &'static str, object: MockObject) -> Result<u64> {
        if self.failing.lock().unwrap().contains(operation) {
            return Err(Error::BackendError(format!("{} failed", operation)));
        }
        Ok(self.objects.lock().unwrap().insert(object).data().as_ffi())
    }

    fn destroy(&self, raw: u64) {
        let key: DefaultKey = KeyData::from_ffi(raw).into();
        self.objects.lock().unwrap().remove(key);
    }
}

impl DeviceDispatch for MockDevice {
    fn create_descriptor_set_layout(&self, bindings: &[InstrumentationBinding]) -> Result<DescriptorSetLayoutHandle> {
        let operation = if bindings.is_empty() {
            "create_placeholder_layout"
        } else {
            "create_descriptor_set_layout"
        };
        self.create(operation, MockObject::SetLayout(bindings.to_vec()))
            .map(DescriptorSetLayoutHandle::from_raw)
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        self.destroy(layout.as_raw());
    }

    fn create_pipeline_layout(&self, set_layouts: &[DescriptorSetLayoutHandle]) -> Result<PipelineLayoutHandle> {
        self.create("create_pipeline_layout", MockObject::PipelineLayout(set_layouts.to_vec()))
            .map(PipelineLayoutHandle::from_raw)
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) {
        self.destroy(layout.as_raw());
    }

    fn create_shader_module(&self, code: &[u32]) -> Result<ShaderModuleHandle> {
        self.create("create_shader_module", MockObject::ShaderModule(code.to_vec()))
            .map(ShaderModuleHandle::from_raw)
    }

    fn destroy_shader_module(&self, module: ShaderModuleHandle) {
        self.destroy(module.as_raw());
    }

    fn create_graphics_pipeline_library(&self, create_info: &GraphicsPipelineCreateInfo) -> Result<PipelineHandle> {
        self.create("create_graphics_pipeline_library", MockObject::PipelineLibrary(create_info.clone()))
            .map(PipelineHandle::from_raw)
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        self.destroy(pipeline.as_raw());
    }
}
