//! GPU shader instrumentor
//!
//! Entry points the host layer calls around shader, pipeline and layout
//! creation. Pre-call hooks return patched copies of the create infos to
//! forward to the driver; post-call hooks record what was instrumented once
//! real handles exist.
//!
//! # Flow for one pipeline
//!
//! ```text
//! pre_create_pipelines ──> eligibility ──> per stage: id ─> cache ─> passes
//!        │                                        │
//!        │                                 replace module / inline code
//!        ▼
//! host forwards create_infos() to the driver
//!        ▼
//! post_create_pipelines ──> registry (now, or when the deferred op completes)
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::bytecode::{has_spirv_magic, shader_hash, ShaderId};
use crate::cache::InstrumentationCache;
use crate::capabilities::DeviceCapabilities;
use crate::context::{InstrumentationContext, SubsystemState};
use crate::deferred::DeferredOperationQueue;
use crate::diagnostics::{self, ObjectNameLookup, ViolationReport};
use crate::dispatch::DeviceDispatch;
use crate::error::{Error, Result};
use crate::handles::{
    CommandBufferHandle, DeferredOperationHandle, DescriptorSetLayoutHandle, PipelineHandle,
    PipelineLayoutHandle, ShaderModuleHandle, ShaderObjectHandle,
};
use crate::instrument::{PassOutcome, PassPipeline};
use crate::layout::{
    advertised_descriptor_set_limit, reserved_slot_for_limit, LayoutPatch, LayoutReservation,
    INSTRUMENTATION_BINDINGS,
};
use crate::passes::InstrumentationToolchain;
use crate::registry::InstrumentedShaderRegistry;
use crate::settings::Settings;
use crate::stages::{
    PipelineCreateFlags, PipelineCreateInfo, PipelineShaderStage, PipelineStageFlags,
    PipelineStages, SetLayoutState, ShaderObjectCreateInfo,
};
use crate::{gpuav_debug, gpuav_error, gpuav_info};

const SOURCE: &str = "gpuav::Instrumentor";

/// What the instrumentor did with one stage of a pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderInstrumentationMetadata {
    /// Set when the stage now runs instrumented code
    pub unique_shader_id: Option<ShaderId>,
    /// The code was inlined in the stage create info
    pub passed_in_shader_stage_ci: bool,
    /// Module of the original stage
    pub shader_module: ShaderModuleHandle,
    pub original_spirv: Option<Arc<[u32]>>,
    /// Library the stage belongs to when linking pipeline libraries
    pub library: Option<PipelineHandle>,
}

impl ShaderInstrumentationMetadata {
    pub fn is_instrumented(&self) -> bool {
        self.unique_shader_id.is_some()
    }
}

/// Objects the instrumentor created for one pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineInstrumentationData {
    pub instrumented_shader_modules: Vec<ShaderModuleHandle>,
    /// Re-created pre-rasterization shader library
    pub pre_raster_library: PipelineHandle,
    /// Re-created fragment shader library
    pub fragment_library: PipelineHandle,
    pub was_instrumented: bool,
}

impl PipelineInstrumentationData {
    fn is_empty(&self) -> bool {
        self.instrumented_shader_modules.is_empty()
            && self.pre_raster_library.is_null()
            && self.fragment_library.is_null()
            && !self.was_instrumented
    }
}

/// Patched create infos of one pipeline creation call, carried from the
/// pre-call hook to the post-call hook
pub struct PipelineCreationState<C> {
    create_infos: Vec<C>,
    metadata: Vec<Vec<ShaderInstrumentationMetadata>>,
    pipeline_data: Vec<PipelineInstrumentationData>,
}

impl<C> PipelineCreationState<C> {
    /// Create infos to forward to the driver
    pub fn create_infos(&self) -> &[C] {
        &self.create_infos
    }

    /// Per-stage metadata of pipeline `index`, in linear stage order
    /// (library stages first)
    pub fn metadata(&self, index: usize) -> &[ShaderInstrumentationMetadata] {
        self.metadata.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn pipeline_data(&self, index: usize) -> Option<&PipelineInstrumentationData> {
        self.pipeline_data.get(index)
    }
}

/// Patched create infos of one shader object creation call
pub struct ShaderObjectCreationState {
    create_infos: Vec<ShaderObjectCreateInfo>,
    instrumented: Vec<Option<(ShaderId, Arc<[u32]>)>>,
}

impl ShaderObjectCreationState {
    pub fn create_infos(&self) -> &[ShaderObjectCreateInfo] {
        &self.create_infos
    }

    /// Id of shader object `index` when it was instrumented
    pub fn shader_id(&self, index: usize) -> Option<ShaderId> {
        self.instrumented.get(index).and_then(|i| i.as_ref()).map(|(id, _)| *id)
    }
}

/// Outcome of a pipeline creation call as reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationResult {
    Success,
    /// Creation continues on a deferred operation
    OperationDeferred,
    Failed,
}

struct DeviceResources {
    capabilities: DeviceCapabilities,
    reservation: LayoutReservation,
    pipeline_layout: PipelineLayoutHandle,
}

type PipelineDataMap = FxHashMap<PipelineHandle, PipelineInstrumentationData>;

/// Moves pipeline metadata into the registry once handles exist
///
/// Cloned into deferred-operation continuations.
#[derive(Clone)]
struct PipelineRecorder {
    registry: Arc<InstrumentedShaderRegistry>,
    pipeline_data: Arc<Mutex<PipelineDataMap>>,
    dispatch: Arc<dyn DeviceDispatch>,
}

impl PipelineRecorder {
    fn record(
        &self,
        pipelines: &[PipelineHandle],
        metadata: Vec<Vec<ShaderInstrumentationMetadata>>,
        pipeline_data: Vec<PipelineInstrumentationData>,
        register: bool,
    ) {
        for (index, (stages, mut data)) in metadata.into_iter().zip(pipeline_data).enumerate() {
            let pipeline = pipelines.get(index).copied().unwrap_or(PipelineHandle::NULL);
            if pipeline.is_null() {
                // Creation failed, nothing will use what was made for it
                self.release(data);
                continue;
            }

            if register {
                for stage in stages.iter().filter(|s| s.is_instrumented()) {
                    let (Some(id), Some(spirv)) = (stage.unique_shader_id, stage.original_spirv.clone()) else {
                        continue;
                    };
                    data.was_instrumented = true;
                    let shader_module = if stage.shader_module.is_null() && stage.passed_in_shader_stage_ci {
                        ShaderModuleHandle::PIPELINE_STAGE_INFO
                    } else {
                        stage.shader_module
                    };
                    self.registry.insert_or_assign(
                        id,
                        stage.library.unwrap_or(pipeline),
                        shader_module,
                        ShaderObjectHandle::NULL,
                        spirv,
                    );
                }
            }

            if !data.is_empty() {
                self.pipeline_data
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(pipeline, data);
            }
        }
    }

    fn release(&self, data: PipelineInstrumentationData) {
        for module in data.instrumented_shader_modules {
            self.dispatch.destroy_shader_module(module);
        }
        for library in [data.pre_raster_library, data.fragment_library] {
            if !library.is_null() {
                self.dispatch.destroy_pipeline(library);
            }
        }
    }
}

/// Shader instrumentation orchestrator for one device
pub struct GpuShaderInstrumentor {
    context: InstrumentationContext,
    dispatch: Arc<dyn DeviceDispatch>,
    toolchain: Arc<dyn InstrumentationToolchain>,
    device: RwLock<Option<Arc<DeviceResources>>>,
    cache: RwLock<InstrumentationCache>,
    registry: Arc<InstrumentedShaderRegistry>,
    deferred_operations: Arc<DeferredOperationQueue>,
    next_shader_id: AtomicU32,
    selected_shader_modules: RwLock<FxHashSet<ShaderModuleHandle>>,
    pipeline_data: Arc<Mutex<PipelineDataMap>>,
    instrumented_shader_objects: Mutex<FxHashSet<ShaderObjectHandle>>,
}

impl GpuShaderInstrumentor {
    /// `deferred_operations` is shared with the state tracker, which seeds
    /// a list for every deferred operation it sees
    pub fn new(
        settings: Settings,
        dispatch: Arc<dyn DeviceDispatch>,
        toolchain: Arc<dyn InstrumentationToolchain>,
        deferred_operations: Arc<DeferredOperationQueue>,
    ) -> Self {
        Self {
            context: InstrumentationContext::new(settings),
            dispatch,
            toolchain,
            device: RwLock::new(None),
            cache: RwLock::new(InstrumentationCache::new()),
            registry: Arc::new(InstrumentedShaderRegistry::new()),
            deferred_operations,
            next_shader_id: AtomicU32::new(1),
            selected_shader_modules: RwLock::new(FxHashSet::default()),
            pipeline_data: Arc::new(Mutex::new(FxHashMap::default())),
            instrumented_shader_objects: Mutex::new(FxHashSet::default()),
        }
    }

    // ===== ACCESSORS =====

    pub fn context(&self) -> &InstrumentationContext {
        &self.context
    }

    pub fn settings(&self) -> &Settings {
        self.context.settings()
    }

    pub fn state(&self) -> SubsystemState {
        self.context.state()
    }

    pub fn registry(&self) -> &Arc<InstrumentedShaderRegistry> {
        &self.registry
    }

    pub fn deferred_operations(&self) -> &Arc<DeferredOperationQueue> {
        &self.deferred_operations
    }

    /// Slot the instrumentation descriptor set binds to, once the device is set up
    pub fn reserved_slot(&self) -> Option<u32> {
        self.device_resources().map(|d| d.reservation.reserved_slot())
    }

    pub fn layout_reservation(&self) -> Option<LayoutReservation> {
        self.device_resources().map(|d| d.reservation)
    }

    /// Pipeline layout used to bind the instrumentation set on its own
    pub fn instrumentation_pipeline_layout(&self) -> PipelineLayoutHandle {
        self.device_resources()
            .map(|d| d.pipeline_layout)
            .unwrap_or(PipelineLayoutHandle::NULL)
    }

    pub fn cached_shader_count(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn pipeline_instrumentation_data(&self, pipeline: PipelineHandle) -> Option<PipelineInstrumentationData> {
        self.pipeline_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&pipeline)
            .cloned()
    }

    pub fn was_shader_object_instrumented(&self, shader_object: ShaderObjectHandle) -> bool {
        self.instrumented_shader_objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&shader_object)
    }

    fn device_resources(&self) -> Option<Arc<DeviceResources>> {
        self.device.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn recorder(&self) -> PipelineRecorder {
        PipelineRecorder {
            registry: Arc::clone(&self.registry),
            pipeline_data: Arc::clone(&self.pipeline_data),
            dispatch: Arc::clone(&self.dispatch),
        }
    }

    // ===== DEVICE =====

    /// Check features, pick the reserved slot and create the internal layouts
    ///
    /// Any failure disables the subsystem for this device.
    pub fn post_create_device(&self, capabilities: DeviceCapabilities) -> Result<()> {
        const LOCATION: &str = "vkCreateDevice";
        if !self.context.is_active() {
            return Err(Error::SubsystemDisabled);
        }

        if let Some(feature) = capabilities.missing_required_features().first() {
            let stage = if *feature == "fragmentStoresAndAtomics" { "fragment" } else { "vertex" };
            let message = format!(
                "GPU Shader Instrumentation requires {} to allow writing out data inside the {} shader.",
                feature, stage
            );
            self.context.internal_error(LOCATION, &message);
            return Err(Error::InitializationFailed(message));
        }

        let reserved_slot = match reserved_slot_for_limit(capabilities.max_bound_descriptor_sets) {
            Ok(slot) => slot,
            Err(e) => {
                self.context.internal_error(LOCATION, &e.to_string());
                return Err(e);
            }
        };

        let instrumentation_layout = match self.dispatch.create_descriptor_set_layout(&INSTRUMENTATION_BINDINGS) {
            Ok(layout) => layout,
            Err(e) => {
                return Err(self.device_setup_failed("vkCreateDescriptorSetLayout failed for internal descriptor set", e));
            }
        };

        let placeholder_layout = match self.dispatch.create_descriptor_set_layout(&[]) {
            Ok(layout) => layout,
            Err(e) => {
                self.dispatch.destroy_descriptor_set_layout(instrumentation_layout);
                return Err(self.device_setup_failed("vkCreateDescriptorSetLayout failed for internal dummy descriptor set", e));
            }
        };

        let reservation = LayoutReservation::new(reserved_slot, placeholder_layout, instrumentation_layout);
        let pipeline_layout = match self.dispatch.create_pipeline_layout(&reservation.internal_set_layouts()) {
            Ok(layout) => layout,
            Err(e) => {
                self.dispatch.destroy_descriptor_set_layout(placeholder_layout);
                self.dispatch.destroy_descriptor_set_layout(instrumentation_layout);
                return Err(self.device_setup_failed("vkCreatePipelineLayout failed for internal pipeline layout", e));
            }
        };

        *self.device.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(DeviceResources {
            capabilities,
            reservation,
            pipeline_layout,
        }));

        gpuav_info!(SOURCE, "Instrumentation descriptor set reserved at slot {}", reserved_slot);
        Ok(())
    }

    fn device_setup_failed(&self, message: &str, cause: Error) -> Error {
        self.context
            .internal_error("vkCreateDevice", &format!("{} ({})", message, cause));
        Error::InitializationFailed(message.to_string())
    }

    /// Destroy the internal layouts
    pub fn pre_destroy_device(&self) {
        let resources = self.device.write().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(resources) = resources {
            self.dispatch.destroy_pipeline_layout(resources.pipeline_layout);
            self.dispatch
                .destroy_descriptor_set_layout(resources.reservation.instrumentation_layout());
            self.dispatch
                .destroy_descriptor_set_layout(resources.reservation.placeholder_layout());
        }
        self.cache.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Adjust a `maxBoundDescriptorSets` query result
    pub fn reserve_binding_slot(&self, max_bound_descriptor_sets: &mut u32) {
        let (limit, warnings) = advertised_descriptor_set_limit(
            *max_bound_descriptor_sets,
            self.settings().reserve_binding_slot,
        );
        for warning in warnings {
            self.context.internal_warning("vkGetPhysicalDeviceProperties", &warning);
        }
        *max_bound_descriptor_sets = limit;
    }

    // ===== PIPELINE LAYOUTS =====

    /// Set layouts to create the pipeline layout with instead of the
    /// application's, `None` to forward them unchanged
    pub fn pre_create_pipeline_layout(
        &self,
        set_layouts: &[DescriptorSetLayoutHandle],
    ) -> Option<Vec<DescriptorSetLayoutHandle>> {
        if !self.context.is_instrumenting() {
            return None;
        }
        let device = self.device_resources()?;
        match device.reservation.patch_set_layouts(set_layouts) {
            LayoutPatch::Patched(patched) => Some(patched),
            LayoutPatch::Conflict { set_layout_count } => {
                let message = device
                    .reservation
                    .conflict_message("Pipeline layout", set_layout_count);
                self.context.internal_warning("vkCreatePipelineLayout", &message);
                None
            }
        }
    }

    /// A patched layout the driver refused leaves every later pipeline
    /// without a usable instrumentation slot
    pub fn post_create_pipeline_layout(&self, patched: bool, result: &Result<PipelineLayoutHandle>) {
        if patched && result.is_err() {
            self.context
                .internal_error("vkCreatePipelineLayout", "Unable to create pipeline layout.");
        }
    }

    // ===== SHADER MODULES =====

    pub fn post_create_shader_module(&self, module: ShaderModuleHandle, selective_instrumentation: bool) {
        if self.settings().select_instrumented_shaders && selective_instrumentation {
            self.selected_shader_modules
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(module);
        }
    }

    pub fn pre_destroy_shader_module(&self, module: ShaderModuleHandle) {
        let _lock = self.context.write_lock();
        self.registry.erase_shader_module(module);
        self.selected_shader_modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&module);
    }

    // ===== SHADER INSTRUMENTATION =====

    fn assign_shader_id(&self, spirv: &[u32]) -> ShaderId {
        if self.settings().cache_instrumented_shaders {
            shader_hash(spirv)
        } else {
            self.next_shader_id.fetch_add(1, Ordering::Relaxed)
        }
    }

    /// Instrumented code for `spirv`, from the cache or the passes
    ///
    /// `None` keeps the original code. Pass failures disable the subsystem.
    fn instrument_code(
        &self,
        spirv: &[u32],
        has_bindless_descriptors: bool,
        location: &str,
    ) -> Option<(ShaderId, Vec<u32>)> {
        // An earlier stage of the same call may have disabled the subsystem
        if !self.context.is_instrumenting() {
            return None;
        }
        // Non-SPIR-V code never consumes an id
        if !has_spirv_magic(spirv) {
            return None;
        }
        let device = self.device_resources()?;
        let id = self.assign_shader_id(spirv);
        let use_cache = self.settings().cache_instrumented_shaders;

        if use_cache {
            let cached = self.cache.read().unwrap_or_else(PoisonError::into_inner).get(id);
            if let Some(cached) = cached {
                gpuav_debug!(SOURCE, "Shader {} found in instrumentation cache", id);
                return Some((id, cached.to_vec()));
            }
        }

        let pipeline = PassPipeline::new(
            self.settings(),
            self.toolchain.as_ref(),
            &device.capabilities,
            device.reservation.reserved_slot(),
        );
        match pipeline.run(spirv, id, has_bindless_descriptors) {
            Ok(PassOutcome::Instrumented(instrumented)) => {
                if use_cache {
                    self.cache
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .add(id, instrumented.as_slice());
                }
                Some((id, instrumented))
            }
            Ok(PassOutcome::Unmodified) | Ok(PassOutcome::NotSpirv) => None,
            Err(e) => {
                let details = match e {
                    Error::InstrumentationFailed(message) => message,
                    other => other.to_string(),
                };
                self.context.internal_error(location, &details);
                None
            }
        }
    }

    fn is_stage_selected(&self, stage: &PipelineShaderStage) -> bool {
        if !self.settings().select_instrumented_shaders {
            return true;
        }
        match &stage.inline_code {
            Some(inline) if stage.module.is_null() => inline.selective_instrumentation,
            _ => self
                .selected_shader_modules
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&stage.module),
        }
    }

    /// Pipelines whose layout or shaders already claim the reserved slot,
    /// libraries, and pipelines without stages are left alone
    fn needs_pipeline_instrumentation<C: PipelineCreateInfo>(&self, create_info: &C, reserved_slot: u32) -> bool {
        if create_info.total_stage_count() == 0 {
            return false;
        }
        // Instrumented at final link time
        if create_info.flags().contains(PipelineCreateFlags::LIBRARY) {
            return false;
        }
        if create_info.active_slots().contains(&reserved_slot) {
            return false;
        }
        if create_info
            .layout()
            .is_some_and(|layout| layout.set_layouts.len() > reserved_slot as usize)
        {
            return false;
        }
        true
    }

    /// Instrument every stage of `stages`, appending one metadata entry per
    /// stage in order
    fn instrument_stages<S: PipelineStages>(
        &self,
        stages: &mut S,
        library: Option<PipelineHandle>,
        has_bindless_descriptors: bool,
        location: &str,
        metadata: &mut Vec<ShaderInstrumentationMetadata>,
        created_modules: &mut Vec<ShaderModuleHandle>,
    ) {
        for index in 0..stages.stage_count() {
            let (module, has_inline_code, spirv, selected) = {
                let stage = stages.stage_at(index);
                (
                    stage.module,
                    stage.inline_code.is_some(),
                    stage.spirv.clone(),
                    self.is_stage_selected(stage),
                )
            };
            let mut stage_metadata = ShaderInstrumentationMetadata {
                shader_module: module,
                original_spirv: spirv.clone(),
                library,
                ..Default::default()
            };

            let instrumented = match spirv {
                Some(spirv) if selected => self.instrument_code(&spirv, has_bindless_descriptors, location),
                _ => None,
            };

            if let Some((id, code)) = instrumented {
                if !module.is_null() {
                    match self.dispatch.create_shader_module(&code) {
                        Ok(instrumented_module) => {
                            stages.set_stage_module(index, instrumented_module);
                            created_modules.push(instrumented_module);
                            stage_metadata.unique_shader_id = Some(id);
                        }
                        Err(_) => self.context.internal_error(
                            location,
                            "Unable to replace non-instrumented shader with instrumented one.",
                        ),
                    }
                } else if has_inline_code {
                    stages.set_stage_code(index, code);
                    stage_metadata.passed_in_shader_stage_ci = true;
                    stage_metadata.unique_shader_id = Some(id);
                } else {
                    gpuav_error!(SOURCE, "{}: stage {} has neither a shader module nor inlined code", location, index);
                }
            }

            metadata.push(stage_metadata);
        }
    }

    /// Instrument the stages of every linked library and swap in re-created
    /// libraries
    fn instrument_linked_libraries<C: PipelineCreateInfo>(
        &self,
        create_info: &mut C,
        has_bindless_descriptors: bool,
        location: &str,
        metadata: &mut Vec<ShaderInstrumentationMetadata>,
        data: &mut PipelineInstrumentationData,
    ) {
        let Some(libraries) = create_info.libraries_mut() else {
            return;
        };

        for library in libraries.iter_mut() {
            if library.create_info.stage_count() == 0 {
                continue;
            }

            let mut library_create_info = library.create_info.clone();
            self.instrument_stages(
                &mut library_create_info,
                Some(library.handle),
                has_bindless_descriptors,
                location,
                metadata,
                &mut data.instrumented_shader_modules,
            );

            match self.dispatch.create_graphics_pipeline_library(&library_create_info) {
                Ok(new_library) => {
                    if library.has_fragment_stage() {
                        data.fragment_library = new_library;
                    } else {
                        data.pre_raster_library = new_library;
                    }
                    library.handle = new_library;
                    library.create_info = library_create_info;
                }
                Err(_) => self.context.internal_error(
                    location,
                    "Unable to re-create pipeline library with instrumented shaders.",
                ),
            }
        }
    }

    // ===== PIPELINES =====

    /// Copy `create_infos` and instrument the copies
    pub fn pre_create_pipelines<C: PipelineCreateInfo>(
        &self,
        create_infos: &[C],
        location: &str,
    ) -> PipelineCreationState<C> {
        let mut state = PipelineCreationState {
            create_infos: create_infos.to_vec(),
            metadata: create_infos.iter().map(|_| Vec::new()).collect(),
            pipeline_data: create_infos.iter().map(|_| PipelineInstrumentationData::default()).collect(),
        };
        if !self.context.is_instrumenting() {
            return state;
        }
        let Some(device) = self.device_resources() else {
            return state;
        };
        let _lock = self.context.read_lock();
        let reserved_slot = device.reservation.reserved_slot();

        for (index, create_info) in state.create_infos.iter_mut().enumerate() {
            if !self.needs_pipeline_instrumentation(create_info, reserved_slot) {
                continue;
            }
            let location = format!("{}::pCreateInfos[{}]", location, index);
            let has_bindless_descriptors = create_info.has_bindless_descriptors();
            let metadata = &mut state.metadata[index];
            let data = &mut state.pipeline_data[index];

            self.instrument_linked_libraries(create_info, has_bindless_descriptors, &location, metadata, data);
            self.instrument_stages(
                create_info,
                None,
                has_bindless_descriptors,
                &location,
                metadata,
                &mut data.instrumented_shader_modules,
            );

            gpuav_debug!(
                SOURCE,
                "{}: instrumented {} of {} stages",
                location,
                metadata.iter().filter(|m| m.is_instrumented()).count(),
                metadata.len()
            );
        }
        state
    }

    /// Record instrumented stages against the created pipelines
    ///
    /// `pipelines[i]` is null when creating pipeline `i` failed.
    pub fn post_create_pipelines<C>(&self, state: PipelineCreationState<C>, pipelines: &[PipelineHandle]) {
        self.recorder().record(
            pipelines,
            state.metadata,
            state.pipeline_data,
            self.context.is_instrumenting(),
        );
    }

    /// Same as `post_create_pipelines`, but waits for `deferred_operation`
    /// when the driver deferred the creation
    pub fn post_create_ray_tracing_pipelines<C: PipelineCreateInfo>(
        &self,
        state: PipelineCreationState<C>,
        deferred_operation: DeferredOperationHandle,
        result: CreationResult,
        pipelines: &[PipelineHandle],
    ) {
        if deferred_operation.is_null() || result != CreationResult::OperationDeferred {
            self.post_create_pipelines(state, pipelines);
            return;
        }

        let recorder = self.recorder();
        if !self.deferred_operations.is_pending(deferred_operation) {
            // No list to run on completion, so the per-pipeline objects
            // would never be recorded or destroyed
            let e = Error::DeferredOperationNotTracked(deferred_operation.as_raw());
            gpuav_error!(SOURCE, "vkCreateRayTracingPipelinesKHR: {}", e);
            for data in state.pipeline_data {
                recorder.release(data);
            }
            return;
        }

        let register = self.context.is_instrumenting();
        let PipelineCreationState { metadata, pipeline_data, .. } = state;
        let continuation = Box::new(move |pipelines: &[PipelineHandle]| {
            recorder.record(pipelines, metadata, pipeline_data, register);
        });

        if let Err(e) = self.deferred_operations.append(deferred_operation, continuation) {
            gpuav_error!(SOURCE, "vkCreateRayTracingPipelinesKHR: {}", e);
        }
    }

    pub fn pre_destroy_pipeline(&self, pipeline: PipelineHandle) {
        let _lock = self.context.write_lock();
        self.registry.erase_pipeline(pipeline);
        let data = self
            .pipeline_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&pipeline);
        if let Some(data) = data {
            self.recorder().release(data);
        }
    }

    // ===== SHADER OBJECTS =====

    /// Copy `create_infos`, patch their set layouts and instrument their code
    pub fn pre_create_shaders(
        &self,
        create_infos: &[ShaderObjectCreateInfo],
        location: &str,
    ) -> ShaderObjectCreationState {
        let mut state = ShaderObjectCreationState {
            create_infos: create_infos.to_vec(),
            instrumented: vec![None; create_infos.len()],
        };
        if !self.context.is_instrumenting() {
            return state;
        }
        let Some(device) = self.device_resources() else {
            return state;
        };
        let _lock = self.context.read_lock();

        for (index, create_info) in state.create_infos.iter_mut().enumerate() {
            let location = format!("{}::pCreateInfos[{}]", location, index);
            let has_bindless_descriptors = create_info.has_bindless_descriptors();
            let handles: Vec<_> = create_info.set_layouts.iter().map(|s| s.handle).collect();

            match device.reservation.patch_set_layouts(&handles) {
                LayoutPatch::Patched(patched) => {
                    let added = patched[handles.len()..]
                        .iter()
                        .map(|&handle| SetLayoutState { handle, has_bindless: false });
                    create_info.set_layouts.extend(added);
                }
                LayoutPatch::Conflict { set_layout_count } => {
                    let message = device.reservation.conflict_message("Shader object", set_layout_count);
                    self.context.internal_warning(&location, &message);
                    continue;
                }
            }

            if self.settings().select_instrumented_shaders && !create_info.selective_instrumentation {
                continue;
            }

            if let Some((id, code)) = self.instrument_code(&create_info.code, has_bindless_descriptors, &location) {
                state.instrumented[index] = Some((id, Arc::from(code.as_slice())));
                create_info.code = code;
            }
        }
        state
    }

    /// Register instrumented shader objects
    pub fn post_create_shaders(&self, state: ShaderObjectCreationState, shaders: &[ShaderObjectHandle]) {
        if !self.context.is_instrumenting() {
            return;
        }
        for (index, instrumented) in state.instrumented.into_iter().enumerate() {
            let Some((id, spirv)) = instrumented else {
                continue;
            };
            let shader = shaders.get(index).copied().unwrap_or(ShaderObjectHandle::NULL);
            if shader.is_null() {
                continue;
            }
            self.instrumented_shader_objects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(shader);
            self.registry.insert_or_assign(
                id,
                PipelineHandle::NULL,
                ShaderModuleHandle::NULL,
                shader,
                spirv,
            );
        }
    }

    pub fn pre_destroy_shader_object(&self, shader: ShaderObjectHandle) {
        let _lock = self.context.write_lock();
        self.registry.erase_shader_object(shader);
        self.instrumented_shader_objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&shader);
    }

    // ===== COMMANDS =====

    /// Waiting on a host-signaled event inside an instrumented submission can
    /// deadlock, report it. Never skips the call.
    pub fn validate_cmd_wait_events(
        &self,
        command_buffer: CommandBufferHandle,
        src_stage_mask: PipelineStageFlags,
        location: &str,
    ) -> bool {
        if src_stage_mask.contains(PipelineStageFlags::HOST) {
            let message = format!(
                "{}: recorded with VK_PIPELINE_STAGE_HOST_BIT set (command buffer {:#x}). GPU-Assisted validation \
                 waits on queue completion. This wait could block the host's signaling of this event, resulting in deadlock.",
                location,
                command_buffer.as_raw()
            );
            self.context.internal_error(location, &message);
        }
        false
    }

    // ===== DIAGNOSTICS =====

    /// Human readable text for a violation reported by an instrumented shader
    pub fn generate_debug_info_message(&self, report: &ViolationReport, names: &dyn ObjectNameLookup) -> String {
        let shader = self.registry.get(report.shader_id);
        diagnostics::generate_debug_info_message(
            report,
            shader.as_ref(),
            names,
            self.settings().debug_printf_only,
        )
    }
}

#[cfg(test)]
#[path = "instrumentor_tests.rs"]
mod tests;
