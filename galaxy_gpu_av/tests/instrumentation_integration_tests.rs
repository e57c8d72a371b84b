//! Integration tests for the shader instrumentation flow
//!
//! These tests drive GpuShaderInstrumentor through the public API only,
//! the way a Vulkan layer would: device setup, layout patching, pipeline
//! and shader object creation, deferred completion and teardown.
//! No GPU required.
//!
//! Run with: cargo test --test instrumentation_integration_tests


use std::collections::BTreeSet;
use std::sync::Arc;
use galaxy_gpu_av::gpuav::{
    shader_hash, CommandBufferHandle, CreationResult, DeferredOperationHandle,
    DeferredOperationQueue, DescriptorSetLayoutHandle, DeviceCapabilities, DeviceDispatch,
    GpuShaderInstrumentor, GraphicsPipelineCreateInfo, InstrumentationToolchain, NoObjectNames,
    PassOutcome, PassPipeline, PipelineBindPoint, PipelineHandle, PipelineLayoutState,
    PipelineShaderStage, RayTracingPipelineCreateInfo, SetLayoutState, Settings,
    ShaderModuleHandle, ShaderObjectCreateInfo, ShaderObjectHandle, ShaderStageFlags,
    SubsystemState, ViolationReport,
};
use serial_test::serial;
use test_utils::*;

const APP_VERTEX_MODULE: ShaderModuleHandle = ShaderModuleHandle::from_raw(0x100);
const APP_FRAGMENT_MODULE: ShaderModuleHandle = ShaderModuleHandle::from_raw(0x101);

struct Layer {
    device: Arc<RecordingDevice>,
    toolchain: Arc<MarkerToolchain>,
    deferred: Arc<DeferredOperationQueue>,
    instrumentor: GpuShaderInstrumentor,
}

fn create_layer(settings: Settings, toolchain: MarkerToolchain) -> Layer {
    let device = Arc::new(RecordingDevice::new());
    let toolchain = Arc::new(toolchain);
    let deferred = Arc::new(DeferredOperationQueue::new());
    let instrumentor = GpuShaderInstrumentor::new(
        settings,
        Arc::clone(&device) as Arc<dyn DeviceDispatch>,
        Arc::clone(&toolchain) as Arc<dyn InstrumentationToolchain>,
        Arc::clone(&deferred),
    );
    instrumentor.post_create_device(DeviceCapabilities::default()).unwrap();
    Layer {
        device,
        toolchain,
        deferred,
        instrumentor,
    }
}

fn app_set_layouts(count: usize) -> Vec<SetLayoutState> {
    (0..count)
        .map(|i| SetLayoutState {
            handle: DescriptorSetLayoutHandle::from_raw(0x200 + i as u64),
            has_bindless: false,
        })
        .collect()
}

fn graphics_pipeline(vertex_body: &[u32], fragment_body: &[u32], set_layouts: usize) -> GraphicsPipelineCreateInfo {
    GraphicsPipelineCreateInfo {
        stages: vec![
            PipelineShaderStage::from_module(ShaderStageFlags::VERTEX, APP_VERTEX_MODULE, shader(vertex_body)),
            PipelineShaderStage::from_module(ShaderStageFlags::FRAGMENT, APP_FRAGMENT_MODULE, shader(fragment_body)),
        ],
        layout: Some(PipelineLayoutState {
            set_layouts: app_set_layouts(set_layouts),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn vertex_only_pipeline(vertex_body: &[u32]) -> GraphicsPipelineCreateInfo {
    let mut create_info = graphics_pipeline(vertex_body, &[], 0);
    create_info.stages.truncate(1);
    create_info
}

// ============================================================================
// END TO END
// ============================================================================

#[test]
fn test_integration_eight_slot_device() {
    let layer = create_layer(Settings::default(), MarkerToolchain::new());
    let reserved_slot = layer.instrumentor.reserved_slot().unwrap();
    assert_eq!(reserved_slot, 7);

    // Layout with 3 application sets gets placeholders up to slot 7
    let app_layouts: Vec<_> = app_set_layouts(3).iter().map(|s| s.handle).collect();
    let patched = layer.instrumentor.pre_create_pipeline_layout(&app_layouts).unwrap();
    let reservation = layer.instrumentor.layout_reservation().unwrap();
    assert_eq!(patched.len(), 8);
    assert_eq!(&patched[..3], app_layouts.as_slice());
    assert!(patched[3..7].iter().all(|&l| l == reservation.placeholder_layout()));
    assert_eq!(patched[7], reservation.instrumentation_layout());

    // Only the vertex stage has anything to check
    let vertex_body = [DESCRIPTOR_ACCESS, 0x1234];
    let create_infos = [graphics_pipeline(&vertex_body, &[0x5678], 3)];
    let state = layer.instrumentor.pre_create_pipelines(&create_infos, "vkCreateGraphicsPipelines");

    let patched_info = &state.create_infos()[0];
    assert_ne!(patched_info.stages[0].module, APP_VERTEX_MODULE);
    assert_eq!(patched_info.stages[1].module, APP_FRAGMENT_MODULE);
    let instrumented = layer.device.module_code(patched_info.stages[0].module).unwrap();
    assert_eq!(check_depths(&instrumented, DESCRIPTOR_ACCESS), vec![1]);
    assert!(instrumented.contains(&HELPER_FUNCTION));

    let metadata = state.metadata(0);
    assert_eq!(metadata.len(), 2);
    let vertex_id = metadata[0].unique_shader_id.unwrap();
    assert!(!metadata[1].is_instrumented());

    let pipeline = PipelineHandle::from_raw(0x900);
    layer.instrumentor.post_create_pipelines(state, &[pipeline]);

    let tracked = layer.instrumentor.registry().get(vertex_id).unwrap();
    assert_eq!(tracked.pipeline, pipeline);
    assert_eq!(tracked.shader_module, APP_VERTEX_MODULE);
    assert_eq!(&*tracked.spirv, shader(&vertex_body).as_slice());

    // Teardown releases everything the layer created
    layer.instrumentor.pre_destroy_pipeline(pipeline);
    assert!(layer.instrumentor.registry().is_empty());
    assert_eq!(layer.device.live_count(), 3);

    layer.instrumentor.pre_destroy_device();
    assert_eq!(layer.device.live_count(), 0);
    assert_eq!(layer.instrumentor.cached_shader_count(), 0);
}

#[test]
fn test_integration_violation_message_points_at_original_code() {
    let layer = create_layer(Settings::default(), MarkerToolchain::new());
    let create_infos = [graphics_pipeline(&[DESCRIPTOR_ACCESS], &[], 0)];
    let state = layer.instrumentor.pre_create_pipelines(&create_infos, "vkCreateGraphicsPipelines");
    let shader_id = state.metadata(0)[0].unique_shader_id.unwrap();
    layer.instrumentor.post_create_pipelines(state, &[PipelineHandle::from_raw(0x900)]);

    let report = ViolationReport {
        command_buffer: CommandBufferHandle::from_raw(0xc0),
        shader_id,
        stage_id: 0,
        stage_info: [3, 1, 0],
        instruction_position: 0,
        bind_point: PipelineBindPoint::Graphics,
        operation_index: 0,
    };
    let message = layer.instrumentor.generate_debug_info_message(&report, &NoObjectNames);

    assert!(message.contains("Stage = Vertex. Vertex Index = 3 Instance Index = 1."));
    assert!(message.contains("0xc0"));
}

#[test]
fn test_integration_destroy_leaves_other_pipelines() {
    let layer = create_layer(Settings::default(), MarkerToolchain::new());
    let first = PipelineHandle::from_raw(0x901);
    let second = PipelineHandle::from_raw(0x902);

    let state = layer
        .instrumentor
        .pre_create_pipelines(&[graphics_pipeline(&[DESCRIPTOR_ACCESS, 1], &[], 0)], "vkCreateGraphicsPipelines");
    let first_id = state.metadata(0)[0].unique_shader_id.unwrap();
    layer.instrumentor.post_create_pipelines(state, &[first]);

    let state = layer
        .instrumentor
        .pre_create_pipelines(&[graphics_pipeline(&[DESCRIPTOR_ACCESS, 2], &[], 0)], "vkCreateGraphicsPipelines");
    let second_id = state.metadata(0)[0].unique_shader_id.unwrap();
    layer.instrumentor.post_create_pipelines(state, &[second]);

    layer.instrumentor.pre_destroy_pipeline(first);

    assert!(layer.instrumentor.registry().get(first_id).is_none());
    assert_eq!(layer.instrumentor.registry().get(second_id).unwrap().pipeline, second);
    assert!(layer.instrumentor.pipeline_instrumentation_data(second).is_some());
}

// ============================================================================
// PASSES
// ============================================================================

#[test]
fn test_integration_instrumented_output_is_stable() {
    let settings = Settings::default();
    let toolchain = MarkerToolchain::new();
    let capabilities = DeviceCapabilities::default();
    let pipeline = PassPipeline::new(&settings, &toolchain, &capabilities, 7);

    let original = shader(&[DESCRIPTOR_ACCESS, POINTER_ACCESS, RAY_QUERY_CALL]);
    let first = match pipeline.run(&original, 1, false).unwrap() {
        PassOutcome::Instrumented(words) => words,
        other => panic!("expected instrumented code, got {:?}", other),
    };

    // Every check is already in place, a second run finds nothing new
    assert_eq!(pipeline.run(&first, 2, false).unwrap(), PassOutcome::Unmodified);
}

#[test]
fn test_integration_pass_order() {
    let settings = Settings {
        debug_printf_enabled: true,
        ..Settings::default()
    };
    let toolchain = MarkerToolchain::new();
    let capabilities = DeviceCapabilities::default();
    let pipeline = PassPipeline::new(&settings, &toolchain, &capabilities, 7);

    pipeline.run(&shader(&[POINTER_ACCESS]), 1, true).unwrap();

    assert_eq!(
        toolchain.passes(),
        vec![
            "bindless_descriptor",
            "non_bindless_oob_buffer",
            "non_bindless_oob_texel_buffer",
            "buffer_device_address",
            "ray_query",
            "post_process_descriptor_indexing",
            "link_functions",
            "debug_printf",
            "post_process",
        ]
    );
}

#[test]
fn test_integration_printf_output_is_not_checked() {
    let settings = Settings {
        debug_printf_enabled: true,
        ..Settings::default()
    };
    let toolchain = MarkerToolchain::new();
    let capabilities = DeviceCapabilities::default();
    let pipeline = PassPipeline::new(&settings, &toolchain, &capabilities, 7);

    let outcome = pipeline.run(&shader(&[DESCRIPTOR_ACCESS, PRINTF_CALL]), 1, false).unwrap();
    let PassOutcome::Instrumented(words) = outcome else {
        panic!("expected instrumented code");
    };

    assert_eq!(check_depths(&words, DESCRIPTOR_ACCESS), vec![1]);
    assert_eq!(check_depths(&words, PRINTF_STORE), vec![0]);
}

// ============================================================================
// SKIPPED PIPELINES
// ============================================================================

#[test]
fn test_integration_full_layout_is_left_alone() {
    let layer = create_layer(Settings::default(), MarkerToolchain::new());
    let create_infos = [graphics_pipeline(&[DESCRIPTOR_ACCESS], &[DESCRIPTOR_ACCESS], 8)];

    let state = layer.instrumentor.pre_create_pipelines(&create_infos, "vkCreateGraphicsPipelines");

    assert_eq!(state.create_infos(), &create_infos);
    assert_eq!(layer.toolchain.load_count(), 0);
    layer.instrumentor.post_create_pipelines(state, &[PipelineHandle::from_raw(0x900)]);
    assert!(layer.instrumentor.registry().is_empty());
    assert_eq!(layer.instrumentor.state(), SubsystemState::Active);
}

#[test]
fn test_integration_shader_using_reserved_set_is_left_alone() {
    let layer = create_layer(Settings::default(), MarkerToolchain::new());
    let mut create_info = graphics_pipeline(&[DESCRIPTOR_ACCESS], &[], 0);
    create_info.active_slots = BTreeSet::from([0, 7]);

    let state = layer.instrumentor.pre_create_pipelines(&[create_info.clone()], "vkCreateGraphicsPipelines");

    assert_eq!(state.create_infos()[0], create_info);
    assert_eq!(layer.toolchain.load_count(), 0);
}

// ============================================================================
// FAILURES
// ============================================================================

#[test]
#[serial]
fn test_integration_validator_rejection_keeps_original() {
    let settings = Settings {
        debug_validate_instrumented_shaders: true,
        ..Settings::default()
    };
    let layer = create_layer(settings, MarkerToolchain::rejecting_validator());
    let create_infos = [graphics_pipeline(&[DESCRIPTOR_ACCESS], &[DESCRIPTOR_ACCESS], 0)];

    let state = layer.instrumentor.pre_create_pipelines(&create_infos, "vkCreateGraphicsPipelines");

    assert_eq!(state.create_infos(), &create_infos);
    assert!(state.metadata(0).iter().all(|m| !m.is_instrumented()));
    assert_eq!(layer.instrumentor.state(), SubsystemState::Disabled);
    // The fragment stage was not attempted once the subsystem went down
    assert_eq!(layer.toolchain.load_count(), 1);

    // Later creations are forwarded untouched
    let later = [graphics_pipeline(&[POINTER_ACCESS], &[], 0)];
    let state = layer.instrumentor.pre_create_pipelines(&later, "vkCreateGraphicsPipelines");
    assert_eq!(state.create_infos(), &later);
    assert_eq!(layer.device.live_count(), 3);
}

#[test]
fn test_integration_failed_pipeline_releases_modules() {
    let layer = create_layer(Settings::default(), MarkerToolchain::new());
    let create_infos = [graphics_pipeline(&[DESCRIPTOR_ACCESS], &[DESCRIPTOR_ACCESS], 0)];
    let state = layer.instrumentor.pre_create_pipelines(&create_infos, "vkCreateGraphicsPipelines");
    assert_eq!(layer.device.live_count(), 5);

    // Driver failed to create the pipeline
    layer.instrumentor.post_create_pipelines(state, &[PipelineHandle::NULL]);

    assert_eq!(layer.device.live_count(), 3);
    assert!(layer.instrumentor.registry().is_empty());
}

// ============================================================================
// SHADER IDS
// ============================================================================

#[test]
fn test_integration_cache_shares_identical_shaders() {
    let layer = create_layer(Settings::default(), MarkerToolchain::new());
    let body = [DESCRIPTOR_ACCESS, 0x42];
    let create_infos = [vertex_only_pipeline(&body), vertex_only_pipeline(&body)];

    let state = layer.instrumentor.pre_create_pipelines(&create_infos, "vkCreateGraphicsPipelines");

    let expected = shader_hash(&shader(&body));
    assert_eq!(state.metadata(0)[0].unique_shader_id, Some(expected));
    assert_eq!(state.metadata(1)[0].unique_shader_id, Some(expected));
    assert_eq!(layer.toolchain.load_count(), 1);
    assert_eq!(layer.instrumentor.cached_shader_count(), 1);

    let first = layer.device.module_code(state.create_infos()[0].stages[0].module).unwrap();
    let second = layer.device.module_code(state.create_infos()[1].stages[0].module).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_integration_counter_ids_without_cache() {
    let settings = Settings {
        cache_instrumented_shaders: false,
        ..Settings::default()
    };
    let layer = create_layer(settings, MarkerToolchain::new());
    let body = [DESCRIPTOR_ACCESS, 0x42];
    let create_infos = [vertex_only_pipeline(&body), vertex_only_pipeline(&body)];

    let state = layer.instrumentor.pre_create_pipelines(&create_infos, "vkCreateGraphicsPipelines");

    assert_eq!(state.metadata(0)[0].unique_shader_id, Some(1));
    assert_eq!(state.metadata(1)[0].unique_shader_id, Some(2));
    assert_eq!(layer.toolchain.load_count(), 2);
    assert_eq!(layer.instrumentor.cached_shader_count(), 0);
}

// ============================================================================
// DEFERRED RAY TRACING PIPELINES
// ============================================================================

#[test]
fn test_integration_deferred_ray_tracing_pipeline() {
    let layer = create_layer(Settings::default(), MarkerToolchain::new());
    let operation = DeferredOperationHandle::from_raw(0xd0);
    let create_infos = [RayTracingPipelineCreateInfo {
        stages: vec![PipelineShaderStage::from_module(
            ShaderStageFlags::RAYGEN,
            APP_VERTEX_MODULE,
            shader(&[RAY_QUERY_CALL]),
        )],
        ..Default::default()
    }];

    // The state tracker seeds the operation before any layer appends
    layer.deferred.seed(operation);
    let state = layer.instrumentor.pre_create_pipelines(&create_infos, "vkCreateRayTracingPipelinesKHR");
    let shader_id = state.metadata(0)[0].unique_shader_id.unwrap();
    layer.instrumentor.post_create_ray_tracing_pipelines(
        state,
        operation,
        CreationResult::OperationDeferred,
        &[PipelineHandle::NULL],
    );
    assert!(layer.instrumentor.registry().get(shader_id).is_none());

    let pipeline = PipelineHandle::from_raw(0x950);
    assert_eq!(layer.deferred.complete(operation, &[pipeline]), 1);

    assert_eq!(layer.instrumentor.registry().get(shader_id).unwrap().pipeline, pipeline);
    assert!(layer.instrumentor.pipeline_instrumentation_data(pipeline).is_some());
    assert!(!layer.deferred.is_pending(operation));
}

// ============================================================================
// SHADER OBJECTS
// ============================================================================

#[test]
fn test_integration_shader_objects() {
    let layer = create_layer(Settings::default(), MarkerToolchain::new());
    let mut create_info = ShaderObjectCreateInfo::new(ShaderStageFlags::COMPUTE, shader(&[POINTER_ACCESS]));
    create_info.set_layouts = app_set_layouts(1);

    let state = layer.instrumentor.pre_create_shaders(&[create_info], "vkCreateShadersEXT");
    let patched = &state.create_infos()[0];
    assert_eq!(patched.set_layouts.len(), 8);
    assert_eq!(check_depths(&patched.code, POINTER_ACCESS), vec![1]);
    let shader_id = state.shader_id(0).unwrap();

    let shader_object = ShaderObjectHandle::from_raw(0xa00);
    layer.instrumentor.post_create_shaders(state, &[shader_object]);
    assert!(layer.instrumentor.was_shader_object_instrumented(shader_object));
    assert_eq!(layer.instrumentor.registry().get(shader_id).unwrap().shader_object, shader_object);

    layer.instrumentor.pre_destroy_shader_object(shader_object);
    assert!(!layer.instrumentor.was_shader_object_instrumented(shader_object));
    assert!(layer.instrumentor.registry().is_empty());
}

// ============================================================================
// REPORTS
// ============================================================================

#[test]
#[serial]
fn test_integration_layout_conflict_warning() {
    let (test_logger, entries) = TestLogger::new();
    galaxy_gpu_av::gpuav::log::set_logger(test_logger);

    let layer = create_layer(Settings::default(), MarkerToolchain::new());
    let app_layouts: Vec<_> = app_set_layouts(8).iter().map(|s| s.handle).collect();
    assert!(layer.instrumentor.pre_create_pipeline_layout(&app_layouts).is_none());

    {
        let captured = entries.lock().unwrap();
        let warning = captured
            .iter()
            .find(|e| e.message_id == Some(galaxy_gpu_av::gpuav::log::INTERNAL_WARNING_ID))
            .expect("no internal warning logged");
        assert!(warning.message.contains("Pipeline layout has 8 descriptor set layouts"));
        assert_eq!(warning.source, "vkCreatePipelineLayout");
    }
    assert_eq!(layer.instrumentor.state(), SubsystemState::Active);

    galaxy_gpu_av::gpuav::log::reset_logger();
}

#[test]
#[serial]
fn test_integration_internal_error_reported_once() {
    let (test_logger, entries) = TestLogger::new();
    galaxy_gpu_av::gpuav::log::set_logger(test_logger);

    let settings = Settings {
        debug_validate_instrumented_shaders: true,
        ..Settings::default()
    };
    let layer = create_layer(settings, MarkerToolchain::rejecting_validator());
    let create_infos = [graphics_pipeline(&[DESCRIPTOR_ACCESS], &[], 0)];
    layer.instrumentor.pre_create_pipelines(&create_infos, "vkCreateGraphicsPipelines");
    layer
        .instrumentor
        .validate_cmd_wait_events(CommandBufferHandle::from_raw(0xc0), galaxy_gpu_av::gpuav::PipelineStageFlags::HOST, "vkCmdWaitEvents");

    {
        let captured = entries.lock().unwrap();
        let errors: Vec<_> = captured
            .iter()
            .filter(|e| e.message_id == Some(galaxy_gpu_av::gpuav::log::INTERNAL_ERROR_ID))
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.starts_with("Internal Error, GPU-AV is being disabled."));
        assert!(errors[0].message.contains("ID 12 has not been defined"));
        assert_eq!(errors[0].source, "vkCreateGraphicsPipelines::pCreateInfos[0]");
    }

    galaxy_gpu_av::gpuav::log::reset_logger();
}

#[test]
#[serial]
fn test_integration_debug_printf_only_report_ids() {
    let (test_logger, entries) = TestLogger::new();
    galaxy_gpu_av::gpuav::log::set_logger(test_logger);

    let settings = Settings {
        debug_validate_instrumented_shaders: true,
        ..Settings::debug_printf_only()
    };
    let layer = create_layer(settings, MarkerToolchain::rejecting_validator());
    let create_infos = [graphics_pipeline(&[PRINTF_CALL], &[], 0)];
    layer.instrumentor.pre_create_pipelines(&create_infos, "vkCreateGraphicsPipelines");

    {
        let captured = entries.lock().unwrap();
        let error = captured
            .iter()
            .find(|e| e.message_id == Some(galaxy_gpu_av::gpuav::log::DEBUG_PRINTF_ERROR_ID))
            .expect("no debug printf error logged");
        assert!(error.message.starts_with("Internal Error, DebugPrintf is being disabled."));
    }

    galaxy_gpu_av::gpuav::log::reset_logger();
}
