/// VulkanDeviceDispatch - DeviceDispatch implementation over an ash::Device
///
/// Creates the objects the instrumentor needs for itself: the instrumentation
/// and placeholder set layouts, the internal pipeline layout, instrumented
/// shader modules, and re-created graphics pipeline libraries.

use std::ffi::CString;
use ash::vk;
use galaxy_gpu_av::gpuav::{
    DescriptorSetLayoutHandle, DeviceDispatch, Error, GraphicsPipelineCreateInfo,
    InstrumentationBinding, PipelineHandle, PipelineLayoutHandle, Result, ShaderModuleHandle,
    ShaderStageFlags,
};
use galaxy_gpu_av::{gpuav_debug, gpuav_err};

use crate::vulkan_convert::{
    descriptor_set_layout_from_vk, descriptor_set_layout_to_vk, instrumentation_binding_to_vk,
    pipeline_create_flags_to_vk, pipeline_from_vk, pipeline_layout_from_vk, pipeline_layout_to_vk,
    pipeline_to_vk, shader_module_from_vk, shader_module_to_vk, stage_flags_to_vk,
};

const SOURCE: &str = "gpuav::vulkan";

/// Dynamic states of re-created libraries, everything else uses defaults
const LIBRARY_DYNAMIC_STATES: [vk::DynamicState; 2] = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];

/// Forwards instrumentor-owned object creation to the next layer / driver
pub struct VulkanDeviceDispatch {
    /// Vulkan logical device
    device: ash::Device,
    /// Pipeline cache used when re-creating libraries
    pipeline_cache: vk::PipelineCache,
}

impl VulkanDeviceDispatch {
    pub fn new(device: ash::Device) -> Self {
        Self {
            device,
            pipeline_cache: vk::PipelineCache::null(),
        }
    }

    /// Use `pipeline_cache` when re-creating pipeline libraries
    pub fn with_pipeline_cache(mut self, pipeline_cache: vk::PipelineCache) -> Self {
        self.pipeline_cache = pipeline_cache;
        self
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }
}

impl DeviceDispatch for VulkanDeviceDispatch {
    fn create_descriptor_set_layout(&self, bindings: &[InstrumentationBinding]) -> Result<DescriptorSetLayoutHandle> {
        let vk_bindings: Vec<_> = bindings.iter().map(instrumentation_binding_to_vk).collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);

        let layout = unsafe { self.device.create_descriptor_set_layout(&create_info, None) }
            .map_err(|e| gpuav_err!(SOURCE, "vkCreateDescriptorSetLayout failed: {:?}", e))?;
        Ok(descriptor_set_layout_from_vk(layout))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        unsafe {
            self.device
                .destroy_descriptor_set_layout(descriptor_set_layout_to_vk(layout), None);
        }
    }

    fn create_pipeline_layout(&self, set_layouts: &[DescriptorSetLayoutHandle]) -> Result<PipelineLayoutHandle> {
        let vk_set_layouts: Vec<_> = set_layouts.iter().copied().map(descriptor_set_layout_to_vk).collect();
        let create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&vk_set_layouts);

        let layout = unsafe { self.device.create_pipeline_layout(&create_info, None) }
            .map_err(|e| gpuav_err!(SOURCE, "vkCreatePipelineLayout failed: {:?}", e))?;
        Ok(pipeline_layout_from_vk(layout))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) {
        unsafe {
            self.device
                .destroy_pipeline_layout(pipeline_layout_to_vk(layout), None);
        }
    }

    fn create_shader_module(&self, code: &[u32]) -> Result<ShaderModuleHandle> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);

        let module = unsafe { self.device.create_shader_module(&create_info, None) }
            .map_err(|e| gpuav_err!(SOURCE, "vkCreateShaderModule failed: {:?}", e))?;
        Ok(shader_module_from_vk(module))
    }

    fn destroy_shader_module(&self, module: ShaderModuleHandle) {
        unsafe {
            self.device
                .destroy_shader_module(shader_module_to_vk(module), None);
        }
    }

    fn create_graphics_pipeline_library(&self, create_info: &GraphicsPipelineCreateInfo) -> Result<PipelineHandle> {
        let entry_points = create_info
            .stages
            .iter()
            .map(|stage| CString::new(stage.entry_point.as_str()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::InvalidShader(format!("Invalid entry point name: {}", e)))?;

        // Inlined stages chain their code instead of naming a module
        let mut inline_modules: Vec<_> = create_info
            .stages
            .iter()
            .map(|stage| {
                let code = stage.inline_code.as_ref().map(|inline| inline.code.as_slice()).unwrap_or(&[]);
                vk::ShaderModuleCreateInfo::default().code(code)
            })
            .collect();

        let stages: Vec<_> = create_info
            .stages
            .iter()
            .zip(&entry_points)
            .zip(inline_modules.iter_mut())
            .map(|((stage, entry_point), inline_module)| {
                let stage_info = vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage_flags_to_vk(stage.stage))
                    .name(entry_point);
                if stage.module.is_null() {
                    stage_info.push_next(inline_module)
                } else {
                    stage_info.module(shader_module_to_vk(stage.module))
                }
            })
            .collect();

        let has_fragment_stage = create_info
            .stages
            .iter()
            .any(|stage| stage.stage.contains(ShaderStageFlags::FRAGMENT));
        let library_flags = if has_fragment_stage {
            vk::GraphicsPipelineLibraryFlagsEXT::FRAGMENT_SHADER
        } else {
            vk::GraphicsPipelineLibraryFlagsEXT::PRE_RASTERIZATION_SHADERS
        };
        let mut library_info = vk::GraphicsPipelineLibraryCreateInfoEXT::default().flags(library_flags);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default();
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&LIBRARY_DYNAMIC_STATES);

        let layout = create_info
            .layout
            .as_ref()
            .map(|layout| pipeline_layout_to_vk(layout.handle))
            .unwrap_or_else(vk::PipelineLayout::null);

        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .flags(pipeline_create_flags_to_vk(create_info.flags) | vk::PipelineCreateFlags::LIBRARY_KHR)
            .stages(&stages)
            .layout(layout)
            .dynamic_state(&dynamic_state)
            .push_next(&mut library_info);
        if has_fragment_stage {
            pipeline_info = pipeline_info
                .multisample_state(&multisample_state)
                .depth_stencil_state(&depth_stencil_state);
        } else {
            pipeline_info = pipeline_info
                .viewport_state(&viewport_state)
                .rasterization_state(&rasterization_state);
        }

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(self.pipeline_cache, std::slice::from_ref(&pipeline_info), None)
        }
        .map_err(|(_, e)| gpuav_err!(SOURCE, "vkCreateGraphicsPipelines failed for pipeline library: {:?}", e))?;

        let library = pipelines
            .first()
            .copied()
            .ok_or_else(|| gpuav_err!(SOURCE, "vkCreateGraphicsPipelines returned no pipeline library"))?;
        gpuav_debug!(SOURCE, "Re-created pipeline library {:#x} with instrumented stages", vk::Handle::as_raw(library));
        Ok(pipeline_from_vk(library))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        unsafe {
            self.device.destroy_pipeline(pipeline_to_vk(pipeline), None);
        }
    }
}
