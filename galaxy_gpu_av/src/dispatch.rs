//! Calls forwarded down the chain to the next layer / driver
//!
//! Only the objects the instrumentor creates for itself go through here; the
//! application's own calls are forwarded by the host layer with the create
//! infos the instrumentor patched.

use crate::error::Result;
use crate::handles::{
    DescriptorSetLayoutHandle, PipelineHandle, PipelineLayoutHandle, ShaderModuleHandle,
};
use crate::layout::InstrumentationBinding;
use crate::stages::GraphicsPipelineCreateInfo;

pub trait DeviceDispatch: Send + Sync {
    /// Layout with `bindings`, an empty slice makes the placeholder layout
    fn create_descriptor_set_layout(
        &self,
        bindings: &[InstrumentationBinding],
    ) -> Result<DescriptorSetLayoutHandle>;

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle);

    fn create_pipeline_layout(
        &self,
        set_layouts: &[DescriptorSetLayoutHandle],
    ) -> Result<PipelineLayoutHandle>;

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle);

    fn create_shader_module(&self, code: &[u32]) -> Result<ShaderModuleHandle>;

    fn destroy_shader_module(&self, module: ShaderModuleHandle);

    /// Re-create a graphics pipeline library with instrumented stages
    fn create_graphics_pipeline_library(
        &self,
        create_info: &GraphicsPipelineCreateInfo,
    ) -> Result<PipelineHandle>;

    fn destroy_pipeline(&self, pipeline: PipelineHandle);
}
