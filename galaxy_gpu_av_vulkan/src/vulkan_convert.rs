/// Conversions between `ash::vk` types and the instrumentation core types
///
/// Core handles are plain 64-bit values, so every conversion is a raw value
/// copy. Stage and pipeline flag bits use the Vulkan values on both sides.

use ash::vk;
use ash::vk::Handle;
use galaxy_gpu_av::gpuav::{
    CommandBufferHandle, DeferredOperationHandle, DescriptorKind, DescriptorSetLayoutHandle,
    InstrumentationBinding, PipelineBindPoint, PipelineCreateFlags, PipelineHandle,
    PipelineLayoutHandle, PipelineStageFlags, ShaderModuleHandle, ShaderObjectHandle,
    ShaderStageFlags,
};

macro_rules! handle_conversions {
    ($to_vk:ident, $from_vk:ident, $core:ty, $vk:ty) => {
        pub fn $to_vk(handle: $core) -> $vk {
            <$vk>::from_raw(handle.as_raw())
        }

        pub fn $from_vk(handle: $vk) -> $core {
            <$core>::from_raw(handle.as_raw())
        }
    };
}

handle_conversions!(descriptor_set_layout_to_vk, descriptor_set_layout_from_vk, DescriptorSetLayoutHandle, vk::DescriptorSetLayout);
handle_conversions!(pipeline_layout_to_vk, pipeline_layout_from_vk, PipelineLayoutHandle, vk::PipelineLayout);
handle_conversions!(shader_module_to_vk, shader_module_from_vk, ShaderModuleHandle, vk::ShaderModule);
handle_conversions!(pipeline_to_vk, pipeline_from_vk, PipelineHandle, vk::Pipeline);
handle_conversions!(shader_object_to_vk, shader_object_from_vk, ShaderObjectHandle, vk::ShaderEXT);
handle_conversions!(deferred_operation_to_vk, deferred_operation_from_vk, DeferredOperationHandle, vk::DeferredOperationKHR);
handle_conversions!(command_buffer_to_vk, command_buffer_from_vk, CommandBufferHandle, vk::CommandBuffer);

/// Stages that may access the instrumentation descriptor set
pub const INSTRUMENTATION_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::ALL;

pub fn stage_flags_to_vk(flags: ShaderStageFlags) -> vk::ShaderStageFlags {
    vk::ShaderStageFlags::from_raw(flags.bits())
}

pub fn stage_flags_from_vk(flags: vk::ShaderStageFlags) -> ShaderStageFlags {
    ShaderStageFlags::from_bits_truncate(flags.as_raw())
}

pub fn pipeline_create_flags_from_vk(flags: vk::PipelineCreateFlags) -> PipelineCreateFlags {
    PipelineCreateFlags::from_bits_truncate(flags.as_raw())
}

pub fn pipeline_create_flags_to_vk(flags: PipelineCreateFlags) -> vk::PipelineCreateFlags {
    vk::PipelineCreateFlags::from_raw(flags.bits())
}

pub fn pipeline_stage_flags_from_vk(flags: vk::PipelineStageFlags) -> PipelineStageFlags {
    PipelineStageFlags::from_bits_truncate(u64::from(flags.as_raw()))
}

/// Synchronization2 stage masks share the low bits with the legacy ones
pub fn pipeline_stage_flags2_from_vk(flags: vk::PipelineStageFlags2) -> PipelineStageFlags {
    PipelineStageFlags::from_bits_truncate(flags.as_raw())
}

pub fn bind_point_from_vk(bind_point: vk::PipelineBindPoint) -> Option<PipelineBindPoint> {
    match bind_point {
        vk::PipelineBindPoint::GRAPHICS => Some(PipelineBindPoint::Graphics),
        vk::PipelineBindPoint::COMPUTE => Some(PipelineBindPoint::Compute),
        vk::PipelineBindPoint::RAY_TRACING_KHR => Some(PipelineBindPoint::RayTracing),
        _ => None,
    }
}

pub fn descriptor_kind_to_vk(kind: DescriptorKind) -> vk::DescriptorType {
    match kind {
        DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorKind::StorageBufferDynamic => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
    }
}

pub fn instrumentation_binding_to_vk(binding: &InstrumentationBinding) -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding::default()
        .binding(binding.binding)
        .descriptor_type(descriptor_kind_to_vk(binding.kind))
        .descriptor_count(binding.count)
        .stage_flags(INSTRUMENTATION_STAGES)
}

/// Whether a set layout created with `binding_flags` holds bindless-style
/// descriptors (update-after-bind, partially bound or variable count)
pub fn binding_flags_are_bindless(binding_flags: &[vk::DescriptorBindingFlags]) -> bool {
    let bindless = vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
        | vk::DescriptorBindingFlags::PARTIALLY_BOUND
        | vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT;
    binding_flags.iter().any(|flags| flags.intersects(bindless))
}

#[cfg(test)]
#[path = "vulkan_convert_tests.rs"]
mod tests;
