/*!
# Galaxy GPU-AV - Vulkan Backend

Vulkan implementation of the GPU-AV instrumentation seams.

This crate provides the `DeviceDispatch` implementation over `ash`, the
device capability query, descriptor set reflection (using spirq) and the
debug name table used to label objects in violation messages.
*/

mod vulkan_convert;
mod vulkan_device;
mod vulkan_dispatch;
mod vulkan_names;
mod vulkan_reflect;

use std::sync::Arc;
use ash::vk;
use galaxy_gpu_av::gpuav::{
    DeferredOperationQueue, GpuShaderInstrumentor, InstrumentationToolchain, Result, Settings,
};

pub use vulkan_device::{capabilities_from_vk, query_device_capabilities};
pub use vulkan_dispatch::VulkanDeviceDispatch;
pub use vulkan_names::DebugUtilsObjectNames;
pub use vulkan_reflect::{active_descriptor_sets, stage_active_slots};

/// Handle and flag conversions between `ash::vk` and the core types
pub mod convert {
    pub use crate::vulkan_convert::*;
}

/// Create an instrumentor for `device` and set up its internal objects
///
/// Returns the instrumentor even when setup fails: it is then disabled and
/// every creation hook forwards application data unchanged.
pub fn create_instrumentor(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    settings: Settings,
    toolchain: Arc<dyn InstrumentationToolchain>,
) -> Result<GpuShaderInstrumentor> {
    let capabilities = query_device_capabilities(instance, physical_device)?;
    let dispatch = Arc::new(VulkanDeviceDispatch::new(device));
    let instrumentor = GpuShaderInstrumentor::new(
        settings,
        dispatch,
        toolchain,
        Arc::new(DeferredOperationQueue::new()),
    );
    // A failed setup has already been reported and disabled the subsystem
    let _ = instrumentor.post_create_device(capabilities);
    Ok(instrumentor)
}
