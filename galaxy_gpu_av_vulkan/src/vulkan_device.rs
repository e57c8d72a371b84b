/// Device capability query for the instrumentor
///
/// Reads the features, limits and extensions `GpuShaderInstrumentor::post_create_device`
/// needs from a physical device.

use std::ffi::CStr;
use ash::vk;
use galaxy_gpu_av::gpuav::{DeviceCapabilities, Result};
use galaxy_gpu_av::gpuav_err;

const SOURCE: &str = "gpuav::vulkan";

/// Build capabilities from already queried device data
///
/// `features12` is only read on Vulkan 1.2+ devices, pass `None` for older ones.
pub fn capabilities_from_vk(
    properties: &vk::PhysicalDeviceProperties,
    features: &vk::PhysicalDeviceFeatures,
    features12: Option<&vk::PhysicalDeviceVulkan12Features>,
    extensions: &[&CStr],
) -> DeviceCapabilities {
    let has_extension = |name: &CStr| extensions.iter().any(|extension| *extension == name);
    let api_version = vk::make_api_version(
        0,
        vk::api_version_major(properties.api_version),
        vk::api_version_minor(properties.api_version),
        vk::api_version_patch(properties.api_version),
    );
    let core_1_3 = api_version >= vk::API_VERSION_1_3;
    let core_1_2 = api_version >= vk::API_VERSION_1_2;

    DeviceCapabilities {
        api_version,
        max_bound_descriptor_sets: properties.limits.max_bound_descriptor_sets,
        fragment_stores_and_atomics: features.fragment_stores_and_atomics == vk::TRUE,
        vertex_pipeline_stores_and_atomics: features.vertex_pipeline_stores_and_atomics == vk::TRUE,
        shader_int64: features.shader_int64 == vk::TRUE,
        vulkan_memory_model_device_scope: features12
            .is_some_and(|f| f.vulkan_memory_model_device_scope == vk::TRUE),
        shader_non_semantic_info: core_1_3 || has_extension(ash::khr::shader_non_semantic_info::NAME),
        spirv_1_4: core_1_2 || has_extension(ash::khr::spirv_1_4::NAME),
        relaxed_block_layout: api_version >= vk::API_VERSION_1_1
            || has_extension(ash::khr::relaxed_block_layout::NAME),
        scalar_block_layout: features12.is_some_and(|f| f.scalar_block_layout == vk::TRUE)
            || has_extension(ash::ext::scalar_block_layout::NAME),
        uniform_buffer_standard_layout: features12
            .is_some_and(|f| f.uniform_buffer_standard_layout == vk::TRUE)
            || has_extension(ash::khr::uniform_buffer_standard_layout::NAME),
    }
}

/// Query capabilities of `physical_device`
pub fn query_device_capabilities(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<DeviceCapabilities> {
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    let extension_properties = unsafe { instance.enumerate_device_extension_properties(physical_device) }
        .map_err(|e| gpuav_err!(SOURCE, "vkEnumerateDeviceExtensionProperties failed: {:?}", e))?;
    let extensions: Vec<&CStr> = extension_properties
        .iter()
        .filter_map(|extension| extension.extension_name_as_c_str().ok())
        .collect();

    if properties.api_version >= vk::API_VERSION_1_2 {
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut features12);
        unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };
        let features = features2.features;
        Ok(capabilities_from_vk(&properties, &features, Some(&features12), &extensions))
    } else {
        let features = unsafe { instance.get_physical_device_features(physical_device) };
        Ok(capabilities_from_vk(&properties, &features, None, &extensions))
    }
}

#[cfg(test)]
#[path = "vulkan_device_tests.rs"]
mod tests;
