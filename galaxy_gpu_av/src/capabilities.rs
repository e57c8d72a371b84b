//! Device features and limits the instrumentor depends on

/// Subset of the device's features, limits and extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Packed API version (Vulkan encoding)
    pub api_version: u32,
    pub max_bound_descriptor_sets: u32,
    pub fragment_stores_and_atomics: bool,
    pub vertex_pipeline_stores_and_atomics: bool,
    pub shader_int64: bool,
    pub vulkan_memory_model_device_scope: bool,
    pub shader_non_semantic_info: bool,
    pub spirv_1_4: bool,
    pub relaxed_block_layout: bool,
    pub scalar_block_layout: bool,
    pub uniform_buffer_standard_layout: bool,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            api_version: make_api_version(1, 3, 0),
            max_bound_descriptor_sets: 8,
            fragment_stores_and_atomics: true,
            vertex_pipeline_stores_and_atomics: true,
            shader_int64: false,
            vulkan_memory_model_device_scope: false,
            shader_non_semantic_info: false,
            spirv_1_4: false,
            relaxed_block_layout: false,
            scalar_block_layout: false,
            uniform_buffer_standard_layout: false,
        }
    }
}

impl DeviceCapabilities {
    /// Names of required features the device is missing
    pub fn missing_required_features(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.fragment_stores_and_atomics {
            missing.push("fragmentStoresAndAtomics");
        }
        if !self.vertex_pipeline_stores_and_atomics {
            missing.push("vertexPipelineStoresAndAtomics");
        }
        missing
    }

    pub fn target_env(&self) -> TargetEnv {
        TargetEnv::pick(self.api_version, self.spirv_1_4)
    }
}

/// Pack a Vulkan API version
pub const fn make_api_version(major: u32, minor: u32, patch: u32) -> u32 {
    (major << 22) | (minor << 12) | patch
}

/// Environment the validator and optimizer check the instrumented code for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetEnv {
    Vulkan1_0,
    Vulkan1_1,
    Vulkan1_1Spirv1_4,
    Vulkan1_2,
    Vulkan1_3,
}

impl TargetEnv {
    pub fn pick(api_version: u32, spirv_1_4: bool) -> Self {
        let major = (api_version >> 22) & 0x7f;
        let minor = (api_version >> 12) & 0x3ff;
        match (major, minor) {
            (1, 0) => TargetEnv::Vulkan1_0,
            (1, 1) if spirv_1_4 => TargetEnv::Vulkan1_1Spirv1_4,
            (1, 1) => TargetEnv::Vulkan1_1,
            (1, 2) => TargetEnv::Vulkan1_2,
            _ => TargetEnv::Vulkan1_3,
        }
    }
}

#[cfg(test)]
#[path = "capabilities_tests.rs"]
mod tests;
