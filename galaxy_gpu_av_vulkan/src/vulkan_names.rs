/// Debug object names captured from vkSetDebugUtilsObjectNameEXT
///
/// Used to label command buffers, pipelines and shaders in violation messages.

use std::sync::RwLock;
use ash::vk;
use galaxy_gpu_av::gpuav::ObjectNameLookup;
use rustc_hash::FxHashMap;

/// Thread-safe handle to name table
#[derive(Default)]
pub struct DebugUtilsObjectNames {
    names: RwLock<FxHashMap<u64, String>>,
}

impl DebugUtilsObjectNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or clear (`None` or empty) the name of `handle`
    pub fn set_name(&self, handle: u64, name: Option<&str>) {
        let Ok(mut names) = self.names.write() else {
            return;
        };
        match name {
            Some(name) if !name.is_empty() => {
                names.insert(handle, name.to_string());
            }
            _ => {
                names.remove(&handle);
            }
        }
    }

    /// Record a name from the Vulkan call's info struct
    pub fn set_object_name(&self, info: &vk::DebugUtilsObjectNameInfoEXT<'_>) {
        let name = unsafe { info.object_name_as_c_str() }.and_then(|name| name.to_str().ok());
        self.set_name(info.object_handle, name);
    }

    /// Drop the name of a destroyed object
    pub fn forget(&self, handle: u64) {
        self.set_name(handle, None);
    }

    pub fn len(&self) -> usize {
        self.names.read().map(|names| names.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectNameLookup for DebugUtilsObjectNames {
    fn object_name(&self, handle: u64) -> Option<String> {
        self.names.read().ok()?.get(&handle).cloned()
    }
}

#[cfg(test)]
#[path = "vulkan_names_tests.rs"]
mod tests;
