//! Registry of instrumented shaders
//!
//! Maps the id an instrumented shader reports at runtime back to the code it
//! was built from and the object that owns it. Creation and destruction
//! callbacks for unrelated objects race on different threads, so the table
//! has its own lock, independent of the layer lock.

use std::sync::{Arc, PoisonError, RwLock};
use rustc_hash::FxHashMap;

use crate::bytecode::ShaderId;
use crate::handles::{PipelineHandle, ShaderModuleHandle, ShaderObjectHandle};

/// One tracked shader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentedShader {
    /// Owning pipeline (or pipeline library), null for shader objects
    pub pipeline: PipelineHandle,
    /// Module the stage came from, `PIPELINE_STAGE_INFO` when inlined
    pub shader_module: ShaderModuleHandle,
    /// Owning shader object, null for pipelines
    pub shader_object: ShaderObjectHandle,
    /// Code instruction positions reported at runtime refer to
    pub spirv: Arc<[u32]>,
}

#[derive(Debug, Default)]
pub struct InstrumentedShaderRegistry {
    shaders: RwLock<FxHashMap<ShaderId, InstrumentedShader>>,
}

impl InstrumentedShaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `id`, replacing whatever was tracked under it before
    pub fn insert_or_assign(
        &self,
        id: ShaderId,
        pipeline: PipelineHandle,
        shader_module: ShaderModuleHandle,
        shader_object: ShaderObjectHandle,
        spirv: impl Into<Arc<[u32]>>,
    ) {
        let entry = InstrumentedShader {
            pipeline,
            shader_module,
            shader_object,
            spirv: spirv.into(),
        };
        self.shaders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, entry);
    }

    pub fn get(&self, id: ShaderId) -> Option<InstrumentedShader> {
        self.shaders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Copy of every entry matching `predicate`, nothing is removed
    pub fn snapshot<F>(&self, predicate: F) -> Vec<(ShaderId, InstrumentedShader)>
    where
        F: Fn(&InstrumentedShader) -> bool,
    {
        self.shaders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, entry)| predicate(entry))
            .map(|(&id, entry)| (id, entry.clone()))
            .collect()
    }

    /// Stop tracking `id`, returns whether it was tracked
    pub fn erase(&self, id: ShaderId) -> bool {
        self.shaders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Snapshot the entries matching `predicate`, then erase them one by one
    fn erase_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&InstrumentedShader) -> bool,
    {
        let to_erase = self.snapshot(predicate);
        to_erase.iter().filter(|(id, _)| self.erase(*id)).count()
    }

    /// Drop every entry owned by a destroyed pipeline
    pub fn erase_pipeline(&self, pipeline: PipelineHandle) -> usize {
        self.erase_matching(|entry| entry.pipeline == pipeline)
    }

    /// Drop every entry referencing a destroyed shader module
    pub fn erase_shader_module(&self, shader_module: ShaderModuleHandle) -> usize {
        self.erase_matching(|entry| entry.shader_module == shader_module)
    }

    /// Drop every entry owned by a destroyed shader object
    pub fn erase_shader_object(&self, shader_object: ShaderObjectHandle) -> usize {
        self.erase_matching(|entry| entry.shader_object == shader_object)
    }

    pub fn len(&self) -> usize {
        self.shaders.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.shaders.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
