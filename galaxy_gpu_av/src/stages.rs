//! Pipeline and shader create-info shapes
//!
//! Graphics, compute and ray tracing pipelines carry their stages in
//! different places. `PipelineStages` gives the instrumentor one indexed view
//! over all of them so a single driver loop handles every shape.

use std::collections::BTreeSet;
use std::sync::Arc;
use bitflags::bitflags;

use crate::handles::{
    DescriptorSetLayoutHandle, PipelineHandle, PipelineLayoutHandle, ShaderModuleHandle,
};

bitflags! {
    /// Shader stages (Vulkan bit values)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStageFlags: u32 {
        const VERTEX = 0x0000_0001;
        const TESSELLATION_CONTROL = 0x0000_0002;
        const TESSELLATION_EVALUATION = 0x0000_0004;
        const GEOMETRY = 0x0000_0008;
        const FRAGMENT = 0x0000_0010;
        const COMPUTE = 0x0000_0020;
        const TASK = 0x0000_0040;
        const MESH = 0x0000_0080;
        const RAYGEN = 0x0000_0100;
        const ANY_HIT = 0x0000_0200;
        const CLOSEST_HIT = 0x0000_0400;
        const MISS = 0x0000_0800;
        const INTERSECTION = 0x0000_1000;
        const CALLABLE = 0x0000_2000;
    }
}

bitflags! {
    /// Pipeline creation flags the instrumentor looks at
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PipelineCreateFlags: u32 {
        const DISABLE_OPTIMIZATION = 0x0000_0001;
        const LIBRARY = 0x0000_0800;
    }
}

bitflags! {
    /// Pipeline stages used in synchronization commands
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PipelineStageFlags: u64 {
        const TOP_OF_PIPE = 0x0000_0001;
        const DRAW_INDIRECT = 0x0000_0002;
        const VERTEX_SHADER = 0x0000_0008;
        const FRAGMENT_SHADER = 0x0000_0080;
        const COMPUTE_SHADER = 0x0000_0800;
        const TRANSFER = 0x0000_1000;
        const BOTTOM_OF_PIPE = 0x0000_2000;
        const HOST = 0x0000_4000;
        const ALL_GRAPHICS = 0x0000_8000;
        const ALL_COMMANDS = 0x0001_0000;
    }
}

/// Which kind of pipeline a command bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineBindPoint {
    Graphics,
    Compute,
    RayTracing,
}

/// SPIR-V passed directly in the stage create info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineShaderCode {
    pub code: Vec<u32>,
    /// Opted in to selective instrumentation
    pub selective_instrumentation: bool,
}

/// One shader stage of a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineShaderStage {
    pub stage: ShaderStageFlags,
    /// Null when the code is inlined
    pub module: ShaderModuleHandle,
    /// Code as tracked for this stage, `None` when only an identifier was given
    pub spirv: Option<Arc<[u32]>>,
    pub inline_code: Option<InlineShaderCode>,
    pub entry_point: String,
}

impl PipelineShaderStage {
    /// Stage backed by a shader module
    pub fn from_module(
        stage: ShaderStageFlags,
        module: ShaderModuleHandle,
        spirv: impl Into<Arc<[u32]>>,
    ) -> Self {
        Self {
            stage,
            module,
            spirv: Some(spirv.into()),
            inline_code: None,
            entry_point: "main".to_string(),
        }
    }

    /// Stage whose code is inlined in the create info
    pub fn inline(stage: ShaderStageFlags, code: Vec<u32>) -> Self {
        Self {
            stage,
            module: ShaderModuleHandle::NULL,
            spirv: Some(Arc::from(code.as_slice())),
            inline_code: Some(InlineShaderCode {
                code,
                selective_instrumentation: false,
            }),
            entry_point: "main".to_string(),
        }
    }
}

/// A descriptor set layout as the state tracker knows it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetLayoutState {
    pub handle: DescriptorSetLayoutHandle,
    /// Some binding is update-after-bind, partially bound or variable count
    pub has_bindless: bool,
}

/// Pipeline layout as the application declared it (before patching)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineLayoutState {
    pub handle: PipelineLayoutHandle,
    pub set_layouts: Vec<SetLayoutState>,
}

impl PipelineLayoutState {
    pub fn has_bindless_descriptors(&self) -> bool {
        self.set_layouts.iter().any(|s| s.has_bindless)
    }
}

/// Indexed access to the stages of a create info
pub trait PipelineStages {
    fn stage_count(&self) -> usize;
    fn stage_at(&self, index: usize) -> &PipelineShaderStage;
    fn stage_at_mut(&mut self, index: usize) -> &mut PipelineShaderStage;

    fn set_stage_module(&mut self, index: usize, module: ShaderModuleHandle) {
        self.stage_at_mut(index).module = module;
    }

    /// Replace inlined code (no-op for module-backed stages)
    fn set_stage_code(&mut self, index: usize, code: Vec<u32>) {
        if let Some(inline) = self.stage_at_mut(index).inline_code.as_mut() {
            inline.code = code;
        }
    }
}

/// A pipeline create info plus the state tracked for it
pub trait PipelineCreateInfo: PipelineStages + Clone + Send + 'static {
    const BIND_POINT: PipelineBindPoint;

    fn flags(&self) -> PipelineCreateFlags;
    fn layout(&self) -> Option<&PipelineLayoutState>;
    /// Descriptor set slots the pipeline's shaders statically use
    fn active_slots(&self) -> &BTreeSet<u32>;

    /// Linked pipeline libraries (graphics pipeline libraries only)
    fn libraries(&self) -> &[PipelineLibrary] {
        &[]
    }

    fn libraries_mut(&mut self) -> Option<&mut Vec<PipelineLibrary>> {
        None
    }

    /// Stages of this pipeline plus those of its libraries
    fn total_stage_count(&self) -> usize {
        self.stage_count()
            + self
                .libraries()
                .iter()
                .map(|l| l.create_info.stage_count())
                .sum::<usize>()
    }

    fn has_bindless_descriptors(&self) -> bool {
        self.layout().is_some_and(PipelineLayoutState::has_bindless_descriptors)
    }
}

/// A library linked into a graphics pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineLibrary {
    pub handle: PipelineHandle,
    /// The create info the library was built from
    pub create_info: GraphicsPipelineCreateInfo,
}

impl PipelineLibrary {
    /// Fragment output / fragment shader library
    pub fn has_fragment_stage(&self) -> bool {
        self.create_info
            .stages
            .iter()
            .any(|s| s.stage.contains(ShaderStageFlags::FRAGMENT))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphicsPipelineCreateInfo {
    pub flags: PipelineCreateFlags,
    pub stages: Vec<PipelineShaderStage>,
    pub layout: Option<PipelineLayoutState>,
    pub active_slots: BTreeSet<u32>,
    pub libraries: Vec<PipelineLibrary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputePipelineCreateInfo {
    pub flags: PipelineCreateFlags,
    pub stage: PipelineShaderStage,
    pub layout: Option<PipelineLayoutState>,
    pub active_slots: BTreeSet<u32>,
}

/// Shader group of a ray tracing pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RayTracingShaderGroup {
    General { shader: u32 },
    TrianglesHit { closest_hit: Option<u32>, any_hit: Option<u32> },
    ProceduralHit { closest_hit: Option<u32>, any_hit: Option<u32>, intersection: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RayTracingPipelineCreateInfo {
    pub flags: PipelineCreateFlags,
    pub stages: Vec<PipelineShaderStage>,
    pub groups: Vec<RayTracingShaderGroup>,
    pub max_recursion_depth: u32,
    pub layout: Option<PipelineLayoutState>,
    pub active_slots: BTreeSet<u32>,
}

impl PipelineStages for GraphicsPipelineCreateInfo {
    fn stage_count(&self) -> usize {
        self.stages.len()
    }

    fn stage_at(&self, index: usize) -> &PipelineShaderStage {
        &self.stages[index]
    }

    fn stage_at_mut(&mut self, index: usize) -> &mut PipelineShaderStage {
        &mut self.stages[index]
    }
}

impl PipelineCreateInfo for GraphicsPipelineCreateInfo {
    const BIND_POINT: PipelineBindPoint = PipelineBindPoint::Graphics;

    fn flags(&self) -> PipelineCreateFlags {
        self.flags
    }

    fn layout(&self) -> Option<&PipelineLayoutState> {
        self.layout.as_ref()
    }

    fn active_slots(&self) -> &BTreeSet<u32> {
        &self.active_slots
    }

    fn libraries(&self) -> &[PipelineLibrary] {
        &self.libraries
    }

    fn libraries_mut(&mut self) -> Option<&mut Vec<PipelineLibrary>> {
        Some(&mut self.libraries)
    }
}

impl PipelineStages for ComputePipelineCreateInfo {
    fn stage_count(&self) -> usize {
        1
    }

    fn stage_at(&self, index: usize) -> &PipelineShaderStage {
        debug_assert_eq!(index, 0);
        &self.stage
    }

    fn stage_at_mut(&mut self, index: usize) -> &mut PipelineShaderStage {
        debug_assert_eq!(index, 0);
        &mut self.stage
    }
}

impl PipelineCreateInfo for ComputePipelineCreateInfo {
    const BIND_POINT: PipelineBindPoint = PipelineBindPoint::Compute;

    fn flags(&self) -> PipelineCreateFlags {
        self.flags
    }

    fn layout(&self) -> Option<&PipelineLayoutState> {
        self.layout.as_ref()
    }

    fn active_slots(&self) -> &BTreeSet<u32> {
        &self.active_slots
    }
}

impl PipelineStages for RayTracingPipelineCreateInfo {
    fn stage_count(&self) -> usize {
        self.stages.len()
    }

    fn stage_at(&self, index: usize) -> &PipelineShaderStage {
        &self.stages[index]
    }

    fn stage_at_mut(&mut self, index: usize) -> &mut PipelineShaderStage {
        &mut self.stages[index]
    }
}

impl PipelineCreateInfo for RayTracingPipelineCreateInfo {
    const BIND_POINT: PipelineBindPoint = PipelineBindPoint::RayTracing;

    fn flags(&self) -> PipelineCreateFlags {
        self.flags
    }

    fn layout(&self) -> Option<&PipelineLayoutState> {
        self.layout.as_ref()
    }

    fn active_slots(&self) -> &BTreeSet<u32> {
        &self.active_slots
    }
}

/// Create info of one shader object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderObjectCreateInfo {
    pub stage: ShaderStageFlags,
    pub code: Vec<u32>,
    pub set_layouts: Vec<SetLayoutState>,
    pub selective_instrumentation: bool,
    pub entry_point: String,
}

impl ShaderObjectCreateInfo {
    pub fn new(stage: ShaderStageFlags, code: Vec<u32>) -> Self {
        Self {
            stage,
            code,
            set_layouts: Vec::new(),
            selective_instrumentation: false,
            entry_point: "main".to_string(),
        }
    }

    pub fn has_bindless_descriptors(&self) -> bool {
        self.set_layouts.iter().any(|s| s.has_bindless)
    }
}

#[cfg(test)]
#[path = "stages_tests.rs"]
mod tests;
