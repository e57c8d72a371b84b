/// Descriptor set usage reflection
///
/// Fills the `active_slots` of pipeline create infos: the descriptor sets the
/// shaders statically declare, which decides whether a pipeline collides with
/// the reserved instrumentation slot.

use std::collections::BTreeSet;
use galaxy_gpu_av::bytecode::has_spirv_magic;
use galaxy_gpu_av::gpuav::{Error, PipelineShaderStage, Result};
use galaxy_gpu_av::{gpuav_err, gpuav_warn};

const SOURCE: &str = "gpuav::vulkan";

/// Descriptor sets declared by any entry point of `code`
pub fn active_descriptor_sets(code: &[u32]) -> Result<BTreeSet<u32>> {
    // spirq does not check the magic number
    if !has_spirv_magic(code) {
        return Err(Error::InvalidShader("Not SPIR-V: missing magic number".to_string()));
    }
    let entry_points = spirq::ReflectConfig::new()
        .spv(code)
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| gpuav_err!(SOURCE, "SPIR-V reflection failed: {:?}", e))?;

    let mut sets = BTreeSet::new();
    for entry_point in &entry_points {
        for var in entry_point.vars.iter() {
            if let spirq::var::Variable::Descriptor { desc_bind, .. } = var {
                sets.insert(desc_bind.set());
            }
        }
    }
    Ok(sets)
}

/// Union of the descriptor sets used by `stages`
///
/// Stages without code, or whose code fails to reflect, contribute nothing.
pub fn stage_active_slots(stages: &[PipelineShaderStage]) -> BTreeSet<u32> {
    let mut slots = BTreeSet::new();
    for stage in stages {
        let Some(code) = stage.spirv.as_deref() else {
            continue;
        };
        match active_descriptor_sets(code) {
            Ok(sets) => slots.extend(sets),
            Err(e) => gpuav_warn!(SOURCE, "Skipping descriptor set reflection of {:?} stage: {}", stage.stage, e),
        }
    }
    slots
}

#[cfg(test)]
#[path = "vulkan_reflect_tests.rs"]
mod tests;
