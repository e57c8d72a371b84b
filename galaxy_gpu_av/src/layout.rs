//! Binding-slot reservation and layout patching
//!
//! Instrumented shaders write their findings through one descriptor set bound
//! at a fixed slot, the last slot the device can bind (clamped to
//! `MAX_ADJUSTED_BOUND_DESCRIPTOR_SETS`). Every pipeline layout and shader
//! object gets that slot appended, with empty placeholder layouts filling
//! whatever the application left unused below it.

use crate::error::{Error, Result};
use crate::handles::DescriptorSetLayoutHandle;

/// Highest slot count the instrumentation ever assumes
pub const MAX_ADJUSTED_BOUND_DESCRIPTOR_SETS: u32 = 32;

/// Descriptor types used by the instrumentation set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    StorageBuffer,
    UniformBuffer,
    StorageBufferDynamic,
}

/// One binding of the instrumentation descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentationBinding {
    pub binding: u32,
    pub kind: DescriptorKind,
    pub count: u32,
}

/// Binding of the buffer instrumented shaders write errors into
pub const BINDING_ERROR_OUTPUT: u32 = 0;
/// Binding of the debug printf output buffer
pub const BINDING_DEBUG_PRINTF_OUTPUT: u32 = 1;
/// Binding of the bindless descriptor state
pub const BINDING_BINDLESS_DESCRIPTOR: u32 = 2;
/// Binding of the descriptor-index post-process buffer
pub const BINDING_POST_PROCESS_BUFFER: u32 = 3;
/// Binding of the per-command action index
pub const BINDING_ACTION_INDEX: u32 = 4;

/// Fixed bindings of the instrumentation set (all stages)
pub const INSTRUMENTATION_BINDINGS: [InstrumentationBinding; 5] = [
    InstrumentationBinding { binding: BINDING_ERROR_OUTPUT, kind: DescriptorKind::StorageBuffer, count: 1 },
    InstrumentationBinding { binding: BINDING_DEBUG_PRINTF_OUTPUT, kind: DescriptorKind::StorageBuffer, count: 1 },
    InstrumentationBinding { binding: BINDING_BINDLESS_DESCRIPTOR, kind: DescriptorKind::StorageBuffer, count: 1 },
    InstrumentationBinding { binding: BINDING_POST_PROCESS_BUFFER, kind: DescriptorKind::StorageBuffer, count: 1 },
    InstrumentationBinding { binding: BINDING_ACTION_INDEX, kind: DescriptorKind::StorageBufferDynamic, count: 1 },
];

/// Slot index reserved for instrumentation on a device with `device_limit`
/// bindable descriptor sets
pub fn reserved_slot_for_limit(device_limit: u32) -> Result<u32> {
    let adjusted = device_limit.min(MAX_ADJUSTED_BOUND_DESCRIPTOR_SETS);
    if adjusted <= 1 {
        return Err(Error::InitializationFailed(
            "Device can bind only a single descriptor set.".to_string(),
        ));
    }
    Ok(adjusted - 1)
}

/// Result of patching one layout list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutPatch {
    /// Layout list to forward instead of the caller's
    Patched(Vec<DescriptorSetLayoutHandle>),
    /// The caller already uses the reserved slot (or beyond), leave it alone
    Conflict { set_layout_count: usize },
}

/// Reserved slot and the two layouts used to patch with, fixed for the
/// device lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutReservation {
    reserved_slot: u32,
    placeholder_layout: DescriptorSetLayoutHandle,
    instrumentation_layout: DescriptorSetLayoutHandle,
}

impl LayoutReservation {
    pub fn new(
        reserved_slot: u32,
        placeholder_layout: DescriptorSetLayoutHandle,
        instrumentation_layout: DescriptorSetLayoutHandle,
    ) -> Self {
        Self {
            reserved_slot,
            placeholder_layout,
            instrumentation_layout,
        }
    }

    pub fn reserved_slot(&self) -> u32 {
        self.reserved_slot
    }

    pub fn placeholder_layout(&self) -> DescriptorSetLayoutHandle {
        self.placeholder_layout
    }

    pub fn instrumentation_layout(&self) -> DescriptorSetLayoutHandle {
        self.instrumentation_layout
    }

    /// Caller layouts first, placeholders up to the reserved slot, then the
    /// instrumentation layout at the reserved slot
    pub fn patch_set_layouts(&self, caller: &[DescriptorSetLayoutHandle]) -> LayoutPatch {
        let reserved = self.reserved_slot as usize;
        if caller.len() > reserved {
            return LayoutPatch::Conflict {
                set_layout_count: caller.len(),
            };
        }

        let mut patched = Vec::with_capacity(reserved + 1);
        patched.extend_from_slice(caller);
        patched.resize(reserved, self.placeholder_layout);
        patched.push(self.instrumentation_layout);
        LayoutPatch::Patched(patched)
    }

    /// Layout list of the internal pipeline layout (placeholders only, then
    /// the instrumentation layout)
    pub fn internal_set_layouts(&self) -> Vec<DescriptorSetLayoutHandle> {
        match self.patch_set_layouts(&[]) {
            LayoutPatch::Patched(layouts) => layouts,
            LayoutPatch::Conflict { .. } => Vec::new(),
        }
    }

    /// Warning text for a layout the patcher had to skip
    pub fn conflict_message(&self, object: &str, set_layout_count: usize) -> String {
        format!(
            "{} has {} descriptor set layouts, which would be overwritten by the instrumentation \
             descriptor set at slot {}. This object will not be instrumented.",
            object, set_layout_count, self.reserved_slot
        )
    }
}

/// `maxBoundDescriptorSets` to advertise to the application, plus warnings
///
/// A limit of 0 comes from implicit layers and is left alone. When `reserve`
/// is set one slot is held back for instrumentation.
pub fn advertised_descriptor_set_limit(limit: u32, reserve: bool) -> (u32, Vec<String>) {
    let mut warnings = Vec::new();
    if limit == 0 {
        return (0, warnings);
    }
    if limit > MAX_ADJUSTED_BOUND_DESCRIPTOR_SETS {
        warnings.push(format!(
            "A descriptor binding slot is required to store GPU-side information, but the device \
             maxBoundDescriptorSets is {} which is too large, so we will be trying to use slot {}",
            limit,
            MAX_ADJUSTED_BOUND_DESCRIPTOR_SETS - 1
        ));
    }
    if !reserve {
        return (limit, warnings);
    }
    if limit > 1 {
        (limit - 1, warnings)
    } else {
        warnings.push(
            "Unable to reserve descriptor binding slot on a device with only one slot.".to_string(),
        );
        (limit, warnings)
    }
}

#[cfg(test)]
#[path = "layout_tests.rs"]
mod tests;
