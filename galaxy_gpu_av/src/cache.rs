//! Content-addressed cache of instrumented shaders
//!
//! No eviction, entries live as long as the device.

use std::sync::Arc;
use rustc_hash::FxHashMap;
use crate::bytecode::ShaderId;

#[derive(Debug, Default)]
pub struct InstrumentationCache {
    entries: FxHashMap<ShaderId, Arc<[u32]>>,
}

impl InstrumentationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instrumented words for `id`, if already produced
    pub fn get(&self, id: ShaderId) -> Option<Arc<[u32]>> {
        self.entries.get(&id).cloned()
    }

    /// Store instrumented words, replacing an earlier result for `id`
    ///
    /// Two threads instrumenting the same uncached shader both end up here;
    /// their outputs are identical so the second insert is harmless.
    pub fn add(&mut self, id: ShaderId, instrumented: impl Into<Arc<[u32]>>) {
        self.entries.insert(id, instrumented.into());
    }

    pub fn contains(&self, id: ShaderId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
