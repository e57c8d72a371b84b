//! Continuations for deferred pipeline creation
//!
//! A ray tracing pipeline created through a deferred operation has no valid
//! handle until the operation completes. Work that needs the handles is
//! queued against the operation and run once with the final handle list.
//! The state tracker seeds the list for each deferred operation before any
//! other layer appends to it.

use std::sync::{Mutex, PoisonError};
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::handles::{DeferredOperationHandle, PipelineHandle};

/// Work to run with the pipelines a deferred operation produced
pub type DeferredContinuation = Box<dyn FnOnce(&[PipelineHandle]) + Send>;

#[derive(Default)]
pub struct DeferredOperationQueue {
    pending: Mutex<FxHashMap<DeferredOperationHandle, Vec<DeferredContinuation>>>,
}

impl DeferredOperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `operation` with an initial list of continuations
    pub fn insert(&self, operation: DeferredOperationHandle, continuations: Vec<DeferredContinuation>) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(operation, continuations);
    }

    /// Start tracking `operation` with nothing queued yet
    pub fn seed(&self, operation: DeferredOperationHandle) {
        self.insert(operation, Vec::new());
    }

    /// Take the list for `operation` out of the queue
    pub fn pop(&self, operation: DeferredOperationHandle) -> Option<Vec<DeferredContinuation>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).remove(&operation)
    }

    /// Queue `continuation` after whatever is already pending for `operation`
    ///
    /// Fails when nothing seeded the list; the continuation is dropped.
    pub fn append(
        &self,
        operation: DeferredOperationHandle,
        continuation: DeferredContinuation,
    ) -> Result<()> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.get_mut(&operation) {
            Some(list) => {
                list.push(continuation);
                Ok(())
            }
            None => Err(Error::DeferredOperationNotTracked(operation.as_raw())),
        }
    }

    pub fn is_pending(&self, operation: DeferredOperationHandle) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&operation)
    }

    /// Run everything queued for `operation`, in order, and forget it
    ///
    /// Returns how many continuations ran.
    pub fn complete(&self, operation: DeferredOperationHandle, pipelines: &[PipelineHandle]) -> usize {
        // Run outside the lock, continuations may queue more work
        let Some(continuations) = self.pop(operation) else {
            return 0;
        };
        let count = continuations.len();
        for continuation in continuations {
            continuation(pipelines);
        }
        count
    }
}

#[cfg(test)]
#[path = "deferred_tests.rs"]
mod tests;
