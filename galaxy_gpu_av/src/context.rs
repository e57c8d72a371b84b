//! Shared instrumentation context
//!
//! Owns the settings, the subsystem state and the layer lock. Every hook
//! consults the state here; once an internal error flips it to `Disabled`,
//! hooks stop touching shaders for the rest of the device lifetime.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::gpuav_report;
use crate::log::{
    LogSeverity, DEBUG_PRINTF_ERROR_ID, DEBUG_PRINTF_WARNING_ID, INTERNAL_ERROR_ID,
    INTERNAL_WARNING_ID,
};
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsystemState {
    Active,
    Disabled,
}

pub struct InstrumentationContext {
    settings: Settings,
    state: RwLock<SubsystemState>,
    layer_lock: RwLock<()>,
}

impl InstrumentationContext {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            state: RwLock::new(SubsystemState::Active),
            layer_lock: RwLock::new(()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> SubsystemState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self) -> bool {
        self.state() == SubsystemState::Active
    }

    /// Active and configured to rewrite SPIR-V
    pub fn is_instrumenting(&self) -> bool {
        self.is_active() && self.settings.is_spirv_modified()
    }

    /// Returns true on the transition, false if already disabled
    pub fn disable(&self) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let was_active = *state == SubsystemState::Active;
        *state = SubsystemState::Disabled;
        was_active
    }

    /// Report an internal error and disable the subsystem
    ///
    /// Only the first internal error is reported.
    pub fn internal_error(&self, location: &str, message: &str) {
        if !self.disable() {
            return;
        }
        let id = if self.settings.debug_printf_only {
            DEBUG_PRINTF_ERROR_ID
        } else {
            INTERNAL_ERROR_ID
        };
        gpuav_report!(
            LogSeverity::Error,
            location,
            id,
            "Internal Error, {} is being disabled. Details:\n{}",
            self.settings.layer_name(),
            message
        );
    }

    /// Report a problem that only costs coverage
    pub fn internal_warning(&self, location: &str, message: &str) {
        let id = if self.settings.debug_printf_only {
            DEBUG_PRINTF_WARNING_ID
        } else {
            INTERNAL_WARNING_ID
        };
        gpuav_report!(LogSeverity::Warn, location, id, "Internal Warning: {}", message);
    }

    /// Shared layer lock, held now in coarse mode, on `acquire` in
    /// fine-grained mode
    pub fn read_lock(&self) -> LayerReadGuard<'_> {
        let mut guard = LayerReadGuard {
            lock: &self.layer_lock,
            guard: None,
        };
        if !self.settings.fine_grained_locking {
            guard.acquire();
        }
        guard
    }

    /// Exclusive layer lock, same policy as `read_lock`
    pub fn write_lock(&self) -> LayerWriteGuard<'_> {
        let mut guard = LayerWriteGuard {
            lock: &self.layer_lock,
            guard: None,
        };
        if !self.settings.fine_grained_locking {
            guard.acquire();
        }
        guard
    }
}

pub struct LayerReadGuard<'a> {
    lock: &'a RwLock<()>,
    guard: Option<RwLockReadGuard<'a, ()>>,
}

impl LayerReadGuard<'_> {
    pub fn acquire(&mut self) {
        if self.guard.is_none() {
            self.guard = Some(self.lock.read().unwrap_or_else(PoisonError::into_inner));
        }
    }

    pub fn owns_lock(&self) -> bool {
        self.guard.is_some()
    }
}

pub struct LayerWriteGuard<'a> {
    lock: &'a RwLock<()>,
    guard: Option<RwLockWriteGuard<'a, ()>>,
}

impl LayerWriteGuard<'_> {
    pub fn acquire(&mut self) {
        if self.guard.is_none() {
            self.guard = Some(self.lock.write().unwrap_or_else(PoisonError::into_inner));
        }
    }

    pub fn owns_lock(&self) -> bool {
        self.guard.is_some()
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
