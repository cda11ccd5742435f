//! Lifecycle state
//!
//! The single source of truth for what is loaded right now. Only the
//! lifecycle manager mutates it; everyone else reads snapshots.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    Uninitialized,
    Idle,
    Downloading,
    Loading,
    Ready,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleState {
    pub phase: LifecyclePhase,
    /// Set iff `phase` is `Ready`
    pub current_model_id: Option<String>,
    pub progress_percent: u8,
    pub last_error: Option<String>,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self {
            phase: LifecyclePhase::Uninitialized,
            current_model_id: None,
            progress_percent: 0,
            last_error: None,
        }
    }
}

impl LifecycleState {
    pub fn is_ready_with(&self, model_id: &str) -> bool {
        self.phase == LifecyclePhase::Ready && self.current_model_id.as_deref() == Some(model_id)
    }

    pub(crate) fn enter(&mut self, phase: LifecyclePhase, progress_percent: u8) {
        self.phase = phase;
        self.progress_percent = progress_percent.min(100);
        if phase != LifecyclePhase::Ready {
            self.current_model_id = None;
        }
    }

    pub(crate) fn ready(&mut self, model_id: &str) {
        self.phase = LifecyclePhase::Ready;
        self.current_model_id = Some(model_id.to_string());
        self.progress_percent = 100;
        self.last_error = None;
    }

    pub(crate) fn failed(&mut self, message: String) {
        self.enter(LifecyclePhase::Error, 0);
        self.last_error = Some(message);
    }
}

/// Point-in-time view handed to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleSnapshot {
    /// Engine backend initialized
    pub initialized: bool,
    pub model_loaded: bool,
    pub current_model_id: Option<String>,
    /// A load or download sequence is in flight
    pub is_loading: bool,
    pub progress_percent: u8,
    pub storage_directory: PathBuf,
    pub phase: LifecyclePhase,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_id_only_when_ready() {
        let mut state = LifecycleState::default();
        state.ready("m");
        assert!(state.is_ready_with("m"));
        assert!(!state.is_ready_with("other"));

        state.enter(LifecyclePhase::Loading, 60);
        assert_eq!(state.current_model_id, None);
        assert!(!state.is_ready_with("m"));
    }

    #[test]
    fn test_failure_resets_progress() {
        let mut state = LifecycleState::default();
        state.enter(LifecyclePhase::Downloading, 40);
        state.failed("network down".to_string());
        assert_eq!(state.phase, LifecyclePhase::Error);
        assert_eq!(state.progress_percent, 0);
        assert_eq!(state.last_error.as_deref(), Some("network down"));
    }
}
