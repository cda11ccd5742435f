//! Progress events
//!
//! Broadcast once on the progress bus during download and load sequences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a progress event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    Download,
    Loading,
    Loaded,
    Unloaded,
    Error,
}

/// A single lifecycle notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub kind: ProgressKind,
    /// 0..=100
    pub percent: u8,
    pub model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub emitted_at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(kind: ProgressKind, model_id: impl Into<String>, percent: u8) -> Self {
        Self {
            kind,
            percent: percent.min(100),
            model_id: model_id.into(),
            error_message: None,
            emitted_at: Utc::now(),
        }
    }

    pub fn download(model_id: impl Into<String>, percent: u8) -> Self {
        Self::new(ProgressKind::Download, model_id, percent)
    }

    pub fn loading(model_id: impl Into<String>, percent: u8) -> Self {
        Self::new(ProgressKind::Loading, model_id, percent)
    }

    pub fn loaded(model_id: impl Into<String>) -> Self {
        Self::new(ProgressKind::Loaded, model_id, 100)
    }

    pub fn unloaded(model_id: impl Into<String>) -> Self {
        Self::new(ProgressKind::Unloaded, model_id, 0)
    }

    pub fn error(model_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::new(ProgressKind::Error, model_id, 0)
        }
    }
}
