//! Model types
//!
//! Catalog entries and the on-disk state derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Relative output quality of a catalog model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Basic,
    Good,
    Best,
}

/// Relative generation speed of a catalog model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedTier {
    Fastest,
    Fast,
    Moderate,
}

/// Immutable catalog entry for a downloadable model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Unique identifier, also the artifact file stem
    pub id: String,
    /// Where the GGUF artifact is fetched from
    pub source_url: String,
    /// Published size of the artifact in bytes
    pub expected_size_bytes: u64,
    /// Human-readable name
    pub display_name: String,
    /// Approximate memory needed once loaded (e.g. "~2 GB")
    pub ram_estimate: String,
    pub quality_tier: QualityTier,
    pub speed_tier: SpeedTier,
    /// Short description for pickers
    pub description: String,
    /// Trained context window in tokens
    pub context_length: u32,
}

impl ModelDescriptor {
    /// File name of the artifact inside the models directory
    pub fn artifact_file_name(&self) -> String {
        format!("{}.gguf", self.id)
    }
}

/// File state of an artifact, computed on demand and never stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelFileState {
    pub exists: bool,
    pub size_bytes: u64,
    pub is_valid: bool,
}

/// Catalog entry merged with its live file state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelListing {
    pub descriptor: ModelDescriptor,
    pub file_state: ModelFileState,
    /// True if this model is the one currently loaded
    pub is_current: bool,
    /// True while this model's artifact is being fetched
    pub is_downloading: bool,
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityTier::Basic => write!(f, "basic"),
            QualityTier::Good => write!(f, "good"),
            QualityTier::Best => write!(f, "best"),
        }
    }
}

impl fmt::Display for SpeedTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeedTier::Fastest => write!(f, "fastest"),
            SpeedTier::Fast => write!(f, "fast"),
            SpeedTier::Moderate => write!(f, "moderate"),
        }
    }
}
