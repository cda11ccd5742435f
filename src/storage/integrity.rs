//! Artifact integrity checks
//!
//! A size heuristic, not a security control: an artifact is accepted when it
//! is at least `min_ratio` of the published size and above an absolute floor.
//! Truncated downloads fail it; tampered files do not.

use crate::storage::settings::IntegrityPolicy;
use crate::types::{ModelDescriptor, ModelFileState};
use std::fs;
use std::path::{Path, PathBuf};

/// Validates artifacts in a models directory
#[derive(Debug, Clone)]
pub struct IntegrityChecker {
    models_dir: PathBuf,
    policy: IntegrityPolicy,
}

impl IntegrityChecker {
    pub fn new(models_dir: impl Into<PathBuf>, policy: IntegrityPolicy) -> Self {
        Self {
            models_dir: models_dir.into(),
            policy,
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn policy(&self) -> &IntegrityPolicy {
        &self.policy
    }

    /// Where the artifact for `descriptor` lives
    pub fn artifact_path(&self, descriptor: &ModelDescriptor) -> PathBuf {
        self.models_dir.join(descriptor.artifact_file_name())
    }

    /// Probe the filesystem for the artifact's state
    pub fn file_state(&self, descriptor: &ModelDescriptor) -> ModelFileState {
        let path = self.artifact_path(descriptor);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {
                let size_bytes = meta.len();
                ModelFileState {
                    exists: true,
                    size_bytes,
                    is_valid: size_bytes >= self.policy.required_bytes(descriptor.expected_size_bytes),
                }
            }
            Ok(_) => ModelFileState {
                exists: true,
                ..ModelFileState::default()
            },
            Err(_) => ModelFileState::default(),
        }
    }

    /// True if the artifact exists and passes the size heuristic
    pub fn validate(&self, descriptor: &ModelDescriptor) -> bool {
        let state = self.file_state(descriptor);
        if state.exists && !state.is_valid {
            tracing::debug!(
                "Artifact for {} is {} bytes, need {}",
                descriptor.id,
                state.size_bytes,
                self.policy.required_bytes(descriptor.expected_size_bytes)
            );
        }
        state.is_valid
    }

    /// Delete the artifact if present. Failures are logged, never returned.
    pub fn discard_invalid(&self, descriptor: &ModelDescriptor) {
        let path = self.artifact_path(descriptor);
        if !path.exists() {
            return;
        }
        match fs::remove_file(&path) {
            Ok(()) => tracing::info!("Removed invalid artifact {:?}", path),
            Err(e) => tracing::warn!("Failed to remove invalid artifact {:?}: {}", path, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{QualityTier, SpeedTier};

    fn descriptor(expected: u64) -> ModelDescriptor {
        ModelDescriptor {
            id: "big".to_string(),
            source_url: "https://example.com/big.gguf".to_string(),
            expected_size_bytes: expected,
            display_name: "Big".to_string(),
            ram_estimate: "~1 GB".to_string(),
            quality_tier: QualityTier::Good,
            speed_tier: SpeedTier::Fast,
            description: String::new(),
            context_length: 4096,
        }
    }

    fn write_sparse(path: &Path, len: u64) {
        let file = fs::File::create(path).unwrap();
        file.set_len(len).unwrap();
    }

    #[test]
    fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let checker = IntegrityChecker::new(dir.path(), IntegrityPolicy::default());
        let state = checker.file_state(&descriptor(1_000_000_000));
        assert_eq!(state, ModelFileState::default());
        assert!(!checker.validate(&descriptor(1_000_000_000)));
    }

    #[test]
    fn test_truncated_artifact_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let checker = IntegrityChecker::new(dir.path(), IntegrityPolicy::default());
        let model = descriptor(1_000_000_000);
        write_sparse(&checker.artifact_path(&model), 850_000_000);

        let state = checker.file_state(&model);
        assert!(state.exists);
        assert_eq!(state.size_bytes, 850_000_000);
        assert!(!state.is_valid);
        assert!(!checker.validate(&model));
    }

    #[test]
    fn test_complete_artifact_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let checker = IntegrityChecker::new(dir.path(), IntegrityPolicy::default());
        let model = descriptor(1_000_000_000);
        write_sparse(&checker.artifact_path(&model), 900_000_000);
        assert!(checker.validate(&model));
    }

    #[test]
    fn test_absolute_floor() {
        let dir = tempfile::tempdir().unwrap();
        let checker = IntegrityChecker::new(dir.path(), IntegrityPolicy::default());
        // Full size, but below the 100 MiB floor
        let model = descriptor(50_000_000);
        write_sparse(&checker.artifact_path(&model), 50_000_000);
        assert!(!checker.validate(&model));
    }

    #[test]
    fn test_discard_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let checker = IntegrityChecker::new(dir.path(), IntegrityPolicy::default());
        let model = descriptor(1_000_000_000);
        let path = checker.artifact_path(&model);
        write_sparse(&path, 10);

        checker.discard_invalid(&model);
        assert!(!path.exists());

        // Absent file is a no-op
        checker.discard_invalid(&model);
    }
}
