//! Persistent storage
//!
//! Settings, the model catalog and everything that touches model artifacts
//! on disk: integrity checks and downloads.

pub mod catalog;
pub mod downloader;
pub mod integrity;
pub mod settings;

use crate::error::{Error, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

pub use catalog::ModelCatalog;
pub use downloader::Downloader;
pub use settings::{IntegrityPolicy, Settings};

/// Platform data directory for this crate
pub fn get_data_dir() -> Result<PathBuf> {
    ProjectDirs::from("dev", "localm", "localm")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| Error::Config("Could not determine data directory".to_string()))
}
