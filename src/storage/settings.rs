//! Settings storage
//!
//! Runtime configuration: generation defaults, download behaviour and the
//! integrity thresholds used to accept model artifacts.

use crate::error::Result;
use crate::storage::get_data_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const MIB: u64 = 1024 * 1024;

/// Thresholds an artifact must meet to be considered complete
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityPolicy {
    /// Minimum fraction of the expected size (0.0 - 1.0)
    pub min_ratio: f64,
    /// Absolute size floor in bytes
    pub min_bytes: u64,
}

impl Default for IntegrityPolicy {
    fn default() -> Self {
        Self {
            min_ratio: 0.9,
            min_bytes: 100 * MIB,
        }
    }
}

impl IntegrityPolicy {
    /// Smallest acceptable artifact size for a model of `expected` bytes
    pub fn required_bytes(&self, expected: u64) -> u64 {
        let by_ratio = (expected as f64 * self.min_ratio).ceil() as u64;
        by_ratio.max(self.min_bytes)
    }
}

/// Runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Temperature parameter for text generation (0.0 - 2.0)
    pub temperature: f32,
    /// Top-p (nucleus sampling) parameter (0.0 - 1.0)
    pub top_p: f32,
    /// Default number of tokens to generate per chat call
    pub max_tokens: u32,
    /// Context window size for the chat context
    pub context_size: u32,
    /// Number of GPU layers to offload (0 = CPU only)
    pub gpu_layers: u32,
    /// System prompt for every new chat session
    pub system_prompt: String,
    /// Directory where model files (.gguf) are stored
    pub models_directory: PathBuf,
    /// Overall timeout for a single artifact download
    pub download_timeout_secs: u64,
    /// Redirect hops followed before a download is abandoned
    pub max_redirects: usize,
    /// Advisory budget for inference calls; callers enforce it themselves
    pub inference_timeout_secs: u64,
    pub integrity: IntegrityPolicy,
    /// Chat turns kept in a session before the oldest are dropped
    pub max_history_messages: usize,
    /// Actions the command parser may emit
    pub command_actions: Vec<String>,
}

/// Default system prompt for chat sessions
pub fn default_system_prompt() -> String {
    "You are a helpful assistant running locally on the user's machine. \
Give direct, concise answers. If you don't know something, say so."
        .to_string()
}

/// Default vocabulary for command parsing
pub fn default_command_actions() -> Vec<String> {
    ["search", "open", "summarize", "categorize", "show", "hide", "unknown"]
        .iter()
        .map(|a| a.to_string())
        .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 512,
            context_size: 4096,
            gpu_layers: 0,
            system_prompt: default_system_prompt(),
            models_directory: get_data_dir()
                .ok()
                .map(|d| d.join("models"))
                .unwrap_or_else(|| PathBuf::from("./models")),
            download_timeout_secs: 3600,
            max_redirects: 5,
            inference_timeout_secs: 120,
            integrity: IntegrityPolicy::default(),
            max_history_messages: 40,
            command_actions: default_command_actions(),
        }
    }
}

impl Settings {
    /// Validate settings values
    ///
    /// Clamps every parameter into its accepted range.
    pub fn validate(&mut self) {
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.top_p = self.top_p.clamp(0.0, 1.0);

        let valid_context_sizes = [2048, 4096, 8192, 16384, 32768, 65536, 131072];
        if !valid_context_sizes.contains(&self.context_size) {
            self.context_size = *valid_context_sizes
                .iter()
                .min_by_key(|&&size| (size as i64 - self.context_size as i64).abs())
                .unwrap_or(&4096);
        }

        self.max_tokens = self.max_tokens.clamp(1, self.context_size);

        if self.download_timeout_secs == 0 {
            self.download_timeout_secs = 3600;
        }

        self.integrity.min_ratio = self.integrity.min_ratio.clamp(0.0, 1.0);

        if self.max_history_messages == 0 {
            self.max_history_messages = 40;
        }

        if self.system_prompt.trim().is_empty() {
            self.system_prompt = default_system_prompt();
        }

        if !self.command_actions.iter().any(|a| a == "unknown") {
            self.command_actions.push("unknown".to_string());
        }
    }
}

/// Load settings from `path`
///
/// Returns default settings if the file doesn't exist or is corrupted
pub fn load_settings(path: &Path) -> Settings {
    match load_settings_internal(path) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            Settings::default()
        }
    }
}

fn load_settings_internal(path: &Path) -> Result<Settings> {
    if !path.exists() {
        tracing::info!("Settings file not found, using defaults");
        return Ok(Settings::default());
    }

    let json = fs::read_to_string(path)?;
    let mut settings: Settings = serde_json::from_str(&json)?;
    settings.validate();

    tracing::debug!("Loaded settings from {:?}", path);
    Ok(settings)
}

/// Save settings to `path`
pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;

    tracing::debug!("Saved settings to {:?}", path);
    Ok(())
}
