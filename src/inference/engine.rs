//! Inference engine seam
//!
//! The native engine is opaque to the rest of the crate. It is reached
//! through three handles that mirror its resource hierarchy:
//! engine (process-wide backend) -> model (loaded weights) -> context
//! (evaluation state). Every call here is blocking; async callers run them
//! on `tokio::task::spawn_blocking`.

use crate::types::ChatMessage;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Failures reported by the native engine
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Backend initialization failed: {0}")]
    BackendInit(String),
    #[error("Engine not initialized")]
    NotInitialized,
    #[error("Model load failed: {0}")]
    LoadFailed(String),
    #[error("Context creation failed: {0}")]
    ContextFailed(String),
    #[error("Generation failed: {0}")]
    GenerationFailed(String),
    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),
}

/// Parameters for loading weights
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelParams {
    /// Number of layers to offload (0 = CPU only)
    pub gpu_layers: u32,
}

/// Parameters for an evaluation context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextParams {
    pub context_size: u32,
    /// Embedding mode instead of text generation
    pub embeddings: bool,
}

/// Sampling parameters for a single generation
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub seed: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            seed: 1234,
        }
    }
}

/// Process-wide engine backend
pub trait InferenceEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Initialize the backend. Must be idempotent.
    fn init(&self) -> Result<(), EngineError>;

    fn is_initialized(&self) -> bool;

    /// Materialize weights from `path`
    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<Arc<dyn ModelHandle>, EngineError>;
}

/// Loaded model weights
pub trait ModelHandle: Send + Sync {
    fn create_context(&self, params: &ContextParams) -> Result<Box<dyn InferenceContext>, EngineError>;

    /// Exact token count from the model's tokenizer, if the engine offers one
    fn token_count(&self, _text: &str) -> Option<usize> {
        None
    }
}

/// Evaluation state bound to one model
pub trait InferenceContext: Send {
    /// Generate a reply to `messages`, passing each fragment to `on_token`
    /// in order as it is produced. Returns the full reply.
    fn generate(
        &mut self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<String, EngineError>;

    /// Compute one embedding vector. Only valid on embedding contexts.
    fn embed(&mut self, text: &str) -> Result<Vec<f32>, EngineError>;

    /// The chat session bound to this context was released. Contexts that
    /// cache conversation state drop it here.
    fn end_session(&mut self) {}
}
