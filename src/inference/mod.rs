//! LLM inference
//!
//! The engine seam, chat sessions, prompt shaping and the orchestrator that
//! runs requests against the loaded model.

pub mod engine;
#[cfg(feature = "llama")]
pub mod llama;
pub mod orchestrator;
pub mod prompts;
pub mod session;
pub mod shaping;
pub mod similarity;
pub mod streaming;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{
    ContextParams, EngineError, GenerationParams, InferenceContext, InferenceEngine, ModelHandle,
    ModelParams,
};
#[cfg(feature = "llama")]
pub use llama::LlamaEngine;
pub use orchestrator::{CategorizeItem, ChatOptions, Inference, ParsedCommand, UNKNOWN};
pub use session::ChatSession;
pub use shaping::{chunk_text, estimate_tokens, truncate_for_context};
pub use similarity::cosine_similarity;
pub use streaming::StreamToken;
