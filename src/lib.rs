//! LocaLM runtime
//!
//! On-device model lifecycle and inference orchestration for the LocaLM
//! client: model catalog, verified downloads, load/unload with progress
//! events, and chat, summarization, classification and embedding requests
//! against the loaded model.

pub mod error;
pub mod inference;
pub mod lifecycle;
pub mod logging;
pub mod storage;
pub mod types;

pub use error::{Error, Result};
pub use inference::{ChatOptions, Inference};
pub use lifecycle::{LifecycleManager, LifecyclePhase, LifecycleSnapshot, ProgressBus};
pub use storage::Settings;
