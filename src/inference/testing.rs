//! In-crate engine doubles for unit tests

use crate::inference::engine::{
    ContextParams, EngineError, GenerationParams, InferenceContext, InferenceEngine, ModelHandle,
    ModelParams,
};
use crate::types::{ChatMessage, Role};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};

type Responder = dyn Fn(&[ChatMessage]) -> Result<String, EngineError> + Send + Sync;

/// Context that answers "echo: <last user message>"
#[derive(Default)]
pub struct EchoContext {
    pub last_messages: Vec<ChatMessage>,
}

impl InferenceContext for EchoContext {
    fn generate(
        &mut self,
        messages: &[ChatMessage],
        _params: &GenerationParams,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<String, EngineError> {
        self.last_messages = messages.to_vec();
        let reply = format!("echo: {}", last_user(messages));
        on_token(&reply);
        Ok(reply)
    }

    fn embed(&mut self, text: &str) -> Result<Vec<f32>, EngineError> {
        Ok(vec![text.len() as f32])
    }
}

#[derive(Default)]
struct Shared {
    init_calls: AtomicUsize,
    load_calls: AtomicUsize,
    contexts: AtomicUsize,
    embedding_contexts: AtomicUsize,
    initialized: AtomicBool,
    fail_load: AtomicBool,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
    drops: Mutex<Vec<&'static str>>,
    load_gate: Mutex<Option<mpsc::Receiver<()>>>,
}

/// Engine whose replies come from a caller-supplied function
#[derive(Clone)]
pub struct ScriptedEngine {
    shared: Arc<Shared>,
    responder: Arc<Responder>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::with_responder(|messages| Ok(format!("echo: {}", last_user(messages))))
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&[ChatMessage]) -> Result<String, EngineError> + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared::default()),
            responder: Arc::new(responder),
        }
    }

    /// Block `load_model` until the returned sender fires or is dropped
    pub fn gate_loads(&self) -> mpsc::Sender<()> {
        let (tx, rx) = mpsc::channel();
        *self.shared.load_gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn fail_loads(&self, fail: bool) {
        self.shared.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn init_calls(&self) -> usize {
        self.shared.init_calls.load(Ordering::SeqCst)
    }

    pub fn load_calls(&self) -> usize {
        self.shared.load_calls.load(Ordering::SeqCst)
    }

    pub fn contexts_created(&self) -> usize {
        self.shared.contexts.load(Ordering::SeqCst)
    }

    pub fn embedding_contexts(&self) -> usize {
        self.shared.embedding_contexts.load(Ordering::SeqCst)
    }

    /// Every message list handed to `generate`, in call order
    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.shared.prompts.lock().unwrap().clone()
    }

    /// Last user message of every generation, in call order
    pub fn user_prompts(&self) -> Vec<String> {
        self.prompts().iter().map(|m| last_user(m).to_string()).collect()
    }

    /// Names of released sessions and handles, in release order
    pub fn drops(&self) -> Vec<&'static str> {
        self.shared.drops.lock().unwrap().clone()
    }
}

impl InferenceEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn init(&self) -> Result<(), EngineError> {
        self.shared.init_calls.fetch_add(1, Ordering::SeqCst);
        self.shared.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::SeqCst)
    }

    fn load_model(&self, path: &Path, _params: &ModelParams) -> Result<Arc<dyn ModelHandle>, EngineError> {
        self.shared.load_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.shared.load_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        if self.shared.fail_load.load(Ordering::SeqCst) {
            return Err(EngineError::LoadFailed(format!("cannot load {:?}", path)));
        }
        Ok(Arc::new(ScriptedModel {
            shared: self.shared.clone(),
            responder: self.responder.clone(),
        }))
    }
}

struct ScriptedModel {
    shared: Arc<Shared>,
    responder: Arc<Responder>,
}

impl ModelHandle for ScriptedModel {
    fn create_context(&self, params: &ContextParams) -> Result<Box<dyn InferenceContext>, EngineError> {
        if params.embeddings {
            self.shared.embedding_contexts.fetch_add(1, Ordering::SeqCst);
        } else {
            self.shared.contexts.fetch_add(1, Ordering::SeqCst);
        }
        Ok(Box::new(ScriptedContext {
            shared: self.shared.clone(),
            responder: self.responder.clone(),
            embeddings: params.embeddings,
        }))
    }
}

impl Drop for ScriptedModel {
    fn drop(&mut self) {
        self.shared.drops.lock().unwrap().push("model");
    }
}

struct ScriptedContext {
    shared: Arc<Shared>,
    responder: Arc<Responder>,
    embeddings: bool,
}

impl InferenceContext for ScriptedContext {
    fn generate(
        &mut self,
        messages: &[ChatMessage],
        _params: &GenerationParams,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<String, EngineError> {
        self.shared.prompts.lock().unwrap().push(messages.to_vec());
        let reply = (self.responder)(messages)?;
        for piece in reply.split_inclusive(' ') {
            on_token(piece);
        }
        Ok(reply)
    }

    fn embed(&mut self, text: &str) -> Result<Vec<f32>, EngineError> {
        if !self.embeddings {
            return Err(EngineError::EmbeddingFailed("not an embedding context".to_string()));
        }
        let vowels = text.chars().filter(|c| "aeiou".contains(*c)).count();
        Ok(vec![text.len() as f32, vowels as f32, 1.0])
    }

    fn end_session(&mut self) {
        self.shared.drops.lock().unwrap().push("session");
    }
}

impl Drop for ScriptedContext {
    fn drop(&mut self) {
        let name = if self.embeddings { "embedding-context" } else { "context" };
        self.shared.drops.lock().unwrap().push(name);
    }
}

/// Content of the last user message, or "" if there is none
pub fn last_user(messages: &[ChatMessage]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("")
}
