//! llama.cpp engine
//!
//! [`InferenceEngine`] over `llama-cpp-2`. A native `LlamaContext` borrows
//! its model, so the context handle keeps the backend and model alive and
//! opens a native context for each call.

use crate::inference::engine::{
    ContextParams, EngineError, GenerationParams, InferenceContext, InferenceEngine, ModelHandle,
    ModelParams,
};
use crate::types::{ChatMessage, Role};
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use once_cell::sync::OnceCell;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;

/// Tokens per decode call; llama.cpp rejects larger prefill batches
const PREFILL_BATCH_SIZE: usize = 512;

#[derive(Default)]
pub struct LlamaEngine {
    backend: OnceCell<Arc<LlamaBackend>>,
}

impl LlamaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn backend(&self) -> Result<Arc<LlamaBackend>, EngineError> {
        self.backend.get().cloned().ok_or(EngineError::NotInitialized)
    }
}

impl InferenceEngine for LlamaEngine {
    fn name(&self) -> &'static str {
        "llama.cpp"
    }

    fn init(&self) -> Result<(), EngineError> {
        self.backend
            .get_or_try_init(|| {
                LlamaBackend::init()
                    .map(Arc::new)
                    .map_err(|e| EngineError::BackendInit(e.to_string()))
            })
            .map(|_| ())
    }

    fn is_initialized(&self) -> bool {
        self.backend.get().is_some()
    }

    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<Arc<dyn ModelHandle>, EngineError> {
        let backend = self.backend()?;
        let model_params = LlamaModelParams::default().with_n_gpu_layers(params.gpu_layers);
        let model = LlamaModel::load_from_file(&backend, path, &model_params)
            .map_err(|e| EngineError::LoadFailed(e.to_string()))?;

        tracing::info!(
            "Loaded {:?} (trained context {}, {} GPU layers)",
            path,
            model.n_ctx_train(),
            params.gpu_layers
        );
        Ok(Arc::new(LlamaModelHandle {
            backend,
            model: Arc::new(model),
        }))
    }
}

struct LlamaModelHandle {
    backend: Arc<LlamaBackend>,
    model: Arc<LlamaModel>,
}

impl ModelHandle for LlamaModelHandle {
    fn create_context(&self, params: &ContextParams) -> Result<Box<dyn InferenceContext>, EngineError> {
        let context = LlamaContextHandle {
            backend: self.backend.clone(),
            model: self.model.clone(),
            params: *params,
        };
        // Fail at creation time rather than on first use
        context.open()?;
        Ok(Box::new(context))
    }

    fn token_count(&self, text: &str) -> Option<usize> {
        self.model.str_to_token(text, AddBos::Never).ok().map(|t| t.len())
    }
}

struct LlamaContextHandle {
    backend: Arc<LlamaBackend>,
    model: Arc<LlamaModel>,
    params: ContextParams,
}

impl LlamaContextHandle {
    fn open(&self) -> Result<LlamaContext<'_>, EngineError> {
        let n_ctx = NonZeroU32::new(self.params.context_size)
            .or(NonZeroU32::new(2048))
            .ok_or_else(|| EngineError::ContextFailed("invalid context size".to_string()))?;
        let mut ctx_params = LlamaContextParams::default().with_n_ctx(Some(n_ctx));
        if self.params.embeddings {
            ctx_params = ctx_params.with_embeddings(true);
        }
        self.model
            .new_context(&self.backend, ctx_params)
            .map_err(|e| EngineError::ContextFailed(e.to_string()))
    }

    /// Prompt text in the model's own chat format, ChatML if it has none
    fn render(&self, messages: &[ChatMessage]) -> Result<String, EngineError> {
        let chat = messages
            .iter()
            .map(|m| LlamaChatMessage::new(role_name(m.role).to_string(), m.content.clone()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| EngineError::GenerationFailed(e.to_string()))?;

        let rendered = self
            .model
            .chat_template(None)
            .ok()
            .and_then(|template| self.model.apply_chat_template(&template, &chat, true).ok());

        Ok(rendered.unwrap_or_else(|| chatml(messages)))
    }
}

impl InferenceContext for LlamaContextHandle {
    fn generate(
        &mut self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<String, EngineError> {
        let prompt = self.render(messages)?;
        let tokens = self
            .model
            .str_to_token(&prompt, AddBos::Always)
            .map_err(generation_failed)?;

        let budget = tokens.len() + params.max_tokens as usize;
        if budget > self.params.context_size as usize {
            return Err(EngineError::GenerationFailed(format!(
                "prompt of {} tokens plus {} reply tokens exceeds context of {}",
                tokens.len(),
                params.max_tokens,
                self.params.context_size
            )));
        }

        let mut ctx = self.open()?;
        let mut batch = LlamaBatch::new(PREFILL_BATCH_SIZE, 1);
        let last_pos = (tokens.len() as i32).saturating_sub(1);

        let mut pos = 0i32;
        for chunk in tokens.chunks(PREFILL_BATCH_SIZE) {
            batch.clear();
            for &token in chunk {
                batch
                    .add(token, pos, &[0], pos == last_pos)
                    .map_err(generation_failed)?;
                pos += 1;
            }
            ctx.decode(&mut batch).map_err(generation_failed)?;
        }

        let mut sampler = if params.temperature <= 0.0 {
            LlamaSampler::greedy()
        } else {
            LlamaSampler::chain_simple([
                LlamaSampler::top_p(params.top_p, 1),
                LlamaSampler::temp(params.temperature),
                LlamaSampler::dist(params.seed),
            ])
        };

        let mut reply = String::new();
        // Bytes of a multi-byte character split across tokens
        let mut pending: Vec<u8> = Vec::new();
        let mut n_cur = tokens.len() as i32;

        for _ in 0..params.max_tokens {
            let token = sampler.sample(&ctx, batch.n_tokens() - 1);
            sampler.accept(token);

            if self.model.is_eog_token(token) {
                break;
            }

            #[allow(deprecated)]
            let bytes = self
                .model
                .token_to_bytes(token, Special::Tokenize)
                .map_err(generation_failed)?;
            pending.extend_from_slice(&bytes);
            if let Some(piece) = take_utf8(&mut pending) {
                on_token(&piece);
                reply.push_str(&piece);
            }

            batch.clear();
            batch.add(token, n_cur, &[0], true).map_err(generation_failed)?;
            n_cur += 1;
            ctx.decode(&mut batch).map_err(generation_failed)?;
        }

        if !pending.is_empty() {
            let tail = String::from_utf8_lossy(&pending).into_owned();
            on_token(&tail);
            reply.push_str(&tail);
        }
        Ok(reply)
    }

    fn embed(&mut self, text: &str) -> Result<Vec<f32>, EngineError> {
        if !self.params.embeddings {
            return Err(EngineError::EmbeddingFailed(
                "context was not created for embeddings".to_string(),
            ));
        }

        let tokens = self
            .model
            .str_to_token(text, AddBos::Always)
            .map_err(|e| EngineError::EmbeddingFailed(e.to_string()))?;
        if tokens.len() > self.params.context_size as usize {
            return Err(EngineError::EmbeddingFailed(format!(
                "{} tokens exceed context of {}",
                tokens.len(),
                self.params.context_size
            )));
        }

        let mut ctx = self.open()?;
        let mut batch = LlamaBatch::new(tokens.len().max(1), 1);
        batch
            .add_sequence(&tokens, 0, false)
            .map_err(|e| EngineError::EmbeddingFailed(e.to_string()))?;
        ctx.decode(&mut batch)
            .map_err(|e| EngineError::EmbeddingFailed(e.to_string()))?;

        let embedding = ctx
            .embeddings_seq_ith(0)
            .map_err(|e| EngineError::EmbeddingFailed(e.to_string()))?;
        Ok(embedding.to_vec())
    }
}

fn generation_failed(e: impl std::fmt::Display) -> EngineError {
    EngineError::GenerationFailed(e.to_string())
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

fn chatml(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        prompt.push_str(&format!(
            "<|im_start|>{}\n{}<|im_end|>\n",
            role_name(message.role),
            message.content
        ));
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

/// Drain the longest valid UTF-8 prefix of `pending`
fn take_utf8(pending: &mut Vec<u8>) -> Option<String> {
    let valid = match std::str::from_utf8(&pending[..]) {
        Ok(s) => s.len(),
        Err(e) if e.error_len().is_some() => {
            // Invalid rather than incomplete: give up on exactness
            let text = String::from_utf8_lossy(&pending[..]).into_owned();
            pending.clear();
            return Some(text);
        }
        Err(e) => e.valid_up_to(),
    };
    if valid == 0 {
        return None;
    }
    let rest = pending.split_off(valid);
    let text = String::from_utf8(std::mem::replace(pending, rest)).ok()?;
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_utf8_waits_for_full_character() {
        let euro = "€".as_bytes();
        let mut pending = vec![b'a', euro[0]];
        assert_eq!(take_utf8(&mut pending).as_deref(), Some("a"));
        assert_eq!(take_utf8(&mut pending), None);
        pending.extend_from_slice(&euro[1..]);
        assert_eq!(take_utf8(&mut pending).as_deref(), Some("€"));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_chatml_ends_with_assistant_turn() {
        let prompt = chatml(&[ChatMessage::system("sys"), ChatMessage::user("hi")]);
        assert!(prompt.starts_with("<|im_start|>system\nsys<|im_end|>\n"));
        assert!(prompt.ends_with("<|im_start|>assistant\n"));
    }

    #[test]
    fn test_engine_starts_uninitialized() {
        let engine = LlamaEngine::new();
        assert!(!engine.is_initialized());
        assert!(matches!(
            engine.load_model(Path::new("missing.gguf"), &ModelParams { gpu_layers: 0 }),
            Err(EngineError::NotInitialized)
        ));
    }
}
