//! Inference orchestrator
//!
//! High-level requests against whatever model the lifecycle manager has
//! loaded. Each call takes the runtime lock for its whole duration and runs
//! the engine on a blocking thread. Task prompts (summaries, categories,
//! commands, questions) are one-shot and never touch the chat history.

use crate::error::{Error, Result};
use crate::inference::engine::{ContextParams, EngineError, GenerationParams};
use crate::inference::prompts::{
    answer_question_prompt, batch_categorize_prompt, categorize_prompt, chunk_summary_prompt,
    combine_summaries_prompt, parse_command_prompt, summarize_prompt,
};
use crate::inference::shaping::{chunk_text, estimate_tokens, truncate_for_context};
use crate::inference::streaming::{drain, token_channel};
use crate::lifecycle::manager::LifecycleManager;
use crate::lifecycle::runtime::{ModelRuntime, RuntimeSlot};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// Label returned when nothing better can be determined
pub const UNKNOWN: &str = "unknown";

// Summaries
const DIRECT_SUMMARY_TOKENS: usize = 700;
const SUMMARY_CHUNK_TOKENS: usize = 500;
const TRUNCATED_SUMMARY_TOKENS: usize = 800;
const MAX_SUMMARY_CHUNKS: usize = 5;
const SUMMARY_REPLY_TOKENS: u32 = 256;
const CHUNK_SUMMARY_REPLY_TOKENS: u32 = 100;
const CHUNK_SUMMARY_TEMPERATURE: f32 = 0.3;

// Classification and parsing
const CATEGORIZE_BATCH_SIZE: usize = 3;
const CATEGORY_REPLY_TOKENS: u32 = 20;
const COMMAND_REPLY_TOKENS: u32 = 150;
const CLASSIFY_TEMPERATURE: f32 = 0.1;

const ANSWER_REPLY_TOKENS: u32 = 500;

static NUMBERED_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s*[.):\-]\s*(.*)$").unwrap());

/// Per-call overrides for chat generation; unset fields use the settings
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

/// A page to categorize
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorizeItem {
    pub title: String,
    pub url: String,
}

impl CategorizeItem {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }
}

/// Structured form of a natural-language command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedCommand {
    pub action: String,
    /// Every other field of the model's JSON object
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ParsedCommand {
    /// Fallback carrying the original command text
    pub fn unknown(command: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("raw".to_string(), Value::String(command.to_string()));
        Self {
            action: UNKNOWN.to_string(),
            fields,
        }
    }
}

#[derive(Debug, Error)]
enum CommandParseError {
    #[error("no JSON object in reply")]
    NoObject,
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing action field")]
    MissingAction,
}

/// Inference requests against the currently loaded model
#[derive(Clone)]
pub struct Inference {
    lifecycle: Arc<LifecycleManager>,
    runtime: RuntimeSlot,
}

impl Inference {
    pub fn new(lifecycle: Arc<LifecycleManager>) -> Self {
        let runtime = lifecycle.runtime();
        Self { lifecycle, runtime }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    /// Chat turn, recorded in the session history
    pub async fn chat(&self, prompt: &str, options: ChatOptions) -> Result<String> {
        let params = self.chat_params(&options);
        let prompt = prompt.to_string();
        self.with_runtime(move |runtime| {
            let (session, context) = runtime.chat_parts().ok_or(Error::ModelNotLoaded)?;
            Ok(session.prompt(context, &prompt, &params, &mut |_| {})?)
        })
        .await
    }

    /// Chat turn delivering fragments to `on_token` as they are generated.
    /// Returns the concatenation of the delivered fragments.
    pub async fn chat_stream<F>(&self, prompt: &str, on_token: F, options: ChatOptions) -> Result<String>
    where
        F: FnMut(&str),
    {
        let params = self.chat_params(&options);
        let prompt = prompt.to_string();
        let (tx, mut rx) = token_channel();

        let generation = self.with_runtime(move |runtime| {
            let (session, context) = runtime.chat_parts().ok_or(Error::ModelNotLoaded)?;
            let result = session.prompt(context, &prompt, &params, &mut |t| tx.token(t));
            tx.finish(&result);
            Ok(result?)
        });

        let (result, streamed) = tokio::join!(generation, drain(&mut rx, on_token));
        result.map(|_| streamed)
    }

    /// Forget the conversation, keeping the system prompt
    pub async fn reset_chat(&self) -> Result<()> {
        let mut slot = self.runtime.lock().await;
        let runtime = slot.as_mut().ok_or(Error::ModelNotLoaded)?;
        let (session, _) = runtime.chat_parts().ok_or(Error::ModelNotLoaded)?;
        session.reset();
        tracing::debug!("Chat session {} reset", session.id());
        Ok(())
    }

    /// Token count from the loaded model's tokenizer, or the chars/4
    /// estimate when there is none
    pub async fn count_tokens(&self, text: &str) -> usize {
        let slot = self.runtime.lock().await;
        slot.as_ref()
            .and_then(|runtime| runtime.model())
            .and_then(|model| model.token_count(text))
            .unwrap_or_else(|| estimate_tokens(text))
    }

    /// Summarize `text` in at most `max_sentences` sentences.
    ///
    /// Short text is summarized directly. Longer text is split into
    /// paragraph chunks; the first five are summarized one by one and the
    /// partial summaries merged.
    pub async fn summarize(&self, text: &str, max_sentences: usize) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(String::new());
        }
        let max_sentences = max_sentences.max(1);
        let params = self.task_params(SUMMARY_REPLY_TOKENS, self.lifecycle.settings().temperature);

        if estimate_tokens(text) < DIRECT_SUMMARY_TOKENS {
            return self.run_task(summarize_prompt(text, max_sentences), params).await;
        }

        let chunks = chunk_text(text, SUMMARY_CHUNK_TOKENS);
        if chunks.len() <= 1 {
            let truncated = truncate_for_context(text, TRUNCATED_SUMMARY_TOKENS);
            return self.run_task(summarize_prompt(&truncated, max_sentences), params).await;
        }

        if chunks.len() > MAX_SUMMARY_CHUNKS {
            tracing::debug!(
                "Summarizing first {} of {} chunks",
                MAX_SUMMARY_CHUNKS,
                chunks.len()
            );
        }
        let total = chunks.len().min(MAX_SUMMARY_CHUNKS);
        let map_params = self.task_params(CHUNK_SUMMARY_REPLY_TOKENS, CHUNK_SUMMARY_TEMPERATURE);

        let mut partials = Vec::with_capacity(total);
        for (i, chunk) in chunks.iter().take(total).enumerate() {
            let partial = self
                .run_task(chunk_summary_prompt(chunk, i, total), map_params.clone())
                .await?;
            partials.push(partial);
        }

        self.run_task(combine_summaries_prompt(&partials.join("\n"), max_sentences), params)
            .await
    }

    /// Pick one of `categories` for a page, or [`UNKNOWN`]
    pub async fn categorize(&self, title: &str, url: &str, categories: &[String]) -> Result<String> {
        let reply = self
            .run_task(
                categorize_prompt(title, url, categories),
                self.task_params(CATEGORY_REPLY_TOKENS, CLASSIFY_TEMPERATURE),
            )
            .await?;

        let answer = reply.lines().next().unwrap_or("");
        Ok(exact_category(answer, categories).unwrap_or_else(|| UNKNOWN.to_string()))
    }

    /// Categorize pages a few at a time. The result always has one label per
    /// item; a batch that fails labels all its items [`UNKNOWN`].
    pub async fn batch_categorize(&self, items: &[CategorizeItem], categories: &[String]) -> Result<Vec<String>> {
        let reply_tokens = CATEGORY_REPLY_TOKENS * CATEGORIZE_BATCH_SIZE as u32;
        let params = self.task_params(reply_tokens, CLASSIFY_TEMPERATURE);
        self.ensure_ready().await?;

        let mut labels = Vec::with_capacity(items.len());
        for batch in items.chunks(CATEGORIZE_BATCH_SIZE) {
            let prompt = batch_categorize_prompt(
                batch.iter().map(|item| (item.title.as_str(), item.url.as_str())),
                categories,
            );
            match self.run_task(prompt, params.clone()).await {
                Ok(reply) => labels.extend(resolve_batch(&reply, batch.len(), categories)),
                Err(Error::ModelNotLoaded) => return Err(Error::ModelNotLoaded),
                Err(e) => {
                    tracing::warn!("Categorizing batch of {} failed: {}", batch.len(), e);
                    labels.extend(std::iter::repeat(UNKNOWN.to_string()).take(batch.len()));
                }
            }
        }
        Ok(labels)
    }

    /// Turn a natural-language command into an action plus arguments.
    ///
    /// Replies that carry no usable JSON object degrade to
    /// `{"action": "unknown", "raw": <command>}`.
    pub async fn parse_command(&self, command: &str) -> Result<ParsedCommand> {
        let prompt = parse_command_prompt(command, &self.lifecycle.settings().command_actions);
        let reply = self
            .run_task(prompt, self.task_params(COMMAND_REPLY_TOKENS, CLASSIFY_TEMPERATURE))
            .await?;

        match parse_command_reply(&reply) {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                tracing::debug!("Unusable command reply ({}): {}", e, reply);
                Ok(ParsedCommand::unknown(command))
            }
        }
    }

    /// Answer `question` from `content` alone
    pub async fn answer_question(&self, question: &str, content: &str) -> Result<String> {
        let params = self.task_params(ANSWER_REPLY_TOKENS, self.lifecycle.settings().temperature);
        self.run_task(answer_question_prompt(question, content), params).await
    }

    /// Embedding vector for `text` from a short-lived embedding context
    pub async fn get_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.to_string();
        let context_size = self.lifecycle.settings().context_size;
        self.with_runtime(move |runtime| {
            let model = runtime.model().ok_or(Error::ModelNotLoaded)?;
            let mut context = model.create_context(&ContextParams {
                context_size,
                embeddings: true,
            })?;
            let embedding = context.embed(&text)?;
            drop(context);
            Ok(embedding)
        })
        .await
    }

    async fn ensure_ready(&self) -> Result<()> {
        match self.runtime.lock().await.as_ref() {
            Some(_) => Ok(()),
            None => Err(Error::ModelNotLoaded),
        }
    }

    /// Run `f` on a blocking thread while holding the runtime lock
    async fn with_runtime<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut ModelRuntime) -> Result<T> + Send + 'static,
    {
        let mut slot = self.runtime.clone().lock_owned().await;
        if slot.is_none() {
            return Err(Error::ModelNotLoaded);
        }

        tokio::task::spawn_blocking(move || match slot.as_mut() {
            Some(runtime) => f(runtime),
            None => Err(Error::ModelNotLoaded),
        })
        .await
        .map_err(|e| EngineError::GenerationFailed(e.to_string()))?
    }

    /// One-shot prompt outside the chat history
    async fn run_task(&self, prompt: String, params: GenerationParams) -> Result<String> {
        tracing::debug!("Task prompt ({} estimated tokens)", estimate_tokens(&prompt));
        let reply = self
            .with_runtime(move |runtime| {
                let (session, context) = runtime.chat_parts().ok_or(Error::ModelNotLoaded)?;
                Ok(session.prompt_isolated(context, &prompt, &params)?)
            })
            .await?;
        Ok(reply.trim().to_string())
    }

    fn chat_params(&self, options: &ChatOptions) -> GenerationParams {
        let settings = self.lifecycle.settings();
        GenerationParams {
            max_tokens: options.max_tokens.unwrap_or(settings.max_tokens),
            temperature: options.temperature.unwrap_or(settings.temperature),
            top_p: options.top_p.unwrap_or(settings.top_p),
            ..GenerationParams::default()
        }
    }

    fn task_params(&self, max_tokens: u32, temperature: f32) -> GenerationParams {
        GenerationParams {
            max_tokens,
            temperature,
            top_p: self.lifecycle.settings().top_p,
            ..GenerationParams::default()
        }
    }
}

/// Case-insensitive exact match after stripping quotes and punctuation
fn exact_category(answer: &str, categories: &[String]) -> Option<String> {
    let answer = answer
        .trim()
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_lowercase();
    if answer.is_empty() {
        return None;
    }
    categories
        .iter()
        .find(|c| c.to_lowercase() == answer)
        .cloned()
}

/// Exact match, else the longest category named inside the answer
fn resolve_label(answer: &str, categories: &[String]) -> String {
    if let Some(exact) = exact_category(answer, categories) {
        return exact;
    }
    let lowered = answer.to_lowercase();
    categories
        .iter()
        .filter(|c| !c.is_empty() && lowered.contains(&c.to_lowercase()))
        .max_by_key(|c| c.len())
        .cloned()
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Map a numbered batch reply back onto `count` items
fn resolve_batch(reply: &str, count: usize, categories: &[String]) -> Vec<String> {
    let mut resolved: Vec<Option<String>> = vec![None; count];
    let mut next = 0usize;

    for line in reply.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (slot, answer) = match NUMBERED_LINE.captures(line) {
            Some(caps) => (
                caps[1].parse::<usize>().ok().and_then(|n| n.checked_sub(1)),
                caps.get(2).map_or("", |m| m.as_str()),
            ),
            None => (Some(next), line),
        };
        let Some(slot) = slot.filter(|s| *s < count) else {
            continue;
        };
        if resolved[slot].is_none() {
            resolved[slot] = Some(resolve_label(answer, categories));
        }
        next = slot + 1;
    }

    resolved
        .into_iter()
        .map(|label| label.unwrap_or_else(|| UNKNOWN.to_string()))
        .collect()
}

fn parse_command_reply(reply: &str) -> std::result::Result<ParsedCommand, CommandParseError> {
    let object = first_json_object(reply).ok_or(CommandParseError::NoObject)?;
    let mut fields: Map<String, Value> = serde_json::from_str(object)?;
    let action = match fields.remove("action") {
        Some(Value::String(action)) if !action.trim().is_empty() => action.trim().to_string(),
        _ => return Err(CommandParseError::MissingAction),
    };
    Ok(ParsedCommand { action, fields })
}

/// First balanced `{...}` in `text`, ignoring braces inside JSON strings
fn first_json_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = None;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return start.map(|s| &text[s..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
