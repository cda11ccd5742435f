//! Chat session
//!
//! Conversation state for the loaded model: the system prompt plus the
//! accumulated turns. The session never owns engine resources; it is handed
//! the context it is bound to on every call.

use crate::inference::engine::{EngineError, GenerationParams, InferenceContext};
use crate::types::ChatMessage;
use uuid::Uuid;

pub struct ChatSession {
    id: Uuid,
    system_prompt: String,
    history: Vec<ChatMessage>,
    max_history: usize,
}

impl ChatSession {
    pub fn new(system_prompt: impl Into<String>, max_history: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            system_prompt: system_prompt.into(),
            history: Vec::new(),
            max_history: max_history.max(2),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Forget the conversation, keeping the system prompt
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Send a user turn and record both sides of the exchange
    pub fn prompt(
        &mut self,
        context: &mut dyn InferenceContext,
        user: &str,
        params: &GenerationParams,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<String, EngineError> {
        let mut messages = self.base_messages();
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::user(user));

        let reply = context.generate(&messages, params, on_token)?;

        self.history.push(ChatMessage::user(user));
        self.history.push(ChatMessage::assistant(reply.clone()));
        self.trim_history();
        Ok(reply)
    }

    /// One-shot prompt that leaves the conversation untouched
    pub fn prompt_isolated(
        &self,
        context: &mut dyn InferenceContext,
        user: &str,
        params: &GenerationParams,
    ) -> Result<String, EngineError> {
        let mut messages = self.base_messages();
        messages.push(ChatMessage::user(user));
        context.generate(&messages, params, &mut |_| {})
    }

    fn base_messages(&self) -> Vec<ChatMessage> {
        if self.system_prompt.trim().is_empty() {
            Vec::new()
        } else {
            vec![ChatMessage::system(self.system_prompt.clone())]
        }
    }

    fn trim_history(&mut self) {
        if self.history.len() > self.max_history {
            let excess = self.history.len() - self.max_history;
            self.history.drain(..excess);
        }
    }
}
