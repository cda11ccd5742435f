//! Loaded model runtime
//!
//! The model handle, its chat context and the chat session bound to it.
//! Teardown runs in reverse order of acquisition so nothing outlives a
//! dependency: session, then context, then model.

use crate::inference::engine::{InferenceContext, ModelHandle};
use crate::inference::session::ChatSession;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared slot holding the runtime while a model is ready. Inference calls
/// hold the lock for their whole duration.
pub(crate) type RuntimeSlot = Arc<Mutex<Option<ModelRuntime>>>;

pub struct ModelRuntime {
    model_id: String,
    session: Option<ChatSession>,
    context: Option<Box<dyn InferenceContext>>,
    model: Option<Arc<dyn ModelHandle>>,
}

impl ModelRuntime {
    pub(crate) fn new(
        model_id: impl Into<String>,
        model: Arc<dyn ModelHandle>,
        context: Box<dyn InferenceContext>,
        session: ChatSession,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            session: Some(session),
            context: Some(context),
            model: Some(model),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn model(&self) -> Option<&Arc<dyn ModelHandle>> {
        self.model.as_ref()
    }

    /// Session and the context it is bound to
    pub fn chat_parts(&mut self) -> Option<(&mut ChatSession, &mut dyn InferenceContext)> {
        let session = self.session.as_mut()?;
        let context: &mut dyn InferenceContext = self.context.as_deref_mut()?;
        Some((session, context))
    }

    /// Release session, context and model, in that order. Idempotent.
    pub fn release(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::debug!("Releasing chat session {}", session.id());
            drop(session);
            if let Some(context) = self.context.as_deref_mut() {
                context.end_session();
            }
        }
        if let Some(context) = self.context.take() {
            drop(context);
        }
        if let Some(model) = self.model.take() {
            drop(model);
        }
    }
}

impl Drop for ModelRuntime {
    fn drop(&mut self) {
        self.release();
    }
}
