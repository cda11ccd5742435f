//! Streaming token delivery
//!
//! The engine produces fragments on a blocking thread; they cross to the
//! async caller over an unbounded channel and are delivered in order.

use crate::inference::engine::EngineError;
use tokio::sync::mpsc;

/// A message on the token channel
#[derive(Debug, Clone, PartialEq)]
pub enum StreamToken {
    /// A generated text fragment
    Token(String),
    /// Generation finished
    Done,
    /// Generation failed
    Error(String),
}

/// Producer half, owned by the generating thread
pub struct TokenSender {
    tx: mpsc::UnboundedSender<StreamToken>,
}

impl TokenSender {
    pub fn token(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        // A dropped receiver just means nobody is listening any more
        let _ = self.tx.send(StreamToken::Token(text.to_string()));
    }

    /// Close the stream with the generation outcome
    pub fn finish<T>(self, result: &Result<T, EngineError>) {
        let last = match result {
            Ok(_) => StreamToken::Done,
            Err(e) => StreamToken::Error(e.to_string()),
        };
        let _ = self.tx.send(last);
    }
}

pub fn token_channel() -> (TokenSender, mpsc::UnboundedReceiver<StreamToken>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TokenSender { tx }, rx)
}

/// Deliver every fragment to `on_token` until the stream ends, returning
/// the concatenation of what was delivered.
pub async fn drain<F>(rx: &mut mpsc::UnboundedReceiver<StreamToken>, mut on_token: F) -> String
where
    F: FnMut(&str),
{
    let mut full = String::new();
    while let Some(token) = rx.recv().await {
        match token {
            StreamToken::Token(text) => {
                on_token(&text);
                full.push_str(&text);
            }
            StreamToken::Done => break,
            StreamToken::Error(e) => {
                tracing::debug!("Token stream ended with error: {}", e);
                break;
            }
        }
    }
    full
}
