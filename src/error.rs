//! Crate-level error types.
//!
//! `StreamError` is terminal to a single reply stream. `ChatError` covers
//! everything the client, session and config layers can return.

use thiserror::Error;

/// Boxed source error carried by transport failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A terminal failure of one reply stream.
///
/// Malformed frames never surface here; they are dropped inside the decoder.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The upstream sent an explicit `{"error": ...}` frame.
    #[error("upstream error: {0}")]
    Upstream(String),
    /// The byte source failed (connection dropped, body read error).
    #[error("transport failure: {0}")]
    Transport(#[source] BoxError),
}

impl StreamError {
    pub fn transport(err: impl Into<BoxError>) -> Self {
        StreamError::Transport(err.into())
    }

    /// True when the failure came from an upstream error frame rather than
    /// the transport.
    pub fn is_upstream(&self) -> bool {
        matches!(self, StreamError::Upstream(_))
    }
}

/// Errors returned by the conversation, client, session and config layers.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message is empty")]
    EmptyInput,
    #[error("a reply is already streaming; wait for it to finish")]
    Busy,
    /// The proxy replied with a non-2xx status.
    #[error("HTTP {status} from {url}: {body}")]
    Http { status: u16, url: String, body: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("config: {0}")]
    Config(#[from] toml::de::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
