//! Streaming chat client core.
//!
//! A reply arrives as a server-sent-event byte stream from the chat proxy.
//! [`sse`] turns it into text deltas, [`conversation`] appends each delta to
//! the assistant message and asks [`artifact`] whether the reply now holds a
//! renderable HTML or markdown artifact, and [`preview`] puts the current
//! artifact somewhere it can be viewed.
//!
//! ```text
//! proxy bytes ──► DeltaStream ──► Conversation ──► ArtifactDetector ──► PreviewState
//! ```

pub mod artifact;
pub mod cli;
pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod preview;
pub mod sse;
pub mod wire;

pub use artifact::{detect, Artifact, ArtifactDetector, ArtifactKind, ArtifactMatcher};
pub use client::{ChatClient, Session};
pub use config::Config;
pub use conversation::{Conversation, Message, PreviewState, Role, TurnEvent, TurnSummary};
pub use error::{ChatError, StreamError};
pub use sse::{Completion, DeltaStream, SseDecoder};
pub use tokio_util::sync::CancellationToken;
