//! Conversation state and the per-turn streaming loop.
//!
//! `Conversation` is the only writer of the message list and the preview
//! state. A turn runs strictly in sequence: read a delta, append it to the
//! open assistant reply, run detection on the full reply, update the preview.
//! Detection never runs concurrently with itself and always sees the latest
//! text.

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::artifact::{Artifact, ArtifactDetector};
use crate::error::{BoxError, ChatError, StreamError};
use crate::sse::{Completion, DeltaStream};

/// Shown in place of a reply when the stream fails.
pub const FAILURE_MESSAGE: &str = "Sorry, there was an error processing your request.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Preview state
// ---------------------------------------------------------------------------

/// The single current artifact plus whether the pane is showing it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviewState {
    current: Option<Artifact>,
    visible: bool,
    /// Bumped every time `current` is replaced.
    revision: u64,
}

impl PreviewState {
    pub fn current(&self) -> Option<&Artifact> {
        self.current.as_ref()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Show the pane with `artifact`. Returns false when the artifact is
    /// unchanged; the pane is reshown either way.
    fn offer(&mut self, artifact: Artifact) -> bool {
        self.visible = true;
        if self.current.as_ref() == Some(&artifact) {
            return false;
        }
        self.current = Some(artifact);
        self.revision += 1;
        true
    }
}

// ---------------------------------------------------------------------------
// Turn reporting
// ---------------------------------------------------------------------------

/// Observer callback payload, in the order things happen during a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEvent<'a> {
    Delta(&'a str),
    /// The preview now shows this artifact.
    Preview(&'a Artifact),
}

/// Outcome of a turn that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnSummary {
    pub completion: Completion,
    pub deltas: usize,
    pub preview_updates: usize,
    /// Byte length of the assistant reply when the turn ended.
    pub reply_len: usize,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    preview: PreviewState,
    detector: ArtifactDetector,
    in_flight: bool,
    /// The last message is the assistant reply currently streaming.
    reply_open: bool,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detector(detector: ArtifactDetector) -> Self {
        Conversation {
            detector,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn preview(&self) -> &PreviewState {
        &self.preview
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Content of the most recent assistant message.
    pub fn last_reply(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }

    /// Record the user's message and mark a reply as in flight.
    ///
    /// Blank input is rejected, as is any send while a reply is streaming.
    pub fn submit(&mut self, text: &str) -> Result<(), ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyInput);
        }
        if self.in_flight {
            return Err(ChatError::Busy);
        }
        self.messages.push(Message::user(text));
        self.in_flight = true;
        Ok(())
    }

    /// Start an empty assistant message for the incoming stream.
    pub fn open_reply(&mut self) {
        self.messages.push(Message::assistant(String::new()));
        self.reply_open = true;
    }

    /// Append a delta to the open reply and re-run detection on the whole
    /// reply. Returns true when the preview changed.
    pub fn apply_delta(&mut self, delta: &str) -> bool {
        if !self.reply_open {
            self.open_reply();
        }
        if let Some(reply) = self.messages.last_mut() {
            reply.content.push_str(delta);
        }

        let found = self.messages.last().and_then(|m| self.detector.detect(&m.content));
        match found {
            Some(artifact) => {
                let kind = artifact.kind;
                let changed = self.preview.offer(artifact);
                if changed {
                    debug!(%kind, revision = self.preview.revision, "preview updated");
                }
                changed
            }
            None => false,
        }
    }

    /// Close out the turn started by [`submit`](Self::submit).
    pub fn finish(&mut self, result: &Result<Completion, StreamError>) {
        match result {
            Ok(completion) => info!(
                ?completion,
                reply_len = self.last_reply().map_or(0, str::len),
                "turn finished"
            ),
            Err(err) => {
                warn!(error = %err, "turn failed");
                self.record_failure();
            }
        }
        self.in_flight = false;
        self.reply_open = false;
    }

    /// Close out a turn whose request failed before any stream existed.
    pub fn fail(&mut self, err: &ChatError) {
        warn!(error = %err, "send failed");
        self.record_failure();
        self.in_flight = false;
        self.reply_open = false;
    }

    fn record_failure(&mut self) {
        match self.messages.last_mut() {
            Some(reply) if self.reply_open && reply.content.is_empty() => {
                reply.content = FAILURE_MESSAGE.to_string();
            }
            _ => self.messages.push(Message::assistant(FAILURE_MESSAGE)),
        }
    }

    /// Run one reply stream to its end.
    ///
    /// Opens the assistant message, then for each delta: append, detect,
    /// notify `observer`. The turn is finalized before returning, whether the
    /// stream completed, was cancelled, or failed.
    pub async fn drive<S, B, E>(
        &mut self,
        mut stream: DeltaStream<S>,
        mut observer: impl FnMut(TurnEvent<'_>),
    ) -> Result<TurnSummary, StreamError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Into<BoxError>,
    {
        self.open_reply();
        let mut deltas = 0;
        let mut preview_updates = 0;

        let result = loop {
            match stream.next_delta().await {
                Ok(Some(delta)) => {
                    deltas += 1;
                    let changed = self.apply_delta(&delta);
                    observer(TurnEvent::Delta(&delta));
                    if changed {
                        preview_updates += 1;
                        if let Some(artifact) = self.preview.current() {
                            observer(TurnEvent::Preview(artifact));
                        }
                    }
                }
                Ok(None) => break Ok(stream.completion().unwrap_or(Completion::SourceExhausted)),
                Err(err) => break Err(err),
            }
        };

        let reply_len = self.last_reply().map_or(0, str::len);
        self.finish(&result);
        result.map(|completion| TurnSummary {
            completion,
            deltas,
            preview_updates,
            reply_len,
        })
    }

    /// Discard all messages and the preview.
    pub fn restart(&mut self) {
        self.messages.clear();
        self.preview = PreviewState::default();
        self.in_flight = false;
        self.reply_open = false;
    }

    /// Hide the preview pane. The artifact is kept, and the next delta
    /// whose reply still matches shows the pane again.
    pub fn close_preview(&mut self) {
        self.preview.visible = false;
    }

    /// Show or hide the pane without discarding the artifact. Returns the new
    /// visibility; stays hidden when there is nothing to show.
    pub fn toggle_preview(&mut self) -> bool {
        self.preview.visible = self.preview.current.is_some() && !self.preview.visible;
        self.preview.visible
    }
}
