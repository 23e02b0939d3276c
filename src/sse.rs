//! Server-sent-event consumer for the proxy's reply stream.
//!
//! Two layers:
//!
//! * [`SseDecoder`] is a synchronous push parser. Feed it byte chunks of any
//!   size and it hands back every frame completed by that chunk. Incomplete
//!   trailing bytes stay buffered until the next push.
//! * [`DeltaStream`] owns a byte source and pulls from it lazily, turning
//!   frames into text deltas. The only suspension point is the wait for the
//!   next chunk; decoding between chunks never awaits.
//!
//! ```text
//! bytes ──► SseDecoder ──► StreamFrame ──► DeltaStream::next_delta ──► "text"
//! ```

use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::Stream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BoxError, StreamError};
use crate::wire::{FramePayload, StreamFrame};

// ---------------------------------------------------------------------------
// SseDecoder
// ---------------------------------------------------------------------------

/// Incremental frame parser.
///
/// Buffering is byte-level: a chunk boundary inside a multi-byte character or
/// inside the `data:` marker is harmless because lines are only decoded once
/// their terminating `\n` has arrived.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    /// Prefix of `buf` already known to contain no newline.
    scanned: usize,
    event_name: Option<String>,
    data: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the frames it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        let mut search = self.scanned;
        while let Some(offset) = self.buf[search..].iter().position(|&b| b == b'\n') {
            let end = search + offset;
            let line = String::from_utf8_lossy(strip_cr(&self.buf[start..end])).into_owned();
            start = end + 1;
            search = start;
            if let Some(frame) = self.feed_line(&line) {
                frames.push(frame);
            }
        }

        self.buf.drain(..start);
        self.scanned = self.buf.len();
        frames
    }

    /// Flush at end of input: an unterminated last line is treated as
    /// complete, and a frame missing only its blank-line separator is
    /// dispatched.
    pub fn finish(&mut self) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        if !self.buf.is_empty() {
            let line = String::from_utf8_lossy(strip_cr(&self.buf)).into_owned();
            self.buf.clear();
            self.scanned = 0;
            if let Some(frame) = self.feed_line(&line) {
                frames.push(frame);
            }
        }
        if let Some(frame) = self.dispatch() {
            frames.push(frame);
        }
        frames
    }

    /// Drop all buffered bytes and any half-built frame.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Number of bytes waiting for a line terminator.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    fn feed_line(&mut self, line: &str) -> Option<StreamFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            "event" => self.event_name = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<StreamFrame> {
        let event_name = self.event_name.take();
        let data = self.data.take()?;
        Some(StreamFrame {
            event_name,
            payload: FramePayload::parse(&data),
        })
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

// ---------------------------------------------------------------------------
// DeltaStream
// ---------------------------------------------------------------------------

/// Why a [`DeltaStream`] stopped yielding without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The `[DONE]` sentinel arrived.
    Terminator,
    /// The byte source ended.
    SourceExhausted,
    /// The cancellation token fired; buffered data was discarded.
    Cancelled,
}

/// Lazy sequence of text deltas read from a byte source.
///
/// Single pass: once finished (completion, upstream error, transport
/// failure or cancel) every further call returns `Ok(None)`.
pub struct DeltaStream<S> {
    source: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<StreamFrame>,
    cancel_token: Option<CancellationToken>,
    source_done: bool,
    completion: Option<Completion>,
    failed: bool,
}

impl<S, B, E> DeltaStream<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<BoxError>,
{
    pub fn new(source: S) -> Self {
        DeltaStream {
            source: Box::pin(source),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            cancel_token: None,
            source_done: false,
            completion: None,
            failed: false,
        }
    }

    /// Stop at the next await point once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    /// `Some` once the stream has ended normally or was cancelled.
    pub fn completion(&self) -> Option<Completion> {
        self.completion
    }

    pub fn is_finished(&self) -> bool {
        self.completion.is_some() || self.failed
    }

    /// Stop reading. Anything buffered but not yet yielded is discarded.
    pub fn cancel(&mut self) {
        if self.is_finished() {
            return;
        }
        self.pending.clear();
        self.decoder.reset();
        self.finish(Completion::Cancelled);
    }

    /// Next text delta, `Ok(None)` at the end of the stream.
    ///
    /// Upstream error frames and transport failures are returned as `Err`
    /// exactly once and end the stream.
    pub async fn next_delta(&mut self) -> Result<Option<String>, StreamError> {
        loop {
            if self.is_finished() {
                return Ok(None);
            }
            if self.cancel_token.as_ref().is_some_and(CancellationToken::is_cancelled) {
                self.cancel();
                return Ok(None);
            }

            while let Some(frame) = self.pending.pop_front() {
                match frame.payload {
                    FramePayload::Delta(text) => return Ok(Some(text)),
                    FramePayload::Done => {
                        self.pending.clear();
                        self.finish(Completion::Terminator);
                        return Ok(None);
                    }
                    FramePayload::Error(message) => {
                        self.pending.clear();
                        self.failed = true;
                        warn!(%message, event = ?frame.event_name, "upstream error frame");
                        return Err(StreamError::Upstream(message));
                    }
                    FramePayload::Empty => {}
                    FramePayload::Malformed(reason) => {
                        debug!(%reason, event = ?frame.event_name, "skipping malformed frame");
                    }
                }
            }

            if self.source_done {
                self.finish(Completion::SourceExhausted);
                return Ok(None);
            }

            let next = match &self.cancel_token {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    item = self.source.next() => Some(item),
                },
                None => Some(self.source.next().await),
            };
            let Some(item) = next else {
                self.cancel();
                return Ok(None);
            };

            match item {
                Some(Ok(chunk)) => {
                    let frames = self.decoder.push(chunk.as_ref());
                    self.pending.extend(frames);
                }
                Some(Err(err)) => {
                    self.failed = true;
                    self.decoder.reset();
                    let err = StreamError::transport(err);
                    warn!(error = %err, "reply stream transport failure");
                    return Err(err);
                }
                None => {
                    self.source_done = true;
                    let frames = self.decoder.finish();
                    self.pending.extend(frames);
                }
            }
        }
    }

    /// Adapt into a `futures` stream of deltas. The error item, if any, is
    /// the last item.
    pub fn into_stream(self) -> impl Stream<Item = Result<String, StreamError>> {
        futures_util::stream::unfold(self, |mut deltas| async move {
            match deltas.next_delta().await {
                Ok(Some(text)) => Some((Ok(text), deltas)),
                Ok(None) => None,
                Err(err) => Some((Err(err), deltas)),
            }
        })
    }

    fn finish(&mut self, completion: Completion) {
        debug!(?completion, "reply stream finished");
        self.completion = Some(completion);
    }
}
