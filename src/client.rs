//! HTTP side of a turn: POST the conversation to the proxy and hand the
//! response body to the SSE consumer.

use std::time::Duration;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::conversation::{Conversation, Message, TurnEvent, TurnSummary};
use crate::error::ChatError;
use crate::preview::PreviewWriter;
use crate::sse::{Completion, DeltaStream};
use crate::wire::ChatRequest;

/// Response body as owned byte chunks.
pub type HttpByteStream = BoxStream<'static, Result<Vec<u8>, reqwest::Error>>;

pub struct ChatClient {
    http: Client,
    endpoint: String,
    system_prompt: String,
}

impl ChatClient {
    pub fn new(config: &Config) -> Result<Self, ChatError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;
        Ok(ChatClient {
            http,
            endpoint: config.endpoint.clone(),
            system_prompt: config.system_prompt.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn request_body<'a>(&'a self, messages: &'a [Message]) -> ChatRequest<'a> {
        ChatRequest {
            messages,
            system_prompt: &self.system_prompt,
        }
    }

    /// Send the conversation so far and return the reply as a delta stream.
    pub async fn open_stream(
        &self,
        messages: &[Message],
    ) -> Result<DeltaStream<HttpByteStream>, ChatError> {
        debug!(endpoint = %self.endpoint, messages = messages.len(), "opening reply stream");
        let response = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&self.request_body(messages))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Http {
                status: status.as_u16(),
                url: self.endpoint.clone(),
                body,
            });
        }

        let body: HttpByteStream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();
        Ok(DeltaStream::new(body))
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One conversation bound to a proxy and, optionally, a preview directory.
pub struct Session {
    conversation: Conversation,
    client: ChatClient,
    preview: Option<PreviewWriter>,
}

impl Session {
    pub fn new(client: ChatClient, preview: Option<PreviewWriter>) -> Self {
        Session {
            conversation: Conversation::new(),
            client,
            preview,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn conversation_mut(&mut self) -> &mut Conversation {
        &mut self.conversation
    }

    pub fn preview_writer(&self) -> Option<&PreviewWriter> {
        self.preview.as_ref()
    }

    /// Run one full turn: submit, request, stream, detect, publish.
    ///
    /// `cancel` is honoured while connecting as well as while streaming.
    /// Preview write failures are logged and do not interrupt the stream.
    pub async fn send(
        &mut self,
        text: &str,
        cancel: Option<CancellationToken>,
        mut observer: impl FnMut(TurnEvent<'_>),
    ) -> Result<TurnSummary, ChatError> {
        self.conversation.submit(text)?;

        let opened = match &cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => None,
                res = self.client.open_stream(self.conversation.messages()) => Some(res),
            },
            None => Some(self.client.open_stream(self.conversation.messages()).await),
        };
        let stream = match opened {
            Some(Ok(stream)) => stream,
            Some(Err(err)) => {
                self.conversation.fail(&err);
                return Err(err);
            }
            None => {
                debug!("cancelled before the reply started");
                self.conversation.finish(&Ok(Completion::Cancelled));
                return Ok(TurnSummary {
                    completion: Completion::Cancelled,
                    deltas: 0,
                    preview_updates: 0,
                    reply_len: 0,
                });
            }
        };
        let stream = match cancel {
            Some(token) => stream.with_cancellation(token),
            None => stream,
        };

        let writer = self.preview.as_ref();
        let summary = self
            .conversation
            .drive(stream, |event| {
                if let (TurnEvent::Preview(artifact), Some(writer)) = (event, writer) {
                    if let Err(err) = writer.publish(artifact) {
                        warn!(error = %err, dir = %writer.dir().display(), "preview write failed");
                    }
                }
                observer(event);
            })
            .await?;
        Ok(summary)
    }
}
