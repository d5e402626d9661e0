//! Plumbing shared by the HTTP backends: request dispatch, SSE framing, and
//! the relay that turns a live token stream into summary chunks.

use std::collections::VecDeque;

use futures::stream::{self, StreamExt};

use crate::error::{Error, ProviderError, Result};
use crate::providers::ChunkStream;
use crate::summary::parser::parse_result;
use crate::summary::simulator::tail_chunks;
use crate::types::{ProviderKind, StreamChunk, SummaryField};

/// Unflushed text size (characters) that triggers a `summary` chunk.
pub const FLUSH_THRESHOLD: usize = 50;

/// Send a request; non-2xx responses become a [`ProviderError`] with status and body.
pub async fn send(provider: ProviderKind, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::new(provider, format!("{provider} request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(provider = %provider, status = status.as_u16(), "Backend returned an error status");
        return Err(ProviderError::with_status(provider, status.as_u16(), &body).into());
    }
    Ok(response)
}

// ============================================
// SSE decoding
// ============================================

/// Incremental `text/event-stream` decoder that yields `data` payloads.
///
/// Multi-line `data` fields are joined with `\n`; other fields are ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed raw bytes, returning every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.take_line(&line[..line.len() - 1], &mut events);
        }
        events
    }

    /// Flush a final event that was not followed by a blank line.
    pub fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buf.is_empty() {
            let line = std::mem::take(&mut self.buf);
            self.take_line(&line, &mut events);
        }
        self.dispatch(&mut events);
        events
    }

    fn take_line(&mut self, line: &[u8], events: &mut Vec<String>) {
        let line = String::from_utf8_lossy(line);
        let line = line.strip_suffix('\r').unwrap_or(&line);
        if line.is_empty() {
            self.dispatch(events);
        } else if let Some(value) = line.strip_prefix("data:") {
            self.data
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
    }

    fn dispatch(&mut self, events: &mut Vec<String>) {
        if !self.data.is_empty() {
            events.push(self.data.join("\n"));
            self.data.clear();
        }
    }
}

// ============================================
// Token relay
// ============================================

/// What one SSE payload means to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    /// More response text
    Text(String),
    /// End of the response
    Stop,
    /// Metadata or keep-alive
    Ignore,
}

/// Maps one SSE payload to a [`TokenEvent`].
pub type EventParser = fn(&str) -> Result<TokenEvent>;

struct TokenRelay {
    provider: ProviderKind,
    response: reqwest::Response,
    decoder: SseDecoder,
    parse_event: EventParser,
    accumulated: String,
    /// Byte offset of the first unflushed character
    flushed: usize,
    unflushed_chars: usize,
    pending: VecDeque<StreamChunk>,
    finished: bool,
}

impl TokenRelay {
    /// Read until at least one chunk is queued or the relay is finished.
    async fn fill(&mut self) -> Result<()> {
        while self.pending.is_empty() && !self.finished {
            let payloads = match self.response.chunk().await {
                Ok(Some(bytes)) => self.decoder.push(&bytes),
                Ok(None) => {
                    let payloads = self.decoder.finish();
                    self.absorb(payloads)?;
                    self.complete();
                    return Ok(());
                }
                Err(e) => {
                    return Err(ProviderError::new(
                        self.provider,
                        format!("{} stream read failed: {e}", self.provider),
                    )
                    .into())
                }
            };
            self.absorb(payloads)?;
        }
        Ok(())
    }

    fn absorb(&mut self, payloads: Vec<String>) -> Result<()> {
        for payload in payloads {
            if self.finished {
                break;
            }
            match (self.parse_event)(&payload)? {
                TokenEvent::Text(text) => {
                    self.accumulated.push_str(&text);
                    self.unflushed_chars += text.chars().count();
                    if self.unflushed_chars >= FLUSH_THRESHOLD {
                        self.flush();
                    }
                }
                TokenEvent::Stop => self.complete(),
                TokenEvent::Ignore => {}
            }
        }
        Ok(())
    }

    fn flush(&mut self) {
        let fresh = self.accumulated[self.flushed..].to_string();
        self.flushed = self.accumulated.len();
        self.unflushed_chars = 0;
        self.pending
            .push_back(StreamChunk::chunk(SummaryField::Summary, fresh));
    }

    fn complete(&mut self) {
        if self.finished {
            return;
        }
        if self.accumulated.len() > self.flushed {
            self.flush();
        }
        let result = parse_result(&self.accumulated);
        tracing::debug!(
            provider = %self.provider,
            bytes = self.accumulated.len(),
            "Backend stream complete"
        );
        self.pending.extend(tail_chunks(&result));
        self.finished = true;
    }
}

/// Relay a streaming response as chunks: `summary` fragments while text
/// arrives, then the parsed result's tail sequence ending in `done`.
pub fn relay_tokens(
    provider: ProviderKind,
    response: reqwest::Response,
    parse_event: EventParser,
) -> ChunkStream {
    let relay = TokenRelay {
        provider,
        response,
        decoder: SseDecoder::default(),
        parse_event,
        accumulated: String::new(),
        flushed: 0,
        unflushed_chars: 0,
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(Some(relay), |relay| async move {
        let mut relay = relay?;
        if let Err(e) = relay.fill().await {
            return Some((Err(e), None));
        }
        let chunk = relay.pending.pop_front()?;
        Some((Ok(chunk), Some(relay)))
    })
    .boxed()
}

/// Decode a payload as JSON, reporting garbage as a backend failure.
pub fn decode_payload(provider: ProviderKind, payload: &str) -> Result<serde_json::Value> {
    serde_json::from_str(payload).map_err(|e| {
        Error::from(ProviderError::new(
            provider,
            format!("malformed {provider} stream event: {e}"),
        ))
    })
}
