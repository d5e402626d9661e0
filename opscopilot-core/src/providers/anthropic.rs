//! Anthropic messages backend (native streaming).

use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::{json, Value};

use crate::error::{Error, ProviderError, Result};
use crate::providers::prompt::{build_user_prompt, SYSTEM_PROMPT};
use crate::providers::relay::{decode_payload, relay_tokens, send, TokenEvent};
use crate::providers::ChunkStream;
use crate::types::{ProviderKind, TicketContent};

const KIND: ProviderKind = ProviderKind::Anthropic;
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl AnthropicProvider {
    pub fn new(http: reqwest::Client, api_key: String, model: String, endpoint: String) -> Self {
        Self {
            http,
            api_key,
            model,
            endpoint,
        }
    }

    pub fn generate_summary(&self, input: &TicketContent) -> ChunkStream {
        let this = self.clone();
        let prompt = build_user_prompt(input);
        stream::once(async move { this.open(prompt).await })
            .try_flatten()
            .boxed()
    }

    async fn open(self, prompt: String) -> Result<ChunkStream> {
        let url = format!("{}/v1/messages", self.endpoint.trim_end_matches('/'));
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| Error::Config(format!("invalid Anthropic api key header: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));

        tracing::debug!(model = %self.model, "Opening Anthropic stream");
        let request = self.http.post(url).headers(headers).json(&json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "temperature": 0.3,
            "stream": true,
            "system": SYSTEM_PROMPT,
            "messages": [{ "role": "user", "content": prompt }],
        }));
        let response = send(KIND, request).await?;
        Ok(relay_tokens(KIND, response, parse_event))
    }
}

fn parse_event(payload: &str) -> Result<TokenEvent> {
    let event = decode_payload(KIND, payload)?;
    match event.get("type").and_then(Value::as_str) {
        Some("content_block_delta") => {
            let delta = event.get("delta");
            let is_text = delta
                .and_then(|d| d.get("type"))
                .and_then(Value::as_str)
                == Some("text_delta");
            let text = delta.and_then(|d| d.get("text")).and_then(Value::as_str);
            match text {
                Some(text) if is_text && !text.is_empty() => Ok(TokenEvent::Text(text.to_string())),
                _ => Ok(TokenEvent::Ignore),
            }
        }
        Some("message_stop") => Ok(TokenEvent::Stop),
        Some("error") => Err(ProviderError::new(KIND, payload.to_string()).into()),
        _ => Ok(TokenEvent::Ignore),
    }
}
