//! OpenAI chat completions backend (native streaming).

use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};

use crate::error::{Error, ProviderError, Result};
use crate::providers::prompt::{build_user_prompt, SYSTEM_PROMPT};
use crate::providers::relay::{decode_payload, relay_tokens, send, TokenEvent};
use crate::providers::ChunkStream;
use crate::types::{ProviderKind, TicketContent};

const KIND: ProviderKind = ProviderKind::OpenAi;

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiProvider {
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
        let url = format!(
            "{}/v1/chat/completions",
            self.endpoint.trim_end_matches('/')
        );
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| Error::Config(format!("invalid OpenAI auth header: {e}")))?,
        );

        tracing::debug!(model = %self.model, "Opening OpenAI stream");
        let request = self.http.post(url).headers(headers).json(&json!({
            "model": self.model,
            "stream": true,
            "temperature": 0.3,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt }
            ]
        }));
        let response = send(KIND, request).await?;
        Ok(relay_tokens(KIND, response, parse_event))
    }
}

fn parse_event(payload: &str) -> Result<TokenEvent> {
    if payload.trim() == "[DONE]" {
        return Ok(TokenEvent::Stop);
    }
    let event = decode_payload(KIND, payload)?;
    if event.get("error").is_some() {
        return Err(ProviderError::new(KIND, payload.to_string()).into());
    }
    Ok(event
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(|text| TokenEvent::Text(text.to_string()))
        .unwrap_or(TokenEvent::Ignore))
}
