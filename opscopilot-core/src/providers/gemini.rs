//! Gemini `generateContent` backend (single-shot, replayed through the simulator).

use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::{json, Value};

use crate::error::{Error, ProviderError, Result};
use crate::providers::prompt::{build_user_prompt, SYSTEM_PROMPT};
use crate::providers::relay::send;
use crate::providers::ChunkStream;
use crate::summary::parser::parse_result;
use crate::summary::simulator::{simulate_stream, Pacing};
use crate::types::{ProviderKind, TicketContent};

const KIND: ProviderKind = ProviderKind::Gemini;

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
    pacing: Pacing,
}

impl GeminiProvider {
    pub fn new(http: reqwest::Client, api_key: String, model: String, endpoint: String) -> Self {
        Self {
            http,
            api_key,
            model,
            endpoint,
            pacing: Pacing::default(),
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn generate_summary(&self, input: &TicketContent) -> ChunkStream {
        let this = self.clone();
        let prompt = build_user_prompt(input);
        stream::once(async move {
            let pacing = this.pacing;
            let text = this.complete(prompt).await?;
            Ok::<_, Error>(simulate_stream(parse_result(&text), pacing))
        })
        .try_flatten()
        .boxed()
    }

    async fn complete(self, prompt: String) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            urlencoding::encode(&self.model)
        );
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| Error::Config(format!("invalid Gemini api key header: {e}")))?,
        );

        tracing::debug!(model = %self.model, "Requesting Gemini completion");
        let request = self.http.post(url).headers(headers).json(&json!({
            "systemInstruction": { "parts": [{ "text": SYSTEM_PROMPT }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": 0.3 }
        }));
        let response = send(KIND, request).await?;
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::new(KIND, format!("gemini read body failed: {e}")))?;
        let json: Value = serde_json::from_str(&body)
            .map_err(|e| ProviderError::new(KIND, format!("malformed gemini response: {e}")))?;
        response_text(&json)
    }
}

/// Concatenated candidate text, or an error when the response was blocked.
fn response_text(json: &Value) -> Result<String> {
    if let Some(reason) = json.pointer("/promptFeedback/blockReason").and_then(Value::as_str) {
        return Err(blocked(reason));
    }

    let candidate = json.pointer("/candidates/0");
    if let Some(reason) = candidate
        .and_then(|c| c.get("finishReason"))
        .and_then(Value::as_str)
        .filter(|r| *r == "SAFETY")
    {
        return Err(blocked(reason));
    }

    let text: String = candidate
        .and_then(|c| c.pointer("/content/parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    Ok(text)
}

fn blocked(reason: &str) -> Error {
    ProviderError::new(KIND, format!("Response was blocked due to {reason}")).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::classify::{user_message, FORBIDDEN_MESSAGE, SAFETY_MESSAGE};
    use crate::types::{RiskLevel, StreamChunk};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> GeminiProvider {
        GeminiProvider::new(
            reqwest::Client::new(),
            "gem-test".to_string(),
            "gemini-2.0-flash".to_string(),
            server.uri(),
        )
        .with_pacing(Pacing::NONE)
    }

    fn input() -> TicketContent {
        TicketContent {
            title: "Docs for webhooks".to_string(),
            description: "The webhook retry policy is undocumented.".to_string(),
        }
    }

    #[tokio::test]
    async fn test_single_shot_is_replayed_as_stream() {
        let server = MockServer::start().await;
        let answer = r#"{"summary":"Webhook retries need documentation.","nextSteps":["Draft the page","Review with support"],"riskLevel":"low","categories":["documentation"]}"#;
        // Model output split across two parts
        let (head, tail) = answer.split_at(40);
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .and(header("x-goog-api-key", "gem-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": { "parts": [{ "text": head }, { "text": tail }] },
                    "finishReason": "STOP"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let chunks: Vec<StreamChunk> = provider(&server)
            .generate_summary(&input())
            .try_collect()
            .await
            .unwrap();

        assert_eq!(
            chunks.first(),
            Some(&StreamChunk::chunk(
                crate::types::SummaryField::Summary,
                "Webhook retries need documentation."
            ))
        );
        let Some(StreamChunk::Done { result }) = chunks.last() else {
            panic!("stream did not end with done");
        };
        assert_eq!(result.risk_level, RiskLevel::Low);
        assert_eq!(result.next_steps.len(), 2);
    }

    #[tokio::test]
    async fn test_safety_block_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "finishReason": "SAFETY" }]
            })))
            .mount(&server)
            .await;

        let err = provider(&server)
            .generate_summary(&input())
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();
        assert_eq!(user_message(&err), SAFETY_MESSAGE);
    }

    #[tokio::test]
    async fn test_forbidden_status_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("PERMISSION_DENIED"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .generate_summary(&input())
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();
        assert_eq!(user_message(&err), FORBIDDEN_MESSAGE);
    }

    #[test]
    fn test_prompt_block_reason() {
        let err = response_text(&json!({ "promptFeedback": { "blockReason": "OTHER" } }))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "gemini backend error: Response was blocked due to OTHER"
        );
    }
}
