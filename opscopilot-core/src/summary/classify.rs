//! Maps failures raised inside an open summary stream to short user-facing text.

use serde_json::Value;

use crate::error::{Error, ProviderError};

pub const TIMEOUT_MESSAGE: &str = "Summary generation exceeded the time limit.";
pub const INVALID_KEY_MESSAGE: &str = "Invalid API key. Check the provider settings.";
pub const RATE_LIMIT_MESSAGE: &str = "Rate limit exceeded. Wait a moment and try again.";
pub const FORBIDDEN_MESSAGE: &str = "Access denied. Check the API key permissions.";
pub const SAFETY_MESSAGE: &str = "The content was blocked by the provider's safety filters.";
pub const GENERIC_MESSAGE: &str = "Failed to generate summary.";
pub const INCOMPLETE_MESSAGE: &str = "The provider ended the stream without a result.";

const MAX_MESSAGE_CHARS: usize = 200;

/// Text for the terminal `error` chunk of a failed stream.
pub fn user_message(err: &Error) -> String {
    match err {
        Error::Timeout(_) => TIMEOUT_MESSAGE.to_string(),
        Error::Provider(provider_err) => provider_message(provider_err),
        _ => GENERIC_MESSAGE.to_string(),
    }
}

fn provider_message(err: &ProviderError) -> String {
    match err.status {
        Some(401) => return INVALID_KEY_MESSAGE.to_string(),
        Some(429) => return RATE_LIMIT_MESSAGE.to_string(),
        Some(403) => return FORBIDDEN_MESSAGE.to_string(),
        _ => {}
    }

    if err.message.contains("Could not resolve authentication") {
        return INVALID_KEY_MESSAGE.to_string();
    }
    if err.message.contains("SAFETY") || err.message.contains("blocked") {
        return SAFETY_MESSAGE.to_string();
    }

    let message = nested_message(&err.message).unwrap_or_else(|| err.message.clone());
    truncate(&message)
}

/// Pull a `"message"` string out of a JSON error body embedded in `text`,
/// e.g. `401 {"type":"error","error":{"message":"invalid x-api-key"}}`.
fn nested_message(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let body: Value = serde_json::from_str(&text[start..]).ok()?;
    find_message(&body)
}

fn find_message(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(message)) = map.get("message") {
                return Some(message.clone());
            }
            map.values().find_map(find_message)
        }
        Value::Array(items) => items.iter().find_map(find_message),
        _ => None,
    }
}

fn truncate(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_CHARS {
        return message.to_string();
    }
    let mut short: String = message.chars().take(MAX_MESSAGE_CHARS).collect();
    short.push('…');
    short
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderKind;
    use std::time::Duration;

    fn provider_err(status: Option<u16>, message: &str) -> Error {
        Error::Provider(ProviderError {
            provider: ProviderKind::OpenAi,
            status,
            message: message.to_string(),
        })
    }

    #[test]
    fn test_timeout() {
        assert_eq!(
            user_message(&Error::Timeout(Duration::from_secs(30))),
            TIMEOUT_MESSAGE
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(user_message(&provider_err(Some(401), "401 nope")), INVALID_KEY_MESSAGE);
        assert_eq!(user_message(&provider_err(Some(429), "429 slow down")), RATE_LIMIT_MESSAGE);
        assert_eq!(user_message(&provider_err(Some(403), "403")), FORBIDDEN_MESSAGE);
    }

    #[test]
    fn test_message_signals() {
        assert_eq!(
            user_message(&provider_err(None, "Could not resolve authentication method")),
            INVALID_KEY_MESSAGE
        );
        assert_eq!(
            user_message(&provider_err(None, "Response was blocked due to SAFETY")),
            SAFETY_MESSAGE
        );
    }

    #[test]
    fn test_nested_json_message() {
        let err = provider_err(
            Some(400),
            r#"400 {"type":"error","error":{"type":"invalid_request_error","message":"max_tokens too large"}}"#,
        );
        assert_eq!(user_message(&err), "max_tokens too large");
    }

    #[test]
    fn test_truncates_long_messages() {
        let message = user_message(&provider_err(Some(500), &"A".repeat(300)));
        assert_eq!(message.chars().count(), MAX_MESSAGE_CHARS + 1);
        assert!(message.ends_with('…'));
    }

    #[test]
    fn test_non_provider_errors_are_generic() {
        let err = Error::Config("boom".to_string());
        assert_eq!(user_message(&err), GENERIC_MESSAGE);
    }
}
