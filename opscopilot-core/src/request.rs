//! Summarize request validation
//!
//! A request names either a stored ticket (`ticketId`) or carries ad-hoc
//! `title`/`description` text, optionally with an explicit `provider`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::types::{ProviderKind, TicketContent};

const TITLE_CHARS: (usize, usize) = (3, 120);
const DESCRIPTION_CHARS: (usize, usize) = (10, 5000);

/// Per-field validation messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn field(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(field, msgs)| format!("{field}: {}", msgs.join(", ")))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

/// Raw request body as sent by clients.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizeBody {
    pub ticket_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub provider: Option<String>,
}

/// What the summary is computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryTarget {
    /// A stored ticket; results are cached per ticket id
    Ticket(String),
    /// Free text that is never cached
    AdHoc(TicketContent),
}

/// A validated summarize request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummarizeRequest {
    pub target: SummaryTarget,
    pub provider: Option<ProviderKind>,
}

impl SummarizeRequest {
    pub fn for_ticket(ticket_id: impl Into<String>) -> Self {
        Self {
            target: SummaryTarget::Ticket(ticket_id.into()),
            provider: None,
        }
    }

    pub fn ad_hoc(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            target: SummaryTarget::AdHoc(TicketContent {
                title: title.into(),
                description: description.into(),
            }),
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Decode and validate a JSON request body.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ValidationErrors> {
        let body: SummarizeBody = serde_json::from_slice(bytes).map_err(|e| {
            let mut errors = ValidationErrors::default();
            errors.add("body", format!("invalid JSON body: {e}"));
            errors
        })?;
        body.validate()
    }
}

impl SummarizeBody {
    pub fn validate(self) -> Result<SummarizeRequest, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        let provider = match self.provider.as_deref() {
            None => None,
            Some(name) => match name.parse::<ProviderKind>() {
                Ok(kind) => Some(kind),
                Err(_) => {
                    errors.add(
                        "provider",
                        "must be one of: mock, openai, anthropic, gemini",
                    );
                    None
                }
            },
        };

        let target = if let Some(ticket_id) = self.ticket_id {
            if ticket_id.is_empty() {
                errors.add("ticketId", "ticketId is required");
            }
            SummaryTarget::Ticket(ticket_id)
        } else {
            let title = check_length(&mut errors, "title", self.title, TITLE_CHARS);
            let description =
                check_length(&mut errors, "description", self.description, DESCRIPTION_CHARS);
            SummaryTarget::AdHoc(TicketContent { title, description })
        };

        if errors.is_empty() {
            Ok(SummarizeRequest { target, provider })
        } else {
            Err(errors)
        }
    }
}

/// Ticket title/description as sent to the ticket routes.
#[derive(Debug, Default, Deserialize)]
pub struct TicketFields {
    pub title: Option<String>,
    pub description: Option<String>,
}

impl TicketFields {
    /// Both fields are required for a new ticket.
    pub fn validate_new(self) -> Result<TicketContent, ValidationErrors> {
        let mut errors = ValidationErrors::default();
        let title = check_length(&mut errors, "title", self.title, TITLE_CHARS);
        let description =
            check_length(&mut errors, "description", self.description, DESCRIPTION_CHARS);
        if errors.is_empty() {
            Ok(TicketContent { title, description })
        } else {
            Err(errors)
        }
    }

    /// Absent fields are left unchanged; present ones must be valid.
    pub fn validate_patch(self) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::default();
        if let Some(title) = &self.title {
            check_length(&mut errors, "title", Some(title.clone()), TITLE_CHARS);
        }
        if let Some(description) = &self.description {
            check_length(
                &mut errors,
                "description",
                Some(description.clone()),
                DESCRIPTION_CHARS,
            );
        }
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(errors)
        }
    }
}

fn check_length(
    errors: &mut ValidationErrors,
    field: &str,
    value: Option<String>,
    (min, max): (usize, usize),
) -> String {
    let Some(value) = value else {
        errors.add(field, "Required");
        return String::new();
    };
    let len = value.chars().count();
    if len < min {
        errors.add(field, format!("must contain at least {min} character(s)"));
    } else if len > max {
        errors.add(field, format!("must contain at most {max} character(s)"));
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_request() {
        let req = SummarizeRequest::from_json(br#"{"ticketId":"t-1","provider":"gemini"}"#)
            .unwrap();
        assert_eq!(req.target, SummaryTarget::Ticket("t-1".to_string()));
        assert_eq!(req.provider, Some(ProviderKind::Gemini));
    }

    #[test]
    fn test_ad_hoc_request() {
        let req = SummarizeRequest::from_json(
            br#"{"title":"Dark mode","description":"Users want a dark theme."}"#,
        )
        .unwrap();
        assert!(matches!(req.target, SummaryTarget::AdHoc(ref c) if c.title == "Dark mode"));
        assert_eq!(req.provider, None);
    }

    #[test]
    fn test_empty_body_reports_each_field() {
        let errors = SummarizeRequest::from_json(b"{}").unwrap_err();
        assert_eq!(errors.field("title"), Some(&["Required".to_string()][..]));
        assert!(errors.field("description").is_some());
    }

    #[test]
    fn test_length_bounds_count_characters() {
        let errors = SummarizeBody {
            title: Some("ab".to_string()),
            description: Some("é".repeat(5001)),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert!(errors.field("title").is_some());
        assert!(errors.field("description").is_some());

        // 10 multi-byte characters is a valid description
        let ok = SummarizeBody {
            title: Some("abc".to_string()),
            description: Some("é".repeat(10)),
            ..Default::default()
        }
        .validate();
        assert!(ok.is_ok());
    }

    #[test]
    fn test_empty_ticket_id_and_unknown_provider() {
        let errors =
            SummarizeRequest::from_json(br#"{"ticketId":"","provider":"cohere"}"#).unwrap_err();
        assert!(errors.field("ticketId").is_some());
        assert!(errors.field("provider").is_some());
    }

    #[test]
    fn test_malformed_json() {
        let errors = SummarizeRequest::from_json(b"not json").unwrap_err();
        assert!(errors.field("body").is_some());
    }

    #[test]
    fn test_ticket_fields() {
        let errors = TicketFields::default().validate_new().unwrap_err();
        assert!(errors.field("title").is_some());

        let patch = TicketFields {
            title: None,
            description: Some("too short".to_string()),
        };
        assert!(patch.validate_patch().unwrap_err().field("description").is_some());
        assert!(TicketFields::default().validate_patch().is_ok());
    }
}
