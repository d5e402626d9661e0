//! Core domain types for opscopilot
//!
//! | Term | Definition |
//! |------|------------|
//! | **Ticket** | A tracked work item; only its title and description matter here |
//! | **Provider** | An AI backend (or the offline heuristic fallback) that analyses a ticket |
//! | **StructuredResult** | The validated `{summary, nextSteps, riskLevel, categories}` analysis |
//! | **StreamChunk** | One incremental unit of a streamed analysis |
//!
//! The serialized shapes of [`StructuredResult`] and [`StreamChunk`] are wire
//! contracts: they are cached verbatim in SQLite and sent to HTTP clients as
//! SSE frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================
// Providers
// ============================================

/// AI backends known to the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Offline keyword heuristics, always available
    Mock,
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Gemini,
}

impl ProviderKind {
    /// Every backend, in discovery order.
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Mock,
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Gemini,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Mock => "mock",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
        }
    }

    /// Human-facing backend name used in configuration messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::Mock => "Mock",
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Anthropic => "Anthropic",
            ProviderKind::Gemini => "Gemini",
        }
    }

    /// Whether the backend needs an API key before it can be selected.
    pub fn requires_credential(&self) -> bool {
        !matches!(self, ProviderKind::Mock)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mock" => Ok(ProviderKind::Mock),
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "gemini" => Ok(ProviderKind::Gemini),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

// ============================================
// Structured result
// ============================================

/// Assessed risk of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recommended category labels. Backends may return others; they are kept.
pub const KNOWN_CATEGORIES: &[&str] = &[
    "bug",
    "feature",
    "task",
    "incident",
    "security",
    "improvement",
    "documentation",
];

/// Fully-typed AI analysis of a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredResult {
    pub summary: String,
    pub next_steps: Vec<String>,
    pub risk_level: RiskLevel,
    pub categories: Vec<String>,
}

// ============================================
// Streaming protocol
// ============================================

/// Field of a [`StructuredResult`] a chunk contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SummaryField {
    Summary,
    NextSteps,
    RiskLevel,
    Categories,
}

/// One event of a summary stream.
///
/// A well-formed stream is zero or more `Chunk`s followed by exactly one
/// terminal `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamChunk {
    Chunk { field: SummaryField, content: String },
    Done { result: StructuredResult },
    Error { message: String },
}

impl StreamChunk {
    pub fn chunk(field: SummaryField, content: impl Into<String>) -> Self {
        StreamChunk::Chunk {
            field,
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamChunk::Error {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamChunk::Chunk { .. })
    }

    /// Encode as an SSE frame: `data: <json>\n\n`.
    pub fn to_sse_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self).map(|json| format!("data: {json}\n\n"))
    }
}

// ============================================
// Tickets
// ============================================

/// The part of a ticket an analysis is computed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketContent {
    pub title: String,
    pub description: String,
}

/// A stored ticket.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn content(&self) -> TicketContent {
        TicketContent {
            title: self.title.clone(),
            description: self.description.clone(),
        }
    }
}
