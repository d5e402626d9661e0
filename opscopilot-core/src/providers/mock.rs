//! Offline backend: keyword heuristics replayed through the stream simulator.
//!
//! Needs no credential and no network, so it is both the zero-configuration
//! default and the fixture for summarizer tests.

use crate::providers::ChunkStream;
use crate::summary::simulator::{simulate_stream, Pacing};
use crate::types::{RiskLevel, StructuredResult, TicketContent};

const BUG_TERMS: &[&str] = &["bug", "error", "crash", "fail"];
const FEATURE_TERMS: &[&str] = &["feature", "request", "add", "new"];
const INCIDENT_TERMS: &[&str] = &["incident", "outage"];
const SECURITY_TERMS: &[&str] = &["security", "vulnerability", "leak"];

const EXCERPT_CHARS: usize = 100;
const LONG_DESCRIPTION_CHARS: usize = 200;

#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    pacing: Pacing,
}

impl MockProvider {
    pub fn with_pacing(pacing: Pacing) -> Self {
        Self { pacing }
    }

    pub fn generate_summary(&self, input: &TicketContent) -> ChunkStream {
        simulate_stream(build_result(input), self.pacing)
    }
}

/// Derive a result from substring checks on the lowercased title/description.
pub fn build_result(input: &TicketContent) -> StructuredResult {
    let title = input.title.to_lowercase();
    let combined = format!("{title} {}", input.description.to_lowercase());
    let mentions = |text: &str, terms: &[&str]| terms.iter().any(|t| text.contains(t));

    let mut risk_level = RiskLevel::Medium;
    let mut categories: Vec<String> = Vec::new();

    if mentions(&title, BUG_TERMS) {
        risk_level = RiskLevel::High;
        categories.push("bug".to_string());
    } else if mentions(&title, FEATURE_TERMS) {
        risk_level = RiskLevel::Low;
        categories.push("feature".to_string());
    }

    if mentions(&combined, INCIDENT_TERMS) {
        risk_level = RiskLevel::High;
        categories.push("incident".to_string());
    }

    if mentions(&combined, SECURITY_TERMS) {
        risk_level = RiskLevel::High;
        categories.push("security".to_string());
    }

    if categories.is_empty() {
        categories.push("task".to_string());
    }

    StructuredResult {
        summary: summary_text(input, risk_level),
        next_steps: next_steps(input, &categories),
        risk_level,
        categories,
    }
}

fn summary_text(input: &TicketContent, risk_level: RiskLevel) -> String {
    let mut excerpt: String = input.description.chars().take(EXCERPT_CHARS).collect();
    if input.description.chars().count() > EXCERPT_CHARS {
        excerpt.push_str("...");
    }
    [
        format!("This ticket describes: \"{}\".", input.title),
        format!("The reported issue involves the following context: {excerpt}."),
        format!("Based on the analysis, the risk level has been assessed as {risk_level}."),
        "This item requires attention and should be prioritized accordingly.".to_string(),
    ]
    .join(" ")
}

fn next_steps(input: &TicketContent, categories: &[String]) -> Vec<String> {
    let has = |category: &str| categories.iter().any(|c| c == category);

    let mut steps = vec!["Review the ticket details and confirm the scope of the issue."];
    if has("bug") || has("incident") {
        steps.extend([
            "Investigate root cause and check related logs.",
            "Prepare a hotfix or workaround if the issue is critical.",
            "Notify stakeholders about the current status.",
        ]);
    } else if has("feature") {
        steps.extend([
            "Define acceptance criteria and technical requirements.",
            "Create implementation plan with estimated effort.",
            "Schedule a review with the team.",
        ]);
    } else {
        steps.extend([
            "Assign the task to the appropriate team member.",
            "Set a deadline and track progress.",
        ]);
    }

    if input.description.chars().count() > LONG_DESCRIPTION_CHARS {
        steps.push("Consider breaking this into smaller sub-tasks.");
    }

    steps.into_iter().map(ToString::to_string).collect()
}
