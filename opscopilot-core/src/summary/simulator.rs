//! Replays a complete [`StructuredResult`] as a paced chunk stream.
//!
//! Order is fixed: `summary`* → `nextSteps`* → `riskLevel` → `categories` → `done`.
//! Summary chunks are groups of [`WORDS_PER_CHUNK`] words; joining them with
//! single spaces gives back the original summary exactly.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use rand::Rng;

use crate::error::Error;
use crate::providers::ChunkStream;
use crate::types::{StreamChunk, StructuredResult, SummaryField};

pub const WORDS_PER_CHUNK: usize = 10;

/// Inter-chunk pauses, as millisecond ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub summary_ms: (u64, u64),
    pub step_ms: (u64, u64),
}

impl Pacing {
    /// No pauses at all.
    pub const NONE: Pacing = Pacing {
        summary_ms: (0, 0),
        step_ms: (0, 0),
    };

    fn summary_pause(&self, rng: &mut impl Rng) -> Duration {
        jitter(rng, self.summary_ms)
    }

    fn step_pause(&self, rng: &mut impl Rng) -> Duration {
        jitter(rng, self.step_ms)
    }
}

impl Default for Pacing {
    /// Emulates live typing.
    fn default() -> Self {
        Self {
            summary_ms: (50, 100),
            step_ms: (80, 120),
        }
    }
}

fn jitter(rng: &mut impl Rng, (lo, hi): (u64, u64)) -> Duration {
    if hi <= lo {
        return Duration::from_millis(lo);
    }
    Duration::from_millis(rng.gen_range(lo..hi))
}

/// Produce a fresh, lazily paced chunk stream for `result`.
pub fn simulate_stream(result: StructuredResult, pacing: Pacing) -> ChunkStream {
    let plan = plan_chunks(&result, pacing);
    stream::iter(plan)
        .then(|(pause, chunk)| async move {
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            Ok::<_, Error>(chunk)
        })
        .boxed()
}

/// Pair each chunk with the pause that precedes it.
fn plan_chunks(result: &StructuredResult, pacing: Pacing) -> Vec<(Duration, StreamChunk)> {
    let mut rng = rand::thread_rng();
    let mut plan = Vec::new();
    let mut pause = Duration::ZERO;

    for group in chunk_words(&result.summary, WORDS_PER_CHUNK) {
        plan.push((pause, StreamChunk::chunk(SummaryField::Summary, group)));
        pause = pacing.summary_pause(&mut rng);
    }

    for chunk in tail_chunks(result) {
        let is_step = matches!(
            chunk,
            StreamChunk::Chunk {
                field: SummaryField::NextSteps,
                ..
            }
        );
        plan.push((pause, chunk));
        pause = if is_step {
            pacing.step_pause(&mut rng)
        } else {
            Duration::ZERO
        };
    }

    plan
}

/// Everything after the summary phase: steps, risk, categories, then `done`.
pub fn tail_chunks(result: &StructuredResult) -> Vec<StreamChunk> {
    let mut chunks: Vec<StreamChunk> = result
        .next_steps
        .iter()
        .map(|step| StreamChunk::chunk(SummaryField::NextSteps, step.clone()))
        .collect();
    chunks.push(StreamChunk::chunk(
        SummaryField::RiskLevel,
        result.risk_level.as_str(),
    ));
    chunks.push(StreamChunk::chunk(
        SummaryField::Categories,
        serde_json::to_string(&result.categories).unwrap_or_default(),
    ));
    chunks.push(StreamChunk::Done {
        result: result.clone(),
    });
    chunks
}

/// Split on single spaces and regroup, preserving runs of spaces.
fn chunk_words(text: &str, words_per_chunk: usize) -> Vec<String> {
    let words: Vec<&str> = text.split(' ').collect();
    words
        .chunks(words_per_chunk)
        .map(|group| group.join(" "))
        .collect()
}
