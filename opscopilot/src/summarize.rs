//! opscopilot-summarize - CLI tool to summarize one ticket
//!
//! Runs the same summarizer as the server against the local database and
//! prints either a rendered result or the raw SSE frames.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use futures::StreamExt;
use opscopilot_core::request::SummarizeBody;
use opscopilot_core::{
    Config, Database, SettingsStore, StreamChunk, StructuredResult, SummaryOutcome, Summarizer,
};

#[derive(Parser)]
#[command(name = "opscopilot-summarize")]
#[command(about = "Summarize a ticket with the configured AI backend")]
#[command(version)]
struct Args {
    /// Stored ticket to summarize
    #[arg(short, long, conflicts_with_all = ["title", "description"])]
    ticket: Option<String>,

    /// Ad-hoc ticket title (with --description)
    #[arg(long, requires = "description")]
    title: Option<String>,

    /// Ad-hoc ticket description (with --title)
    #[arg(long, requires = "title")]
    description: Option<String>,

    /// Backend to use instead of the configured default (skips the cache)
    #[arg(short, long)]
    provider: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Rendered result
    Text,
    /// `data: <json>` frames as the server sends them
    Sse,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        opscopilot_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let db_path = Config::database_path();
    let db = Arc::new(Database::open(&db_path).context("failed to open database")?);
    db.migrate().context("failed to run database migrations")?;

    let settings = Arc::new(SettingsStore::new(db.clone(), config.ai.clone()));
    let summarizer = Summarizer::new(db.clone(), db, settings, config.ai.stream_timeout());

    let request = SummarizeBody {
        ticket_id: args.ticket,
        title: args.title,
        description: args.description,
        provider: args.provider,
    }
    .validate()
    .map_err(|e| anyhow::anyhow!("invalid request: {e}"))?;

    let outcome = summarizer
        .summarize(request)
        .await
        .context("failed to start summary")?;

    match outcome {
        SummaryOutcome::Cached(result) => match args.format {
            OutputFormat::Text => {
                println!("(cached)");
                print_result(&result);
            }
            OutputFormat::Sse => print!("{}", StreamChunk::Done { result }.to_sse_frame()?),
        },
        SummaryOutcome::Streaming {
            provider,
            mut chunks,
        } => {
            tracing::info!(provider = %provider, "Streaming summary");
            let mut stdout = std::io::stdout();
            while let Some(chunk) = chunks.next().await {
                if args.format == OutputFormat::Sse {
                    write!(stdout, "{}", chunk.to_sse_frame()?)?;
                    stdout.flush()?;
                }
                match chunk {
                    StreamChunk::Done { result } => {
                        if args.format == OutputFormat::Text {
                            print_result(&result);
                        }
                    }
                    StreamChunk::Error { message } => anyhow::bail!("summary failed: {message}"),
                    StreamChunk::Chunk { .. } => {}
                }
            }
        }
    }

    Ok(())
}

fn print_result(result: &StructuredResult) {
    println!("Summary: {}", result.summary);
    println!("Risk: {}", result.risk_level);
    println!("Categories: {}", result.categories.join(", "));
    println!("Next steps:");
    for (i, step) in result.next_steps.iter().enumerate() {
        println!("  {}. {}", i + 1, step);
    }
}
