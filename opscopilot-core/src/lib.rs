//! # opscopilot-core
//!
//! Core library for opscopilot - AI summaries for support tickets.
//!
//! This library provides:
//! - Domain types for tickets, analysis results and stream chunks
//! - Interchangeable AI backends behind a credential-checking selector
//! - A summarizer that streams results and caches them per ticket
//! - Database storage layer with SQLite
//! - Configuration management and provider settings
//! - Logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use opscopilot_core::{Config, Database, SettingsStore, SummarizeRequest, Summarizer};
//!
//! # async fn run() -> opscopilot_core::Result<()> {
//! let config = Config::load()?;
//! let db = Arc::new(Database::open(&Config::database_path())?);
//! db.migrate()?;
//!
//! let settings = Arc::new(SettingsStore::new(db.clone(), config.ai.clone()));
//! let summarizer = Summarizer::new(db.clone(), db, settings, config.ai.stream_timeout());
//! let outcome = summarizer
//!     .summarize(SummarizeRequest::ad_hoc("Login fails", "Users see a 500 on sign in."))
//!     .await?;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::{Database, TicketUpdate};
pub use error::{Error, ProviderError, Result};
pub use providers::{available_providers, select_provider, ChunkStream, Provider};
pub use request::{SummarizeRequest, SummaryTarget, ValidationErrors};
pub use settings::{ProviderSettings, SettingsStore, SettingsUpdate, SettingsView};
pub use store::{CacheEntry, SummaryCache, TicketStore};
pub use summary::{SummaryOutcome, SummaryStream, Summarizer};
pub use types::*;

// Public modules
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod providers;
pub mod request;
pub mod settings;
pub mod store;
pub mod summary;
pub mod types;
