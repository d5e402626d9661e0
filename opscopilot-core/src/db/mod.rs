//! Database layer for opscopilot
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Repository pattern for tickets, cached summaries and the settings row

pub mod repo;
pub mod schema;

pub use repo::{Database, TicketUpdate};
