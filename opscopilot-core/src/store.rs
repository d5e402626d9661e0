//! Collaborator seams consumed by the summarizer
//!
//! [`TicketStore`] resolves ticket ids to content and [`SummaryCache`] holds
//! per-ticket results with a TTL. [`Database`] implements both; tests swap
//! in fakes.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::db::Database;
use crate::error::Result;
use crate::types::{StructuredResult, TicketContent};

/// A cached analysis as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub ticket_id: String,
    pub result: StructuredResult,
    pub created_at: DateTime<Utc>,
    /// `created_at + ttl`
    pub expires_at: DateTime<Utc>,
}

/// Ticket lookup.
pub trait TicketStore: Send + Sync {
    fn find_ticket(&self, id: &str) -> Result<Option<TicketContent>>;
}

/// Per-ticket result cache with lazy expiry.
pub trait SummaryCache: Send + Sync {
    /// The live entry's result; an expired entry is removed and reported absent.
    fn get(&self, ticket_id: &str) -> Result<Option<StructuredResult>>;

    /// Upsert, restarting the TTL.
    fn put(&self, ticket_id: &str, result: &StructuredResult, ttl: Duration) -> Result<()>;

    /// Remove the entry if present.
    fn invalidate(&self, ticket_id: &str) -> Result<()>;
}

impl TicketStore for Database {
    fn find_ticket(&self, id: &str) -> Result<Option<TicketContent>> {
        Ok(self.get_ticket(id)?.map(|ticket| ticket.content()))
    }
}

impl SummaryCache for Database {
    fn get(&self, ticket_id: &str) -> Result<Option<StructuredResult>> {
        self.cached_summary_at(ticket_id, Utc::now())
    }

    fn put(&self, ticket_id: &str, result: &StructuredResult, ttl: Duration) -> Result<()> {
        self.put_cached_summary_at(ticket_id, result, ttl, Utc::now())
    }

    fn invalidate(&self, ticket_id: &str) -> Result<()> {
        self.delete_cached_summary(ticket_id).map(|_| ())
    }
}
