//! Database repository layer
//!
//! Provides query and write operations for tickets, cached summaries and
//! the persisted provider settings row.

use crate::error::{Error, Result};
use crate::settings::StoredSettings;
use crate::store::CacheEntry;
use crate::types::{StructuredResult, Ticket};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// 9999-12-31T23:59:59Z, the last instant RFC 3339 can write.
const LATEST_EXPIRY_SECS: i64 = 253_402_300_799;

/// Outcome of a ticket content edit.
#[derive(Debug, Clone)]
pub struct TicketUpdate {
    /// Ticket after the edit
    pub ticket: Ticket,
    /// True when title or description actually changed
    pub content_changed: bool,
}

/// Database handle (single connection; every operation holds the lock)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable foreign keys and WAL mode for better concurrency
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.connection();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves SQLite consistent; keep serving.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================
    // Ticket operations
    // ============================================

    /// Create a ticket with a fresh id
    pub fn create_ticket(&self, title: &str, description: &str) -> Result<Ticket> {
        let now = Utc::now();
        let ticket = Ticket {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.insert_ticket(&ticket)?;
        Ok(ticket)
    }

    /// Insert a ticket as-is
    pub fn insert_ticket(&self, ticket: &Ticket) -> Result<()> {
        let conn = self.connection();
        conn.execute(
            r#"
            INSERT INTO tickets (id, title, description, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                ticket.id,
                ticket.title,
                ticket.description,
                ticket.created_at.to_rfc3339(),
                ticket.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get a ticket by id
    pub fn get_ticket(&self, id: &str) -> Result<Option<Ticket>> {
        let conn = self.connection();
        conn.query_row(
            "SELECT * FROM tickets WHERE id = ?",
            [id],
            Self::row_to_ticket,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Edit a ticket's title and/or description.
    ///
    /// Returns `None` when the ticket does not exist. When the content
    /// changes, the ticket's cached summary is dropped in the same lock.
    pub fn update_ticket_content(
        &self,
        id: &str,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<TicketUpdate>> {
        let conn = self.connection();
        let Some(mut ticket) = conn
            .query_row(
                "SELECT * FROM tickets WHERE id = ?",
                [id],
                Self::row_to_ticket,
            )
            .optional()?
        else {
            return Ok(None);
        };

        let mut content_changed = false;
        if let Some(title) = title.filter(|t| *t != ticket.title) {
            ticket.title = title.to_string();
            content_changed = true;
        }
        if let Some(description) = description.filter(|d| *d != ticket.description) {
            ticket.description = description.to_string();
            content_changed = true;
        }

        if content_changed {
            ticket.updated_at = Utc::now();
            conn.execute(
                "UPDATE tickets SET title = ?2, description = ?3, updated_at = ?4 WHERE id = ?1",
                params![
                    ticket.id,
                    ticket.title,
                    ticket.description,
                    ticket.updated_at.to_rfc3339(),
                ],
            )?;
            let dropped = conn.execute("DELETE FROM ai_cache WHERE ticket_id = ?", [id])?;
            tracing::debug!(ticket_id = %id, dropped, "Ticket content changed, summary cache invalidated");
        }

        Ok(Some(TicketUpdate {
            ticket,
            content_changed,
        }))
    }

    fn row_to_ticket(row: &Row) -> rusqlite::Result<Ticket> {
        let created_at_str: String = row.get("created_at")?;
        let updated_at_str: String = row.get("updated_at")?;

        Ok(Ticket {
            id: row.get("id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            created_at: parse_timestamp(&created_at_str).unwrap_or_else(Utc::now),
            updated_at: parse_timestamp(&updated_at_str).unwrap_or_else(Utc::now),
        })
    }

    // ============================================
    // Summary cache operations
    // ============================================

    /// Cached result for a ticket as of `now`; expired entries are deleted.
    pub fn cached_summary_at(
        &self,
        ticket_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<StructuredResult>> {
        let conn = self.connection();
        let Some(entry) = conn
            .query_row(
                "SELECT * FROM ai_cache WHERE ticket_id = ?",
                [ticket_id],
                Self::row_to_cache_entry,
            )
            .optional()?
        else {
            return Ok(None);
        };

        let entry = match entry {
            Ok(entry) if now <= entry.expires_at => entry,
            Ok(_) => {
                conn.execute("DELETE FROM ai_cache WHERE ticket_id = ?", [ticket_id])?;
                tracing::debug!(ticket_id = %ticket_id, "Cached summary expired");
                return Ok(None);
            }
            Err(e) => {
                conn.execute("DELETE FROM ai_cache WHERE ticket_id = ?", [ticket_id])?;
                tracing::warn!(ticket_id = %ticket_id, error = %e, "Dropped unreadable cached summary");
                return Ok(None);
            }
        };

        Ok(Some(entry.result))
    }

    /// Upsert a ticket's cached result, restarting its TTL at `now`.
    pub fn put_cached_summary_at(
        &self,
        ticket_id: &str,
        result: &StructuredResult,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let latest = DateTime::from_timestamp(LATEST_EXPIRY_SECS, 0).unwrap_or(now);
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .map_or(latest, |at| at.min(latest));
        let result_json = serde_json::to_string(result)?;

        let conn = self.connection();
        conn.execute(
            r#"
            INSERT INTO ai_cache (ticket_id, result, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(ticket_id) DO UPDATE SET
                result = excluded.result,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            "#,
            params![
                ticket_id,
                result_json,
                now.to_rfc3339(),
                expires_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Remove a ticket's cached result. Returns whether one existed.
    pub fn delete_cached_summary(&self, ticket_id: &str) -> Result<bool> {
        let conn = self.connection();
        let deleted = conn.execute("DELETE FROM ai_cache WHERE ticket_id = ?", [ticket_id])?;
        Ok(deleted > 0)
    }

    /// Raw cache row, expired or not (no side effects).
    pub fn cache_entry(&self, ticket_id: &str) -> Result<Option<CacheEntry>> {
        let conn = self.connection();
        let entry = conn
            .query_row(
                "SELECT * FROM ai_cache WHERE ticket_id = ?",
                [ticket_id],
                Self::row_to_cache_entry,
            )
            .optional()?;
        entry.transpose()
    }

    /// Outer error is SQLite; inner error is an undecodable row.
    fn row_to_cache_entry(row: &Row) -> rusqlite::Result<Result<CacheEntry>> {
        let ticket_id: String = row.get("ticket_id")?;
        let result_str: String = row.get("result")?;
        let created_at_str: String = row.get("created_at")?;
        let expires_at_str: String = row.get("expires_at")?;

        let decoded = (|| {
            let result: StructuredResult = serde_json::from_str(&result_str)?;
            let created_at = parse_timestamp(&created_at_str)
                .ok_or_else(|| Error::Config(format!("bad cache timestamp: {created_at_str}")))?;
            let expires_at = parse_timestamp(&expires_at_str)
                .ok_or_else(|| Error::Config(format!("bad cache timestamp: {expires_at_str}")))?;
            Ok(CacheEntry {
                ticket_id,
                result,
                created_at,
                expires_at,
            })
        })();
        Ok(decoded)
    }

    // ============================================
    // Settings operations
    // ============================================

    /// The persisted settings row, if one was ever saved
    pub fn get_stored_settings(&self) -> Result<Option<StoredSettings>> {
        let conn = self.connection();
        conn.query_row(
            "SELECT * FROM ai_config WHERE id = 'singleton'",
            [],
            |row| {
                let cache_ttl_ms: Option<i64> = row.get("cache_ttl_ms")?;
                Ok(StoredSettings {
                    default_provider: row.get("default_provider")?,
                    openai_api_key: row.get("openai_api_key")?,
                    openai_model: row.get("openai_model")?,
                    anthropic_api_key: row.get("anthropic_api_key")?,
                    anthropic_model: row.get("anthropic_model")?,
                    gemini_api_key: row.get("gemini_api_key")?,
                    gemini_model: row.get("gemini_model")?,
                    cache_ttl_ms: cache_ttl_ms.and_then(|ms| u64::try_from(ms).ok()),
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    /// Insert or replace the settings row
    pub fn save_stored_settings(&self, settings: &StoredSettings) -> Result<()> {
        let conn = self.connection();
        conn.execute(
            r#"
            INSERT INTO ai_config (
                id, default_provider,
                openai_api_key, openai_model,
                anthropic_api_key, anthropic_model,
                gemini_api_key, gemini_model,
                cache_ttl_ms, updated_at
            )
            VALUES ('singleton', ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                default_provider = excluded.default_provider,
                openai_api_key = excluded.openai_api_key,
                openai_model = excluded.openai_model,
                anthropic_api_key = excluded.anthropic_api_key,
                anthropic_model = excluded.anthropic_model,
                gemini_api_key = excluded.gemini_api_key,
                gemini_model = excluded.gemini_model,
                cache_ttl_ms = excluded.cache_ttl_ms,
                updated_at = excluded.updated_at
            "#,
            params![
                settings.default_provider,
                settings.openai_api_key,
                settings.openai_model,
                settings.anthropic_api_key,
                settings.anthropic_model,
                settings.gemini_api_key,
                settings.gemini_model,
                settings.cache_ttl_ms.map(|ms| i64::try_from(ms).unwrap_or(i64::MAX)),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
