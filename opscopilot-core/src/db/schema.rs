//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: tickets and cached summaries
    r#"
    CREATE TABLE IF NOT EXISTS tickets (
        id               TEXT PRIMARY KEY,
        title            TEXT NOT NULL,
        description      TEXT NOT NULL,
        created_at       DATETIME NOT NULL,
        updated_at       DATETIME NOT NULL
    );

    -- One cached analysis per ticket, never per request
    CREATE TABLE IF NOT EXISTS ai_cache (
        ticket_id        TEXT PRIMARY KEY REFERENCES tickets(id) ON DELETE CASCADE,
        result           JSON NOT NULL,
        created_at       DATETIME NOT NULL,
        expires_at       DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_ai_cache_expires ON ai_cache(expires_at);
    "#,
    // Version 2: persisted provider settings (single row)
    r#"
    CREATE TABLE IF NOT EXISTS ai_config (
        id                TEXT PRIMARY KEY CHECK (id = 'singleton'),
        default_provider  TEXT,
        openai_api_key    TEXT,
        openai_model      TEXT,
        anthropic_api_key TEXT,
        anthropic_model   TEXT,
        gemini_api_key    TEXT,
        gemini_model      TEXT,
        cache_ttl_ms      INTEGER,
        updated_at        DATETIME NOT NULL
    );
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
