//! SQLite persistence: pool setup, schema migration, and row-level stores.
//!
//! Write paths always run inside a transaction begun by the caller; the
//! functions here take `&mut SqliteConnection` so coordinator operations can
//! compose several table touches into one commit.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::Result;

pub mod actions;
pub mod checkpoints;
pub mod runs;
pub mod tokens;
pub mod watchdog;

/// Open a SQLite pool with WAL journaling and a busy timeout.
///
/// Concurrent coordinator operations rely on SQLite's single-writer
/// transaction lock for serialization; the busy timeout keeps losers waiting
/// instead of failing fast.
///
/// # Errors
///
/// Returns an error when the URL is malformed or the database cannot be
/// opened.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Create all tables and indexes if they do not exist.
///
/// Statements are idempotent so the migration can run on every startup.
///
/// # Errors
///
/// Returns an error when a DDL statement fails.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS autonomous_actions (
            action_id INTEGER PRIMARY KEY AUTOINCREMENT,
            proposal_id INTEGER,
            action_type TEXT NOT NULL,
            draft_content TEXT,
            status TEXT NOT NULL DEFAULT 'drafted',
            is_approved BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        "CREATE TABLE IF NOT EXISTS langgraph_checkpoints (
            thread_id TEXT PRIMARY KEY,
            checkpoint BLOB,
            metadata TEXT
        )",
        "CREATE TABLE IF NOT EXISTS approval_index (
            approval_request_id TEXT PRIMARY KEY,
            thread_id TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS external_action_runs (
            run_id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            action_id INTEGER NOT NULL,
            action_type TEXT NOT NULL,
            provider TEXT NOT NULL,
            status TEXT NOT NULL,
            payload TEXT,
            response TEXT,
            error TEXT,
            executed_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_runs_action
            ON external_action_runs (action_id)",
        "CREATE TABLE IF NOT EXISTS watchdog_jobs (
            job_id INTEGER PRIMARY KEY AUTOINCREMENT,
            status TEXT NOT NULL,
            payload TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        "CREATE TABLE IF NOT EXISTS watchdog_alerts (
            alert_id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id INTEGER NOT NULL,
            alert_level TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        "CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            role TEXT,
            career_aspiration TEXT
        )",
        "CREATE TABLE IF NOT EXISTS projects (
            project_id TEXT PRIMARY KEY,
            project_name TEXT NOT NULL,
            manager_id TEXT
        )",
        "CREATE TABLE IF NOT EXISTS assignments (
            assignment_id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            allocation_rate REAL
        )",
        "CREATE TABLE IF NOT EXISTS weekly_reports (
            report_id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            reporting_date TEXT NOT NULL,
            content_text TEXT
        )",
        "CREATE TABLE IF NOT EXISTS user_motivation_history (
            history_id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            motivation_score REAL NOT NULL,
            sentiment_score REAL NOT NULL,
            ai_summary TEXT,
            recorded_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS project_health_snapshots (
            snapshot_id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id TEXT NOT NULL,
            health_score REAL NOT NULL,
            risk_level TEXT NOT NULL,
            variance_score REAL NOT NULL,
            manager_gap_score REAL NOT NULL,
            calculated_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS assignment_patterns (
            pattern_id TEXT PRIMARY KEY,
            name_ja TEXT NOT NULL,
            description TEXT
        )",
        "CREATE TABLE IF NOT EXISTS ai_analysis_results (
            analysis_id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            pattern_id TEXT NOT NULL,
            debate_log TEXT,
            final_decision TEXT
        )",
        "CREATE TABLE IF NOT EXISTS ai_strategy_proposals (
            proposal_id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id TEXT NOT NULL,
            plan_type TEXT NOT NULL,
            is_recommended BOOLEAN NOT NULL DEFAULT FALSE,
            description TEXT,
            predicted_future_impact TEXT
        )",
        "CREATE TABLE IF NOT EXISTS calendar_tokens (
            user_id TEXT PRIMARY KEY,
            google_email TEXT NOT NULL,
            access_token TEXT NOT NULL,
            refresh_token TEXT,
            token_type TEXT,
            scope TEXT,
            expires_at TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_calendar_tokens_email
            ON calendar_tokens (google_email)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Open an in-memory pool with the schema applied (for tests).
///
/// # Errors
///
/// Returns an error when the schema cannot be created.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    // A single connection keeps the in-memory database alive and shared.
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    migrate(&pool).await?;
    Ok(pool)
}
