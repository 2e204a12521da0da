//! `external_action_runs`: append-only record of executor attempts.
//!
//! One row is inserted per executor invocation, success or failure, and rows
//! are never mutated afterwards.

use sqlx::SqliteConnection;

use crate::error::Result;

/// A recorded executor attempt.
#[derive(Debug, Clone)]
pub struct RunRow {
    /// Run identifier (`ext-…`).
    pub run_id: String,
    /// Execution job this run belongs to (`job-…`).
    pub job_id: String,
    /// Action the run executed.
    pub action_id: i64,
    /// Action kind string at execution time.
    pub action_type: String,
    /// Resolved backend (`mock`, `google`, …).
    pub provider: String,
    /// `succeeded` or `failed`.
    pub status: String,
    /// Redacted payload snapshot, JSON-encoded.
    pub payload: Option<String>,
    /// Provider response, JSON-encoded.
    pub response: Option<String>,
    /// Error message for failed runs.
    pub error: Option<String>,
    /// RFC3339 execution timestamp.
    pub executed_at: String,
}

/// Append a run row.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on insert failure.
pub async fn insert_run(conn: &mut SqliteConnection, run: &RunRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO external_action_runs \
           (run_id, job_id, action_id, action_type, provider, status, payload, response, error, executed_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )
    .bind(&run.run_id)
    .bind(&run.job_id)
    .bind(run.action_id)
    .bind(&run.action_type)
    .bind(&run.provider)
    .bind(&run.status)
    .bind(&run.payload)
    .bind(&run.response)
    .bind(&run.error)
    .bind(&run.executed_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// List runs recorded for an action, oldest first.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on query failure.
pub async fn list_runs_for_action(
    conn: &mut SqliteConnection,
    action_id: i64,
) -> Result<Vec<RunRow>> {
    type Tuple = (
        String,
        String,
        i64,
        String,
        String,
        String,
        Option<String>,
        Option<String>,
        Option<String>,
        String,
    );
    let rows: Vec<Tuple> = sqlx::query_as(
        "SELECT run_id, job_id, action_id, action_type, provider, status, payload, response, error, executed_at \
         FROM external_action_runs WHERE action_id = ?1 ORDER BY executed_at, run_id",
    )
    .bind(action_id)
    .fetch_all(conn)
    .await?;
    Ok(rows
        .into_iter()
        .map(
            |(
                run_id,
                job_id,
                action_id,
                action_type,
                provider,
                status,
                payload,
                response,
                error,
                executed_at,
            )| RunRow {
                run_id,
                job_id,
                action_id,
                action_type,
                provider,
                status,
                payload,
                response,
                error,
                executed_at,
            },
        )
        .collect())
}
