//! Watchdog persistence: job queue, alerts, project signals, and the derived
//! health / motivation / proposal tables.

use sqlx::SqliteConnection;

use crate::error::Result;
use crate::types::RiskLevel;

// ── Job queue ───────────────────────────────────────────────────

/// Insert a `queued` watchdog job, returning its id.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on insert failure.
pub async fn enqueue_job(conn: &mut SqliteConnection, payload: &str) -> Result<i64> {
    let result = sqlx::query("INSERT INTO watchdog_jobs (status, payload) VALUES ('queued', ?1)")
        .bind(payload)
        .execute(conn)
        .await?;
    Ok(result.last_insert_rowid())
}

/// Oldest job still in `queued` state, if any.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on query failure.
pub async fn next_queued_job(conn: &mut SqliteConnection) -> Result<Option<i64>> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT job_id FROM watchdog_jobs WHERE status = 'queued' ORDER BY job_id LIMIT 1",
    )
    .fetch_optional(conn)
    .await?;
    Ok(row.map(|(id,)| id))
}

/// Move a job to a new status, replacing its payload.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on update failure.
pub async fn update_job(
    conn: &mut SqliteConnection,
    job_id: i64,
    status: &str,
    payload: &str,
) -> Result<()> {
    sqlx::query("UPDATE watchdog_jobs SET status = ?1, payload = ?2 WHERE job_id = ?3")
        .bind(status)
        .bind(payload)
        .bind(job_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Record one alert row produced by a watchdog run.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on insert failure.
pub async fn insert_alert(
    conn: &mut SqliteConnection,
    job_id: i64,
    alert_level: RiskLevel,
    message: &str,
) -> Result<()> {
    sqlx::query("INSERT INTO watchdog_alerts (job_id, alert_level, message) VALUES (?1, ?2, ?3)")
        .bind(job_id)
        .bind(alert_level.as_str())
        .bind(message)
        .execute(conn)
        .await?;
    Ok(())
}

// ── Signal sources ──────────────────────────────────────────────

/// A user row as seen by the watchdog.
#[derive(Debug, Clone)]
pub struct UserRow {
    /// User identifier.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Role label.
    pub role: Option<String>,
    /// Free-text aspiration, used as the scoring fallback when no report
    /// exists.
    pub career_aspiration: Option<String>,
}

/// A project row as seen by the watchdog.
#[derive(Debug, Clone)]
pub struct ProjectRow {
    /// Project identifier.
    pub project_id: String,
    /// Display name.
    pub project_name: String,
    /// Managing user, when assigned.
    pub manager_id: Option<String>,
}

/// An assignment row linking a user to a project.
#[derive(Debug, Clone)]
pub struct AssignmentRow {
    /// Assignment identifier.
    pub assignment_id: i64,
    /// Assigned user.
    pub user_id: String,
    /// Target project.
    pub project_id: String,
    /// Fraction of the user's time on this project.
    pub allocation_rate: Option<f64>,
}

/// A weekly report row, the primary health signal.
#[derive(Debug, Clone)]
pub struct ReportRow {
    /// Reporting user.
    pub user_id: String,
    /// Project reported on.
    pub project_id: String,
    /// Report date (ISO date).
    pub reporting_date: String,
    /// Report body.
    pub content_text: Option<String>,
}

/// Fetch all users ordered by id.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on query failure.
pub async fn fetch_users(conn: &mut SqliteConnection) -> Result<Vec<UserRow>> {
    let rows: Vec<(String, String, Option<String>, Option<String>)> = sqlx::query_as(
        "SELECT user_id, name, role, career_aspiration FROM users ORDER BY user_id",
    )
    .fetch_all(conn)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(user_id, name, role, career_aspiration)| UserRow {
            user_id,
            name,
            role,
            career_aspiration,
        })
        .collect())
}

/// Fetch all projects ordered by id.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on query failure.
pub async fn fetch_projects(conn: &mut SqliteConnection) -> Result<Vec<ProjectRow>> {
    let rows: Vec<(String, String, Option<String>)> =
        sqlx::query_as("SELECT project_id, project_name, manager_id FROM projects ORDER BY project_id")
            .fetch_all(conn)
            .await?;
    Ok(rows
        .into_iter()
        .map(|(project_id, project_name, manager_id)| ProjectRow {
            project_id,
            project_name,
            manager_id,
        })
        .collect())
}

/// Fetch all assignments ordered by id.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on query failure.
pub async fn fetch_assignments(conn: &mut SqliteConnection) -> Result<Vec<AssignmentRow>> {
    let rows: Vec<(i64, String, String, Option<f64>)> = sqlx::query_as(
        "SELECT assignment_id, user_id, project_id, allocation_rate \
         FROM assignments ORDER BY assignment_id",
    )
    .fetch_all(conn)
    .await?;
    Ok(rows
        .into_iter()
        .map(
            |(assignment_id, user_id, project_id, allocation_rate)| AssignmentRow {
                assignment_id,
                user_id,
                project_id,
                allocation_rate,
            },
        )
        .collect())
}

/// Fetch all weekly reports, most recent first.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on query failure.
pub async fn fetch_reports(conn: &mut SqliteConnection) -> Result<Vec<ReportRow>> {
    let rows: Vec<(String, String, String, Option<String>)> = sqlx::query_as(
        "SELECT user_id, project_id, reporting_date, content_text \
         FROM weekly_reports ORDER BY reporting_date DESC",
    )
    .fetch_all(conn)
    .await?;
    Ok(rows
        .into_iter()
        .map(
            |(user_id, project_id, reporting_date, content_text)| ReportRow {
                user_id,
                project_id,
                reporting_date,
                content_text,
            },
        )
        .collect())
}

// ── Derived tables ──────────────────────────────────────────────

/// True when a motivation history row already exists for the user and date.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on query failure.
pub async fn motivation_exists(
    conn: &mut SqliteConnection,
    user_id: &str,
    recorded_at: &str,
) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM user_motivation_history WHERE user_id = ?1 AND recorded_at = ?2",
    )
    .bind(user_id)
    .bind(recorded_at)
    .fetch_optional(conn)
    .await?;
    Ok(row.is_some())
}

/// Append a dated motivation history row.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on insert failure.
pub async fn insert_motivation(
    conn: &mut SqliteConnection,
    user_id: &str,
    motivation_score: f64,
    sentiment_score: f64,
    ai_summary: &str,
    recorded_at: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO user_motivation_history \
           (user_id, motivation_score, sentiment_score, ai_summary, recorded_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(user_id)
    .bind(motivation_score)
    .bind(sentiment_score)
    .bind(ai_summary)
    .bind(recorded_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// True when a health snapshot already exists for the project and date.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on query failure.
pub async fn snapshot_exists(
    conn: &mut SqliteConnection,
    project_id: &str,
    date: &str,
) -> Result<bool> {
    // Timestamps are RFC3339; the first ten characters are the date.
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM project_health_snapshots \
         WHERE project_id = ?1 AND substr(calculated_at, 1, 10) = ?2",
    )
    .bind(project_id)
    .bind(date)
    .fetch_optional(conn)
    .await?;
    Ok(row.is_some())
}

/// Persist a daily health snapshot for a project.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on insert failure.
pub async fn insert_snapshot(
    conn: &mut SqliteConnection,
    project_id: &str,
    health_score: f64,
    risk_level: RiskLevel,
    variance_score: f64,
    manager_gap_score: f64,
    calculated_at: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO project_health_snapshots \
           (project_id, health_score, risk_level, variance_score, manager_gap_score, calculated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(project_id)
    .bind(health_score)
    .bind(risk_level.as_str())
    .bind(variance_score)
    .bind(manager_gap_score)
    .bind(calculated_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Insert an assignment pattern definition unless it already exists.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on write failure.
pub async fn ensure_pattern(
    conn: &mut SqliteConnection,
    pattern_id: &str,
    name_ja: &str,
    description: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO assignment_patterns (pattern_id, name_ja, description) VALUES (?1, ?2, ?3) \
         ON CONFLICT (pattern_id) DO NOTHING",
    )
    .bind(pattern_id)
    .bind(name_ja)
    .bind(description)
    .execute(conn)
    .await?;
    Ok(())
}

/// True when an analysis row exists for the (user, project) pair.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on query failure.
pub async fn analysis_exists(
    conn: &mut SqliteConnection,
    user_id: &str,
    project_id: &str,
) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM ai_analysis_results WHERE user_id = ?1 AND project_id = ?2 LIMIT 1",
    )
    .bind(user_id)
    .bind(project_id)
    .fetch_optional(conn)
    .await?;
    Ok(row.is_some())
}

/// Record a derived pattern/decision analysis for an assignment.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on insert failure.
pub async fn insert_analysis(
    conn: &mut SqliteConnection,
    user_id: &str,
    project_id: &str,
    pattern_id: &str,
    debate_log: &str,
    final_decision: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO ai_analysis_results \
           (user_id, project_id, pattern_id, debate_log, final_decision) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(user_id)
    .bind(project_id)
    .bind(pattern_id)
    .bind(debate_log)
    .bind(final_decision)
    .execute(conn)
    .await?;
    Ok(())
}

// ── Strategy proposals ──────────────────────────────────────────

/// A strategy proposal row.
#[derive(Debug, Clone)]
pub struct ProposalRow {
    /// Proposal identifier.
    pub proposal_id: i64,
    /// Owning project.
    pub project_id: String,
    /// Plan label (`Plan_A` / `Plan_B` / `Plan_C`).
    pub plan_type: String,
    /// Whether this plan is the current recommendation.
    pub is_recommended: bool,
    /// Plan description.
    pub description: Option<String>,
    /// Predicted impact label.
    pub predicted_future_impact: Option<String>,
}

type ProposalTuple = (i64, String, String, bool, Option<String>, Option<String>);

fn proposal_from_tuple(row: ProposalTuple) -> ProposalRow {
    let (proposal_id, project_id, plan_type, is_recommended, description, predicted_future_impact) =
        row;
    ProposalRow {
        proposal_id,
        project_id,
        plan_type,
        is_recommended,
        description,
        predicted_future_impact,
    }
}

/// List proposals for a project ordered by id.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on query failure.
pub async fn list_proposals(
    conn: &mut SqliteConnection,
    project_id: &str,
) -> Result<Vec<ProposalRow>> {
    let rows: Vec<ProposalTuple> = sqlx::query_as(
        "SELECT proposal_id, project_id, plan_type, is_recommended, description, predicted_future_impact \
         FROM ai_strategy_proposals WHERE project_id = ?1 ORDER BY proposal_id",
    )
    .bind(project_id)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(proposal_from_tuple).collect())
}

/// Insert a proposal row.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on insert failure.
pub async fn insert_proposal(
    conn: &mut SqliteConnection,
    project_id: &str,
    plan_type: &str,
    description: &str,
    predicted_future_impact: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO ai_strategy_proposals \
           (project_id, plan_type, is_recommended, description, predicted_future_impact) \
         VALUES (?1, ?2, FALSE, ?3, ?4)",
    )
    .bind(project_id)
    .bind(plan_type)
    .bind(description)
    .bind(predicted_future_impact)
    .execute(conn)
    .await?;
    Ok(())
}

/// Mark exactly one plan as recommended for a project.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on update failure.
pub async fn set_recommended(
    conn: &mut SqliteConnection,
    project_id: &str,
    plan_type: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE ai_strategy_proposals \
         SET is_recommended = CASE WHEN plan_type = ?1 THEN TRUE ELSE FALSE END \
         WHERE project_id = ?2",
    )
    .bind(plan_type)
    .bind(project_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Pick the proposal to act on: the recommended one, else the first.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on query failure.
pub async fn select_recommended(
    conn: &mut SqliteConnection,
    project_id: &str,
) -> Result<Option<ProposalRow>> {
    let row: Option<ProposalTuple> = sqlx::query_as(
        "SELECT proposal_id, project_id, plan_type, is_recommended, description, predicted_future_impact \
         FROM ai_strategy_proposals WHERE project_id = ?1 AND is_recommended = TRUE \
         ORDER BY proposal_id LIMIT 1",
    )
    .bind(project_id)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(row) = row {
        return Ok(Some(proposal_from_tuple(row)));
    }
    let row: Option<ProposalTuple> = sqlx::query_as(
        "SELECT proposal_id, project_id, plan_type, is_recommended, description, predicted_future_impact \
         FROM ai_strategy_proposals WHERE project_id = ?1 ORDER BY proposal_id LIMIT 1",
    )
    .bind(project_id)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(proposal_from_tuple))
}

/// True when the project already has an open (pre-decision) action.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on query failure.
pub async fn open_action_exists(conn: &mut SqliteConnection, project_id: &str) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT aa.action_id \
         FROM autonomous_actions aa \
         JOIN ai_strategy_proposals ap ON ap.proposal_id = aa.proposal_id \
         WHERE ap.project_id = ?1 AND aa.status IN ('drafted', 'approval_pending') \
         LIMIT 1",
    )
    .bind(project_id)
    .fetch_optional(conn)
    .await?;
    Ok(row.is_some())
}
