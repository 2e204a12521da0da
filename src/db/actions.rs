//! `autonomous_actions` rows: the units of work the coordinator shepherds.

use sqlx::SqliteConnection;

use crate::error::{Error, Result};
use crate::types::{ActionKind, ActionRow, ThreadStatus};

type ActionTuple = (i64, Option<i64>, String, Option<String>, String, bool);

fn row_from_tuple(row: ActionTuple) -> Result<ActionRow> {
    let (action_id, proposal_id, action_type, draft_content, status, is_approved) = row;
    let action_type = ActionKind::parse(&action_type)
        .ok_or_else(|| Error::Invariant(format!("unknown action_type `{action_type}`")))?;
    let status = ThreadStatus::parse(&status)
        .ok_or_else(|| Error::Invariant(format!("unknown action status `{status}`")))?;
    Ok(ActionRow {
        action_id,
        proposal_id,
        action_type,
        draft_content,
        status,
        is_approved,
    })
}

/// Insert a new action in `drafted` state and return its id.
///
/// # Errors
///
/// Returns [`Error::Database`] on insert failure.
pub async fn insert_action(
    conn: &mut SqliteConnection,
    action_type: ActionKind,
    draft_content: &str,
    proposal_id: Option<i64>,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO autonomous_actions (proposal_id, action_type, draft_content, status, is_approved) \
         VALUES (?1, ?2, ?3, 'drafted', FALSE)",
    )
    .bind(proposal_id)
    .bind(action_type.as_str())
    .bind(draft_content)
    .execute(conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Load an action by id. Returns `None` when the row does not exist.
///
/// # Errors
///
/// Returns [`Error::Database`] on query failure and [`Error::Invariant`] when
/// a stored enum value is unknown.
pub async fn load_action(conn: &mut SqliteConnection, action_id: i64) -> Result<Option<ActionRow>> {
    let row: Option<ActionTuple> = sqlx::query_as(
        "SELECT action_id, proposal_id, action_type, draft_content, status, is_approved \
         FROM autonomous_actions WHERE action_id = ?1",
    )
    .bind(action_id)
    .fetch_optional(conn)
    .await?;
    row.map(row_from_tuple).transpose()
}

/// Update the status and approval mirror of an action row.
///
/// # Errors
///
/// Returns [`Error::Database`] on update failure.
pub async fn update_status(
    conn: &mut SqliteConnection,
    action_id: i64,
    status: ThreadStatus,
    is_approved: bool,
) -> Result<()> {
    sqlx::query("UPDATE autonomous_actions SET status = ?1, is_approved = ?2 WHERE action_id = ?3")
        .bind(status.as_str())
        .bind(is_approved)
        .bind(action_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Update the status of an action without touching the approval mirror
/// (execution transitions keep whatever approval state was recorded).
///
/// # Errors
///
/// Returns [`Error::Database`] on update failure.
pub async fn update_status_only(
    conn: &mut SqliteConnection,
    action_id: i64,
    status: ThreadStatus,
) -> Result<()> {
    sqlx::query("UPDATE autonomous_actions SET status = ?1 WHERE action_id = ?2")
        .bind(status.as_str())
        .bind(action_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Replace the draft content and status of an action (used by steer).
///
/// # Errors
///
/// Returns [`Error::Database`] on update failure.
pub async fn update_draft(
    conn: &mut SqliteConnection,
    action_id: i64,
    draft_content: &str,
    status: ThreadStatus,
) -> Result<()> {
    sqlx::query(
        "UPDATE autonomous_actions SET draft_content = ?1, status = ?2 WHERE action_id = ?3",
    )
    .bind(draft_content)
    .bind(status.as_str())
    .bind(action_id)
    .execute(conn)
    .await?;
    Ok(())
}
