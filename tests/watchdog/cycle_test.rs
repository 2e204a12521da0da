//! Watchdog cycles: snapshots, proposals, and minted approval threads.

use crate::support::Harness;
use nemawashi::coordinator::HistoryFilter;
use nemawashi::types::{ActionKind, ThreadStatus};

/// "疲労" once: health 65 → Warning.
const WARNING_REPORT: &str = "進捗は概ね順調だが疲労が見える";
/// Risk and negative words stacked: health ≤ 50 → Critical.
const CRITICAL_REPORT: &str = "炎上している。疲労と限界で対人トラブルも発生";
/// Positive words only: Safe.
const SAFE_REPORT: &str = "挑戦と成長を感じる一週間だった";

async fn seeded(report: &str) -> Harness {
    let h = Harness::new().await;
    h.seed_user("U1", "Asada", "成長したい").await;
    h.seed_user("U2", "Baba", "").await;
    h.seed_project("P1", "Atlas", Some("U2")).await;
    h.seed_assignment("U1", "P1", 0.8).await;
    h.seed_assignment("U2", "P1", 0.2).await;
    h.seed_report("U1", "P1", "2026-07-27", report).await;
    h
}

#[tokio::test]
async fn warning_project_gets_one_email_action_and_tagged_thread() {
    let h = seeded(WARNING_REPORT).await;

    let queued = h.watchdog.enqueue(serde_json::json!({})).await.expect("enqueue");
    assert_eq!(queued.status, "queued");
    let outcome = h.watchdog.run_job(None).await.expect("run");
    assert_eq!(outcome.status, "succeeded");
    assert_eq!(outcome.job_id, queued.job_id);
    assert!(outcome.summary.contains("created 1 actions"));

    // Exactly one action, of mail kind for a Warning.
    let history = h
        .coordinator
        .fetch_history(&HistoryFilter::default())
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
    let thread = &history[0];
    assert_eq!(thread.status, Some(ThreadStatus::ApprovalPending));
    assert_eq!(thread.project_id.as_deref(), Some("P1"));
    assert_eq!(thread.severity.as_deref(), Some("Warning"));

    let metadata = h.metadata_value(&thread.thread_id).await;
    assert_eq!(metadata["mode"], "watchdog");
    assert_eq!(metadata["requested_by"], "watchdog");

    let action = h.action(thread.action_id).await;
    assert_eq!(action.action_type, ActionKind::EmailDraft);

    let audit = h.audit_types(&thread.thread_id).await;
    assert_eq!(
        audit
            .iter()
            .filter(|t| **t == "approval_requested")
            .count(),
        1
    );

    // Derived tables were populated.
    let (snapshots,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM project_health_snapshots WHERE project_id = 'P1'")
            .fetch_one(&h.pool)
            .await
            .expect("snapshots");
    assert_eq!(snapshots, 1);
    let (motivations,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM user_motivation_history")
            .fetch_one(&h.pool)
            .await
            .expect("motivations");
    assert_eq!(motivations, 2);
    let (alerts,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM watchdog_alerts")
        .fetch_one(&h.pool)
        .await
        .expect("alerts");
    assert_eq!(alerts, 1);
    let (proposals,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM ai_strategy_proposals WHERE project_id = 'P1'")
            .fetch_one(&h.pool)
            .await
            .expect("proposals");
    assert_eq!(proposals, 3);
}

#[tokio::test]
async fn second_run_does_not_duplicate_anything() {
    let h = seeded(WARNING_REPORT).await;
    h.watchdog.enqueue(serde_json::json!({})).await.expect("enqueue");
    h.watchdog.run_job(None).await.expect("first run");
    h.watchdog.enqueue(serde_json::json!({})).await.expect("enqueue again");
    h.watchdog.run_job(None).await.expect("second run");

    let history = h
        .coordinator
        .fetch_history(&HistoryFilter::default())
        .await
        .expect("history");
    assert_eq!(history.len(), 1, "open action suppresses a second one");

    let (snapshots,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM project_health_snapshots WHERE project_id = 'P1'")
            .fetch_one(&h.pool)
            .await
            .expect("snapshots");
    assert_eq!(snapshots, 1, "one snapshot per project per day");
}

#[tokio::test]
async fn critical_project_gets_calendar_action_with_payload_line() {
    let h = seeded(CRITICAL_REPORT).await;
    h.watchdog.enqueue(serde_json::json!({})).await.expect("enqueue");
    h.watchdog.run_job(None).await.expect("run");

    let history = h
        .coordinator
        .fetch_history(&HistoryFilter::default())
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].severity.as_deref(), Some("Critical"));

    let action = h.action(history[0].action_id).await;
    assert_eq!(action.action_type, ActionKind::CalendarBooking);
    let draft = action.draft_content.expect("draft");
    let last = draft.lines().last().expect("payload line");
    let payload: serde_json::Value = serde_json::from_str(last).expect("payload json");
    assert!(payload["title"].as_str().expect("title").contains("P1"));

    // Critical projects also place a tentative hold at request time.
    let metadata = h.metadata_value(&history[0].thread_id).await;
    assert_eq!(metadata["tentative_calendar"]["status"], "created");
}

#[tokio::test]
async fn safe_project_creates_no_action() {
    let h = seeded(SAFE_REPORT).await;
    h.watchdog.enqueue(serde_json::json!({})).await.expect("enqueue");
    let outcome = h.watchdog.run_job(None).await.expect("run");
    assert!(outcome.summary.contains("watchdog updated"));

    let history = h
        .coordinator
        .fetch_history(&HistoryFilter::default())
        .await
        .expect("history");
    assert!(history.is_empty());
    let (alerts,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM watchdog_alerts")
        .fetch_one(&h.pool)
        .await
        .expect("alerts");
    assert_eq!(alerts, 0);
}

#[tokio::test]
async fn running_without_queued_job_is_not_found() {
    let h = Harness::new().await;
    let err = h.watchdog.run_job(None).await.expect_err("empty queue");
    assert!(matches!(err, nemawashi::error::Error::NotFound(_)));
}

#[tokio::test]
async fn job_rows_record_terminal_status() {
    let h = seeded(WARNING_REPORT).await;
    let queued = h.watchdog.enqueue(serde_json::json!({})).await.expect("enqueue");
    h.watchdog.run_job(Some(queued.job_id)).await.expect("run");

    let (status, payload): (String, String) =
        sqlx::query_as("SELECT status, payload FROM watchdog_jobs WHERE job_id = ?1")
            .bind(queued.job_id)
            .fetch_one(&h.pool)
            .await
            .expect("job row");
    assert_eq!(status, "succeeded");
    let summary: serde_json::Value = serde_json::from_str(&payload).expect("payload json");
    assert!(summary["summary"].as_str().expect("summary").contains("created"));
}
