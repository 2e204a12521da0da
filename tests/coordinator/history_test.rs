//! Operator read surfaces: audit logs and thread history.

use crate::support::{Harness, EMAIL_DRAFT};
use nemawashi::coordinator::HistoryFilter;
use nemawashi::error::Error;
use nemawashi::types::{ActionKind, ThreadStatus};

#[tokio::test]
async fn audit_logs_for_unknown_thread_are_not_found() {
    let h = Harness::new().await;
    let err = h
        .coordinator
        .fetch_audit_logs("action-404")
        .await
        .expect_err("missing thread");
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn history_lists_threads_most_recent_first() {
    let h = Harness::new().await;
    let first = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;
    let second = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;

    let a = h
        .coordinator
        .request_approval(first, Some("u1"), None, None)
        .await
        .expect("request a");
    let b = h
        .coordinator
        .request_approval(second, Some("u1"), None, None)
        .await
        .expect("request b");
    // Advance thread A so its audit timestamp is the most recent.
    h.coordinator
        .approve(&a.approval_request_id, Some("u2"), None)
        .await
        .expect("approve a");

    let history = h
        .coordinator
        .fetch_history(&HistoryFilter::default())
        .await
        .expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].thread_id, a.thread_id);
    assert_eq!(history[1].thread_id, b.thread_id);
    assert!(!history[0].events.is_empty());
    assert!(history[0].summary.starts_with("Please follow up"));
}

#[tokio::test]
async fn history_filters_by_status_and_project() {
    let h = Harness::new().await;
    let tagged = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;
    let other = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;

    let a = h
        .coordinator
        .request_approval(tagged, Some("watchdog"), None, None)
        .await
        .expect("request tagged");
    h.coordinator
        .tag_thread(&a.thread_id, "watchdog", "P1", "Warning")
        .await
        .expect("tag");
    let b = h
        .coordinator
        .request_approval(other, Some("u1"), None, None)
        .await
        .expect("request other");
    h.coordinator
        .reject(&b.approval_request_id, Some("u2"), None)
        .await
        .expect("reject other");

    let by_project = h
        .coordinator
        .fetch_history(&HistoryFilter {
            project_id: Some("P1".to_owned()),
            ..HistoryFilter::default()
        })
        .await
        .expect("filter by project");
    assert_eq!(by_project.len(), 1);
    assert_eq!(by_project[0].project_id.as_deref(), Some("P1"));
    assert_eq!(by_project[0].severity.as_deref(), Some("Warning"));

    let rejected = h
        .coordinator
        .fetch_history(&HistoryFilter {
            status: Some(ThreadStatus::Rejected),
            ..HistoryFilter::default()
        })
        .await
        .expect("filter by status");
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].thread_id, b.thread_id);
}

#[tokio::test]
async fn history_respects_limit() {
    let h = Harness::new().await;
    for _ in 0..3 {
        let id = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;
        h.coordinator
            .request_approval(id, Some("u1"), None, None)
            .await
            .expect("request");
    }
    let limited = h
        .coordinator
        .fetch_history(&HistoryFilter {
            limit: 2,
            ..HistoryFilter::default()
        })
        .await
        .expect("limited history");
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn demo_threads_are_excluded_from_history() {
    let h = Harness::new().await;
    h.demo.start("U-owner", None).await.expect("start demo");
    let id = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;
    h.coordinator
        .request_approval(id, Some("u1"), None, None)
        .await
        .expect("request");

    let history = h
        .coordinator
        .fetch_history(&HistoryFilter::default())
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
    assert!(history[0].thread_id.starts_with("action-"));
}
