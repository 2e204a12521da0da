//! Duplicate-delivery collapse: idempotency keys and at-most-once execution.

use crate::support::{Harness, EMAIL_DRAFT};
use nemawashi::types::{ActionKind, ThreadStatus};

#[tokio::test]
async fn duplicate_approve_same_key_returns_same_job() {
    let h = Harness::new().await;
    let action_id = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;
    let approval = h
        .coordinator
        .request_approval(action_id, Some("u1"), None, None)
        .await
        .expect("request");

    let first = h
        .coordinator
        .approve(&approval.approval_request_id, Some("u2"), Some("K1"))
        .await
        .expect("first approve");
    let second = h
        .coordinator
        .approve(&approval.approval_request_id, Some("u2"), Some("K1"))
        .await
        .expect("second approve");

    assert_eq!(first.job_id, second.job_id);
    assert_eq!(h.runs(action_id).await.len(), 1, "exactly one run row");

    let audit = h.audit_types(&approval.thread_id).await;
    assert_eq!(
        audit.iter().filter(|t| **t == "approval_approved").count(),
        1,
        "one approval event despite the duplicate"
    );
    assert_eq!(
        audit.iter().filter(|t| **t == "execution_started").count(),
        1
    );
}

#[tokio::test]
async fn duplicate_approve_distinct_keys_still_executes_once() {
    let h = Harness::new().await;
    let action_id = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;
    let approval = h
        .coordinator
        .request_approval(action_id, Some("u1"), None, None)
        .await
        .expect("request");

    let first = h
        .coordinator
        .approve(&approval.approval_request_id, Some("u2"), Some("K1"))
        .await
        .expect("first approve");
    // A retry path with a different key observes the settled execution.
    let second = h
        .coordinator
        .approve(&approval.approval_request_id, Some("u3"), Some("K2"))
        .await
        .expect("second approve");

    assert_eq!(first.job_id, second.job_id);
    assert_eq!(second.status, ThreadStatus::Executed);
    assert_eq!(h.runs(action_id).await.len(), 1);
}

#[tokio::test]
async fn request_approval_key_replay_returns_cached_tuple() {
    let h = Harness::new().await;
    let action_id = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;

    let first = h
        .coordinator
        .request_approval(action_id, Some("u1"), Some("REQ-1"), None)
        .await
        .expect("first request");
    let second = h
        .coordinator
        .request_approval(action_id, Some("u1"), Some("REQ-1"), None)
        .await
        .expect("replay");
    assert_eq!(first.approval_request_id, second.approval_request_id);
    assert_eq!(h.audit(&first.thread_id).await.len(), 1);
}

#[tokio::test]
async fn literal_key_reuse_across_operations_stays_distinguishable() {
    // A key recorded by request_approval must not make a later approve with
    // the same literal key look like a replay: the approve has to transition
    // the thread and execute.
    let h = Harness::new().await;
    let action_id = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;
    let approval = h
        .coordinator
        .request_approval(action_id, Some("u1"), Some("K"), None)
        .await
        .expect("request with key K");

    let job = h
        .coordinator
        .approve(&approval.approval_request_id, Some("u2"), Some("K"))
        .await
        .expect("approve with the same literal key");
    assert_eq!(job.status, ThreadStatus::Executed);
    assert_eq!(h.runs(action_id).await.len(), 1, "execution really ran");
    assert_eq!(
        h.audit_types(&approval.thread_id).await,
        vec![
            "approval_requested",
            "approval_approved",
            "execution_started",
            "execution_succeeded",
        ]
    );
}

#[tokio::test]
async fn literal_key_reuse_on_steer_still_amends_draft() {
    let h = Harness::new().await;
    let action_id = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;
    let first = h
        .coordinator
        .request_approval(action_id, Some("u1"), Some("K"), None)
        .await
        .expect("request with key K");

    let steered = h
        .coordinator
        .apply_steer(&first.approval_request_id, Some("u2"), "add CC", None, Some("K"))
        .await
        .expect("steer with the same literal key");
    assert_ne!(steered.approval_request_id, first.approval_request_id);
    let draft = h.action(action_id).await.draft_content.expect("draft");
    assert!(draft.contains("[Steer] add CC"), "draft was `{draft}`");
}

#[tokio::test]
async fn duplicate_reject_by_key_is_noop() {
    let h = Harness::new().await;
    let action_id = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;
    let approval = h
        .coordinator
        .request_approval(action_id, Some("u1"), None, None)
        .await
        .expect("request");

    h.coordinator
        .reject(&approval.approval_request_id, Some("u2"), Some("R1"))
        .await
        .expect("reject");
    h.coordinator
        .reject(&approval.approval_request_id, Some("u2"), Some("R1"))
        .await
        .expect("replay");

    let audit = h.audit_types(&approval.thread_id).await;
    assert_eq!(
        audit.iter().filter(|t| **t == "approval_rejected").count(),
        1
    );
}

#[tokio::test]
async fn settled_execution_short_circuits_re_execution() {
    let h = Harness::new().await;
    let action_id = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;
    let approval = h
        .coordinator
        .request_approval(action_id, Some("u1"), None, None)
        .await
        .expect("request");
    let job = h
        .coordinator
        .approve(&approval.approval_request_id, Some("u2"), None)
        .await
        .expect("approve");

    let replay = h
        .coordinator
        .process_execution_job(action_id, false, None)
        .await
        .expect("replayed execution");
    assert_eq!(replay.job_id, job.job_id);
    assert_eq!(replay.status, ThreadStatus::Executed);
    assert_eq!(h.runs(action_id).await.len(), 1, "no second run");
}
