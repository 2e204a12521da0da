//! Steer: draft amendment, request supersession, and transition guards.

use crate::support::{Harness, EMAIL_DRAFT};
use nemawashi::error::Error;
use nemawashi::types::{ActionKind, ThreadStatus};

#[tokio::test]
async fn steer_amends_draft_and_mints_new_request() {
    let h = Harness::new().await;
    let action_id = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;
    let first = h
        .coordinator
        .request_approval(action_id, Some("u1"), None, None)
        .await
        .expect("request");

    let steered = h
        .coordinator
        .apply_steer(
            &first.approval_request_id,
            Some("u2"),
            "add CC",
            Some("B"),
            None,
        )
        .await
        .expect("steer");

    assert_ne!(steered.approval_request_id, first.approval_request_id);
    assert_eq!(steered.status, ThreadStatus::ApprovalPending);

    let action = h.action(action_id).await;
    let draft = action.draft_content.expect("draft");
    assert!(draft.ends_with("[Steer] add CC\n[Plan] B"), "draft was `{draft}`");

    let audit = h.audit_types(&steered.thread_id).await;
    assert_eq!(
        audit,
        vec![
            "approval_requested",
            "human_feedback_received",
            "approval_requested",
        ]
    );

    // The superseded request id no longer resolves; the new one approves.
    let job = h
        .coordinator
        .approve(&steered.approval_request_id, Some("u2"), None)
        .await
        .expect("approve after steer");
    assert_eq!(job.status, ThreadStatus::Executed);
}

#[tokio::test]
async fn duplicate_steer_by_key_applies_once() {
    let h = Harness::new().await;
    let action_id = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;
    let first = h
        .coordinator
        .request_approval(action_id, Some("u1"), None, None)
        .await
        .expect("request");

    let steered = h
        .coordinator
        .apply_steer(&first.approval_request_id, Some("u2"), "tighten", None, Some("S1"))
        .await
        .expect("steer");
    let replay = h
        .coordinator
        .apply_steer(&first.approval_request_id, Some("u2"), "tighten", None, Some("S1"))
        .await
        .expect("replayed steer");
    assert_eq!(replay.approval_request_id, steered.approval_request_id);

    let draft = h.action(action_id).await.draft_content.expect("draft");
    assert_eq!(draft.matches("[Steer] tighten").count(), 1);
}

#[tokio::test]
async fn superseded_request_cannot_be_approved() {
    let h = Harness::new().await;
    let action_id = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;
    let first = h
        .coordinator
        .request_approval(action_id, Some("u1"), None, None)
        .await
        .expect("request");
    h.coordinator
        .apply_steer(&first.approval_request_id, Some("u2"), "rework", None, None)
        .await
        .expect("steer");

    // A late click on the old prompt must not approve the new draft.
    let err = h
        .coordinator
        .approve(&first.approval_request_id, Some("u2"), None)
        .await
        .expect_err("superseded approve");
    assert!(matches!(err, Error::Conflict(_)), "got {err}");
    assert!(h.runs(action_id).await.is_empty());
}

#[tokio::test]
async fn steer_after_execution_is_a_conflict() {
    let h = Harness::new().await;
    let action_id = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;
    let approval = h
        .coordinator
        .request_approval(action_id, Some("u1"), None, None)
        .await
        .expect("request");
    h.coordinator
        .approve(&approval.approval_request_id, Some("u2"), None)
        .await
        .expect("approve");

    let err = h
        .coordinator
        .apply_steer(&approval.approval_request_id, Some("u2"), "too late", None, None)
        .await
        .expect_err("steer after execution");
    assert!(matches!(err, Error::Conflict(_)), "got {err}");
}

#[tokio::test]
async fn steer_unknown_request_is_not_found() {
    let h = Harness::new().await;
    let err = h
        .coordinator
        .apply_steer("apr-missing", Some("u2"), "feedback", None, None)
        .await
        .expect_err("unknown request");
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn steer_by_different_actor_records_both() {
    // The steering actor may differ from the original requester; the audit
    // trail carries both.
    let h = Harness::new().await;
    let action_id = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;
    let first = h
        .coordinator
        .request_approval(action_id, Some("u1"), None, None)
        .await
        .expect("request");
    h.coordinator
        .apply_steer(&first.approval_request_id, Some("u9"), "rewrite", None, None)
        .await
        .expect("steer by another actor");

    let events = h.audit(&first.thread_id).await;
    let feedback = events
        .iter()
        .find(|e| e.event_type.as_str() == "human_feedback_received")
        .expect("feedback event");
    assert_eq!(feedback.actor.as_deref(), Some("u9"));
    let requested = events
        .iter()
        .find(|e| e.event_type.as_str() == "approval_requested")
        .expect("request event");
    assert_eq!(requested.actor.as_deref(), Some("u1"));
}
