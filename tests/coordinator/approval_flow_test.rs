//! Happy path, rejection, executor failure, and tentative holds.

use crate::support::{Harness, CALENDAR_DRAFT, EMAIL_DRAFT};
use nemawashi::config::ExecutorConfig;
use nemawashi::error::Error;
use nemawashi::types::{ActionKind, ThreadStatus};

#[tokio::test]
async fn happy_path_email_executes_once() {
    let h = Harness::new().await;
    let action_id = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;

    let approval = h
        .coordinator
        .request_approval(action_id, Some("u1"), None, Some("follow up"))
        .await
        .expect("request approval");
    assert_eq!(approval.status, ThreadStatus::ApprovalPending);
    assert_eq!(approval.thread_id, format!("action-{action_id}"));
    assert!(approval.approval_request_id.starts_with("apr-"));
    assert!(approval.chat.is_some(), "prompt should carry a chat handle");

    let job = h
        .coordinator
        .approve(&approval.approval_request_id, Some("u2"), None)
        .await
        .expect("approve");
    assert_eq!(job.status, ThreadStatus::Executed);
    assert!(job.job_id.starts_with("job-"));

    let runs = h.runs(action_id).await;
    assert_eq!(runs.len(), 1, "exactly one executor run");
    assert_eq!(runs[0].provider, "mock");
    assert_eq!(runs[0].action_type, "email_draft");
    assert_eq!(runs[0].status, "succeeded");
    assert_eq!(runs[0].job_id, job.job_id);

    assert_eq!(
        h.audit_types(&approval.thread_id).await,
        vec![
            "approval_requested",
            "approval_approved",
            "execution_started",
            "execution_succeeded",
        ]
    );

    let action = h.action(action_id).await;
    assert_eq!(action.status, ThreadStatus::Executed);
    assert!(action.is_approved);

    // The prompt and the completion notification were both posted.
    let texts = h.transport.texts();
    assert!(texts.iter().any(|t| t.contains("follow up")));
    assert!(texts
        .iter()
        .any(|t| t.contains(&format!("Execution completed. job_id={}", job.job_id))));
}

#[tokio::test]
async fn request_approval_unknown_action_is_not_found() {
    let h = Harness::new().await;
    let err = h
        .coordinator
        .request_approval(999, Some("u1"), None, None)
        .await
        .expect_err("missing action");
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn pending_thread_returns_same_request_without_reposting() {
    let h = Harness::new().await;
    let action_id = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;

    let first = h
        .coordinator
        .request_approval(action_id, Some("u1"), None, None)
        .await
        .expect("first request");
    let posts_after_first = h.transport.posts().len();

    let second = h
        .coordinator
        .request_approval(action_id, Some("u1"), None, None)
        .await
        .expect("second request");
    assert_eq!(second.approval_request_id, first.approval_request_id);
    assert_eq!(h.transport.posts().len(), posts_after_first, "no re-post");
    assert_eq!(h.audit(&first.thread_id).await.len(), 1, "single audit event");
}

#[tokio::test]
async fn rejection_records_no_runs() {
    let h = Harness::new().await;
    let action_id = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;
    let approval = h
        .coordinator
        .request_approval(action_id, Some("u1"), None, None)
        .await
        .expect("request");

    h.coordinator
        .reject(&approval.approval_request_id, Some("u2"), None)
        .await
        .expect("reject");

    let action = h.action(action_id).await;
    assert_eq!(action.status, ThreadStatus::Rejected);
    assert!(!action.is_approved);
    assert!(h.runs(action_id).await.is_empty());
    assert_eq!(
        h.audit_types(&approval.thread_id).await,
        vec!["approval_requested", "approval_rejected"]
    );

    // A duplicate rejection collapses onto the recorded outcome.
    h.coordinator
        .reject(&approval.approval_request_id, Some("u2"), None)
        .await
        .expect("duplicate reject");
    assert_eq!(h.audit(&approval.thread_id).await.len(), 2);
}

#[tokio::test]
async fn provider_failure_marks_thread_failed() {
    // A non-mock calendar backend with no stored credential fails inside the
    // executor; the coordinator records the failure and notifies the thread.
    let config = ExecutorConfig {
        calendar_provider: "google".to_owned(),
        ..ExecutorConfig::default()
    };
    let h = Harness::with_executor_config(config).await;
    let action_id = h
        .insert_action(ActionKind::CalendarBooking, CALENDAR_DRAFT)
        .await;

    let approval = h
        .coordinator
        .request_approval(action_id, Some("u1"), None, None)
        .await
        .expect("request");
    let job = h
        .coordinator
        .approve(&approval.approval_request_id, Some("u2"), None)
        .await
        .expect("approve absorbs provider failure");
    assert_eq!(job.status, ThreadStatus::Failed);

    let runs = h.runs(action_id).await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, "failed");
    assert!(runs[0].error.as_deref().map(|e| !e.is_empty()).unwrap_or(false));

    let audit = h.audit_types(&approval.thread_id).await;
    assert_eq!(audit.last().copied(), Some("execution_failed"));
    assert_eq!(h.action(action_id).await.status, ThreadStatus::Failed);

    let texts = h.transport.texts();
    assert!(texts
        .iter()
        .any(|t| t.contains(&format!("Execution failed. job_id={}", job.job_id))));
}

#[tokio::test]
async fn calendar_request_places_tentative_hold() {
    let h = Harness::new().await;
    let action_id = h
        .insert_action(ActionKind::CalendarBooking, CALENDAR_DRAFT)
        .await;

    let approval = h
        .coordinator
        .request_approval(action_id, Some("u1"), None, None)
        .await
        .expect("request");

    let metadata = h.metadata_value(&approval.thread_id).await;
    let hold = &metadata["tentative_calendar"];
    assert_eq!(hold["status"], "created");
    assert!(hold["event_id"].as_str().expect("event id").starts_with("cal-"));
    assert!(hold["title"].as_str().expect("title").starts_with("Tentative:"));
    assert!(hold["start_at"].as_str().expect("start").ends_with("T18:00:00"));
}

#[tokio::test]
async fn failed_hold_does_not_block_approval_request() {
    let config = ExecutorConfig {
        calendar_provider: "google".to_owned(),
        ..ExecutorConfig::default()
    };
    let h = Harness::with_executor_config(config).await;
    let action_id = h
        .insert_action(ActionKind::CalendarBooking, CALENDAR_DRAFT)
        .await;

    let approval = h
        .coordinator
        .request_approval(action_id, Some("u1"), None, None)
        .await
        .expect("request proceeds despite hold failure");
    assert_eq!(approval.status, ThreadStatus::ApprovalPending);

    let metadata = h.metadata_value(&approval.thread_id).await;
    assert_eq!(metadata["tentative_calendar"]["status"], "failed");
    assert!(metadata["tentative_calendar"]["error"]
        .as_str()
        .expect("error")
        .contains("credential"));
}

#[tokio::test]
async fn direct_execution_without_approval_works() {
    // The execute endpoint can re-drive an action directly.
    let h = Harness::new().await;
    let action_id = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;

    let job = h
        .coordinator
        .process_execution_job(action_id, false, None)
        .await
        .expect("direct execution");
    assert_eq!(job.status, ThreadStatus::Executed);
    assert_eq!(h.runs(action_id).await.len(), 1);
}

#[tokio::test]
async fn simulated_failure_skips_provider() {
    let h = Harness::new().await;
    let action_id = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;

    let job = h
        .coordinator
        .process_execution_job(action_id, true, None)
        .await
        .expect("simulated failure");
    assert_eq!(job.status, ThreadStatus::Failed);
    assert!(h.runs(action_id).await.is_empty(), "provider never invoked");
}
