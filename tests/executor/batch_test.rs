//! Fan-out execution of payloads carrying an `actions` list.

use crate::support::Harness;
use nemawashi::error::Error;
use nemawashi::types::ActionKind;

#[tokio::test]
async fn batch_runs_each_sub_action_under_one_job() {
    let h = Harness::new().await;
    let draft = concat!(
        "Bundle of follow-ups.\n",
        r#"{"actions":[{"type":"email_draft","payload":{"to":"a@b","subject":"s1","body":"b1"}},{"type":"hr_request","payload":{"employee_id":"E1","summary":"s"}},{"type":"bogus","payload":{}}]}"#,
    );
    let action_id = h.insert_action(ActionKind::EmailDraft, draft).await;

    let mut c = h.pool.acquire().await.expect("conn");
    let runs = h
        .executor
        .execute(&mut c, "job-batch", action_id, None)
        .await
        .expect("batch execute");
    drop(c);

    // The unknown sub-action type is skipped, not failed.
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.job_id == "job-batch"));
    assert!(runs.iter().all(|r| r.status == "succeeded"));
    let kinds: Vec<&str> = runs.iter().map(|r| r.action_type.as_str()).collect();
    assert_eq!(kinds, vec!["email_draft", "hr_request"]);

    assert_eq!(h.runs(action_id).await.len(), 2);
}

#[tokio::test]
async fn batch_fails_whole_call_when_any_sub_action_fails() {
    // Calendar routed at a non-mock backend without credentials fails; the
    // email sub-action still runs and is recorded.
    let config = nemawashi::config::ExecutorConfig {
        calendar_provider: "google".to_owned(),
        ..nemawashi::config::ExecutorConfig::default()
    };
    let h = Harness::with_executor_config(config).await;
    let draft = concat!(
        "Mixed bundle.\n",
        r#"{"actions":[{"type":"email_draft","payload":{"to":"a@b","subject":"s","body":"b"}},{"type":"calendar_booking","payload":{"attendee":"p@q","title":"T","start_at":"2026-03-01T10:00:00","end_at":"2026-03-01T11:00:00"}}]}"#,
    );
    let action_id = h.insert_action(ActionKind::EmailDraft, draft).await;

    let mut c = h.pool.acquire().await.expect("conn");
    let err = h
        .executor
        .execute(&mut c, "job-batch", action_id, None)
        .await
        .expect_err("batch with a failing sub-action");
    drop(c);
    assert!(matches!(err, Error::Integration { .. }), "got {err}");

    let runs = h.runs(action_id).await;
    assert_eq!(runs.len(), 2, "every attempt recorded individually");
    let succeeded = runs.iter().filter(|r| r.status == "succeeded").count();
    let failed = runs.iter().filter(|r| r.status == "failed").count();
    assert_eq!((succeeded, failed), (1, 1));
}

#[tokio::test]
async fn sub_action_spelling_action_type_is_accepted() {
    let h = Harness::new().await;
    let draft = concat!(
        "Alt spelling.\n",
        r#"{"actions":[{"action_type":"hr_request","payload":{"summary":"x"}}]}"#,
    );
    let action_id = h.insert_action(ActionKind::EmailDraft, draft).await;

    let mut c = h.pool.acquire().await.expect("conn");
    let runs = h
        .executor
        .execute(&mut c, "job-batch", action_id, None)
        .await
        .expect("batch execute");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].action_type, "hr_request");
}
