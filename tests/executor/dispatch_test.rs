//! Single-payload dispatch per provider, with run recording.

use crate::support::{Harness, CALENDAR_DRAFT, EMAIL_DRAFT};
use nemawashi::error::Error;
use nemawashi::types::{ActionKind, ThreadStatus};
use serde_json::Value;

async fn conn(h: &Harness) -> sqlx::pool::PoolConnection<sqlx::Sqlite> {
    h.pool.acquire().await.expect("conn")
}

#[tokio::test]
async fn email_dispatch_records_succeeded_run() {
    let h = Harness::new().await;
    let action_id = h.insert_action(ActionKind::EmailDraft, EMAIL_DRAFT).await;

    let mut c = conn(&h).await;
    let runs = h
        .executor
        .execute(&mut c, "job-test", action_id, None)
        .await
        .expect("execute");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, "succeeded");
    assert_eq!(runs[0].provider, "mock");

    let response: Value =
        serde_json::from_str(runs[0].response.as_deref().expect("response")).expect("json");
    assert!(response["message_id"]
        .as_str()
        .expect("message id")
        .starts_with("mail-"));
    assert_eq!(response["to"], "x@y");
    assert_eq!(response["subject"], "s");

    // Recorded once in the append-only table too.
    drop(c);
    assert_eq!(h.runs(action_id).await.len(), 1);
}

#[tokio::test]
async fn calendar_dispatch_mock_synthesizes_event() {
    let h = Harness::new().await;
    let action_id = h
        .insert_action(ActionKind::CalendarBooking, CALENDAR_DRAFT)
        .await;

    let mut c = conn(&h).await;
    let runs = h
        .executor
        .execute(&mut c, "job-test", action_id, None)
        .await
        .expect("execute");
    let response: Value =
        serde_json::from_str(runs[0].response.as_deref().expect("response")).expect("json");
    assert!(response["event_id"]
        .as_str()
        .expect("event id")
        .starts_with("cal-"));
    assert_eq!(response["attendee"], "p@q");
    assert_eq!(response["timezone"], "Asia/Tokyo");
}

#[tokio::test]
async fn hr_dispatch_mock_synthesizes_request_id() {
    let h = Harness::new().await;
    let draft = "File the transfer.\n{\"employee_id\":\"E1\",\"request_type\":\"transfer\",\"summary\":\"move\"}";
    let action_id = h.insert_action(ActionKind::HrRequest, draft).await;

    let mut c = conn(&h).await;
    let runs = h
        .executor
        .execute(&mut c, "job-test", action_id, None)
        .await
        .expect("execute");
    let response: Value =
        serde_json::from_str(runs[0].response.as_deref().expect("response")).expect("json");
    assert!(response["request_id"]
        .as_str()
        .expect("request id")
        .starts_with("hr-"));

    // The snapshot keeps the recognized HR fields.
    let payload: Value =
        serde_json::from_str(runs[0].payload.as_deref().expect("payload")).expect("json");
    assert_eq!(payload["employee_id"], "E1");
    assert_eq!(payload["request_type"], "transfer");
    assert_eq!(payload["summary"], "move");
}

#[tokio::test]
async fn missing_action_is_not_found() {
    let h = Harness::new().await;
    let mut c = conn(&h).await;
    let err = h
        .executor
        .execute(&mut c, "job-test", 12345, None)
        .await
        .expect_err("missing action");
    assert!(matches!(err, Error::NotFound(_)));
    drop(c);
    // The action row is untouched because there is none; nothing recorded.
    assert!(h.runs(12345).await.is_empty());
}

#[tokio::test]
async fn payload_override_wins_over_draft() {
    let h = Harness::new().await;
    let action_id = h
        .insert_action(ActionKind::CalendarBooking, CALENDAR_DRAFT)
        .await;

    let mut map = serde_json::Map::new();
    map.insert("title".to_owned(), Value::String("Override".to_owned()));
    map.insert("attendee".to_owned(), Value::String("o@v".to_owned()));
    map.insert(
        "start_at".to_owned(),
        Value::String("2026-04-01T09:00:00".to_owned()),
    );
    map.insert(
        "end_at".to_owned(),
        Value::String("2026-04-01T10:00:00".to_owned()),
    );

    let mut c = conn(&h).await;
    let runs = h
        .executor
        .execute(&mut c, "job-test", action_id, Some(map))
        .await
        .expect("execute");
    let payload: Value =
        serde_json::from_str(runs[0].payload.as_deref().expect("payload")).expect("json");
    assert_eq!(payload["title"], "Override");
    assert_eq!(payload["attendee"], "o@v");
}

#[tokio::test]
async fn failed_run_is_recorded_before_error() {
    let config = nemawashi::config::ExecutorConfig {
        calendar_provider: "google".to_owned(),
        ..nemawashi::config::ExecutorConfig::default()
    };
    let h = Harness::with_executor_config(config).await;
    let action_id = h
        .insert_action(ActionKind::CalendarBooking, CALENDAR_DRAFT)
        .await;

    let mut c = conn(&h).await;
    let err = h
        .executor
        .execute(&mut c, "job-test", action_id, None)
        .await
        .expect_err("no credentials");
    drop(c);
    assert!(matches!(err, Error::Integration { .. }), "got {err}");

    let runs = h.runs(action_id).await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, "failed");
    assert_eq!(runs[0].provider, "google");

    // The action row itself stays put; only the coordinator moves it.
    assert_eq!(h.action(action_id).await.status, ThreadStatus::Drafted);
}
