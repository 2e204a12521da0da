//! The compressed demo machine: alert → plan → approve → booking.

use crate::support::Harness;
use nemawashi::config::{ChatConfig, ExecutorConfig};
use nemawashi::demo::DemoStatus;

#[tokio::test]
async fn full_flow_books_calendar_once() {
    let h = Harness::new().await;

    let started = h.demo.start("U-owner", Some("Owner")).await.expect("start");
    assert_eq!(started.status, DemoStatus::Alerted);
    assert!(started.alert_id.starts_with("alert-"));
    assert!(started.chat.is_some());

    h.demo
        .select_plan(&started.alert_id, Some("U-approver"), "b", Some("K-plan"))
        .await
        .expect("select plan");
    let metadata = h.demo.load(&started.alert_id).await.expect("load").expect("exists");
    assert_eq!(metadata.status, Some(DemoStatus::ApprovalPending));
    assert_eq!(metadata.plan.as_deref(), Some("B"));

    h.demo
        .approve(&started.alert_id, Some("U-approver"), Some("K-approve"))
        .await
        .expect("approve");
    let metadata = h.demo.load(&started.alert_id).await.expect("load").expect("exists");
    assert_eq!(metadata.status, Some(DemoStatus::CalendarCreated));
    let calendar = metadata.calendar.expect("calendar");
    assert!(calendar.event_id.expect("event id").starts_with("cal-"));

    // The success notification reaches the thread.
    let texts = h.transport.texts();
    assert!(texts.iter().any(|t| t.contains("Approve完了")));

    // A duplicate approve with a fresh key observes the booked event.
    h.demo
        .approve(&started.alert_id, Some("U-approver"), Some("K-approve-2"))
        .await
        .expect("duplicate approve");
    let texts = h.transport.texts();
    assert!(texts.iter().any(|t| t.contains("すでにカレンダー登録済みです。")));
    let metadata = h.demo.load(&started.alert_id).await.expect("load").expect("exists");
    assert_eq!(metadata.status, Some(DemoStatus::CalendarCreated));
}

#[tokio::test]
async fn intervention_also_reaches_approval_pending() {
    let h = Harness::new().await;
    let started = h.demo.start("U-owner", None).await.expect("start");

    h.demo
        .intervene(&started.alert_id, Some("U2"), "予定を金曜に", None)
        .await
        .expect("intervene");
    let metadata = h.demo.load(&started.alert_id).await.expect("load").expect("exists");
    assert_eq!(metadata.status, Some(DemoStatus::ApprovalPending));
    assert_eq!(metadata.intervention.as_deref(), Some("予定を金曜に"));

    // The draft prompt carries the intervention.
    let texts = h.transport.texts();
    assert!(texts.iter().any(|t| t.contains("実行ドラフト")));
}

#[tokio::test]
async fn reject_is_terminal_and_blocks_later_plans() {
    let h = Harness::new().await;
    let started = h.demo.start("U-owner", None).await.expect("start");

    h.demo
        .reject(&started.alert_id, Some("U2"), None)
        .await
        .expect("reject");
    let metadata = h.demo.load(&started.alert_id).await.expect("load").expect("exists");
    assert_eq!(metadata.status, Some(DemoStatus::Rejected));

    h.demo
        .select_plan(&started.alert_id, Some("U2"), "A", None)
        .await
        .expect("plan after reject is absorbed");
    let metadata = h.demo.load(&started.alert_id).await.expect("load").expect("exists");
    assert_eq!(metadata.status, Some(DemoStatus::Rejected), "state unchanged");
    let texts = h.transport.texts();
    assert!(texts.iter().any(|t| t.contains("すでに終了しています")));
}

#[tokio::test]
async fn reject_after_approval_is_absorbed() {
    let h = Harness::new().await;
    let started = h.demo.start("U-owner", None).await.expect("start");
    h.demo
        .select_plan(&started.alert_id, None, "A", None)
        .await
        .expect("plan");
    h.demo
        .approve(&started.alert_id, Some("U2"), None)
        .await
        .expect("approve");

    h.demo
        .reject(&started.alert_id, Some("U2"), None)
        .await
        .expect("reject after approve is absorbed");
    let metadata = h.demo.load(&started.alert_id).await.expect("load").expect("exists");
    assert_eq!(metadata.status, Some(DemoStatus::CalendarCreated));
    let texts = h.transport.texts();
    assert!(texts.iter().any(|t| t.contains("すでにApprove済みです。")));
}

#[tokio::test]
async fn approver_allow_list_gates_approval() {
    let chat_config = ChatConfig {
        approver_user_ids: vec!["U-allowed".to_owned()],
        ..ChatConfig::default()
    };
    let h = Harness::with_configs(ExecutorConfig::default(), chat_config).await;
    let started = h.demo.start("U-owner", None).await.expect("start");
    h.demo
        .select_plan(&started.alert_id, None, "A", None)
        .await
        .expect("plan");

    h.demo
        .approve(&started.alert_id, Some("U-stranger"), None)
        .await
        .expect("unauthorized approve is absorbed");
    let metadata = h.demo.load(&started.alert_id).await.expect("load").expect("exists");
    assert_eq!(metadata.status, Some(DemoStatus::ApprovalPending));
    let texts = h.transport.texts();
    assert!(texts.iter().any(|t| t.contains("Approve権限がありません。")));

    h.demo
        .approve(&started.alert_id, Some("U-allowed"), None)
        .await
        .expect("authorized approve");
    let metadata = h.demo.load(&started.alert_id).await.expect("load").expect("exists");
    assert_eq!(metadata.status, Some(DemoStatus::CalendarCreated));
}

#[tokio::test]
async fn literal_key_reuse_across_demo_operations_stays_distinguishable() {
    // The key used for the plan click must not swallow an approve carrying
    // the same literal key.
    let h = Harness::new().await;
    let started = h.demo.start("U-owner", None).await.expect("start");

    h.demo
        .select_plan(&started.alert_id, None, "A", Some("K"))
        .await
        .expect("plan with key K");
    h.demo
        .approve(&started.alert_id, Some("U2"), Some("K"))
        .await
        .expect("approve with the same literal key");
    let metadata = h.demo.load(&started.alert_id).await.expect("load").expect("exists");
    assert_eq!(metadata.status, Some(DemoStatus::CalendarCreated));
}

#[tokio::test]
async fn duplicate_delivery_by_key_is_noop() {
    let h = Harness::new().await;
    let started = h.demo.start("U-owner", None).await.expect("start");

    h.demo
        .select_plan(&started.alert_id, None, "A", Some("K1"))
        .await
        .expect("plan");
    let prompts_after_first = h.transport.posts().len();
    h.demo
        .select_plan(&started.alert_id, None, "A", Some("K1"))
        .await
        .expect("replay");
    assert_eq!(
        h.transport.posts().len(),
        prompts_after_first,
        "no second draft prompt"
    );
}
