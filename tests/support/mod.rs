//! Shared fixtures: in-memory database, capturing chat transport, and a
//! fully wired component graph.
#![allow(dead_code)] // each test crate uses a different slice of the harness

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;

use nemawashi::chat::{ChatGateway, ChatTransport, PostedMessage};
use nemawashi::config::{ChatConfig, CredentialConfig, ExecutorConfig};
use nemawashi::coordinator::metadata::AuditEvent;
use nemawashi::coordinator::Coordinator;
use nemawashi::credentials::CredentialStore;
use nemawashi::db;
use nemawashi::db::runs::RunRow;
use nemawashi::demo::DemoDriver;
use nemawashi::error::Result;
use nemawashi::executor::ExternalActionExecutor;
use nemawashi::types::{ActionKind, ActionRow};
use nemawashi::watchdog::Watchdog;

/// Chat transport that records every outbound payload and answers with
/// deterministic timestamps, standing in for the real chat API.
#[derive(Default)]
pub struct CapturingTransport {
    posts: Mutex<Vec<Value>>,
    counter: AtomicU64,
}

impl CapturingTransport {
    /// All payloads posted so far.
    pub fn posts(&self) -> Vec<Value> {
        self.posts.lock().expect("posts lock").clone()
    }

    /// Text fields of all posted payloads.
    pub fn texts(&self) -> Vec<String> {
        self.posts()
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str).map(str::to_owned))
            .collect()
    }
}

#[async_trait]
impl ChatTransport for CapturingTransport {
    async fn post_message(&self, payload: &Value) -> Result<Option<PostedMessage>> {
        self.posts.lock().expect("posts lock").push(payload.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        let channel = payload
            .get("channel")
            .and_then(Value::as_str)
            .unwrap_or("C-TEST")
            .to_owned();
        Ok(Some(PostedMessage {
            channel,
            ts: format!("1700000000.{n:06}"),
        }))
    }
}

/// A wired component graph over an in-memory database.
pub struct Harness {
    pub pool: SqlitePool,
    pub transport: Arc<CapturingTransport>,
    pub coordinator: Arc<Coordinator>,
    pub executor: Arc<ExternalActionExecutor>,
    pub watchdog: Arc<Watchdog>,
    pub demo: Arc<DemoDriver>,
}

impl Harness {
    /// Harness with mock providers everywhere.
    pub async fn new() -> Self {
        Self::with_configs(ExecutorConfig::default(), ChatConfig::default()).await
    }

    /// Harness with a custom executor configuration (provider selection,
    /// defaults) and mock chat.
    pub async fn with_executor_config(executor_config: ExecutorConfig) -> Self {
        Self::with_configs(executor_config, ChatConfig::default()).await
    }

    /// Fully custom harness.
    pub async fn with_configs(executor_config: ExecutorConfig, chat_config: ChatConfig) -> Self {
        let pool = db::connect_in_memory().await.expect("in-memory database");
        let transport = Arc::new(CapturingTransport::default());
        let gateway = Arc::new(ChatGateway::new(
            transport.clone(),
            Some("C-TEST".to_owned()),
        ));
        let credentials = Arc::new(CredentialStore::new(
            CredentialConfig::default(),
            executor_config.default_owner_email.clone(),
        ));
        let executor = Arc::new(ExternalActionExecutor::new(
            executor_config.clone(),
            credentials,
        ));
        let coordinator = Arc::new(Coordinator::new(
            pool.clone(),
            gateway.clone(),
            executor.clone(),
        ));
        let watchdog = Arc::new(Watchdog::new(pool.clone(), coordinator.clone()));
        let demo = Arc::new(DemoDriver::new(
            pool.clone(),
            gateway.clone(),
            executor.clone(),
            &chat_config,
            executor_config,
        ));
        Self {
            pool,
            transport,
            coordinator,
            executor,
            watchdog,
            demo,
        }
    }

    /// Insert a drafted action and return its id.
    pub async fn insert_action(&self, kind: ActionKind, draft: &str) -> i64 {
        let mut conn = self.pool.acquire().await.expect("conn");
        nemawashi::db::actions::insert_action(&mut conn, kind, draft, None)
            .await
            .expect("insert action")
    }

    /// Load an action row.
    pub async fn action(&self, action_id: i64) -> ActionRow {
        let mut conn = self.pool.acquire().await.expect("conn");
        nemawashi::db::actions::load_action(&mut conn, action_id)
            .await
            .expect("load action")
            .expect("action exists")
    }

    /// Executor runs recorded for an action, oldest first.
    pub async fn runs(&self, action_id: i64) -> Vec<RunRow> {
        let mut conn = self.pool.acquire().await.expect("conn");
        nemawashi::db::runs::list_runs_for_action(&mut conn, action_id)
            .await
            .expect("list runs")
    }

    /// The audit trail of a thread.
    pub async fn audit(&self, thread_id: &str) -> Vec<AuditEvent> {
        self.coordinator
            .fetch_audit_logs(thread_id)
            .await
            .expect("audit logs")
    }

    /// Audit event types as strings, in order.
    pub async fn audit_types(&self, thread_id: &str) -> Vec<&'static str> {
        self.audit(thread_id)
            .await
            .iter()
            .map(|e| e.event_type.as_str())
            .collect()
    }

    /// Raw metadata JSON of a thread.
    pub async fn metadata_value(&self, thread_id: &str) -> Value {
        let mut conn = self.pool.acquire().await.expect("conn");
        let row = nemawashi::db::checkpoints::load(&mut conn, thread_id)
            .await
            .expect("load checkpoint")
            .expect("checkpoint exists");
        serde_json::from_str(&row.metadata.expect("metadata")).expect("metadata json")
    }

    // ── watchdog seed helpers ───────────────────────────────────

    pub async fn seed_user(&self, user_id: &str, name: &str, aspiration: &str) {
        sqlx::query(
            "INSERT INTO users (user_id, name, role, career_aspiration) VALUES (?1, ?2, 'member', ?3)",
        )
        .bind(user_id)
        .bind(name)
        .bind(aspiration)
        .execute(&self.pool)
        .await
        .expect("seed user");
    }

    pub async fn seed_project(&self, project_id: &str, name: &str, manager_id: Option<&str>) {
        sqlx::query("INSERT INTO projects (project_id, project_name, manager_id) VALUES (?1, ?2, ?3)")
            .bind(project_id)
            .bind(name)
            .bind(manager_id)
            .execute(&self.pool)
            .await
            .expect("seed project");
    }

    pub async fn seed_assignment(&self, user_id: &str, project_id: &str, rate: f64) {
        sqlx::query("INSERT INTO assignments (user_id, project_id, allocation_rate) VALUES (?1, ?2, ?3)")
            .bind(user_id)
            .bind(project_id)
            .bind(rate)
            .execute(&self.pool)
            .await
            .expect("seed assignment");
    }

    pub async fn seed_report(&self, user_id: &str, project_id: &str, date: &str, text: &str) {
        sqlx::query(
            "INSERT INTO weekly_reports (user_id, project_id, reporting_date, content_text) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(user_id)
        .bind(project_id)
        .bind(date)
        .bind(text)
        .execute(&self.pool)
        .await
        .expect("seed report");
    }
}

/// An email action draft whose final line is the executor payload.
pub const EMAIL_DRAFT: &str =
    "Please follow up with the client.\n{\"to\":\"x@y\",\"subject\":\"s\",\"body\":\"b\"}";

/// A calendar action draft with an embedded payload.
pub const CALENDAR_DRAFT: &str = "Book a sync meeting.\n{\"attendee\":\"p@q\",\"title\":\"Sync\",\"start_at\":\"2026-03-01T10:00:00\",\"end_at\":\"2026-03-01T11:00:00\",\"timezone\":\"Asia/Tokyo\"}";
