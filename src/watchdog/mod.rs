//! Watchdog: periodic project-health analysis that mints proposed actions.
//!
//! Each run scores member motivation and project health from the latest
//! weekly reports, persists daily snapshots, keeps the derived analysis and
//! strategy-proposal tables fresh, and — for projects whose risk is not
//! `Safe` and that have no open action — composes a draft, inserts an action
//! row, and hands it to the coordinator for approval. The job row itself
//! moves `queued → running → succeeded|failed`, and signal ingestion never
//! blocks on planner output: the deterministic plan table is the fallback.

pub mod scoring;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{info, instrument, warn};

use crate::coordinator::Coordinator;
use crate::db::watchdog as store;
use crate::db::{actions, watchdog::ProposalRow};
use crate::error::{Error, Result};
use crate::types::{ActionKind, RiskLevel};

/// Per-project alert raised by a run.
#[derive(Debug, Clone, Serialize)]
pub struct AlertInfo {
    /// Project at risk.
    pub project_id: String,
    /// Classified risk level.
    pub risk_level: RiskLevel,
    /// The health score behind the classification.
    pub health_score: f64,
}

/// Outcome of one watchdog cycle.
#[derive(Debug, Clone, Serialize)]
pub struct WatchdogSummary {
    /// Human-readable run summary.
    pub summary: String,
    /// Actions created this run.
    pub actions_created: usize,
    /// Alerts raised this run.
    pub alerts: Vec<AlertInfo>,
}

/// Outcome of a job-queue invocation.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    /// Job row id.
    pub job_id: i64,
    /// Final job status.
    pub status: String,
    /// Run summary (empty for enqueue).
    pub summary: String,
}

#[derive(Debug, Clone)]
struct ProjectHealth {
    health_score: f64,
    risk_level: RiskLevel,
}

/// The periodic analyzer.
pub struct Watchdog {
    pool: SqlitePool,
    coordinator: Arc<Coordinator>,
}

impl Watchdog {
    /// Wire a watchdog over the store and coordinator.
    pub fn new(pool: SqlitePool, coordinator: Arc<Coordinator>) -> Self {
        Self { pool, coordinator }
    }

    /// Queue a job for a later `run_job` call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on insert failure.
    pub async fn enqueue(&self, payload: serde_json::Value) -> Result<JobOutcome> {
        let mut conn = self.pool.acquire().await?;
        let job_id = store::enqueue_job(&mut conn, &payload.to_string()).await?;
        Ok(JobOutcome {
            job_id,
            status: "queued".to_owned(),
            summary: String::new(),
        })
    }

    /// Run a queued job (or the oldest queued one when no id is given).
    ///
    /// The job row is moved to `running` first; the cycle outcome lands in
    /// the row as a JSON payload together with the terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no job is queued; cycle failures are
    /// recorded on the job row and propagated.
    #[instrument(skip(self))]
    pub async fn run_job(&self, job_id: Option<i64>) -> Result<JobOutcome> {
        let mut conn = self.pool.acquire().await?;
        let job_id = match job_id {
            Some(id) => id,
            None => store::next_queued_job(&mut conn)
                .await?
                .ok_or_else(|| Error::NotFound("no queued watchdog job".to_owned()))?,
        };
        store::update_job(&mut conn, job_id, "running", "{}").await?;
        drop(conn);

        match self.run_cycle().await {
            Ok(summary) => {
                let mut conn = self.pool.acquire().await?;
                let payload = serde_json::to_string(&summary)?;
                store::update_job(&mut conn, job_id, "succeeded", &payload).await?;
                for alert in &summary.alerts {
                    let message = format!(
                        "{} risk {} score {}",
                        alert.project_id, alert.risk_level, alert.health_score
                    );
                    store::insert_alert(&mut conn, job_id, alert.risk_level, &message).await?;
                }
                info!(job_id, summary = %summary.summary, "watchdog job succeeded");
                Ok(JobOutcome {
                    job_id,
                    status: "succeeded".to_owned(),
                    summary: summary.summary,
                })
            }
            Err(e) => {
                let mut conn = self.pool.acquire().await?;
                let payload = json!({ "error": e.to_string() }).to_string();
                store::update_job(&mut conn, job_id, "failed", &payload).await?;
                warn!(job_id, error = %e, "watchdog job failed");
                Err(e)
            }
        }
    }

    /// One full analysis cycle over the current signal tables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failures; approval requests that
    /// fail abort the cycle.
    pub async fn run_cycle(&self) -> Result<WatchdogSummary> {
        let mut conn = self.pool.acquire().await?;

        let users = store::fetch_users(&mut conn).await?;
        let projects = store::fetch_projects(&mut conn).await?;
        let assignments = store::fetch_assignments(&mut conn).await?;
        let reports = store::fetch_reports(&mut conn).await?;

        // Reports arrive newest-first; the first row per user is the latest.
        let mut report_by_user: HashMap<String, String> = HashMap::new();
        let mut report_by_project: HashMap<String, Vec<String>> = HashMap::new();
        for report in &reports {
            let content = report.content_text.clone().unwrap_or_default();
            report_by_user
                .entry(report.user_id.clone())
                .or_insert_with(|| content.clone());
            report_by_project
                .entry(report.project_id.clone())
                .or_default()
                .push(content);
        }

        let today = Utc::now().format("%Y-%m-%d").to_string();

        // Motivation history, one row per user per day.
        let mut motivation_map: HashMap<String, f64> = HashMap::new();
        for user in &users {
            let fallback = user.career_aspiration.clone().unwrap_or_default();
            let notes = report_by_user
                .get(&user.user_id)
                .cloned()
                .unwrap_or(fallback);
            let (motivation, sentiment) = scoring::score_motivation(&notes);
            motivation_map.insert(user.user_id.clone(), motivation);
            if store::motivation_exists(&mut conn, &user.user_id, &today).await? {
                continue;
            }
            store::insert_motivation(
                &mut conn,
                &user.user_id,
                motivation,
                sentiment,
                scoring::summarize_motivation(&notes),
                &today,
            )
            .await?;
        }

        // Health snapshots and alerts.
        let mut project_health: HashMap<String, ProjectHealth> = HashMap::new();
        let mut alerts = Vec::new();
        for project in &projects {
            let joined = report_by_project
                .get(&project.project_id)
                .map(|notes| notes.join(" "))
                .unwrap_or_default();
            let (health_score, risk_level) = scoring::score_project_health(&joined);

            let member_values: Vec<f64> = assignments
                .iter()
                .filter(|a| a.project_id == project.project_id)
                .filter_map(|a| motivation_map.get(&a.user_id).copied())
                .collect();
            let variance = scoring::variance_score(&member_values);
            let manager_motivation = project
                .manager_id
                .as_deref()
                .and_then(|id| motivation_map.get(id).copied());
            let manager_gap = scoring::manager_gap_score(manager_motivation, &member_values);

            project_health.insert(
                project.project_id.clone(),
                ProjectHealth {
                    health_score,
                    risk_level,
                },
            );
            if risk_level != RiskLevel::Safe {
                alerts.push(AlertInfo {
                    project_id: project.project_id.clone(),
                    risk_level,
                    health_score,
                });
            }

            if store::snapshot_exists(&mut conn, &project.project_id, &today).await? {
                continue;
            }
            store::insert_snapshot(
                &mut conn,
                &project.project_id,
                health_score,
                risk_level,
                variance,
                manager_gap,
                &Utc::now().to_rfc3339(),
            )
            .await?;
        }

        // Pattern vocabulary and per-assignment analyses.
        for (pattern_id, name_ja, description) in scoring::pattern_definitions() {
            store::ensure_pattern(&mut conn, pattern_id, name_ja, description).await?;
        }
        for assignment in &assignments {
            if store::analysis_exists(&mut conn, &assignment.user_id, &assignment.project_id)
                .await?
            {
                continue;
            }
            let notes = report_by_user
                .get(&assignment.user_id)
                .cloned()
                .unwrap_or_default();
            let pattern_id = scoring::determine_pattern(&notes);
            let debate_log = json!({
                "PM": format!("allocation_rate={}", assignment.allocation_rate.unwrap_or(0.0)),
                "HR": scoring::summarize_motivation(&notes),
                "Risk": format!("flags={}", scoring::count_hits(&notes, &scoring::RISK_WORDS)),
            })
            .to_string();
            store::insert_analysis(
                &mut conn,
                &assignment.user_id,
                &assignment.project_id,
                pattern_id,
                &debate_log,
                scoring::decision_from_pattern(pattern_id),
            )
            .await?;
        }

        // Default strategy proposals with a single recommendation.
        for project in &projects {
            let existing = store::list_proposals(&mut conn, &project.project_id).await?;
            let existing_types: Vec<&str> =
                existing.iter().map(|p| p.plan_type.as_str()).collect();
            for (plan_type, description, impact) in scoring::default_plans() {
                if existing_types.contains(&plan_type) {
                    continue;
                }
                store::insert_proposal(&mut conn, &project.project_id, plan_type, description, impact)
                    .await?;
            }
            let health = project_health
                .get(&project.project_id)
                .map(|h| h.health_score)
                .unwrap_or(0.0);
            store::set_recommended(
                &mut conn,
                &project.project_id,
                scoring::recommended_plan(health),
            )
            .await?;
        }

        // The coordinator opens its own transactions below; release this
        // connection before handing actions over.
        drop(conn);

        // Mint actions for at-risk projects without an open one.
        let mut actions_created = 0usize;
        for project in &projects {
            let Some(health) = project_health.get(&project.project_id) else {
                continue;
            };
            if health.risk_level == RiskLevel::Safe {
                continue;
            }

            let action_id = {
                let mut conn = self.pool.acquire().await?;
                if store::open_action_exists(&mut conn, &project.project_id).await? {
                    continue;
                }
                let Some(proposal) =
                    store::select_recommended(&mut conn, &project.project_id).await?
                else {
                    continue;
                };

                let action_type = if health.risk_level == RiskLevel::Critical {
                    ActionKind::CalendarBooking
                } else {
                    ActionKind::EmailDraft
                };
                let joined = report_by_project
                    .get(&project.project_id)
                    .map(|notes| notes.join(" "))
                    .unwrap_or_default();
                let draft = build_action_draft(
                    &project.project_id,
                    &proposal,
                    health.risk_level,
                    action_type,
                    &joined,
                );
                actions::insert_action(&mut conn, action_type, &draft, Some(proposal.proposal_id))
                    .await?
            };

            let approval = self
                .coordinator
                .request_approval(
                    action_id,
                    Some("watchdog"),
                    None,
                    Some(&format!(
                        "{} risk {}",
                        project.project_id, health.risk_level
                    )),
                )
                .await?;
            self.coordinator
                .tag_thread(
                    &approval.thread_id,
                    "watchdog",
                    &project.project_id,
                    health.risk_level.as_str(),
                )
                .await?;
            actions_created = actions_created.saturating_add(1);
            info!(
                project_id = %project.project_id,
                action_id,
                risk = %health.risk_level,
                "watchdog created action"
            );
        }

        let summary = if actions_created > 0 {
            format!("watchdog created {actions_created} actions")
        } else {
            format!(
                "watchdog updated: {} projects / {} users",
                projects.len(),
                users.len()
            )
        };
        Ok(WatchdogSummary {
            summary,
            actions_created,
            alerts,
        })
    }
}

/// Compose the human-facing draft for a minted action, ending with the
/// machine payload line the executor parses.
fn build_action_draft(
    project_id: &str,
    proposal: &ProposalRow,
    risk_level: RiskLevel,
    action_type: ActionKind,
    project_notes: &str,
) -> String {
    let negative = scoring::count_hits(project_notes, &scoring::NEGATIVE_WORDS);
    let risk_hits = scoring::count_hits(project_notes, &scoring::RISK_WORDS);
    let mut lines = vec![
        format!("{project_id} / {} proposal", proposal.plan_type),
        proposal.description.clone().unwrap_or_default(),
        format!(
            "Impact: {}",
            proposal.predicted_future_impact.clone().unwrap_or_default()
        ),
        format!(
            "Risk: {risk_level} - negative signals {negative}, risk terms {risk_hits} in recent reports"
        ),
    ];
    let payload = match action_type {
        ActionKind::CalendarBooking => json!({
            "title": format!("{project_id} 対応ミーティング"),
            "description": format!("{} ({})", proposal.description.clone().unwrap_or_default(), proposal.plan_type),
        }),
        _ => json!({
            "subject": format!("{project_id} 状況共有"),
            "body": proposal.description.clone().unwrap_or_default(),
        }),
    };
    lines.push(payload.to_string());
    lines.retain(|line| !line.is_empty());
    lines.join("\n").trim().to_owned()
}
