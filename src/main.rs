//! Nemawashi binary: HTTP daemon plus one-shot operator subcommands.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use nemawashi::chat::ChatGateway;
use nemawashi::config::AppConfig;
use nemawashi::coordinator::Coordinator;
use nemawashi::credentials::CredentialStore;
use nemawashi::db;
use nemawashi::demo::DemoDriver;
use nemawashi::executor::ExternalActionExecutor;
use nemawashi::http::{self, AppState};
use nemawashi::logging;
use nemawashi::watchdog::Watchdog;

#[derive(Parser)]
#[command(name = "nemawashi", version, about = "Human-in-the-loop approval coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP intake daemon.
    Serve,
    /// Run one watchdog cycle against the queued job (enqueuing if empty).
    Watchdog,
    /// Create the database schema and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before config so env overrides see its values.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config = AppConfig::load()?;

    let log_mode = match cli.command {
        Command::Serve => logging::LogMode::Daemon,
        _ => logging::LogMode::OneShot,
    };
    let _logging_guard = logging::init(log_mode, Path::new(&config.paths.logs_dir))
        .context("failed to initialise logging")?;

    let pool = db::connect(&config.paths.database_url)
        .await
        .context("failed to open database")?;
    db::migrate(&pool).await.context("failed to migrate schema")?;

    match cli.command {
        Command::Migrate => {
            info!("schema up to date");
            Ok(())
        }
        Command::Watchdog => {
            let state = build_state(&config, pool);
            let outcome = match state.watchdog.run_job(None).await {
                Ok(outcome) => outcome,
                Err(nemawashi::error::Error::NotFound(_)) => {
                    let queued = state.watchdog.enqueue(serde_json::json!({})).await?;
                    state.watchdog.run_job(Some(queued.job_id)).await?
                }
                Err(e) => return Err(e.into()),
            };
            info!(job_id = outcome.job_id, summary = %outcome.summary, "watchdog run finished");
            Ok(())
        }
        Command::Serve => {
            let state = build_state(&config, pool);
            http::serve(state, &config.server.bind_addr).await
        }
    }
}

/// Wire the component graph: gateway, credential store, executor,
/// coordinator, watchdog, demo driver.
fn build_state(config: &AppConfig, pool: sqlx::SqlitePool) -> AppState {
    let chat = Arc::new(ChatGateway::from_config(&config.chat));
    let credentials = Arc::new(CredentialStore::new(
        config.credentials.clone(),
        config.executor.default_owner_email.clone(),
    ));
    let executor = Arc::new(ExternalActionExecutor::new(
        config.executor.clone(),
        credentials,
    ));
    let coordinator = Arc::new(Coordinator::new(
        pool.clone(),
        chat.clone(),
        executor.clone(),
    ));
    let watchdog = Arc::new(Watchdog::new(pool.clone(), coordinator.clone()));
    let demo = Arc::new(DemoDriver::new(
        pool.clone(),
        chat.clone(),
        executor,
        &config.chat,
        config.executor.clone(),
    ));
    AppState {
        coordinator,
        watchdog,
        demo,
        chat_gateway: chat,
        chat_config: config.chat.clone(),
        api_token: config.server.api_token.clone(),
        pool,
    }
}
