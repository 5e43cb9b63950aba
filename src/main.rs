use std::sync::Arc;

use anyhow::Context;
use reqwest::Client;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use puenteflow_engine::config::Config;
use puenteflow_engine::db::postgres_workflow_store::PostgresWorkflowStore;
use puenteflow_engine::engine::audit::AuditRecorder;
use puenteflow_engine::queue::PostgresJobQueue;
use puenteflow_engine::services::email::{EmailSender, SendgridEmail};
use puenteflow_engine::services::sms::{SmsSender, TwilioSms};
use puenteflow_engine::state::EngineState;
use puenteflow_engine::worker::start_step_workers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(config.json_logs);

    let pool = establish_connection(&config.database_url).await?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let store = Arc::new(PostgresWorkflowStore::new(pool.clone()));
    let queue = Arc::new(
        PostgresJobQueue::new(pool.clone(), config.retry)
            .with_reservation_lease(config.worker.reservation_lease),
    );
    let http_client = Client::new();

    let sms = config.twilio.as_ref().map(|settings| {
        Arc::new(TwilioSms::new(&http_client, settings)) as Arc<dyn SmsSender>
    });
    if sms.is_none() {
        warn!("TWILIO_ACCOUNT_SID not set; SMS steps will be recorded without delivery");
    }
    let email = config.sendgrid.as_ref().map(|settings| {
        Arc::new(SendgridEmail::new(&http_client, settings)) as Arc<dyn EmailSender>
    });
    if email.is_none() {
        warn!("SENDGRID_API_KEY not set; email steps will be recorded without delivery");
    }

    let state = EngineState {
        automations: store.clone(),
        runs: store.clone(),
        crm: store.clone(),
        audit: AuditRecorder::new(store),
        queue,
        sms,
        email,
        step_lease: config.worker.step_lease,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = start_step_workers(state, &config.worker, shutdown_rx);
    info!(concurrency = config.worker.concurrency, "step workers running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    let _ = shutdown_tx.send(true);
    for handle in workers {
        if let Err(err) = handle.await {
            error!(%err, "step worker panicked");
        }
    }
    pool.close().await;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn establish_connection(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPool::connect(database_url)
        .await
        .context("failed to connect to the database")?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .context("failed to verify database connection")?;

    info!("connected to the database");
    Ok(pool)
}
