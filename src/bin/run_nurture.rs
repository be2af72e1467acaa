//! Runs one nurture batch from the command line, for cron hosts that cannot
//! reach the HTTP trigger.
//!
//! Usage: `run_nurture [--dry-run]` (dry run logs emails and leaves every
//! lead at its current stage)

use dotenvy::dotenv;
use std::env;
use std::sync::Arc;

use fiv_match_api::config::Config;
use fiv_match_api::db::Database;
use fiv_match_api::email::{EmailSender, LogOnlySender, ResendEmailClient};
use fiv_match_api::nurture::{NurtureScheduler, NurtureSettings};
use fiv_match_api::repository::PgStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let dry_run = env::args().any(|arg| arg == "--dry-run");
    let config = Config::from_env()?;
    let db = Database::new(&config.database_url).await?;

    let email: Arc<dyn EmailSender> = if dry_run {
        tracing::info!("Dry run: emails are logged, not sent");
        Arc::new(LogOnlySender)
    } else {
        Arc::new(ResendEmailClient::new(config.email.clone())?)
    };

    let settings = NurtureSettings {
        dry_run,
        ..config.nurture
    };
    let scheduler = NurtureScheduler::new(Arc::new(PgStore::new(db.pool)), email, settings);
    let report = scheduler.run_batch(chrono::Utc::now()).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.failed > 0 {
        anyhow::bail!("{} of {} nurture emails failed", report.failed, report.processed);
    }
    Ok(())
}
