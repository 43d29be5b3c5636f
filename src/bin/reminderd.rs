use anyhow::Result;
use dotenvy::dotenv;
use log::{error, info};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use event_planner::core::{format_duration, Config, NotifierConfig};
use event_planner::database::Database;
use event_planner::features::notifications::{LogNotifier, Notifier, WebhookNotifier};
use event_planner::features::reminders::ReminderScheduler;

fn build_notifier(config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
    let notifier: Arc<dyn Notifier> = match config {
        NotifierConfig::Log => Arc::new(LogNotifier::new()),
        NotifierConfig::Webhook { url } => {
            let webhook = WebhookNotifier::new(url.clone())?;
            info!("🔗 Reminder webhook: {}", webhook.url());
            Arc::new(webhook)
        }
    };
    Ok(notifier)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = Config::from_env()?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    info!("Starting event reminder service...");

    let database = Database::new(&config.database_path).await?;
    let notifier = build_notifier(&config.notifier)?;
    let settings = config.reminders.clone();

    info!(
        "📬 Delivering reminders via the {} notifier, checking every {}",
        notifier.name(),
        format_duration(settings.poll_interval)
    );

    let store = Arc::new(database);
    let scheduler = Arc::new(ReminderScheduler::new(
        store.clone(),
        store,
        notifier,
        settings,
    ));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(scheduler.clone().run(cancel.clone()));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }

    info!("Shutdown requested, draining reminder cycle...");
    cancel.cancel();
    if let Err(e) = handle.await {
        error!("Reminder scheduler task failed: {e}");
    }

    info!("Reminder service stopped ({})", scheduler.state());
    Ok(())
}
