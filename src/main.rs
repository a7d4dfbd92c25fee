use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use tidewatch::config::Config;
use tidewatch::monitor::{
    self, ActivityProducer, HistoryProducer, MonitorClient,
};
use tidewatch::sync::{SyncStatus, Synchronizer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load()?;
    tracing::info!("Watching {}", config.server.base_url);

    let client = Arc::new(MonitorClient::new(&config.server)?);

    let mut activity = Synchronizer::new(
        ActivityProducer(Arc::clone(&client)),
        monitor::activity_fingerprint,
        config.poll.activity_schedule(),
    );
    let _activity_log = activity.on_state_change(|state| match state.status {
        SyncStatus::Ready => {
            let sessions = state.payload.as_ref().map(|a| a.sessions.len()).unwrap_or(0);
            tracing::info!("Activity: {} active session(s)", sessions);
        }
        SyncStatus::Failed => {
            tracing::warn!(
                "Activity poll failed: {}",
                state.error_message.as_deref().unwrap_or("unknown error")
            );
        }
        SyncStatus::Idle | SyncStatus::Fetching => {}
    });

    let mut history = Synchronizer::new(
        HistoryProducer {
            client: Arc::clone(&client),
            page_length: config.poll.history_page_length,
        },
        monitor::history_fingerprint,
        config.poll.history_schedule(),
    );
    let _history_log = history.on_state_change(|state| {
        if state.status == SyncStatus::Ready {
            if let Some(page) = &state.payload {
                tracing::info!(
                    "History: {} total record(s), newest {:?}",
                    page.records_total,
                    page.entries.first().map(|e| e.title.as_str())
                );
            }
        }
    });

    activity.start()?;
    history.start()?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    activity.stop();
    history.stop();

    Ok(())
}
