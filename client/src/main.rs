//! StudyHub sync daemon.
//!
//! Keeps a local data directory in sync with the StudyHub document service
//! until interrupted, then runs one final sync.

use std::sync::Arc;

use studyhub_client::{
    ClientConfig, FileBackend, HttpDocumentStore, LocalStore, StaticSession, SyncOrchestrator,
    TracingSink,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "studyhub_client=info,studyhub_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = ClientConfig::from_env()?;

    tracing::info!(
        url = %config.sync_url,
        data_dir = %config.data_dir.display(),
        "Starting StudyHub sync"
    );

    let store = LocalStore::new(FileBackend::open(&config.data_dir)?);
    let session = Arc::new(StaticSession::new(config.user_id.clone()));
    let remote = HttpDocumentStore::new(
        &config.sync_url,
        config.auth_token.clone(),
        config.http_timeout,
    )?;

    let orchestrator = SyncOrchestrator::new(
        store,
        session,
        Arc::new(remote),
        Arc::new(TracingSink),
        config.app_version.clone(),
    );

    if config.user_id.is_none() {
        tracing::warn!("STUDYHUB_USER_ID not set, sync disabled");
    } else if orchestrator.last_sync_time().is_none() {
        // Fresh data directory: pull the cloud copy before the first upload
        let outcome = orchestrator.reset_sync().await;
        tracing::info!(?outcome, "initial sync");
    }

    orchestrator.start_auto_sync(config.sync_interval);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    let outcome = orchestrator.before_unload().await;
    tracing::info!(?outcome, "final sync");

    Ok(())
}
