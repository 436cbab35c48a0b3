//! Wire the persistent stores, vault and notifiers into an [`AppState`].

use std::sync::Arc;

use kiosk_pay::{
    BroadcastNotifier, FanOutNotifier, OrderKind, OrderLocator, OrderSource, PayError,
    SettlementEngine, SqliteCredentialStore, SqliteDb, SqliteLedger, SqliteOrderSource, Vault,
};

use crate::config::ServerConfig;
use crate::state::AppState;
use crate::webhook::{self, WebhookNotifier};

/// Capacity of the in-process settlement event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("failed to open SQLite store at {path}: {source}")]
    Database { path: String, source: PayError },

    #[error("vault: {0}")]
    Vault(PayError),

    #[error("failed to build webhook HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Open the SQLite database and build the shared state.
///
/// There is no in-memory fallback: settlements lost on restart would let a
/// redelivered complete settle the same order twice.
pub fn bootstrap(config: &ServerConfig) -> Result<Arc<AppState>, BootstrapError> {
    let db = SqliteDb::open(&config.db_path).map_err(|source| BootstrapError::Database {
        path: config.db_path.clone(),
        source,
    })?;
    tracing::info!("Store: SQLite at {}", config.db_path);

    let vault = Vault::new(&config.vault_passphrase).map_err(BootstrapError::Vault)?;

    let sources: Vec<Arc<dyn OrderSource>> = OrderKind::PRIORITY
        .iter()
        .map(|kind| Arc::new(SqliteOrderSource::new(db.clone(), *kind)) as Arc<dyn OrderSource>)
        .collect();
    let ledger = Arc::new(SqliteLedger::new(db.clone()));
    let credentials = Arc::new(SqliteCredentialStore::new(db));

    let events = BroadcastNotifier::new(EVENT_CHANNEL_CAPACITY);
    let mut notifier = FanOutNotifier::default().with(Arc::new(events.clone()));
    if !config.webhook_urls.is_empty() {
        tracing::info!("Webhook URLs configured: {}", config.webhook_urls.len());
        let hmac_key = config
            .webhook_secret
            .as_ref()
            .map(|s| webhook::webhook_key(s.as_bytes()));
        notifier = notifier.with(Arc::new(WebhookNotifier::new(
            webhook::webhook_client()?,
            config.webhook_urls.clone(),
            hmac_key,
        )));
    }

    let engine = SettlementEngine::new(OrderLocator::new(sources), ledger)
        .with_notifier(Arc::new(notifier))
        .with_storage_timeout(config.storage_timeout);

    Ok(Arc::new(AppState {
        engine: Arc::new(engine),
        credentials,
        vault,
        events,
        admin_token: config.admin_token.as_ref().map(|t| t.as_bytes().to_vec()),
        metrics_token: config.metrics_token.as_ref().map(|t| t.as_bytes().to_vec()),
        public_metrics: config.public_metrics,
        storage_timeout: config.storage_timeout,
    }))
}
