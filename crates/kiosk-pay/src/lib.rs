//! Payment reconciliation for self-service print/scan/copy kiosks.
//!
//! Payment providers call back asynchronously with a two-phase protocol: a
//! *prepare* ("may this order be paid?") and a *complete* ("it was paid").
//! This crate reconciles those callbacks against pending orders without
//! ever settling the same order twice.
//!
//! # Components
//!
//! - **Vault** ([`Vault`]): AES-256-GCM encryption of tenant provider secrets
//! - **Order locator** ([`OrderLocator`]): resolves an order id across order kinds
//! - **Settlement ledger** ([`SettlementLedger`]): at most one record per order id
//! - **Engine** ([`SettlementEngine`]): the shared prepare/complete state machine
//! - **Provider adapters** ([`ClickAdapter`], [`PaymeAdapter`]): per-provider
//!   authentication and wire vocabulary
//!
//! # Quick example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kiosk_pay::{
//!     ClickAdapter, InMemoryLedger, InMemoryOrderSource, InboundRequest, OrderKind,
//!     OrderLocator, OrderSource, ProviderAdapter, ProviderSecrets, SettlementEngine,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let prints: Arc<dyn OrderSource> =
//!     Arc::new(InMemoryOrderSource::new(OrderKind::UploadedPrintJob));
//! let engine = SettlementEngine::new(
//!     OrderLocator::new(vec![prints]),
//!     Arc::new(InMemoryLedger::new()),
//! );
//!
//! let secrets = ProviderSecrets { secret_key: "tenant-secret".into(), ..Default::default() };
//! let body = br#"{"click_trans_id": "1"}"#;
//! let reply = ClickAdapter::new()
//!     .complete(&engine, &InboundRequest::new(None, body), &secrets)
//!     .await;
//! println!("{} {}", reply.status, reply.body);
//! # }
//! ```

// Core types and storage
pub mod error;
pub mod ledger;
pub mod locator;
pub mod order;

#[cfg(feature = "sqlite")]
pub mod db;

// Secrets
pub mod credentials;
pub mod hmac;
pub mod security;
pub mod vault;

// Protocol
pub mod engine;
pub mod notify;
pub mod providers;

#[cfg(test)]
mod test_support;

// Re-exports
pub use credentials::{
    CredentialInput, CredentialStore, InMemoryCredentialStore, ProviderCredentials,
    ProviderSecrets, TenantCredentialSet,
};
pub use engine::{run_blocking, Completion, IdPolicy, Outcome, SettlementEngine};
pub use error::PayError;
pub use ledger::{InMemoryLedger, SettlementLedger, SettlementRecord, SettlementStatus};
pub use locator::OrderLocator;
pub use notify::{
    BroadcastNotifier, FanOutNotifier, NoopNotifier, SettlementEvent, SettlementNotifier,
};
pub use order::{
    CopyRequest, InMemoryOrderSource, OrderKind, OrderSource, Owner, PendingOrder,
    ScannedDocument, UploadedPrintJob,
};
pub use providers::{
    ClickAdapter, ErrorCode, InboundRequest, PaymeAdapter, Phase, Provider, ProviderAdapter,
    ProviderReply,
};
pub use vault::{EncryptedSecret, Vault};

#[cfg(feature = "sqlite")]
pub use credentials::SqliteCredentialStore;
#[cfg(feature = "sqlite")]
pub use db::SqliteDb;
#[cfg(feature = "sqlite")]
pub use ledger::SqliteLedger;
#[cfg(feature = "sqlite")]
pub use order::SqliteOrderSource;
