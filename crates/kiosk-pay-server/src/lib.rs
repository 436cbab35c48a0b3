//! kiosk-pay server: provider webhooks, settlement admin and credential onboarding.
//!
//! Settlement logic lives in the core [`kiosk_pay`] crate; this crate provides
//! the HTTP surface, configuration, state wiring and outbound notifications.
//!
//! # Modules
//!
//! - [`routes`]: HTTP endpoints (payments, admin, health, metrics)
//! - [`state`]: shared [`AppState`]
//! - [`bootstrap`]: opens the SQLite stores and wires the engine
//! - [`webhook`]: HMAC-signed settlement webhooks
//! - [`metrics`]: Prometheus metrics for webhook handling

pub mod bootstrap;
pub mod config;
pub mod cors;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod webhook;

pub use config::{ConfigError, ServerConfig};
pub use error::ApiError;
pub use state::AppState;
