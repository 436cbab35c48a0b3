//! Payment provider adapters.
//!
//! - [`ProviderAdapter`]: shared trait; authenticates, drives the engine, translates
//! - [`click::ClickAdapter`]: `prepare` / `complete` webhooks, HMAC `sign_string`
//! - [`payme::PaymeAdapter`]: JSON-RPC `check` / `perform`, HTTP Basic auth
//!
//! Adapters never see storage directly. They parse the provider's request,
//! check it against the tenant's decrypted [`ProviderSecrets`], call
//! [`SettlementEngine`] and map its [`Outcome`](crate::engine::Outcome) onto
//! the provider's error vocabulary.

pub mod click;
pub mod payme;

use serde::{Deserialize, Serialize};

use crate::credentials::ProviderSecrets;
use crate::engine::SettlementEngine;
use crate::error::PayError;

pub use click::ClickAdapter;
pub use payme::PaymeAdapter;

/// Supported payment providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Click,
    Payme,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Click, Provider::Payme];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Click => "click",
            Provider::Payme => "payme",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = PayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "click" => Ok(Provider::Click),
            "payme" => Ok(Provider::Payme),
            other => Err(PayError::NotFound(format!("unknown provider: {other}"))),
        }
    }
}

/// Provider-agnostic failure taxonomy. Each adapter owns the mapping to its
/// wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    SignatureInvalid,
    MethodNotSupported,
    MalformedRequest,
    OrderNotFound,
    AlreadyPaid,
    UpstreamCancelled,
    InternalError,
}

impl ErrorCode {
    /// Stable label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCode::SignatureInvalid => "signature_invalid",
            ErrorCode::MethodNotSupported => "method_not_supported",
            ErrorCode::MalformedRequest => "malformed_request",
            ErrorCode::OrderNotFound => "order_not_found",
            ErrorCode::AlreadyPaid => "already_paid",
            ErrorCode::UpstreamCancelled => "cancelled",
            ErrorCode::InternalError => "internal_error",
        }
    }
}

/// Raw inbound webhook as seen by the HTTP layer.
#[derive(Debug, Clone, Copy)]
pub struct InboundRequest<'a> {
    /// Value of the `Authorization` header, if any.
    pub authorization: Option<&'a str>,
    pub body: &'a [u8],
}

impl<'a> InboundRequest<'a> {
    pub fn new(authorization: Option<&'a str>, body: &'a [u8]) -> Self {
        Self {
            authorization,
            body,
        }
    }
}

/// Provider-formatted answer, ready to be written to the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReply {
    pub status: u16,
    pub body: serde_json::Value,
    /// Generic outcome label (`settled`, `already_paid`, ...) for logs and metrics.
    pub outcome: &'static str,
}

/// Webhook phase, used to pick the engine operation and to label metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prepare,
    Complete,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Prepare => "prepare",
            Phase::Complete => "complete",
        }
    }
}

/// One payment provider's webhook protocol.
///
/// `prepare` and `complete` must call [`ProviderAdapter::authenticate`]
/// before touching the engine; an unauthenticated request never reaches the
/// order locator or the ledger.
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Check the request against the tenant's secrets.
    fn authenticate(&self, request: &InboundRequest<'_>, secrets: &ProviderSecrets) -> bool;

    /// Handle the provider's prepare/check call.
    fn prepare(
        &self,
        engine: &SettlementEngine,
        request: &InboundRequest<'_>,
        secrets: &ProviderSecrets,
    ) -> impl std::future::Future<Output = ProviderReply> + Send;

    /// Handle the provider's complete/perform call.
    fn complete(
        &self,
        engine: &SettlementEngine,
        request: &InboundRequest<'_>,
        secrets: &ProviderSecrets,
    ) -> impl std::future::Future<Output = ProviderReply> + Send;

    /// Answer `request` with a taxonomy error without running the protocol,
    /// e.g. when the tenant has no credentials for this provider.
    fn reject(&self, request: &InboundRequest<'_>, code: ErrorCode) -> ProviderReply;
}
