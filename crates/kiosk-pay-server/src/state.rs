use std::sync::Arc;
use std::time::Duration;

use kiosk_pay::{
    run_blocking, BroadcastNotifier, CredentialInput, CredentialStore, PayError,
    ProviderCredentials, ProviderSecrets, Provider, SettlementEngine, Vault,
};

use crate::error::ApiError;

/// Shared application state for the payment server.
pub struct AppState {
    pub engine: Arc<SettlementEngine>,
    pub credentials: Arc<dyn CredentialStore>,
    pub vault: Vault,
    /// Realtime settlement events, for in-process subscribers.
    pub events: BroadcastNotifier,
    /// Bearer token for /admin routes (None = admin disabled).
    pub admin_token: Option<Vec<u8>>,
    /// Bearer token for /metrics.
    pub metrics_token: Option<Vec<u8>>,
    /// Serve /metrics without a token when none is configured.
    pub public_metrics: bool,
    pub storage_timeout: Duration,
}

impl AppState {
    /// Load and decrypt a tenant's credentials for one provider.
    ///
    /// `Ok(None)` when the tenant has none, or they no longer decrypt under
    /// the current vault key. Both are authentication failures to the caller.
    pub async fn load_secrets(
        &self,
        tenant_id: &str,
        provider: Provider,
    ) -> Result<Option<ProviderSecrets>, PayError> {
        let store = Arc::clone(&self.credentials);
        let tenant = tenant_id.to_string();
        let sealed = run_blocking(self.storage_timeout, move || store.get(&tenant, provider)).await?;

        Ok(sealed.and_then(|creds| {
            let opened = creds.open(&self.vault);
            if opened.is_none() {
                tracing::warn!(tenant = %tenant_id, %provider, "stored credentials do not decrypt");
            }
            opened
        }))
    }

    /// Encrypt and store onboarding credentials. Returns the stored field names.
    pub async fn store_credentials(
        &self,
        tenant_id: &str,
        provider: Provider,
        input: &CredentialInput,
    ) -> Result<Vec<&'static str>, ApiError> {
        let sealed = ProviderCredentials::seal(&self.vault, input)
            .map_err(|_| ApiError::BadRequest("secretKey is required".to_string()))?;
        let fields = sealed.stored_fields();

        let store = Arc::clone(&self.credentials);
        let tenant = tenant_id.to_string();
        run_blocking(self.storage_timeout, move || store.put(&tenant, provider, sealed)).await?;

        tracing::info!(tenant = %tenant_id, %provider, ?fields, "provider credentials stored");
        Ok(fields)
    }
}
