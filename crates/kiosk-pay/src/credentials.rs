//! Per-tenant provider credentials, encrypted at rest by the [`Vault`].
//!
//! Onboarding turns a plaintext [`CredentialInput`] into sealed
//! [`ProviderCredentials`]. Webhook authentication opens them into
//! [`ProviderSecrets`], which live only for the duration of one request.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::PayError;
use crate::providers::Provider;
use crate::vault::{EncryptedSecret, Vault};

/// Sealed credentials for one provider. Every field is optional; which ones a
/// provider needs is up to its adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<EncryptedSecret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<EncryptedSecret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_id: Option<EncryptedSecret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_user_id: Option<EncryptedSecret>,
}

/// Plaintext onboarding payload.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialInput {
    pub secret_key: String,
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub merchant_id: Option<String>,
    #[serde(default)]
    pub merchant_user_id: Option<String>,
}

impl std::fmt::Debug for CredentialInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialInput")
            .field("secret_key", &"[REDACTED]")
            .field("service_id", &self.service_id.as_ref().map(|_| "[REDACTED]"))
            .field("merchant_id", &self.merchant_id.as_ref().map(|_| "[REDACTED]"))
            .field(
                "merchant_user_id",
                &self.merchant_user_id.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Decrypted credentials, used to authenticate one inbound request.
#[derive(Clone, Default)]
pub struct ProviderSecrets {
    pub secret_key: String,
    pub service_id: Option<String>,
    pub merchant_id: Option<String>,
    pub merchant_user_id: Option<String>,
}

impl std::fmt::Debug for ProviderSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSecrets")
            .field("secret_key", &"[REDACTED]")
            .field("service_id", &self.service_id)
            .field("merchant_id", &self.merchant_id.as_ref().map(|_| "[REDACTED]"))
            .field(
                "merchant_user_id",
                &self.merchant_user_id.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl ProviderCredentials {
    /// Encrypt an onboarding payload. Fails if the secret key is empty.
    pub fn seal(vault: &Vault, input: &CredentialInput) -> Result<Self, PayError> {
        let secret_key = vault
            .encrypt(input.secret_key.trim())
            .ok_or_else(|| PayError::Vault("secret key is required".to_string()))?;
        Ok(Self {
            secret_key: Some(secret_key),
            service_id: vault.seal(input.service_id.as_deref()),
            merchant_id: vault.seal(input.merchant_id.as_deref()),
            merchant_user_id: vault.seal(input.merchant_user_id.as_deref()),
        })
    }

    /// Decrypt for use. `None` if the secret key is missing or cannot be decrypted.
    pub fn open(&self, vault: &Vault) -> Option<ProviderSecrets> {
        Some(ProviderSecrets {
            secret_key: vault.open(self.secret_key.as_ref())?,
            service_id: vault.open(self.service_id.as_ref()),
            merchant_id: vault.open(self.merchant_id.as_ref()),
            merchant_user_id: vault.open(self.merchant_user_id.as_ref()),
        })
    }

    /// Names of the fields present, for onboarding responses.
    pub fn stored_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.secret_key.is_some() {
            fields.push("secretKey");
        }
        if self.service_id.is_some() {
            fields.push("serviceId");
        }
        if self.merchant_id.is_some() {
            fields.push("merchantId");
        }
        if self.merchant_user_id.is_some() {
            fields.push("merchantUserId");
        }
        fields
    }
}

/// All provider credentials of one tenant, keyed by provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantCredentialSet {
    #[serde(flatten)]
    pub providers: BTreeMap<Provider, ProviderCredentials>,
}

/// Trait for credential storage backends.
pub trait CredentialStore: Send + Sync {
    fn get(&self, tenant_id: &str, provider: Provider)
        -> Result<Option<ProviderCredentials>, PayError>;

    /// Insert or replace one provider's credentials for a tenant.
    fn put(
        &self,
        tenant_id: &str,
        provider: Provider,
        credentials: ProviderCredentials,
    ) -> Result<(), PayError>;

    fn tenant(&self, tenant_id: &str) -> Result<TenantCredentialSet, PayError>;
}

/// In-memory credential store backed by DashMap.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    tenants: DashMap<String, TenantCredentialSet>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn get(
        &self,
        tenant_id: &str,
        provider: Provider,
    ) -> Result<Option<ProviderCredentials>, PayError> {
        Ok(self
            .tenants
            .get(tenant_id)
            .and_then(|set| set.providers.get(&provider).cloned()))
    }

    fn put(
        &self,
        tenant_id: &str,
        provider: Provider,
        credentials: ProviderCredentials,
    ) -> Result<(), PayError> {
        self.tenants
            .entry(tenant_id.to_string())
            .or_default()
            .providers
            .insert(provider, credentials);
        Ok(())
    }

    fn tenant(&self, tenant_id: &str) -> Result<TenantCredentialSet, PayError> {
        Ok(self
            .tenants
            .get(tenant_id)
            .map(|set| set.value().clone())
            .unwrap_or_default())
    }
}

/// Persistent credential store: one row per (tenant, provider), sealed JSON.
#[cfg(feature = "sqlite")]
pub struct SqliteCredentialStore {
    db: crate::db::SqliteDb,
}

#[cfg(feature = "sqlite")]
impl SqliteCredentialStore {
    pub fn new(db: crate::db::SqliteDb) -> Self {
        Self { db }
    }
}

#[cfg(feature = "sqlite")]
impl CredentialStore for SqliteCredentialStore {
    fn get(
        &self,
        tenant_id: &str,
        provider: Provider,
    ) -> Result<Option<ProviderCredentials>, PayError> {
        use rusqlite::OptionalExtension;

        let conn = self.db.lock();
        let json: Option<String> = conn
            .query_row(
                "SELECT credentials FROM tenant_credentials WHERE tenant_id = ?1 AND provider = ?2",
                rusqlite::params![tenant_id, provider.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        drop(conn);
        json.map(|j| serde_json::from_str(&j).map_err(PayError::from))
            .transpose()
    }

    fn put(
        &self,
        tenant_id: &str,
        provider: Provider,
        credentials: ProviderCredentials,
    ) -> Result<(), PayError> {
        let json = serde_json::to_string(&credentials)?;
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO tenant_credentials (tenant_id, provider, credentials, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(tenant_id, provider) DO UPDATE SET
                credentials = excluded.credentials,
                updated_at = excluded.updated_at",
            rusqlite::params![tenant_id, provider.as_str(), json, crate::db::unix_now()],
        )?;
        Ok(())
    }

    fn tenant(&self, tenant_id: &str) -> Result<TenantCredentialSet, PayError> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT provider, credentials FROM tenant_credentials WHERE tenant_id = ?1",
        )?;
        let rows = stmt
            .query_map([tenant_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        let mut set = TenantCredentialSet::default();
        for (provider, json) in rows {
            set.providers
                .insert(provider.parse()?, serde_json::from_str(&json)?);
        }
        Ok(set)
    }
}
