//! Managed-identity-backed property sources.
//!
//! [`ManagedIdentitySource`] turns the platform identity endpoint into
//! cached bearer credentials; [`VaultPropertyHandler`] and
//! [`AppConfigPropertyHandler`] spend those credentials against their
//! remote stores.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;
use zeroize::Zeroizing;

use super::{EnvironmentPropertyHandler, PropertyHandler};
use crate::authorization::{CachedToken, TokenResponse};
use crate::errors::{FrameworkError, FrameworkResult};

/// Identity endpoint environment variable.
pub const IDENTITY_ENDPOINT_VAR: &str = "IDENTITY_ENDPOINT";
/// Identity shared-secret environment variable.
pub const IDENTITY_SECRET_VAR: &str = "IDENTITY_SECRET";
// older hosts expose the same pair under the MSI_* names
const LEGACY_ENDPOINT_VAR: &str = "MSI_ENDPOINT";
const LEGACY_SECRET_VAR: &str = "MSI_SECRET";

/// Default token audience for vault secret resolution.
pub const DEFAULT_VAULT_RESOURCE: &str = "https://vault.azure.net";

const IDENTITY_API_VERSION: &str = "2019-08-01";
const VAULT_API_VERSION: &str = "7.1";
const APPCONFIG_API_VERSION: &str = "1.0";
const VAULT_REFERENCE_TYPE: &str = "vault.reference";

/// Bearer credential source backed by the platform identity endpoint.
///
/// Tokens are cached per resource audience against their declared expiry.
#[derive(Debug)]
pub struct ManagedIdentitySource {
    endpoint: String,
    secret: Zeroizing<String>,
    http: reqwest::Client,
    tokens: RwLock<HashMap<String, CachedToken>>,
}

impl ManagedIdentitySource {
    /// Read the identity endpoint and secret from the environment. Fails
    /// with a configuration error when either is absent, which signals the
    /// process is not running under a managed identity.
    pub fn from_env() -> FrameworkResult<Self> {
        let endpoint = std::env::var(IDENTITY_ENDPOINT_VAR)
            .or_else(|_| std::env::var(LEGACY_ENDPOINT_VAR))
            .map_err(|_| {
                FrameworkError::configuration(format!(
                    "{IDENTITY_ENDPOINT_VAR} is not set; not running under a managed identity"
                ))
            })?;
        let secret = std::env::var(IDENTITY_SECRET_VAR)
            .or_else(|_| std::env::var(LEGACY_SECRET_VAR))
            .map_err(|_| {
                FrameworkError::configuration(format!(
                    "{IDENTITY_SECRET_VAR} is not set; not running under a managed identity"
                ))
            })?;
        Ok(Self {
            endpoint,
            secret: Zeroizing::new(secret),
            http: reqwest::Client::new(),
            tokens: RwLock::new(HashMap::new()),
        })
    }

    pub(crate) fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Fetch a fresh bearer token for `resource`, bypassing the cache.
    pub async fn fetch(&self, resource: &str) -> FrameworkResult<CachedToken> {
        debug!(resource, "requesting managed identity token");
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("resource", resource), ("api-version", IDENTITY_API_VERSION)])
            .header("x-identity-header", self.secret.as_str())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FrameworkError::unauthorized(format!(
                "identity endpoint returned {} for resource {resource}",
                response.status()
            )));
        }
        response.json::<TokenResponse>().await?.into_cached()
    }

    /// Cached bearer token for `resource`; refreshes when absent or expired.
    pub async fn bearer(&self, resource: &str) -> FrameworkResult<String> {
        {
            let tokens = self.tokens.read().await;
            if let Some(cached) = tokens.get(resource) {
                if !cached.is_expired() {
                    return Ok(cached.token.clone());
                }
            }
        }
        let mut tokens = self.tokens.write().await;
        if let Some(cached) = tokens.get(resource) {
            if !cached.is_expired() {
                return Ok(cached.token.clone());
            }
        }
        let fresh = self.fetch(resource).await?;
        let token = fresh.token.clone();
        tokens.insert(resource.to_string(), fresh);
        Ok(token)
    }
}

#[derive(Debug, Deserialize)]
struct VaultReference {
    #[serde(rename = "_type")]
    marker: String,
    id: String,
}

#[derive(Debug, Deserialize)]
struct SecretBundle {
    value: String,
}

/// Vault-backed property handler.
///
/// Values resolve through a plain environment lookup first; a raw value that
/// parses as a `vault.reference` JSON object is redirected to the vault and
/// replaced by the referenced secret. Anything else passes through
/// unchanged, so any setting can be moved into the vault without touching
/// call sites.
#[derive(Debug)]
pub struct VaultPropertyHandler {
    env: EnvironmentPropertyHandler,
    credential: OnceLock<ManagedIdentitySource>,
    resource: String,
    initialized: AtomicBool,
}

impl VaultPropertyHandler {
    /// `resource` overrides the token audience, mainly for tests; the
    /// default is [`DEFAULT_VAULT_RESOURCE`].
    pub fn new(resource: Option<String>) -> Self {
        Self {
            env: EnvironmentPropertyHandler::new(),
            credential: OnceLock::new(),
            resource: resource.unwrap_or_else(|| DEFAULT_VAULT_RESOURCE.to_string()),
            initialized: AtomicBool::new(false),
        }
    }

    fn credential(&self) -> FrameworkResult<&ManagedIdentitySource> {
        self.credential.get().ok_or_else(|| {
            FrameworkError::configuration("vault property handler used before initialize")
        })
    }

    async fn resolve_reference(&self, reference: &VaultReference) -> FrameworkResult<String> {
        let source = self.credential()?;
        let token = source.bearer(&self.resource).await?;
        let response = source
            .http_client()
            .get(&reference.id)
            .query(&[("api-version", VAULT_API_VERSION)])
            .bearer_auth(&token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FrameworkError::configuration(format!(
                "vault returned {} for secret {}",
                response.status(),
                reference.id
            )));
        }
        Ok(response.json::<SecretBundle>().await?.value)
    }
}

#[async_trait]
impl PropertyHandler for VaultPropertyHandler {
    fn name(&self) -> &'static str {
        "vault"
    }

    async fn initialize(&self, force: bool) -> FrameworkResult<bool> {
        if self.credential.get().is_none() {
            let source = ManagedIdentitySource::from_env()?;
            let _ = self.credential.set(source);
        }
        self.env.initialize(force).await?;
        if force {
            self.initialized.store(true, Ordering::SeqCst);
            return Ok(true);
        }
        Ok(!self.initialized.swap(true, Ordering::SeqCst))
    }

    async fn get_property(&self, key: &str) -> FrameworkResult<Option<String>> {
        let Some(raw) = self.env.get_property(key).await? else {
            return Ok(None);
        };
        if raw.trim_start().starts_with('{') {
            if let Ok(reference) = serde_json::from_str::<VaultReference>(&raw) {
                if reference.marker == VAULT_REFERENCE_TYPE {
                    debug!(key, id = %reference.id, "resolving vault reference");
                    return self.resolve_reference(&reference).await.map(Some);
                }
            }
        }
        Ok(Some(raw))
    }
}

#[derive(Debug, Deserialize)]
struct KeyValue {
    value: String,
}

/// Property handler backed by a remote app-configuration store.
///
/// Every lookup refreshes the credential (cached per audience) and fetches
/// the key by `(key, label)`.
#[derive(Debug)]
pub struct AppConfigPropertyHandler {
    endpoint: String,
    label: Option<String>,
    resource: String,
    credential: OnceLock<ManagedIdentitySource>,
    initialized: AtomicBool,
}

impl AppConfigPropertyHandler {
    pub fn new(endpoint: impl Into<String>, label: Option<String>) -> Self {
        let endpoint = endpoint.into();
        Self {
            resource: endpoint.clone(),
            endpoint,
            label,
            credential: OnceLock::new(),
            initialized: AtomicBool::new(false),
        }
    }

    /// Override the token audience; the default is the store endpoint.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    fn credential(&self) -> FrameworkResult<&ManagedIdentitySource> {
        self.credential.get().ok_or_else(|| {
            FrameworkError::configuration("app-config property handler used before initialize")
        })
    }
}

#[async_trait]
impl PropertyHandler for AppConfigPropertyHandler {
    fn name(&self) -> &'static str {
        "appconfig"
    }

    async fn initialize(&self, force: bool) -> FrameworkResult<bool> {
        if self.credential.get().is_none() {
            let source = ManagedIdentitySource::from_env()?;
            let _ = self.credential.set(source);
        }
        if force {
            self.initialized.store(true, Ordering::SeqCst);
            return Ok(true);
        }
        Ok(!self.initialized.swap(true, Ordering::SeqCst))
    }

    async fn get_property(&self, key: &str) -> FrameworkResult<Option<String>> {
        let source = self.credential()?;
        let token = source.bearer(&self.resource).await?;
        let url = format!("{}/kv/{}", self.endpoint.trim_end_matches('/'), key);
        let mut request = source
            .http_client()
            .get(&url)
            .query(&[("api-version", APPCONFIG_API_VERSION)])
            .bearer_auth(&token);
        if let Some(label) = &self.label {
            request = request.query(&[("label", label.as_str())]);
        }
        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(FrameworkError::configuration(format!(
                "app-config store returned {} for key {key}",
                response.status()
            )));
        }
        Ok(Some(response.json::<KeyValue>().await?.value))
    }
}
