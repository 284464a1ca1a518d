//! Per-application OAuth token cache with pluggable refresh strategies.

use std::collections::HashMap;

use futures::future::try_join_all;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::{CachedToken, TokenResponse};
use crate::errors::{FrameworkError, FrameworkResult};
use crate::properties::managed::ManagedIdentitySource;

/// Registration id used when a managed identity authorization is declared
/// without one.
pub const MANAGED_IDENTITY_ID: &str = "managed-identity";

/// Declared shape of an application authorization, carried by the
/// `core.authorization.application` configuration key.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationAuthorizationSpec {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub authority: Option<String>,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default, alias = "clientId")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default, alias = "managedIdentity")]
    pub managed_identity: bool,
    #[serde(default)]
    pub resources: Vec<String>,
}

impl ApplicationAuthorizationSpec {
    /// Authorization backed by the platform managed identity.
    pub fn managed(resources: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            id: None,
            authority: None,
            tenant: None,
            client_id: None,
            secret: None,
            managed_identity: true,
            resources: resources.into_iter().map(Into::into).collect(),
        }
    }

    /// Authorization backed by an OAuth client-credentials grant.
    pub fn client_credentials(
        authority: impl Into<String>,
        tenant: impl Into<String>,
        client_id: impl Into<String>,
        secret: impl Into<String>,
        resources: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id: None,
            authority: Some(authority.into()),
            tenant: Some(tenant.into()),
            client_id: Some(client_id.into()),
            secret: Some(secret.into()),
            managed_identity: false,
            resources: resources.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Debug)]
enum RefreshStrategy {
    Managed(ManagedIdentitySource),
    ClientCredentials {
        authority: String,
        tenant: String,
        client_id: String,
        secret: Zeroizing<String>,
    },
}

/// OAuth token cache for one application identity, keyed by resource.
///
/// State machine per resource: no token, then fetched and cached with its
/// expiry, then transparently refreshed inside [`Self::get_token`] once the
/// expiry passes. Callers never observe the intermediate state.
#[derive(Debug)]
pub struct ApplicationAuthorization {
    id: String,
    strategy: RefreshStrategy,
    resources: Vec<String>,
    tokens: RwLock<HashMap<String, CachedToken>>,
    http: reqwest::Client,
}

impl ApplicationAuthorization {
    pub fn from_spec(spec: ApplicationAuthorizationSpec) -> FrameworkResult<Self> {
        if spec.managed_identity {
            let id = spec.id.unwrap_or_else(|| MANAGED_IDENTITY_ID.to_string());
            let source = ManagedIdentitySource::from_env()?;
            Ok(Self {
                id,
                strategy: RefreshStrategy::Managed(source),
                resources: spec.resources,
                tokens: RwLock::new(HashMap::new()),
                http: reqwest::Client::new(),
            })
        } else {
            let missing = |field: &str| {
                FrameworkError::configuration(format!(
                    "application authorization is missing '{field}'"
                ))
            };
            let authority = spec.authority.ok_or_else(|| missing("authority"))?;
            let tenant = spec.tenant.ok_or_else(|| missing("tenant"))?;
            let client_id = spec.client_id.ok_or_else(|| missing("client_id"))?;
            let secret = spec.secret.ok_or_else(|| missing("secret"))?;
            let id = spec.id.unwrap_or_else(|| client_id.clone());
            Ok(Self {
                id,
                strategy: RefreshStrategy::ClientCredentials {
                    authority,
                    tenant,
                    client_id,
                    secret: Zeroizing::new(secret),
                },
                resources: spec.resources,
                tokens: RwLock::new(HashMap::new()),
                http: reqwest::Client::new(),
            })
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_managed(&self) -> bool {
        matches!(self.strategy, RefreshStrategy::Managed(_))
    }

    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    /// Register another resource audience. Duplicates are ignored.
    pub fn add_resource(&mut self, resource: impl Into<String>) {
        let resource = resource.into();
        if !self.resources.contains(&resource) {
            self.resources.push(resource);
        }
    }

    /// Eagerly warm the cache for every declared resource, concurrently.
    /// All-or-nothing: one failed fetch fails the initialization and no
    /// partial token state is retained.
    pub async fn initialize(&self) -> FrameworkResult<()> {
        if self.resources.is_empty() {
            return Err(FrameworkError::configuration(format!(
                "application authorization '{}' declares no resources",
                self.id
            )));
        }
        let warmed = try_join_all(self.resources.iter().map(|resource| self.get_token(resource)));
        if let Err(error) = warmed.await {
            self.tokens.write().await.clear();
            return Err(error);
        }
        info!(
            application = %self.id,
            resources = self.resources.len(),
            "application authorization initialized"
        );
        Ok(())
    }

    /// Cached token for `resource`. Refreshes transparently when the cached
    /// token has expired; fails for a resource that was never registered.
    pub async fn get_token(&self, resource: &str) -> FrameworkResult<String> {
        if !self.resources.iter().any(|declared| declared == resource) {
            return Err(FrameworkError::unauthorized(format!(
                "resource {resource} not authorized for application '{}'",
                self.id
            )));
        }
        {
            let tokens = self.tokens.read().await;
            if let Some(cached) = tokens.get(resource) {
                if !cached.is_expired() {
                    return Ok(cached.token.clone());
                }
            }
        }
        self.refresh_token(resource).await
    }

    async fn refresh_token(&self, resource: &str) -> FrameworkResult<String> {
        let mut tokens = self.tokens.write().await;
        // another caller may have refreshed while we waited on the lock
        if let Some(cached) = tokens.get(resource) {
            if !cached.is_expired() {
                return Ok(cached.token.clone());
            }
        }

        debug!(application = %self.id, resource, "refreshing token");
        let fresh = match &self.strategy {
            RefreshStrategy::Managed(source) => source.fetch(resource).await?,
            RefreshStrategy::ClientCredentials {
                authority,
                tenant,
                client_id,
                secret,
            } => {
                let url = format!("{}/{}/oauth2/token", authority.trim_end_matches('/'), tenant);
                let response = self
                    .http
                    .post(&url)
                    .form(&[
                        ("grant_type", "client_credentials"),
                        ("client_id", client_id.as_str()),
                        ("client_secret", secret.as_str()),
                        ("resource", resource),
                    ])
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(FrameworkError::unauthorized(format!(
                        "token endpoint returned {} for application '{}'",
                        response.status(),
                        self.id
                    )));
                }
                response.json::<TokenResponse>().await?.into_cached()?
            }
        };

        let token = fresh.token.clone();
        tokens.insert(resource.to_string(), fresh);
        Ok(token)
    }
}
