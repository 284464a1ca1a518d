//! Token caching and role-based permissioning.

pub mod application;
pub mod matching;
pub mod roles;

pub use application::{ApplicationAuthorization, ApplicationAuthorizationSpec, MANAGED_IDENTITY_ID};
pub use matching::{MatchAll, MatchAny, MatchNone, ValueMatch};
pub use roles::{FunctionRole, FunctionRoleSpec, MatchKind};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::errors::{FrameworkError, FrameworkResult};

/// Bearer token cached against its declared expiry moment.
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Wire shape shared by the managed identity endpoint
/// (`{access_token, expires_on}`) and the client-credentials grant
/// (`{accessToken, expiresOn}`).
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(alias = "accessToken")]
    pub access_token: String,
    #[serde(alias = "expiresOn", deserialize_with = "epoch_seconds")]
    pub expires_on: i64,
}

impl TokenResponse {
    pub(crate) fn into_cached(self) -> FrameworkResult<CachedToken> {
        let expires_at = DateTime::<Utc>::from_timestamp(self.expires_on, 0).ok_or_else(|| {
            FrameworkError::configuration(format!(
                "token expiry {} is out of range",
                self.expires_on
            ))
        })?;
        Ok(CachedToken {
            token: self.access_token,
            expires_at,
        })
    }
}

// Identity endpoints return the expiry as a number or a numeric string
// depending on the api-version; accept both.
fn epoch_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(value) => value.trim().parse::<i64>().map_err(serde::de::Error::custom),
    }
}
