//! Framework error taxonomy shared by every lifecycle component.

use thiserror::Error;

/// Result alias used across the framework.
pub type FrameworkResult<T> = Result<T, FrameworkError>;

/// Error type for all framework operations.
///
/// Every internal failure rejects its enclosing async operation; the
/// lifecycle's `exception` hook is the single recovery point. The core never
/// retries a remote call.
#[derive(Debug, Error)]
pub enum FrameworkError {
    /// Missing or invalid settings, unparseable JSON-declared objects.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// Unregistered resource/application or a rejected token request.
    #[error("not authorized: {reason}")]
    Unauthorized { reason: String },

    /// Permission denied by a function role.
    #[error("forbidden: {reason}")]
    Forbidden { reason: String },

    /// Reserved for adapter dispatch branches with no handler.
    #[error("not implemented: {feature}")]
    NotImplemented { feature: String },

    /// Failure that should complete the invocation with no payload, for
    /// expired or otherwise ignorable conditions.
    #[error("dropped: {reason}")]
    Dropped { reason: String },

    #[error("http request failed")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    #[error("serialization failed")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("cryptography failure: {reason}")]
    Crypto { reason: String },

    /// Any non-framework failure, wrapped with a generic message.
    #[error("{message}")]
    Platform {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl FrameworkError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    pub fn not_implemented(feature: impl Into<String>) -> Self {
        Self::NotImplemented {
            feature: feature.into(),
        }
    }

    pub fn dropped(reason: impl Into<String>) -> Self {
        Self::Dropped {
            reason: reason.into(),
        }
    }

    pub fn crypto(reason: impl Into<String>) -> Self {
        Self::Crypto {
            reason: reason.into(),
        }
    }

    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a non-framework error.
    pub fn wrap(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Platform {
            message: "unhandled exception".to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// HTTP-style status code for adapter responses.
    pub fn code(&self) -> u16 {
        match self {
            Self::Unauthorized { .. } => 401,
            Self::Forbidden { .. } => 403,
            Self::NotImplemented { .. } => 501,
            Self::Configuration { .. }
            | Self::Dropped { .. }
            | Self::Http { .. }
            | Self::Serialization { .. }
            | Self::Crypto { .. }
            | Self::Platform { .. } => 500,
        }
    }

    /// True when the completion callback should be invoked with no payload
    /// despite the failure.
    pub fn is_drop(&self) -> bool {
        matches!(self, Self::Dropped { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        assert_eq!(FrameworkError::unauthorized("x").code(), 401);
        assert_eq!(FrameworkError::forbidden("x").code(), 403);
        assert_eq!(FrameworkError::not_implemented("x").code(), 501);
        assert_eq!(FrameworkError::configuration("x").code(), 500);
        assert_eq!(FrameworkError::dropped("x").code(), 500);
    }

    #[test]
    fn only_dropped_errors_carry_the_drop_flag() {
        assert!(FrameworkError::dropped("expired message").is_drop());
        assert!(!FrameworkError::forbidden("nope").is_drop());
        assert!(!FrameworkError::platform("boom").is_drop());
    }

    #[test]
    fn wrapped_errors_keep_their_source() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let wrapped = FrameworkError::wrap(inner);
        assert_eq!(wrapped.code(), 500);
        assert!(std::error::Error::source(&wrapped).is_some());
    }
}
