//! Typed, lazily-resolved configuration values and the handler chain that
//! resolves them.
//!
//! A [`Property`] declares a key, a kind and an optional default; it never
//! caches its own result. Resolution goes through a [`PropertyHandler`]:
//! plain environment lookup, managed-identity-backed remote stores (vault,
//! app-configuration) or the TTL memoization decorator in [`cache`].

pub mod cache;
pub mod managed;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::errors::{FrameworkError, FrameworkResult};

pub use cache::{CachePropertyHandler, CacheTtl, CacheUnit, CachedProperty};
pub use managed::{AppConfigPropertyHandler, ManagedIdentitySource, VaultPropertyHandler};

/// Environment key holding the JSON handler descriptor.
pub const PROPERTY_HANDLER_KEY: &str = "core.property.handler";
/// Environment flag forcing the plain environment handler, whatever the
/// descriptor says.
pub const LOCAL_DEVELOPMENT_KEY: &str = "core.local.development";

/// Value kinds a property can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    String,
    Bool,
    Number,
    Json,
}

/// A resolved property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    String(String),
    Bool(bool),
    Number(f64),
    Json(Value),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Declared configuration value, resolved on demand through a handler.
///
/// Immutable after construction. Caching is the handler's responsibility,
/// never the property's.
#[derive(Debug, Clone)]
pub struct Property {
    key: String,
    kind: PropertyKind,
    default: Option<PropertyValue>,
}

impl Property {
    pub fn string(key: impl Into<String>) -> Self {
        Self::new(key, PropertyKind::String)
    }

    pub fn boolean(key: impl Into<String>) -> Self {
        Self::new(key, PropertyKind::Bool)
    }

    pub fn number(key: impl Into<String>) -> Self {
        Self::new(key, PropertyKind::Number)
    }

    pub fn json(key: impl Into<String>) -> Self {
        Self::new(key, PropertyKind::Json)
    }

    fn new(key: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            key: key.into(),
            kind,
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<PropertyValue>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    /// Resolve through `handler`. A missing key yields the declared default
    /// (or `None`); raw text that does not parse as the declared kind is a
    /// configuration error.
    pub async fn resolve(
        &self,
        handler: &dyn PropertyHandler,
    ) -> FrameworkResult<Option<PropertyValue>> {
        match handler.get_property(&self.key).await? {
            None => Ok(self.default.clone()),
            Some(raw) => self.parse(&raw).map(Some),
        }
    }

    fn parse(&self, raw: &str) -> FrameworkResult<PropertyValue> {
        match self.kind {
            PropertyKind::String => Ok(PropertyValue::String(raw.to_string())),
            PropertyKind::Bool => raw
                .trim()
                .to_ascii_lowercase()
                .parse::<bool>()
                .map(PropertyValue::Bool)
                .map_err(|_| {
                    FrameworkError::configuration(format!(
                        "property '{}' is not a boolean: {raw}",
                        self.key
                    ))
                }),
            PropertyKind::Number => raw
                .trim()
                .parse::<f64>()
                .map(PropertyValue::Number)
                .map_err(|_| {
                    FrameworkError::configuration(format!(
                        "property '{}' is not a number: {raw}",
                        self.key
                    ))
                }),
            PropertyKind::Json => serde_json::from_str::<Value>(raw)
                .map(PropertyValue::Json)
                .map_err(|error| {
                    FrameworkError::configuration(format!(
                        "property '{}' is not valid JSON: {error}",
                        self.key
                    ))
                }),
        }
    }
}

/// Pluggable configuration backend.
#[async_trait]
pub trait PropertyHandler: Send + Sync + std::fmt::Debug {
    /// Short name for log events.
    fn name(&self) -> &'static str;

    /// Returns true only on the first successful initialization (or when
    /// `force` is set); subsequent calls are no-ops returning false. This
    /// lets the configuration distinguish cold start from warm reuse.
    async fn initialize(&self, force: bool) -> FrameworkResult<bool>;

    /// Raw string lookup. Never fails for a missing key; that is `Ok(None)`.
    async fn get_property(&self, key: &str) -> FrameworkResult<Option<String>>;
}

/// Direct process-environment lookup.
#[derive(Debug, Default)]
pub struct EnvironmentPropertyHandler {
    initialized: AtomicBool,
}

impl EnvironmentPropertyHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PropertyHandler for EnvironmentPropertyHandler {
    fn name(&self) -> &'static str {
        "environment"
    }

    async fn initialize(&self, force: bool) -> FrameworkResult<bool> {
        if force {
            self.initialized.store(true, Ordering::SeqCst);
            return Ok(true);
        }
        Ok(!self.initialized.swap(true, Ordering::SeqCst))
    }

    async fn get_property(&self, key: &str) -> FrameworkResult<Option<String>> {
        match std::env::var(key) {
            Ok(value) => Ok(Some(value)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => Err(FrameworkError::configuration(format!(
                "environment variable '{key}' is not valid unicode"
            ))),
        }
    }
}

/// JSON descriptor selecting the active handler, read from
/// [`PROPERTY_HANDLER_KEY`].
#[derive(Debug, Deserialize)]
#[serde(tag = "_type", rename_all = "lowercase")]
enum HandlerDescriptor {
    Environment {
        #[serde(default)]
        cache: Option<CacheTtl>,
    },
    Vault {
        #[serde(default)]
        cache: Option<CacheTtl>,
        #[serde(default)]
        resource: Option<String>,
    },
    AppConfig {
        #[serde(default)]
        cache: Option<CacheTtl>,
        endpoint: String,
        #[serde(default)]
        label: Option<String>,
    },
}

impl HandlerDescriptor {
    fn build(self) -> Arc<dyn PropertyHandler> {
        let (cache, inner): (Option<CacheTtl>, Arc<dyn PropertyHandler>) = match self {
            Self::Environment { cache } => (cache, Arc::new(EnvironmentPropertyHandler::new())),
            Self::Vault { cache, resource } => (cache, Arc::new(VaultPropertyHandler::new(resource))),
            Self::AppConfig {
                cache,
                endpoint,
                label,
            } => (cache, Arc::new(AppConfigPropertyHandler::new(endpoint, label))),
        };
        match cache {
            Some(ttl) => Arc::new(CachePropertyHandler::with_ttl(inner, ttl)),
            None => inner,
        }
    }
}

/// Resolve the active handler from the process environment: the descriptor
/// under [`PROPERTY_HANDLER_KEY`] when present, the plain environment handler
/// otherwise. The [`LOCAL_DEVELOPMENT_KEY`] flag overrides everything.
pub fn handler_from_environment() -> FrameworkResult<Arc<dyn PropertyHandler>> {
    if local_development() {
        debug!("local development flag set, using environment handler");
        return Ok(Arc::new(EnvironmentPropertyHandler::new()));
    }
    match std::env::var(PROPERTY_HANDLER_KEY) {
        Err(_) => Ok(Arc::new(EnvironmentPropertyHandler::new())),
        Ok(raw) => {
            let descriptor: HandlerDescriptor = serde_json::from_str(&raw).map_err(|error| {
                FrameworkError::configuration(format!(
                    "invalid {PROPERTY_HANDLER_KEY} descriptor: {error}"
                ))
            })?;
            let handler = descriptor.build();
            debug!(handler = handler.name(), "property handler resolved from descriptor");
            Ok(handler)
        }
    }
}

fn local_development() -> bool {
    std::env::var(LOCAL_DEVELOPMENT_KEY)
        .map(|value| value.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[tokio::test]
    async fn environment_handler_initializes_exactly_once() {
        let handler = EnvironmentPropertyHandler::new();
        assert!(handler.initialize(false).await.unwrap());
        assert!(!handler.initialize(false).await.unwrap());
        assert!(handler.initialize(true).await.unwrap());
    }

    #[tokio::test]
    #[serial]
    async fn missing_keys_resolve_to_the_default() {
        std::env::remove_var("fnguard.test.absent");
        let handler = EnvironmentPropertyHandler::new();

        let bare = Property::string("fnguard.test.absent");
        assert_eq!(bare.resolve(&handler).await.unwrap(), None);

        let defaulted = Property::string("fnguard.test.absent").with_default("fallback");
        assert_eq!(
            defaulted.resolve(&handler).await.unwrap(),
            Some(PropertyValue::String("fallback".to_string()))
        );
    }

    #[tokio::test]
    #[serial]
    async fn properties_parse_their_declared_kind() {
        std::env::set_var("fnguard.test.flag", "TRUE");
        std::env::set_var("fnguard.test.limit", "12.5");
        std::env::set_var("fnguard.test.doc", r#"{"a": 1}"#);

        let handler = EnvironmentPropertyHandler::new();
        assert_eq!(
            Property::boolean("fnguard.test.flag")
                .resolve(&handler)
                .await
                .unwrap(),
            Some(PropertyValue::Bool(true))
        );
        assert_eq!(
            Property::number("fnguard.test.limit")
                .resolve(&handler)
                .await
                .unwrap(),
            Some(PropertyValue::Number(12.5))
        );
        let doc = Property::json("fnguard.test.doc")
            .resolve(&handler)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.as_json().unwrap()["a"], 1);
    }

    #[tokio::test]
    #[serial]
    async fn unparseable_values_are_configuration_errors() {
        std::env::set_var("fnguard.test.bad_flag", "not-a-bool");
        let handler = EnvironmentPropertyHandler::new();
        let error = Property::boolean("fnguard.test.bad_flag")
            .resolve(&handler)
            .await
            .unwrap_err();
        assert!(matches!(error, FrameworkError::Configuration { .. }));
    }

    #[test]
    #[serial]
    fn local_development_overrides_the_descriptor() {
        std::env::set_var(LOCAL_DEVELOPMENT_KEY, "true");
        std::env::set_var(PROPERTY_HANDLER_KEY, r#"{"_type": "vault"}"#);
        let handler = handler_from_environment().unwrap();
        assert_eq!(handler.name(), "environment");
        std::env::remove_var(LOCAL_DEVELOPMENT_KEY);
        std::env::remove_var(PROPERTY_HANDLER_KEY);
    }

    #[test]
    #[serial]
    fn descriptor_selects_and_wraps_the_handler() {
        std::env::remove_var(LOCAL_DEVELOPMENT_KEY);

        std::env::set_var(PROPERTY_HANDLER_KEY, r#"{"_type": "environment"}"#);
        assert_eq!(handler_from_environment().unwrap().name(), "environment");

        std::env::set_var(
            PROPERTY_HANDLER_KEY,
            r#"{"_type": "environment", "cache": {"ttl": 30}}"#,
        );
        assert_eq!(handler_from_environment().unwrap().name(), "cache");

        std::env::set_var(PROPERTY_HANDLER_KEY, "{not json");
        assert!(matches!(
            handler_from_environment().unwrap_err(),
            FrameworkError::Configuration { .. }
        ));
        std::env::remove_var(PROPERTY_HANDLER_KEY);
    }

    #[test]
    #[serial]
    fn absent_descriptor_defaults_to_environment() {
        std::env::remove_var(LOCAL_DEVELOPMENT_KEY);
        std::env::remove_var(PROPERTY_HANDLER_KEY);
        assert_eq!(handler_from_environment().unwrap().name(), "environment");
    }
}
