//! TTL memoization decorator for property handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use super::{Property, PropertyHandler};
use crate::errors::{FrameworkError, FrameworkResult};

/// Control key: default TTL amount, read from the wrapped handler.
pub const CACHE_TTL_KEY: &str = "core.property.cache.ttl";
/// Control key: default TTL unit.
pub const CACHE_UNIT_KEY: &str = "core.property.cache.unit";
/// Control key: JSON descriptor of per-key TTL overrides.
pub const CACHE_OVERRIDES_KEY: &str = "core.property.cache.overrides";

const DEFAULT_TTL_SECONDS: i64 = 300;

/// Time unit for cache TTLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheUnit {
    Milliseconds,
    #[default]
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl std::str::FromStr for CacheUnit {
    type Err = FrameworkError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "millisecond" | "milliseconds" => Ok(Self::Milliseconds),
            "second" | "seconds" => Ok(Self::Seconds),
            "minute" | "minutes" => Ok(Self::Minutes),
            "hour" | "hours" => Ok(Self::Hours),
            "day" | "days" => Ok(Self::Days),
            other => Err(FrameworkError::configuration(format!(
                "unknown cache unit: {other}"
            ))),
        }
    }
}

/// Cache lifetime. An amount of zero means "never cached".
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CacheTtl {
    #[serde(rename = "ttl")]
    pub amount: i64,
    #[serde(default)]
    pub unit: CacheUnit,
}

impl CacheTtl {
    pub const fn new(amount: i64, unit: CacheUnit) -> Self {
        Self { amount, unit }
    }

    pub const fn seconds(amount: i64) -> Self {
        Self::new(amount, CacheUnit::Seconds)
    }

    fn duration(&self) -> Duration {
        match self.unit {
            CacheUnit::Milliseconds => Duration::milliseconds(self.amount),
            CacheUnit::Seconds => Duration::seconds(self.amount),
            CacheUnit::Minutes => Duration::minutes(self.amount),
            CacheUnit::Hours => Duration::hours(self.amount),
            CacheUnit::Days => Duration::days(self.amount),
        }
    }
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self::seconds(DEFAULT_TTL_SECONDS)
    }
}

/// One memoized property value.
#[derive(Debug, Clone)]
pub struct CachedProperty {
    value: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    last_updated: Option<DateTime<Utc>>,
    ttl: CacheTtl,
}

impl CachedProperty {
    pub fn new(ttl: CacheTtl) -> Self {
        Self {
            value: None,
            expires_at: None,
            last_updated: None,
            ttl,
        }
    }

    /// True when the entry was never stamped, or its expiry moment has
    /// passed. A zero TTL is always expired regardless of elapsed time.
    pub fn is_expired(&self) -> bool {
        if self.ttl.amount == 0 {
            return true;
        }
        match self.expires_at {
            None => true,
            Some(expires_at) => Utc::now() >= expires_at,
        }
    }

    /// Stamp a freshly fetched value. Missing keys are stored too, so a
    /// negative lookup is memoized like any other.
    pub fn store(&mut self, value: Option<String>) {
        let now = Utc::now();
        self.value = value;
        self.last_updated = Some(now);
        self.expires_at = Some(now + self.ttl.duration());
    }

    /// Reset to the uninitialized state.
    pub fn clear(&mut self) {
        self.value = None;
        self.expires_at = None;
        self.last_updated = None;
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn ttl(&self) -> CacheTtl {
        self.ttl
    }
}

#[derive(Debug)]
struct CacheDefaults {
    ttl: CacheTtl,
    overrides: HashMap<String, CacheTtl>,
}

/// Memoizing decorator over any [`PropertyHandler`].
///
/// On first initialize it reads its own defaults and per-key overrides from
/// the wrapped handler (see the `core.property.cache.*` control keys).
#[derive(Debug)]
pub struct CachePropertyHandler {
    inner: Arc<dyn PropertyHandler>,
    base_ttl: CacheTtl,
    entries: RwLock<HashMap<String, CachedProperty>>,
    defaults: RwLock<CacheDefaults>,
    initialized: AtomicBool,
}

impl CachePropertyHandler {
    pub fn new(inner: Arc<dyn PropertyHandler>) -> Self {
        Self::with_ttl(inner, CacheTtl::default())
    }

    /// Use `ttl` as the default lifetime when the control keys are absent.
    pub fn with_ttl(inner: Arc<dyn PropertyHandler>, ttl: CacheTtl) -> Self {
        Self {
            inner,
            base_ttl: ttl,
            entries: RwLock::new(HashMap::new()),
            defaults: RwLock::new(CacheDefaults {
                ttl,
                overrides: HashMap::new(),
            }),
            initialized: AtomicBool::new(false),
        }
    }

    /// Reset every cached entry to the uninitialized state.
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        for entry in entries.values_mut() {
            entry.clear();
        }
    }

    /// Snapshot of a cache entry, if one exists for `key`.
    pub async fn entry(&self, key: &str) -> Option<CachedProperty> {
        self.entries.read().await.get(key).cloned()
    }

    async fn load_settings(&self) -> FrameworkResult<()> {
        let inner = self.inner.as_ref();

        let amount = Property::number(CACHE_TTL_KEY)
            .resolve(inner)
            .await?
            .and_then(|value| value.as_number())
            .map(|value| value as i64)
            .unwrap_or(self.base_ttl.amount);

        let unit = match Property::string(CACHE_UNIT_KEY).resolve(inner).await? {
            Some(value) => value.as_str().unwrap_or_default().parse::<CacheUnit>()?,
            None => self.base_ttl.unit,
        };

        let overrides = match Property::json(CACHE_OVERRIDES_KEY).resolve(inner).await? {
            Some(value) => {
                let raw = value.as_json().cloned().unwrap_or_default();
                serde_json::from_value::<HashMap<String, CacheTtl>>(raw).map_err(|error| {
                    FrameworkError::configuration(format!(
                        "invalid {CACHE_OVERRIDES_KEY} descriptor: {error}"
                    ))
                })?
            }
            None => HashMap::new(),
        };

        debug!(
            ttl = amount,
            overrides = overrides.len(),
            "property cache configured"
        );
        *self.defaults.write().await = CacheDefaults {
            ttl: CacheTtl::new(amount, unit),
            overrides,
        };
        Ok(())
    }

    async fn ttl_for(&self, key: &str) -> CacheTtl {
        let defaults = self.defaults.read().await;
        defaults.overrides.get(key).copied().unwrap_or(defaults.ttl)
    }
}

#[async_trait]
impl PropertyHandler for CachePropertyHandler {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn initialize(&self, force: bool) -> FrameworkResult<bool> {
        let inner_first = self.inner.initialize(force).await?;
        let first = if force {
            self.initialized.store(true, Ordering::SeqCst);
            true
        } else {
            !self.initialized.swap(true, Ordering::SeqCst)
        };
        if first || inner_first {
            self.load_settings().await?;
        }
        Ok(first)
    }

    async fn get_property(&self, key: &str) -> FrameworkResult<Option<String>> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(key) {
                if !entry.is_expired() {
                    debug!(key, "property cache hit");
                    return Ok(entry.value().map(str::to_string));
                }
            }
        }

        let value = self.inner.get_property(key).await?;
        let ttl = self.ttl_for(key).await;
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| CachedProperty::new(ttl));
        entry.store(value.clone());
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug)]
    struct ScriptedHandler {
        values: StdHashMap<String, String>,
        fetches: AtomicUsize,
        initialized: AtomicBool,
    }

    impl ScriptedHandler {
        fn new(values: &[(&str, &str)]) -> Self {
            Self {
                values: values
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                fetches: AtomicUsize::new(0),
                initialized: AtomicBool::new(false),
            }
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PropertyHandler for ScriptedHandler {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn initialize(&self, force: bool) -> FrameworkResult<bool> {
            if force {
                self.initialized.store(true, Ordering::SeqCst);
                return Ok(true);
            }
            Ok(!self.initialized.swap(true, Ordering::SeqCst))
        }

        async fn get_property(&self, key: &str) -> FrameworkResult<Option<String>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.values.get(key).cloned())
        }
    }

    #[test]
    fn zero_ttl_is_always_expired() {
        let mut entry = CachedProperty::new(CacheTtl::seconds(0));
        assert!(entry.is_expired());
        entry.store(Some("value".to_string()));
        assert!(entry.is_expired());
    }

    #[test]
    fn unstamped_entries_are_expired() {
        let entry = CachedProperty::new(CacheTtl::seconds(3600));
        assert!(entry.is_expired());
    }

    #[test]
    fn stamped_entries_live_for_their_ttl() {
        let mut entry = CachedProperty::new(CacheTtl::seconds(3600));
        entry.store(Some("value".to_string()));
        assert!(!entry.is_expired());
        assert_eq!(entry.value(), Some("value"));
    }

    #[tokio::test]
    async fn fresh_entries_skip_the_wrapped_handler() {
        let inner = Arc::new(ScriptedHandler::new(&[("svc.key", "v1")]));
        let cache = CachePropertyHandler::new(inner.clone());
        cache.initialize(false).await.unwrap();
        let after_init = inner.fetches();

        assert_eq!(
            cache.get_property("svc.key").await.unwrap().as_deref(),
            Some("v1")
        );
        assert_eq!(
            cache.get_property("svc.key").await.unwrap().as_deref(),
            Some("v1")
        );
        assert_eq!(inner.fetches(), after_init + 1);
    }

    #[tokio::test]
    async fn missing_keys_are_memoized_too() {
        let inner = Arc::new(ScriptedHandler::new(&[]));
        let cache = CachePropertyHandler::new(inner.clone());
        cache.initialize(false).await.unwrap();
        let after_init = inner.fetches();

        assert!(cache.get_property("svc.absent").await.unwrap().is_none());
        assert!(cache.get_property("svc.absent").await.unwrap().is_none());
        assert_eq!(inner.fetches(), after_init + 1);
    }

    #[tokio::test]
    async fn control_keys_configure_defaults_and_overrides() {
        let inner = Arc::new(ScriptedHandler::new(&[
            (CACHE_TTL_KEY, "0"),
            (CACHE_OVERRIDES_KEY, r#"{"svc.pinned": {"ttl": 3600}}"#),
            ("svc.key", "v1"),
            ("svc.pinned", "p1"),
        ]));
        let cache = CachePropertyHandler::new(inner.clone());
        cache.initialize(false).await.unwrap();
        let after_init = inner.fetches();

        // default TTL of zero: every read goes through
        cache.get_property("svc.key").await.unwrap();
        cache.get_property("svc.key").await.unwrap();
        assert_eq!(inner.fetches(), after_init + 2);

        // the override pins its key for an hour
        cache.get_property("svc.pinned").await.unwrap();
        cache.get_property("svc.pinned").await.unwrap();
        assert_eq!(inner.fetches(), after_init + 3);
    }

    #[tokio::test]
    async fn clear_resets_entries_to_expired() {
        let inner = Arc::new(ScriptedHandler::new(&[("svc.key", "v1")]));
        let cache = CachePropertyHandler::new(inner.clone());
        cache.initialize(false).await.unwrap();
        cache.get_property("svc.key").await.unwrap();
        let after_first = inner.fetches();

        cache.clear().await;
        assert!(cache.entry("svc.key").await.unwrap().is_expired());
        cache.get_property("svc.key").await.unwrap();
        assert_eq!(inner.fetches(), after_first + 1);
    }

    #[tokio::test]
    async fn initialize_reports_first_call_only() {
        let inner = Arc::new(ScriptedHandler::new(&[]));
        let cache = CachePropertyHandler::new(inner);
        assert!(cache.initialize(false).await.unwrap());
        assert!(!cache.initialize(false).await.unwrap());
    }
}
