//! Per-invocation state.
//!
//! A [`Context`] is created fresh for every invocation and discarded
//! afterwards; it owns no cross-invocation state. The [`Subject`] is
//! established once by the sentry during the authenticate stage.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::crypto::Cryptography;
use crate::errors::{FrameworkError, FrameworkResult};
use crate::platform::PlatformContext;
use crate::sentry::Sentry;

/// Default lifecycle action when the trigger adapter requests none.
pub const DEFAULT_ACTION: &str = "process";

/// Authenticated caller of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    id: String,
    roles: HashSet<String>,
}

impl Subject {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: HashSet::new(),
        }
    }

    pub fn with_roles(
        id: impl Into<String>,
        roles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id: id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn roles(&self) -> &HashSet<String> {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn add_role(&mut self, role: impl Into<String>) {
        self.roles.insert(role.into());
    }

    pub fn add_roles(&mut self, roles: impl IntoIterator<Item = impl Into<String>>) {
        self.roles.extend(roles.into_iter().map(Into::into));
    }
}

/// Diagnostics collected by the monitor branch of the lifecycle.
#[derive(Debug, Default, Clone)]
pub struct MonitorResponse {
    passed: HashMap<String, String>,
    failed: HashMap<String, String>,
}

impl MonitorResponse {
    pub fn add_passed(&mut self, name: impl Into<String>, message: impl Into<String>) {
        self.passed.insert(name.into(), message.into());
    }

    pub fn add_failed(&mut self, name: impl Into<String>, message: impl Into<String>) {
        self.failed.insert(name.into(), message.into());
    }

    pub fn passed(&self) -> &HashMap<String, String> {
        &self.passed
    }

    pub fn failed(&self) -> &HashMap<String, String> {
        &self.failed
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Summary line for the monitoring probe response.
    pub fn result(&self) -> String {
        if self.failed.is_empty() {
            format!("passed {} diagnostics", self.passed.len())
        } else {
            let mut names: Vec<&str> = self.failed.keys().map(String::as_str).collect();
            names.sort_unstable();
            format!(
                "failed {} of {} diagnostics: {}",
                self.failed.len(),
                self.failed.len() + self.passed.len(),
                names.join(", ")
            )
        }
    }
}

/// Invocation-scoped state holder threaded through every lifecycle stage.
pub struct Context {
    request_id: Uuid,
    invocation_id: String,
    trace_id: Option<String>,
    action: String,
    monitor: bool,
    subject: Option<Subject>,
    monitor_response: MonitorResponse,
    session: HashMap<String, Value>,
    cipher: Option<Arc<Cryptography>>,
    sentry: Option<Arc<Sentry>>,
    started_at: DateTime<Utc>,
}

impl Context {
    /// Bare context for adapters and tests; the runtime builds one from the
    /// platform for every invocation.
    pub fn new(invocation_id: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            invocation_id: invocation_id.into(),
            trace_id: None,
            action: DEFAULT_ACTION.to_string(),
            monitor: false,
            subject: None,
            monitor_response: MonitorResponse::default(),
            session: HashMap::new(),
            cipher: None,
            sentry: None,
            started_at: Utc::now(),
        }
    }

    pub(crate) fn from_platform(
        platform: &dyn PlatformContext,
        cipher: Option<Arc<Cryptography>>,
        sentry: Option<Arc<Sentry>>,
    ) -> Self {
        let mut context = Self::new(platform.invocation_id());
        context.trace_id = platform.trace_id();
        context.action = platform
            .action()
            .map(|action| action.to_ascii_lowercase())
            .unwrap_or_else(|| DEFAULT_ACTION.to_string());
        context.monitor = platform.monitor();
        context.cipher = cipher;
        context.sentry = sentry;
        context
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into().to_ascii_lowercase();
        self
    }

    pub fn with_monitor(mut self, monitor: bool) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn monitor(&self) -> bool {
        self.monitor
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// The process-wide sentry, wired in by the runtime for every
    /// invocation it drives.
    pub fn sentry(&self) -> Option<&Sentry> {
        self.sentry.as_deref()
    }

    pub fn with_sentry(mut self, sentry: Arc<Sentry>) -> Self {
        self.sentry = Some(sentry);
        self
    }

    /// Issue a token for `resource` through the wired sentry, defaulting to
    /// the local application identity.
    pub async fn authorization_token(
        &self,
        resource: &str,
        application: Option<&str>,
    ) -> FrameworkResult<String> {
        let sentry = self.sentry.as_deref().ok_or_else(|| {
            FrameworkError::configuration("context has no sentry wired")
        })?;
        sentry.authorization_token(resource, application).await
    }

    pub fn subject(&self) -> Option<&Subject> {
        self.subject.as_ref()
    }

    pub fn set_subject(&mut self, subject: Subject) {
        self.subject = Some(subject);
    }

    pub fn monitor_response(&self) -> &MonitorResponse {
        &self.monitor_response
    }

    pub fn monitor_response_mut(&mut self) -> &mut MonitorResponse {
        &mut self.monitor_response
    }

    pub fn session_value(&self, key: &str) -> Option<&Value> {
        self.session.get(key)
    }

    pub fn set_session_value(&mut self, key: impl Into<String>, value: Value) {
        self.session.insert(key.into(), value);
    }

    /// Seal a sensitive value into the session bag. Requires a session
    /// cipher on the configuration.
    pub fn set_sealed_session_value(
        &mut self,
        key: impl Into<String>,
        value: &str,
    ) -> FrameworkResult<()> {
        let cipher = self.cipher.as_ref().ok_or_else(|| {
            FrameworkError::configuration("no session cipher configured")
        })?;
        let sealed = cipher.seal(value)?;
        self.session.insert(key.into(), Value::String(sealed));
        Ok(())
    }

    /// Unseal a value stored with [`Self::set_sealed_session_value`].
    pub fn sealed_session_value(&self, key: &str) -> FrameworkResult<Option<String>> {
        let Some(value) = self.session.get(key) else {
            return Ok(None);
        };
        let cipher = self.cipher.as_ref().ok_or_else(|| {
            FrameworkError::configuration("no session cipher configured")
        })?;
        let sealed = value.as_str().ok_or_else(|| {
            FrameworkError::crypto(format!("session value '{key}' is not a sealed string"))
        })?;
        cipher.unseal(sealed).map(Some)
    }
}
