//! Aggregate, lazily-loaded settings for one function application.
//!
//! [`Configuration`] is a typed bag with explicit fields per concern rather
//! than a stringly-keyed map: the property handler, declared properties,
//! application authorizations, resource registrations and function roles
//! each have their own slot. `load` drives the single
//! {unloaded} -> {loaded} transition; the runtime owns the loaded instance
//! for the life of the process (warm starts reuse it).

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info};

use crate::authorization::{ApplicationAuthorizationSpec, FunctionRole, FunctionRoleSpec};
use crate::crypto::Cryptography;
use crate::errors::{FrameworkError, FrameworkResult};
use crate::properties::{self, Property, PropertyHandler, PropertyValue};

/// Configuration key carrying JSON-declared application authorizations.
pub const APPLICATION_AUTHORIZATION_KEY: &str = "core.authorization.application";
/// Configuration key carrying resource audiences for the local identity.
pub const RESOURCE_AUTHORIZATION_KEY: &str = "core.authorization.resource";
/// Configuration key carrying JSON-declared function roles.
pub const FUNCTION_ROLES_KEY: &str = "core.function.roles";

enum NameSource {
    Literal(String),
    Property(Property),
}

/// Process-wide settings aggregate.
pub struct Configuration {
    name_source: NameSource,
    name: Option<String>,
    handler: Option<Arc<dyn PropertyHandler>>,
    declared_properties: Vec<Property>,
    declared_authorizations: Vec<ApplicationAuthorizationSpec>,
    declared_resources: Vec<String>,
    declared_roles: Vec<FunctionRole>,
    session_cipher: Option<Arc<Cryptography>>,
    values: HashMap<String, PropertyValue>,
    authorizations: Vec<ApplicationAuthorizationSpec>,
    resource_authorizations: Vec<String>,
    roles: Vec<FunctionRole>,
    loaded: bool,
}

impl Configuration {
    /// Configuration with a literal name.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_name_source(NameSource::Literal(name.into()))
    }

    /// Configuration whose name resolves through the property handler.
    pub fn from_property(name: Property) -> Self {
        Self::with_name_source(NameSource::Property(name))
    }

    fn with_name_source(name_source: NameSource) -> Self {
        Self {
            name_source,
            name: None,
            handler: None,
            declared_properties: Vec::new(),
            declared_authorizations: Vec::new(),
            declared_resources: Vec::new(),
            declared_roles: Vec::new(),
            session_cipher: None,
            values: HashMap::new(),
            authorizations: Vec::new(),
            resource_authorizations: Vec::new(),
            roles: Vec::new(),
            loaded: false,
        }
    }

    /// Use an explicit handler instead of resolving one from the
    /// environment descriptor.
    pub fn with_property_handler(mut self, handler: Arc<dyn PropertyHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Declare a property to resolve during load.
    pub fn with_property(mut self, property: Property) -> Self {
        self.declared_properties.push(property);
        self
    }

    /// Register an application authorization.
    pub fn with_authorization(mut self, spec: ApplicationAuthorizationSpec) -> Self {
        self.declared_authorizations.push(spec);
        self
    }

    /// Register a resource audience on the local managed identity.
    pub fn with_resource_authorization(mut self, resource: impl Into<String>) -> Self {
        self.declared_resources.push(resource.into());
        self
    }

    /// Register a function role.
    pub fn with_role(mut self, role: FunctionRole) -> Self {
        self.declared_roles.push(role);
        self
    }

    /// Cipher used for sealed session values.
    pub fn with_session_cipher(mut self, cipher: Cryptography) -> Self {
        self.session_cipher = Some(Arc::new(cipher));
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn loaded(&self) -> bool {
        self.loaded
    }

    pub fn handler(&self) -> Option<Arc<dyn PropertyHandler>> {
        self.handler.clone()
    }

    /// Resolved value of a declared property.
    pub fn value(&self, key: &str) -> Option<&PropertyValue> {
        self.values.get(key)
    }

    pub fn authorizations(&self) -> &[ApplicationAuthorizationSpec] {
        &self.authorizations
    }

    pub fn resource_authorizations(&self) -> &[String] {
        &self.resource_authorizations
    }

    pub fn roles(&self) -> &[FunctionRole] {
        &self.roles
    }

    pub fn session_cipher(&self) -> Option<Arc<Cryptography>> {
        self.session_cipher.clone()
    }

    /// Drive the {unloaded} -> {loaded} transition.
    ///
    /// Resolves the active handler (explicit, environment descriptor, or the
    /// environment default), initializes it, then resolves every declared
    /// property and the JSON-declared authorization/role keys concurrently.
    /// All-or-nothing: one failed resolution rejects the whole load. A
    /// second call on a loaded instance whose handler reports itself
    /// initialized is a no-op.
    pub async fn load(&mut self) -> FrameworkResult<()> {
        let handler = match &self.handler {
            Some(handler) => handler.clone(),
            None => {
                let handler = properties::handler_from_environment()?;
                self.handler = Some(handler.clone());
                handler
            }
        };

        let first = handler.initialize(false).await?;
        if self.loaded && !first {
            debug!(name = self.name.as_deref().unwrap_or(""), "configuration already loaded");
            return Ok(());
        }

        let handler_ref = handler.as_ref();

        let resolve_name = async {
            match &self.name_source {
                NameSource::Literal(name) => Ok::<String, FrameworkError>(name.clone()),
                NameSource::Property(property) => {
                    match property.resolve(handler_ref).await? {
                        Some(PropertyValue::String(name)) => Ok(name),
                        Some(other) => Err(FrameworkError::configuration(format!(
                            "name property '{}' resolved to a non-string value: {other:?}",
                            property.key()
                        ))),
                        None => Ok(String::new()),
                    }
                }
            }
        };

        let resolve_declared = try_join_all(self.declared_properties.iter().map(|property| async move {
            let value = property.resolve(handler_ref).await?;
            Ok::<(String, Option<PropertyValue>), FrameworkError>((
                property.key().to_string(),
                value,
            ))
        }));

        let (name, declared, applications, resources, roles) = tokio::try_join!(
            resolve_name,
            resolve_declared,
            handler_ref.get_property(APPLICATION_AUTHORIZATION_KEY),
            handler_ref.get_property(RESOURCE_AUTHORIZATION_KEY),
            handler_ref.get_property(FUNCTION_ROLES_KEY),
        )?;

        if name.is_empty() {
            return Err(FrameworkError::configuration(
                "configuration name is empty after load",
            ));
        }

        let mut values = HashMap::new();
        for (key, value) in declared {
            if let Some(value) = value {
                values.insert(key, value);
            }
        }

        let mut authorizations = self.declared_authorizations.clone();
        if let Some(raw) = applications {
            let parsed: Vec<ApplicationAuthorizationSpec> =
                serde_json::from_str(&raw).map_err(|error| {
                    FrameworkError::configuration(format!(
                        "invalid {APPLICATION_AUTHORIZATION_KEY}: {error}"
                    ))
                })?;
            authorizations.extend(parsed);
        }

        let mut resource_authorizations = self.declared_resources.clone();
        if let Some(raw) = resources {
            let parsed: Vec<String> = serde_json::from_str(&raw).map_err(|error| {
                FrameworkError::configuration(format!(
                    "invalid {RESOURCE_AUTHORIZATION_KEY}: {error}"
                ))
            })?;
            resource_authorizations.extend(parsed);
        }

        let mut function_roles = self.declared_roles.clone();
        if let Some(raw) = roles {
            let parsed: Vec<FunctionRoleSpec> = serde_json::from_str(&raw).map_err(|error| {
                FrameworkError::configuration(format!("invalid {FUNCTION_ROLES_KEY}: {error}"))
            })?;
            function_roles.extend(parsed.into_iter().map(FunctionRole::from_spec));
        }

        self.name = Some(name);
        self.values = values;
        self.authorizations = authorizations;
        self.resource_authorizations = resource_authorizations;
        self.roles = function_roles;
        self.loaded = true;
        info!(
            name = self.name.as_deref().unwrap_or(""),
            properties = self.values.len(),
            authorizations = self.authorizations.len(),
            roles = self.roles.len(),
            "configuration loaded"
        );
        Ok(())
    }
}
