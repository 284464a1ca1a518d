//! Authentication and authorization facade.
//!
//! The sentry is built once per process from the loaded configuration and
//! reused across warm starts. It proxies token issuance to the registered
//! [`ApplicationAuthorization`]s, establishes the invocation subject through
//! a pluggable [`Authenticator`], populates roles through a pluggable
//! [`RoleResolver`], and enforces the registered function roles.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::debug;

use crate::authorization::{
    ApplicationAuthorization, ApplicationAuthorizationSpec, FunctionRole, MANAGED_IDENTITY_ID,
};
use crate::configuration::Configuration;
use crate::context::{Context, Subject};
use crate::errors::{FrameworkError, FrameworkResult};

/// Establishes the subject of an invocation.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, context: &Context) -> FrameworkResult<Subject>;
}

/// Populates the subject's roles after authentication.
#[async_trait]
pub trait RoleResolver: Send + Sync {
    async fn resolve(&self, context: &Context, subject: &mut Subject) -> FrameworkResult<()>;
}

/// Default authenticator: binds every invocation to the function's own
/// identity.
#[derive(Debug, Clone)]
pub struct LocalIdentityAuthenticator {
    identity: String,
}

impl LocalIdentityAuthenticator {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }
}

#[async_trait]
impl Authenticator for LocalIdentityAuthenticator {
    async fn authenticate(&self, _context: &Context) -> FrameworkResult<Subject> {
        Ok(Subject::new(self.identity.clone()))
    }
}

/// Default role resolver: leaves the subject's roles untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRoleResolver;

#[async_trait]
impl RoleResolver for NoopRoleResolver {
    async fn resolve(&self, _context: &Context, _subject: &mut Subject) -> FrameworkResult<()> {
        Ok(())
    }
}

/// Process-wide authentication/authorization facade.
pub struct Sentry {
    authorizations: HashMap<String, Arc<ApplicationAuthorization>>,
    local_application: Option<String>,
    roles: HashMap<String, FunctionRole>,
    authenticator: Arc<dyn Authenticator>,
    role_resolver: Arc<dyn RoleResolver>,
}

impl Sentry {
    /// Construct the sentry from a loaded configuration. Declared resource
    /// audiences attach to the local managed identity authorization,
    /// creating it when no managed authorization was declared.
    pub fn build(configuration: &Configuration) -> FrameworkResult<Self> {
        let mut built: HashMap<String, ApplicationAuthorization> = HashMap::new();
        let mut local = None;

        for spec in configuration.authorizations() {
            let authorization = ApplicationAuthorization::from_spec(spec.clone())?;
            if authorization.is_managed() && local.is_none() {
                local = Some(authorization.id().to_string());
            }
            if built.contains_key(authorization.id()) {
                return Err(FrameworkError::configuration(format!(
                    "duplicate application authorization '{}'",
                    authorization.id()
                )));
            }
            built.insert(authorization.id().to_string(), authorization);
        }

        let resources = configuration.resource_authorizations();
        if !resources.is_empty() {
            let id = local
                .clone()
                .unwrap_or_else(|| MANAGED_IDENTITY_ID.to_string());
            if !built.contains_key(&id) {
                let spec = ApplicationAuthorizationSpec::managed(Vec::<String>::new())
                    .with_id(id.clone());
                built.insert(id.clone(), ApplicationAuthorization::from_spec(spec)?);
                local = Some(id.clone());
            }
            if let Some(authorization) = built.get_mut(&id) {
                for resource in resources {
                    authorization.add_resource(resource.clone());
                }
            }
        }

        let mut roles = HashMap::new();
        for role in configuration.roles() {
            roles.insert(role.action().to_string(), role.clone());
        }

        let identity = local
            .clone()
            .unwrap_or_else(|| MANAGED_IDENTITY_ID.to_string());
        Ok(Self {
            authorizations: built
                .into_iter()
                .map(|(id, authorization)| (id, Arc::new(authorization)))
                .collect(),
            local_application: local,
            roles,
            authenticator: Arc::new(LocalIdentityAuthenticator::new(identity)),
            role_resolver: Arc::new(NoopRoleResolver),
        })
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    pub fn with_role_resolver(mut self, role_resolver: Arc<dyn RoleResolver>) -> Self {
        self.role_resolver = role_resolver;
        self
    }

    /// Eagerly warm every registered application authorization,
    /// concurrently and all-or-nothing. Runs exactly once per process, from
    /// the runtime bootstrap.
    pub async fn initialize(&self) -> FrameworkResult<()> {
        try_join_all(
            self.authorizations
                .values()
                .map(|authorization| authorization.initialize()),
        )
        .await?;
        Ok(())
    }

    /// Issue a token for `resource` on behalf of `application`, defaulting
    /// to the local identity.
    pub async fn authorization_token(
        &self,
        resource: &str,
        application: Option<&str>,
    ) -> FrameworkResult<String> {
        let id = application
            .map(str::to_string)
            .or_else(|| self.local_application.clone())
            .ok_or_else(|| {
                FrameworkError::unauthorized("no application authorization registered")
            })?;
        let authorization = self.authorizations.get(&id).ok_or_else(|| {
            FrameworkError::unauthorized(format!("application '{id}' is not registered"))
        })?;
        authorization.get_token(resource).await
    }

    /// Establish and enrich the invocation subject.
    pub async fn authenticate(&self, context: &Context) -> FrameworkResult<Subject> {
        let mut subject = self.authenticator.authenticate(context).await?;
        self.role_resolver.resolve(context, &mut subject).await?;
        debug!(
            subject = %subject.id(),
            roles = subject.roles().len(),
            "subject authenticated"
        );
        Ok(subject)
    }

    /// Enforce the role registered for the context's action. Open by
    /// default: an action with no registered role always passes.
    pub fn authorize(&self, context: &Context) -> FrameworkResult<()> {
        let Some(role) = self.roles.get(context.action()) else {
            return Ok(());
        };
        let subject = context
            .subject()
            .ok_or_else(|| FrameworkError::forbidden("no authenticated subject"))?;
        if role.authorize(context.action(), subject) {
            Ok(())
        } else {
            Err(FrameworkError::forbidden(format!(
                "subject '{}' lacks the roles required for action '{}'",
                subject.id(),
                context.action()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorization::MatchAny;
    use crate::properties::EnvironmentPropertyHandler;

    async fn loaded(configuration: Configuration) -> Configuration {
        let mut configuration =
            configuration.with_property_handler(Arc::new(EnvironmentPropertyHandler::new()));
        configuration.load().await.unwrap();
        configuration
    }

    #[tokio::test]
    async fn authorize_is_open_by_default() {
        let configuration = loaded(Configuration::new("svc")).await;
        let sentry = Sentry::build(&configuration).unwrap();
        let context = Context::new("inv-1");
        sentry.authorize(&context).unwrap();
    }

    #[tokio::test]
    async fn registered_roles_require_a_subject() {
        let configuration = loaded(
            Configuration::new("svc")
                .with_role(FunctionRole::new("process", ["admin"], Arc::new(MatchAny))),
        )
        .await;
        let sentry = Sentry::build(&configuration).unwrap();

        let context = Context::new("inv-1");
        let error = sentry.authorize(&context).unwrap_err();
        assert!(matches!(error, FrameworkError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn matching_subjects_pass_the_registered_role() {
        let configuration = loaded(
            Configuration::new("svc")
                .with_role(FunctionRole::new("process", ["admin"], Arc::new(MatchAny))),
        )
        .await;
        let sentry = Sentry::build(&configuration).unwrap();

        let mut context = Context::new("inv-1");
        context.set_subject(Subject::with_roles("ops", ["admin"]));
        sentry.authorize(&context).unwrap();

        let mut denied = Context::new("inv-2");
        denied.set_subject(Subject::with_roles("guest", ["reader"]));
        assert!(sentry.authorize(&denied).is_err());
    }

    #[tokio::test]
    async fn token_requests_for_unregistered_applications_fail() {
        let configuration = loaded(Configuration::new("svc")).await;
        let sentry = Sentry::build(&configuration).unwrap();
        let error = sentry
            .authorization_token("https://vault.azure.net", Some("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(error, FrameworkError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn default_authentication_binds_the_local_identity() {
        let configuration = loaded(Configuration::new("svc")).await;
        let sentry = Sentry::build(&configuration).unwrap();
        let subject = sentry.authenticate(&Context::new("inv-1")).await.unwrap();
        assert_eq!(subject.id(), MANAGED_IDENTITY_ID);
        assert!(subject.roles().is_empty());
    }
}
