//! The fixed lifecycle pipeline and its driver.
//!
//! One invocation runs `initialize -> authenticate -> authorize -> validate
//! -> load -> (monitor | process) -> save`; a failure at any stage
//! short-circuits to the `exception` hook, and `terminate` always runs
//! before the platform completion callback fires. Stages execute strictly
//! sequentially.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::configuration::Configuration;
use crate::context::Context;
use crate::errors::{FrameworkError, FrameworkResult};
use crate::platform::{Outcome, PlatformContext};
use crate::sentry::Sentry;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStage {
    Bootstrap,
    Initialize,
    Authenticate,
    Authorize,
    Validate,
    Load,
    Monitor,
    Process,
    Save,
    Exception,
    Terminate,
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bootstrap => "bootstrap",
            Self::Initialize => "initialize",
            Self::Authenticate => "authenticate",
            Self::Authorize => "authorize",
            Self::Validate => "validate",
            Self::Load => "load",
            Self::Monitor => "monitor",
            Self::Process => "process",
            Self::Save => "save",
            Self::Exception => "exception",
            Self::Terminate => "terminate",
        };
        f.write_str(name)
    }
}

/// Hooks a function implementation plugs into the pipeline.
///
/// `process` is the only required hook; every optional hook defaults to a
/// no-op rather than an error.
#[async_trait]
pub trait Function: Send + Sync {
    /// Per-invocation setup before authentication.
    async fn initialize(&self, _context: &mut Context) -> FrameworkResult<()> {
        Ok(())
    }

    /// Request validation, after authorization has passed.
    async fn validate(&self, _context: &mut Context) -> FrameworkResult<()> {
        Ok(())
    }

    /// Load any state the processing stage needs.
    async fn load(&self, _context: &mut Context) -> FrameworkResult<()> {
        Ok(())
    }

    /// Monitor branch. The default records a passing liveness diagnostic.
    async fn monitor(&self, context: &mut Context) -> FrameworkResult<()> {
        context
            .monitor_response_mut()
            .add_passed("lifecycle", "function is reachable");
        Ok(())
    }

    /// The unit of work.
    async fn process(&self, context: &mut Context) -> FrameworkResult<()>;

    /// Persist any state the processing stage produced.
    async fn save(&self, _context: &mut Context) -> FrameworkResult<()> {
        Ok(())
    }

    /// Single recovery point for any stage failure. The default logs the
    /// error; adapters override this to shape their response.
    async fn exception(&self, context: &mut Context, error: &FrameworkError) -> FrameworkResult<()> {
        error!(
            request = %context.request_id(),
            code = error.code(),
            "invocation failed: {error}"
        );
        Ok(())
    }

    /// Unconditional cleanup, run after success, failure and exception
    /// handling alike.
    async fn terminate(&self, _context: &mut Context) -> FrameworkResult<()> {
        Ok(())
    }
}

/// Initialized process-wide handle: bootstrap once, execute per invocation.
///
/// The host owns this handle and decides reuse (warm start) versus
/// recreation; a second `execute` performs no configuration work.
pub struct FunctionRuntime {
    configuration: Configuration,
    sentry: Arc<Sentry>,
}

impl FunctionRuntime {
    /// One-time process bootstrap: load the configuration, build the sentry
    /// and eagerly warm its authorizations.
    pub async fn bootstrap(configuration: Configuration) -> FrameworkResult<Self> {
        Self::bootstrap_with(configuration, |sentry| sentry).await
    }

    /// Bootstrap with a customization pass over the sentry, for hosts that
    /// plug in their own authenticator or role resolver.
    pub async fn bootstrap_with(
        mut configuration: Configuration,
        customize: impl FnOnce(Sentry) -> Sentry,
    ) -> FrameworkResult<Self> {
        debug!(stage = %LifecycleStage::Bootstrap, "bootstrapping function runtime");
        configuration.load().await?;
        let sentry = customize(Sentry::build(&configuration)?);
        sentry.initialize().await?;
        Ok(Self {
            configuration,
            sentry: Arc::new(sentry),
        })
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn sentry(&self) -> &Sentry {
        &self.sentry
    }

    /// Drive one invocation through the pipeline and complete it through
    /// the platform callback. Returns the outcome that was reported.
    pub async fn execute(
        &self,
        function: &dyn Function,
        platform: &dyn PlatformContext,
    ) -> Outcome {
        let mut context = Context::from_platform(
            platform,
            self.configuration.session_cipher(),
            Some(self.sentry.clone()),
        );
        debug!(
            request = %context.request_id(),
            invocation = %context.invocation_id(),
            action = %context.action(),
            monitor = context.monitor(),
            "invocation started"
        );

        let pipeline = self.run_stages(function, &mut context).await;

        if let Err(error) = &pipeline {
            if let Err(hook_error) = function.exception(&mut context, error).await {
                warn!(
                    request = %context.request_id(),
                    stage = %LifecycleStage::Exception,
                    "exception hook failed: {hook_error}"
                );
            }
        }
        if let Err(terminate_error) = function.terminate(&mut context).await {
            warn!(
                request = %context.request_id(),
                stage = %LifecycleStage::Terminate,
                "terminate failed: {terminate_error}"
            );
        }

        let outcome = match pipeline {
            Ok(()) => Outcome::Success,
            Err(error) if error.is_drop() => {
                debug!(request = %context.request_id(), "invocation dropped: {error}");
                Outcome::Dropped
            }
            Err(error) => Outcome::Failure(error),
        };
        platform.complete(&outcome).await;
        outcome
    }

    async fn run_stages(
        &self,
        function: &dyn Function,
        context: &mut Context,
    ) -> FrameworkResult<()> {
        debug!(stage = %LifecycleStage::Initialize, request = %context.request_id(), "stage");
        function.initialize(context).await?;

        debug!(stage = %LifecycleStage::Authenticate, request = %context.request_id(), "stage");
        let subject = self.sentry.authenticate(context).await?;
        context.set_subject(subject);

        debug!(stage = %LifecycleStage::Authorize, request = %context.request_id(), "stage");
        self.sentry.authorize(context)?;

        debug!(stage = %LifecycleStage::Validate, request = %context.request_id(), "stage");
        function.validate(context).await?;

        debug!(stage = %LifecycleStage::Load, request = %context.request_id(), "stage");
        function.load(context).await?;

        if context.monitor() {
            debug!(stage = %LifecycleStage::Monitor, request = %context.request_id(), "stage");
            function.monitor(context).await?;
        } else {
            debug!(stage = %LifecycleStage::Process, request = %context.request_id(), "stage");
            function.process(context).await?;
        }

        debug!(stage = %LifecycleStage::Save, request = %context.request_id(), "stage");
        function.save(context).await?;
        Ok(())
    }
}

/// Fallback for failures before a context exists (a failed bootstrap):
/// bypass the lifecycle and report straight through the platform completion
/// callback.
pub async fn report_unhandled(platform: &dyn PlatformContext, error: FrameworkError) -> Outcome {
    error!(
        invocation = %platform.invocation_id(),
        stage = %LifecycleStage::Bootstrap,
        code = error.code(),
        "unhandled failure: {error}"
    );
    let outcome = if error.is_drop() {
        Outcome::Dropped
    } else {
        Outcome::Failure(error)
    };
    platform.complete(&outcome).await;
    outcome
}
