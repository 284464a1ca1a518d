#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, future_incompatible)]
//! Security-first request lifecycle framework for serverless functions.
//!
//! `fnguard` wraps a single platform invocation and drives it through a
//! fixed pipeline: bootstrap, authenticate, authorize, validate, load,
//! process (or monitor), save, handle-exception, terminate. The heart of the
//! crate is its security and configuration subsystem: asynchronous, cached,
//! possibly-remote property resolution (environment variables, vault
//! secrets, managed-identity-backed configuration stores) combined with a
//! token-caching authorization layer (application and managed-identity OAuth
//! tokens, role-based permissioning with pluggable match strategies).
//!
//! Trigger adapters (HTTP, queue, timer) sit outside this crate: they
//! implement [`platform::PlatformContext`] over their hosting shape, hold a
//! [`function::FunctionRuntime`] across warm starts, and call
//! [`function::FunctionRuntime::execute`] per invocation.

pub mod authorization;
pub mod configuration;
pub mod context;
pub mod crypto;
pub mod errors;
pub mod function;
pub mod platform;
pub mod properties;
pub mod sentry;
pub mod telemetry;

pub use authorization::{
    ApplicationAuthorization, ApplicationAuthorizationSpec, FunctionRole, FunctionRoleSpec,
    MatchAll, MatchAny, MatchNone, ValueMatch,
};
pub use configuration::Configuration;
pub use context::{Context, MonitorResponse, Subject};
pub use crypto::{CipherAlgorithm, Cryptography};
pub use errors::{FrameworkError, FrameworkResult};
pub use function::{Function, FunctionRuntime, LifecycleStage};
pub use platform::{Outcome, PlatformContext};
pub use properties::{
    CachePropertyHandler, EnvironmentPropertyHandler, Property, PropertyHandler, PropertyValue,
};
pub use sentry::{Authenticator, RoleResolver, Sentry};
