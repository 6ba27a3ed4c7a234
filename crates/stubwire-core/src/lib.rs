//! Stubwire Core - Lifecycle management for context-scoped stub servers
//!
//! This crate provisions, resets, injects and tears down mock HTTP/gRPC stub
//! servers for a dependency-injection test runtime:
//!
//! - [`FixtureSpec`] / [`ScopeDeclaration`] - declarative fixture definitions
//! - [`InstanceRegistry`] - one running server per `(context, name)`
//! - [`LifecycleController`] - setup, per-test reset and exactly-once teardown
//! - [`ConfigurationBinder`] - publishes addresses and ports as properties
//! - [`InjectionResolver`] / [`InjectionPlan`] - name-based handle injection
//!
//! The stub engine and the host runtime are traits ([`StubEngine`],
//! [`TestHost`]); [`TestRuntime`] is an in-memory host.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stubwire_core::{ContextId, LifecycleController, ScopeDeclaration, TestHost, TestRuntime};
//! use stubwire_wiremock::WiremockEngine;
//!
//! let runtime = Arc::new(TestRuntime::new());
//! let controller = LifecycleController::new(WiremockEngine::new(), runtime.clone());
//! let ctx = ContextId::random();
//! let scope = ScopeDeclaration::from_toml_str("UserTests", r#"
//!     [[enable]]
//!     [[enable.fixture]]
//!     name = "user-client"
//!     properties = ["user-client.url"]
//! "#)?;
//!
//! controller.on_context_setup(&ctx, &scope).await?;
//! let resolver = controller.on_before_each_test(&ctx).await?;
//! let server = resolver.server("user-client")?;
//! assert_eq!(
//!     runtime.get_property(&ctx, "user-client.url").unwrap().to_string(),
//!     server.base_url(),
//! );
//! runtime.shutdown(&ctx).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod binder;
mod context;
mod customizer;
mod declaration;
mod engine;
mod error;
mod host;
mod injection;
mod lifecycle;
mod registry;
mod settings;
mod spec;

#[cfg(test)]
mod test_support;

pub use binder::*;
pub use context::*;
pub use customizer::*;
pub use declaration::*;
pub use engine::*;
pub use error::*;
pub use host::*;
pub use injection::*;
pub use lifecycle::*;
pub use registry::*;
pub use settings::*;
pub use spec::*;

// Re-export for engine implementations
pub use async_trait::async_trait;
