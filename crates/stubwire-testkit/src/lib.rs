//! Stubwire Test Kit - Harness and helpers for fixture tests
//!
//! This crate provides the pieces a test suite needs around `stubwire-core`:
//!
//! - [`FixtureHarness`] - Plays the host test framework for one context
//! - [`RecordingEngine`] - In-memory stub engine that counts every call
//! - Fixture declarations, stub mappings and response bodies in [`fixtures`]
//! - Assertion helpers for bound properties and injection errors
//! - Tracing configuration for test output
//!
//! # Example
//!
//! ```rust,ignore
//! use stubwire_testkit::{FixtureHarness, WiremockEngine, fixtures};
//!
//! #[tokio::test]
//! async fn user_client_is_bound() {
//!     stubwire_testkit::init_test_tracing();
//!
//!     let mut harness = FixtureHarness::new(WiremockEngine::new());
//!     harness.setup(&fixtures::scope_of("UserTests", &["user-client"])).await.unwrap();
//!
//!     let resolver = harness.before_each().await.unwrap();
//!     let server = resolver.server("user-client").unwrap();
//!     server.expect_get("/users/1", fixtures::json::user(1, "Ada")).await.unwrap();
//!
//!     harness.shutdown().await.unwrap();
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod assertions;
pub mod fixtures;
mod harness;
mod recording_engine;
mod tracing_config;

pub use assertions::*;
pub use harness::*;
pub use recording_engine::*;
pub use tracing_config::*;

// Re-export core types for convenience
pub use stubwire_core::{
    Capability, ContextId, FixtureError, FixtureResult, FixtureSpec, LifecycleState,
    ScopeDeclaration,
};
pub use stubwire_wiremock::{WiremockEngine, WiremockServer};
