//! Stubwire Wiremock - Stub engine built on `wiremock`
//!
//! Provides the [`StubEngine`](stubwire_core::StubEngine) used by real tests:
//!
//! - [`WiremockEngine`] / [`WiremockServer`] - one dedicated mock server per fixture
//! - [`load_mappings`] - WireMock-style JSON mappings read from a stub directory
//! - [`GrpcStubService`] - gRPC facade loaded by the `grpc` extension
//!
//! # Example
//!
//! ```rust,ignore
//! let server = resolver.server("user-client")?;
//! server.expect_get("/users/1", serde_json::json!({"id": 1})).await?;
//!
//! let greeter = resolver.facade("greeter")?;
//! greeter.stub_for("greeter.Greeter/SayHello", GrpcResponse::ok(reply_bytes)).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod grpc;
mod server;
mod stubs;

pub use grpc::*;
pub use server::*;
pub use stubs::*;

// Re-export wiremock building blocks for `StubServer::stub_for`
pub use wiremock::{Mock, ResponseTemplate, matchers};
