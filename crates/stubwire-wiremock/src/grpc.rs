//! gRPC facade over a wiremock server.
//!
//! gRPC rides on the same listener as HTTP: a unary call is a `POST` to
//! `/<package.Service>/<Method>` whose body is a single length-prefixed
//! message frame.

use std::sync::Arc;

use stubwire_core::{EngineError, StubServer};
use tracing::debug;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::WiremockServer;

/// Content type of gRPC requests and responses.
pub const GRPC_CONTENT_TYPE: &str = "application/grpc";

/// gRPC status code `OK`.
pub const GRPC_STATUS_OK: u32 = 0;

/// Canned reply to a unary gRPC call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrpcResponse {
    /// Encoded response message; empty for errors.
    pub message: Vec<u8>,
    /// gRPC status code.
    pub status: u32,
    /// Optional `grpc-message` text.
    pub status_message: Option<String>,
}

impl GrpcResponse {
    /// Successful reply carrying an encoded message.
    #[must_use]
    pub fn ok(message: impl Into<Vec<u8>>) -> Self {
        Self {
            message: message.into(),
            status: GRPC_STATUS_OK,
            status_message: None,
        }
    }

    /// Failed reply with a status code and message.
    #[must_use]
    pub fn error(status: u32, status_message: impl Into<String>) -> Self {
        Self {
            message: Vec::new(),
            status,
            status_message: Some(status_message.into()),
        }
    }

    fn to_template(&self) -> Result<ResponseTemplate, EngineError> {
        let mut template = ResponseTemplate::new(200)
            .insert_header("grpc-status", self.status.to_string().as_str());
        if let Some(text) = &self.status_message {
            template = template.insert_header("grpc-message", text.as_str());
        }
        Ok(template.set_body_raw(encode_frame(&self.message)?, GRPC_CONTENT_TYPE))
    }
}

/// Wrap a message in an uncompressed gRPC frame: flag byte, big-endian
/// length, payload.
///
/// # Errors
/// Returns an error for messages longer than `u32::MAX` bytes.
pub fn encode_frame(message: &[u8]) -> Result<Vec<u8>, EngineError> {
    let len = u32::try_from(message.len())
        .map_err(|_| EngineError::Other(format!("gRPC message of {} bytes is too large", message.len())))?;
    let mut frame = Vec::with_capacity(message.len() + 5);
    frame.push(0);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(message);
    Ok(frame)
}

/// Split a gRPC frame into its payload, or `None` if it is truncated.
#[must_use]
pub fn decode_frame(frame: &[u8]) -> Option<&[u8]> {
    let (header, payload) = frame.split_at_checked(5)?;
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    payload.get(..usize::try_from(len).ok()?)
}

/// gRPC view of a fixture's server, sharing its port and stub state.
///
/// Stubs mounted here are cleared by the server's reset like any other.
/// The facade has no lifecycle of its own.
#[derive(Debug)]
pub struct GrpcStubService {
    name: String,
    server: Arc<WiremockServer>,
}

impl GrpcStubService {
    /// Wrap a running server.
    #[must_use]
    pub const fn new(name: String, server: Arc<WiremockServer>) -> Self {
        Self { name, server }
    }

    /// Fixture name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Port shared with the primary server.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.server.port()
    }

    /// Base URL of the shared server.
    #[must_use]
    pub fn base_url(&self) -> String {
        self.server.base_url()
    }

    /// Answer calls to `service/method` (e.g. `greeter.Greeter/SayHello`).
    ///
    /// # Errors
    /// Returns [`EngineError::Stopped`] if the server is stopped.
    pub async fn stub_for(&self, rpc: &str, response: GrpcResponse) -> Result<(), EngineError> {
        let rpc_path = format!("/{}", rpc.trim_start_matches('/'));
        debug!(fixture = %self.name, rpc = %rpc_path, status = response.status, "mounting gRPC stub");
        self.server
            .mount(
                Mock::given(method("POST"))
                    .and(path(rpc_path.as_str()))
                    .respond_with(response.to_template()?),
            )
            .await
    }
}
