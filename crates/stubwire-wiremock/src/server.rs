//! Stub server backed by a dedicated wiremock [`MockServer`].
//!
//! Every fixture gets its own listener, bound to the configured address, so a
//! fixed port is honoured and stopping the server releases it.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use stubwire_core::{
    EngineError, ExtensionId, FixtureSpec, ServerConfig, StubEngine, StubServer,
};
use tokio::sync::RwLock;
use tracing::{debug, info};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use crate::grpc::GrpcStubService;
use crate::stubs::{StubMapping, load_mappings};

/// Check if this engine can load an extension.
#[must_use]
pub fn supports_extension(extension: &ExtensionId) -> bool {
    *extension == ExtensionId::GRPC
}

/// A running wiremock server plus the file-backed stubs it resets to.
pub struct WiremockServer {
    name: String,
    address: SocketAddr,
    uri: String,
    running: AtomicBool,
    server: RwLock<Option<MockServer>>,
    mappings: Vec<StubMapping>,
}

impl WiremockServer {
    /// Start a server for `config`.
    ///
    /// # Errors
    /// Returns [`EngineError::UnsupportedExtension`] for unknown extensions,
    /// [`EngineError::Bind`] if the address is taken, or a mapping error if
    /// the stub directory holds unreadable files.
    pub async fn start(config: ServerConfig) -> Result<Self, EngineError> {
        if let Some(unsupported) = config
            .extensions
            .iter()
            .find(|ext| !supports_extension(ext))
        {
            return Err(EngineError::UnsupportedExtension(unsupported.clone()));
        }

        let mappings = match &config.stub_dir {
            Some(dir) => load_mappings(dir)?,
            None => Vec::new(),
        };

        let requested = config.socket_addr();
        let listener = TcpListener::bind(requested).map_err(|source| EngineError::Bind {
            address: requested.to_string(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        let server = MockServer::builder().listener(listener).start().await;

        let started = Self {
            name: config.fixture,
            address: *server.address(),
            uri: server.uri(),
            running: AtomicBool::new(true),
            server: RwLock::new(Some(server)),
            mappings,
        };
        started.mount_mappings().await?;
        info!(
            fixture = %started.name,
            address = %started.address,
            mappings = started.mappings.len(),
            "wiremock server listening"
        );
        Ok(started)
    }

    /// Fixture name this server was started for.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bound socket address.
    #[must_use]
    pub const fn address(&self) -> SocketAddr {
        self.address
    }

    /// Mappings loaded from the stub directory.
    #[must_use]
    pub fn file_mappings(&self) -> &[StubMapping] {
        &self.mappings
    }

    /// Mount a mock on the running server.
    ///
    /// # Errors
    /// Returns [`EngineError::Stopped`] after [`StubServer::stop`].
    pub async fn mount(&self, mock: Mock) -> Result<(), EngineError> {
        let guard = self.server.read().await;
        let server = guard.as_ref().ok_or(EngineError::Stopped)?;
        mock.mount(server).await;
        Ok(())
    }

    async fn mount_mappings(&self) -> Result<(), EngineError> {
        for mapping in &self.mappings {
            self.mount(mapping.to_mock()).await?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Response Setup
    // ─────────────────────────────────────────────────────────────────────────────

    /// Answer `GET request_path` with a JSON body.
    ///
    /// # Errors
    /// Returns [`EngineError::Stopped`] if the server is stopped.
    pub async fn expect_get(&self, request_path: &str, response: Value) -> Result<(), EngineError> {
        self.mount(
            Mock::given(method("GET"))
                .and(path(request_path))
                .respond_with(json_response(200, &response)),
        )
        .await
    }

    /// Answer `POST request_path` with a JSON body.
    ///
    /// # Errors
    /// Returns [`EngineError::Stopped`] if the server is stopped.
    pub async fn expect_post(&self, request_path: &str, response: Value) -> Result<(), EngineError> {
        self.mount(
            Mock::given(method("POST"))
                .and(path(request_path))
                .respond_with(json_response(200, &response)),
        )
        .await
    }

    /// Answer any method on `request_path` with a JSON body.
    ///
    /// # Errors
    /// Returns [`EngineError::Stopped`] if the server is stopped.
    pub async fn expect_json(&self, request_path: &str, response: Value) -> Result<(), EngineError> {
        self.mount(Mock::given(path(request_path)).respond_with(json_response(200, &response)))
            .await
    }

    /// Answer any method on `request_path` with an error status and JSON body.
    ///
    /// # Errors
    /// Returns [`EngineError::Stopped`] if the server is stopped.
    pub async fn expect_error(
        &self,
        request_path: &str,
        status: u16,
        error_body: Value,
    ) -> Result<(), EngineError> {
        self.mount(Mock::given(path(request_path)).respond_with(json_response(status, &error_body)))
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Verification
    // ─────────────────────────────────────────────────────────────────────────────

    /// Requests received since start or the last reset.
    pub async fn received_requests(&self) -> Vec<Request> {
        match self.server.read().await.as_ref() {
            Some(server) => server.received_requests().await.unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Assert that at least one request hit `request_path`.
    ///
    /// # Panics
    ///
    /// Panics if no matching request was found.
    pub async fn assert_received(&self, request_path: &str) {
        let received = self.received_requests().await;
        let found = received.iter().any(|r| r.url.path() == request_path);
        assert!(
            found,
            "No request received by '{}' to path '{}'. Received: {:?}",
            self.name,
            request_path,
            received.iter().map(|r| r.url.path()).collect::<Vec<_>>()
        );
    }

    /// Assert the total number of received requests.
    ///
    /// # Panics
    ///
    /// Panics if the count doesn't match.
    pub async fn assert_request_count(&self, expected: usize) {
        let received = self.received_requests().await.len();
        assert_eq!(
            received, expected,
            "Expected {expected} requests to '{}' but received {received}",
            self.name
        );
    }
}

fn json_response(status: u16, body: &Value) -> ResponseTemplate {
    ResponseTemplate::new(status)
        .set_body_json(body)
        .insert_header("content-type", "application/json")
}

#[async_trait]
impl StubServer for WiremockServer {
    type Stub = Mock;

    fn base_url(&self) -> String {
        self.uri.clone()
    }

    fn port(&self) -> u16 {
        self.address.port()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn reset_all(&self) -> Result<(), EngineError> {
        {
            let guard = self.server.read().await;
            let server = guard.as_ref().ok_or(EngineError::Stopped)?;
            server.reset().await;
        }
        debug!(fixture = %self.name, mappings = self.mappings.len(), "restoring file stubs");
        self.mount_mappings().await
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.running.store(false, Ordering::SeqCst);
        if self.server.write().await.take().is_some() {
            debug!(fixture = %self.name, address = %self.address, "wiremock server dropped");
        }
        Ok(())
    }

    async fn stub_for(&self, stub: Mock) -> Result<(), EngineError> {
        self.mount(stub).await
    }
}

impl std::fmt::Debug for WiremockServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WiremockServer")
            .field("name", &self.name)
            .field("uri", &self.uri)
            .field("running", &self.is_running())
            .field("mappings", &self.mappings.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// [`StubEngine`] that starts one [`WiremockServer`] per fixture.
#[derive(Debug, Clone, Copy, Default)]
pub struct WiremockEngine;

impl WiremockEngine {
    /// Create the engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StubEngine for WiremockEngine {
    type Server = WiremockServer;
    type Facade = GrpcStubService;

    async fn start(&self, config: ServerConfig) -> Result<Arc<WiremockServer>, EngineError> {
        WiremockServer::start(config).await.map(Arc::new)
    }

    fn facade(
        &self,
        server: &Arc<WiremockServer>,
        spec: &FixtureSpec,
    ) -> Option<Arc<GrpcStubService>> {
        spec.extensions
            .contains(&ExtensionId::GRPC)
            .then(|| Arc::new(GrpcStubService::new(spec.name.clone(), Arc::clone(server))))
    }
}
