//! Stub engine control surface.
//!
//! The engine itself (request matching, response templating, stub files) lives
//! behind these traits; `stubwire-wiremock` provides the wiremock-backed one.

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{EngineError, ExtensionId, FixtureSettings, FixtureSpec};

/// Mutable server configuration handed to customizers and then to
/// [`StubEngine::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Name of the fixture this server is started for.
    pub fixture: String,
    /// Listen address.
    pub host: IpAddr,
    /// Listen port, `0` for ephemeral.
    pub port: u16,
    /// Directory holding `mappings/*.json`, if any.
    pub stub_dir: Option<PathBuf>,
    /// Extensions to load.
    pub extensions: BTreeSet<ExtensionId>,
}

impl ServerConfig {
    /// Base configuration for a spec, before customizers and extensions.
    #[must_use]
    pub fn for_spec(spec: &FixtureSpec, settings: &FixtureSettings) -> Self {
        Self {
            fixture: spec.name.clone(),
            host: settings.bind_host,
            port: spec.port,
            stub_dir: Some(spec.stub_source(settings).resolve(settings)),
            extensions: BTreeSet::new(),
        }
    }

    /// The socket address to listen on.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// A started stub server: the primary handle of a fixture.
#[async_trait]
pub trait StubServer: Send + Sync + 'static {
    /// Stub definition accepted by [`StubServer::stub_for`].
    type Stub: Send;

    /// Base URL, including scheme and port.
    fn base_url(&self) -> String;

    /// Bound port.
    fn port(&self) -> u16;

    /// Check if the server is still accepting requests.
    fn is_running(&self) -> bool;

    /// Clear request journal and stubs, restoring file-backed stubs.
    ///
    /// # Errors
    /// Returns an error if the server is stopped or stubs cannot be restored.
    async fn reset_all(&self) -> Result<(), EngineError>;

    /// Stop the server and release its port.
    ///
    /// # Errors
    /// Returns an error if shutdown fails.
    async fn stop(&self) -> Result<(), EngineError>;

    /// Register a stub.
    ///
    /// # Errors
    /// Returns an error if the server is stopped.
    async fn stub_for(&self, stub: Self::Stub) -> Result<(), EngineError>;
}

/// Factory for stub servers and their protocol facades.
#[async_trait]
pub trait StubEngine: Send + Sync + 'static {
    /// Primary handle type.
    type Server: StubServer;

    /// Protocol-specific facade over the same running server.
    type Facade: Send + Sync + 'static;

    /// Start a server.
    ///
    /// # Errors
    /// Returns an error on bind failure, unreadable stubs or unsupported extensions.
    async fn start(&self, config: ServerConfig) -> Result<Arc<Self::Server>, EngineError>;

    /// Build the protocol facade for a server, if the fixture loaded a matching extension.
    fn facade(&self, server: &Arc<Self::Server>, spec: &FixtureSpec) -> Option<Arc<Self::Facade>>;
}
