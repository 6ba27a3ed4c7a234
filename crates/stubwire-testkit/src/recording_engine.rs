//! In-memory stub engine that records every call.
//!
//! [`RecordingEngine`] never opens a socket. It hands out fake ports, keeps
//! track of which are in use, and counts starts, resets and stops so tests
//! can check lifecycle guarantees without network flakiness.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use stubwire_core::{
    EngineError, ExtensionId, FixtureSpec, ServerConfig, StubEngine, StubServer,
};

/// First port handed out for ephemeral requests.
pub const FIRST_RECORDING_PORT: u16 = 30_000;

#[derive(Debug, Default)]
struct Journal {
    starts: AtomicUsize,
    stops: AtomicUsize,
    resets: AtomicUsize,
    configs: Mutex<Vec<ServerConfig>>,
    ports_in_use: Mutex<HashMap<u16, String>>,
}

/// Fake stub server; stubs are plain labels.
#[derive(Debug)]
pub struct RecordingServer {
    name: String,
    port: u16,
    running: AtomicBool,
    resets: AtomicUsize,
    stubs: Mutex<Vec<String>>,
    journal: Arc<Journal>,
}

impl RecordingServer {
    /// Fixture name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of resets on this server.
    #[must_use]
    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// Stubs registered since the last reset.
    #[must_use]
    pub fn stubs(&self) -> Vec<String> {
        self.stubs.lock().clone()
    }

    /// Simulate the server crashing without going through `stop`.
    pub fn crash(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.journal.ports_in_use.lock().remove(&self.port);
    }
}

#[async_trait]
impl StubServer for RecordingServer {
    type Stub = String;

    fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn reset_all(&self) -> Result<(), EngineError> {
        if !self.is_running() {
            return Err(EngineError::Stopped);
        }
        self.stubs.lock().clear();
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.journal.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        if self.running.swap(false, Ordering::SeqCst) {
            self.journal.ports_in_use.lock().remove(&self.port);
        }
        self.journal.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stub_for(&self, stub: String) -> Result<(), EngineError> {
        if !self.is_running() {
            return Err(EngineError::Stopped);
        }
        self.stubs.lock().push(stub);
        Ok(())
    }
}

/// Fake protocol facade over a [`RecordingServer`].
#[derive(Debug)]
pub struct RecordingFacade {
    server: Arc<RecordingServer>,
}

impl RecordingFacade {
    /// Fixture name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.server.name()
    }

    /// Port shared with the primary server.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.server.port
    }
}

/// Engine whose servers live in memory.
#[derive(Debug)]
pub struct RecordingEngine {
    next_port: AtomicU16,
    fail_names: Mutex<Vec<String>>,
    journal: Arc<Journal>,
}

impl Default for RecordingEngine {
    fn default() -> Self {
        Self {
            next_port: AtomicU16::new(FIRST_RECORDING_PORT),
            fail_names: Mutex::new(Vec::new()),
            journal: Arc::default(),
        }
    }
}

impl RecordingEngine {
    /// Create an engine with no failures configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every start of fixture `name` fail.
    #[must_use]
    pub fn failing_for(self, name: impl Into<String>) -> Self {
        self.fail_names.lock().push(name.into());
        self
    }

    /// Servers started so far.
    #[must_use]
    pub fn starts(&self) -> usize {
        self.journal.starts.load(Ordering::SeqCst)
    }

    /// Stop calls so far, including repeated ones.
    #[must_use]
    pub fn stops(&self) -> usize {
        self.journal.stops.load(Ordering::SeqCst)
    }

    /// Resets so far, over all servers.
    #[must_use]
    pub fn resets(&self) -> usize {
        self.journal.resets.load(Ordering::SeqCst)
    }

    /// Every configuration passed to `start`, in call order.
    #[must_use]
    pub fn configs(&self) -> Vec<ServerConfig> {
        self.journal.configs.lock().clone()
    }

    /// Ports held by running servers.
    #[must_use]
    pub fn ports_in_use(&self) -> usize {
        self.journal.ports_in_use.lock().len()
    }
}

#[async_trait]
impl StubEngine for RecordingEngine {
    type Server = RecordingServer;
    type Facade = RecordingFacade;

    async fn start(&self, config: ServerConfig) -> Result<Arc<RecordingServer>, EngineError> {
        self.journal.configs.lock().push(config.clone());
        if let Some(ext) = config.extensions.iter().find(|e| **e != ExtensionId::GRPC) {
            return Err(EngineError::UnsupportedExtension(ext.clone()));
        }
        if self.fail_names.lock().contains(&config.fixture) {
            return Err(EngineError::Other(format!(
                "start of '{}' failed on purpose",
                config.fixture
            )));
        }

        let port = if config.port == 0 {
            self.next_port.fetch_add(1, Ordering::SeqCst)
        } else {
            config.port
        };
        {
            let mut in_use = self.journal.ports_in_use.lock();
            if let Some(owner) = in_use.get(&port) {
                return Err(EngineError::Bind {
                    address: format!("{}:{port}", config.host),
                    source: std::io::Error::new(
                        std::io::ErrorKind::AddrInUse,
                        format!("port held by '{owner}'"),
                    ),
                });
            }
            in_use.insert(port, config.fixture.clone());
        }

        self.journal.starts.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RecordingServer {
            name: config.fixture,
            port,
            running: AtomicBool::new(true),
            resets: AtomicUsize::new(0),
            stubs: Mutex::new(Vec::new()),
            journal: Arc::clone(&self.journal),
        }))
    }

    fn facade(
        &self,
        server: &Arc<RecordingServer>,
        spec: &FixtureSpec,
    ) -> Option<Arc<RecordingFacade>> {
        spec.extensions.contains(&ExtensionId::GRPC).then(|| {
            Arc::new(RecordingFacade {
                server: Arc::clone(server),
            })
        })
    }
}
