//! In-memory engine for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::{EngineError, ExtensionId, FixtureSpec, ServerConfig, StubEngine, StubServer};

#[derive(Debug, Default)]
struct Counters {
    starts: AtomicUsize,
    stops: AtomicUsize,
}

#[derive(Debug)]
pub struct FakeServer {
    port: u16,
    alive: AtomicBool,
    counters: Arc<Counters>,
}

impl FakeServer {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            alive: AtomicBool::new(true),
            counters: Arc::default(),
        }
    }

    /// Simulate the server dying outside the registry's control.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl StubServer for FakeServer {
    type Stub = String;

    fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn is_running(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn reset_all(&self) -> Result<(), EngineError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(EngineError::Stopped)
        }
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.alive.store(false, Ordering::SeqCst);
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stub_for(&self, _stub: String) -> Result<(), EngineError> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct FakeFacade {
    pub port: u16,
}

impl FakeFacade {
    pub fn over(server: &Arc<FakeServer>) -> Self {
        Self { port: server.port }
    }
}

#[derive(Debug)]
pub struct FakeEngine {
    next_port: AtomicU16,
    counters: Arc<Counters>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self {
            next_port: AtomicU16::new(20_000),
            counters: Arc::default(),
        }
    }
}

impl FakeEngine {
    pub fn starts(&self) -> usize {
        self.counters.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.counters.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StubEngine for FakeEngine {
    type Server = FakeServer;
    type Facade = FakeFacade;

    async fn start(&self, config: ServerConfig) -> Result<Arc<FakeServer>, EngineError> {
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        let port = if config.port == 0 {
            self.next_port.fetch_add(1, Ordering::SeqCst)
        } else {
            config.port
        };
        Ok(Arc::new(FakeServer {
            port,
            alive: AtomicBool::new(true),
            counters: Arc::clone(&self.counters),
        }))
    }

    fn facade(&self, server: &Arc<FakeServer>, spec: &FixtureSpec) -> Option<Arc<FakeFacade>> {
        spec.extensions
            .contains(&ExtensionId::GRPC)
            .then(|| Arc::new(FakeFacade::over(server)))
    }
}
