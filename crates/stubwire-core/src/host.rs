//! Host test runtime: per-context configuration store and shutdown listeners.
//!
//! [`TestHost`] is the seam to a dependency-injection test framework.
//! [`TestRuntime`] is a self-contained in-memory host for plain Rust tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::{ContextId, FixtureError, FixtureResult, HostError};

// ─────────────────────────────────────────────────────────────────────────────
// Properties
// ─────────────────────────────────────────────────────────────────────────────

/// A configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Integer value (ports).
    Integer(i64),
    /// Text value (addresses).
    Text(String),
}

impl PropertyValue {
    /// Get the text value, if this is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Integer(_) => None,
        }
    }

    /// Interpret the value as a port, parsing text if needed.
    #[must_use]
    pub fn as_port(&self) -> Option<u16> {
        match self {
            Self::Integer(n) => u16::try_from(*n).ok(),
            Self::Text(text) => text.trim().parse().ok(),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(n) => write!(f, "{n}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.into())
    }
}

impl From<u16> for PropertyValue {
    fn from(value: u16) -> Self {
        Self::Integer(i64::from(value))
    }
}

/// A named batch of configuration entries, added and replaced as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySource {
    /// Source name; adding a source with an existing name replaces it.
    pub name: String,
    /// Entries in this batch.
    pub entries: BTreeMap<String, PropertyValue>,
}

impl PropertySource {
    /// Create an empty source.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Add an entry.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }
}

/// Layered property store; the most recently added source wins.
#[derive(Debug, Default)]
pub struct PropertyEnvironment {
    sources: RwLock<Vec<PropertySource>>,
}

impl PropertyEnvironment {
    /// Create an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source, atomically replacing any source with the same name.
    pub fn add_source(&self, source: PropertySource) {
        let mut sources = self.sources.write();
        sources.retain(|existing| existing.name != source.name);
        sources.push(source);
    }

    /// Look up a property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<PropertyValue> {
        self.sources
            .read()
            .iter()
            .rev()
            .find_map(|source| source.entries.get(key).cloned())
    }

    /// Names of the sources, oldest first.
    #[must_use]
    pub fn source_names(&self) -> Vec<String> {
        self.sources.read().iter().map(|s| s.name.clone()).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Callback run once when its context shuts down.
#[async_trait]
pub trait ShutdownListener: Send + Sync {
    /// Short description for logs and teardown failure reports.
    fn describe(&self) -> String;

    /// Handle context shutdown.
    ///
    /// # Errors
    /// Returns the failure to report from the host's shutdown.
    async fn on_shutdown(&self) -> FixtureResult<()>;
}

/// The host dependency-injection / test-runtime framework.
pub trait TestHost: Send + Sync {
    /// Add a batch of configuration entries to the context's store.
    ///
    /// # Errors
    /// Returns an error if the context is closed or the store rejects the write.
    fn add_property_source(
        &self,
        context: &ContextId,
        source: PropertySource,
    ) -> Result<(), HostError>;

    /// Read a property from the context's store.
    fn get_property(&self, context: &ContextId, key: &str) -> Option<PropertyValue>;

    /// Register a listener to run when the context shuts down.
    ///
    /// # Errors
    /// Returns an error if the context is already closed.
    fn register_shutdown_listener(
        &self,
        context: &ContextId,
        listener: Box<dyn ShutdownListener>,
    ) -> Result<(), HostError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// In-Memory Host
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct HostContext {
    environment: PropertyEnvironment,
    listeners: Mutex<Vec<Box<dyn ShutdownListener>>>,
}

/// In-memory [`TestHost`]: contexts are created on first use and closed by
/// [`TestRuntime::shutdown`].
#[derive(Default)]
pub struct TestRuntime {
    contexts: RwLock<HashMap<ContextId, Arc<HostContext>>>,
    closed: RwLock<HashSet<ContextId>>,
}

impl TestRuntime {
    /// Create a runtime with no contexts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn context(&self, context: &ContextId) -> Result<Arc<HostContext>, HostError> {
        if self.closed.read().contains(context) {
            return Err(HostError::ContextClosed(context.clone()));
        }
        if let Some(existing) = self.contexts.read().get(context) {
            return Ok(Arc::clone(existing));
        }
        let mut contexts = self.contexts.write();
        Ok(Arc::clone(contexts.entry(context.clone()).or_default()))
    }

    /// Names of the property sources in a context, oldest first.
    #[must_use]
    pub fn property_sources(&self, context: &ContextId) -> Vec<String> {
        self.contexts
            .read()
            .get(context)
            .map(|ctx| ctx.environment.source_names())
            .unwrap_or_default()
    }

    /// Number of shutdown listeners waiting in a context.
    #[must_use]
    pub fn listener_count(&self, context: &ContextId) -> usize {
        self.contexts
            .read()
            .get(context)
            .map_or(0, |ctx| ctx.listeners.lock().len())
    }

    /// Check if a context has been shut down.
    #[must_use]
    pub fn is_closed(&self, context: &ContextId) -> bool {
        self.closed.read().contains(context)
    }

    /// Shut a context down, running every listener in registration order.
    ///
    /// Every listener runs even if an earlier one fails.
    ///
    /// # Errors
    /// Returns [`FixtureError::Teardown`] listing every listener failure.
    pub async fn shutdown(&self, context: &ContextId) -> FixtureResult<()> {
        self.closed.write().insert(context.clone());
        let Some(ctx) = self.contexts.write().remove(context) else {
            debug!(context = %context, "shutdown of unknown context");
            return Ok(());
        };
        let listeners = std::mem::take(&mut *ctx.listeners.lock());
        info!(context = %context, listeners = listeners.len(), "shutting down context");

        let mut failures = Vec::new();
        for listener in listeners {
            if let Err(e) = listener.on_shutdown().await {
                error!(context = %context, listener = %listener.describe(), error = %e, "shutdown listener failed");
                failures.push(format!("{}: {e}", listener.describe()));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(FixtureError::Teardown {
                context: context.clone(),
                failures,
            })
        }
    }
}

impl TestHost for TestRuntime {
    fn add_property_source(
        &self,
        context: &ContextId,
        source: PropertySource,
    ) -> Result<(), HostError> {
        self.context(context)?.environment.add_source(source);
        Ok(())
    }

    fn get_property(&self, context: &ContextId, key: &str) -> Option<PropertyValue> {
        self.contexts.read().get(context)?.environment.get(key)
    }

    fn register_shutdown_listener(
        &self,
        context: &ContextId,
        listener: Box<dyn ShutdownListener>,
    ) -> Result<(), HostError> {
        self.context(context)?.listeners.lock().push(listener);
        Ok(())
    }
}
