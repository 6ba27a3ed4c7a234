//! Error types for stubwire-core.
//!
//! Nothing here is recoverable-and-continue: a broken fixture makes the whole
//! test context unusable, so every variant is surfaced to the caller that
//! triggered the operation.

use thiserror::Error;

use crate::{Capability, ContextId, ExtensionId, LifecycleState};

/// Errors raised by a stub engine (start, reset, stop, stub mounting).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The listener could not bind the requested address.
    #[error("failed to bind stub server on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// A stub mapping file could not be read or understood.
    #[error("invalid stub mapping {path}: {message}")]
    StubMapping { path: String, message: String },

    /// The engine does not know how to load the requested extension.
    #[error("extension '{0}' is not supported by this engine")]
    UnsupportedExtension(ExtensionId),

    /// The server was already stopped.
    #[error("stub server is not running")]
    Stopped,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other engine failure.
    #[error("{0}")]
    Other(String),
}

/// Errors raised by the host test runtime (configuration store, listeners).
#[derive(Debug, Error)]
pub enum HostError {
    /// The context has already been shut down.
    #[error("context {0} is closed")]
    ContextClosed(ContextId),

    /// The configuration store rejected a write.
    #[error("configuration store error: {0}")]
    Store(String),
}

/// Coarse classification of a [`FixtureError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed declaration, unknown customizer, unsupported injection target.
    Configuration,
    /// A name that is not declared in the active or enclosing scope.
    UnregisteredReference,
    /// Stub engine or host store failure, propagated unchanged.
    ExternalCollaborator,
    /// Operation invoked in the wrong lifecycle state.
    Lifecycle,
}

/// Errors that can occur while provisioning, injecting or tearing down fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// A fixture declaration is malformed.
    #[error("invalid fixture '{name}': {message}")]
    InvalidSpec { name: String, message: String },

    /// The same fixture name was declared twice with different settings.
    #[error("fixture '{name}' is declared more than once in {scope}")]
    DuplicateFixture { name: String, scope: String },

    /// A customizer identifier has no registered no-argument factory.
    #[error("customizer '{id}' is not registered; customizers must be registered with a Default constructor")]
    UnknownCustomizer { id: String },

    /// Injection target type is neither the server nor the facade handle.
    #[error("injection target `{type_name}` is not supported; inject the server or the protocol facade handle")]
    UnsupportedInjectionTarget { type_name: &'static str },

    /// Injection or parameter resolution named an undeclared fixture.
    #[error(
        "{capability} with name '{name}' not registered. Perhaps you forgot to declare it in the fixture scope?"
    )]
    NotRegistered { name: String, capability: Capability },

    /// The fixture was stopped and cannot be reused or recreated in this context.
    #[error("fixture '{name}' was already stopped in context {context}")]
    InstanceStopped { name: String, context: ContextId },

    /// No default fixture exists for the context.
    #[error("context {context} has {declared} fixtures declared; address them by name")]
    NoDefaultFixture { context: ContextId, declared: usize },

    /// Operation invoked while the context was in the wrong state.
    #[error("cannot {operation} context {context} in state {state}")]
    InvalidState {
        context: ContextId,
        state: LifecycleState,
        operation: &'static str,
    },

    /// The declaration document could not be parsed.
    #[error("failed to parse fixture declarations: {0}")]
    Declaration(#[from] toml::de::Error),

    /// Stub engine failure.
    #[error("stub engine error: {0}")]
    Engine(#[from] EngineError),

    /// Host runtime failure.
    #[error("host error: {0}")]
    Host(#[from] HostError),

    /// One or more shutdown listeners failed.
    #[error("teardown of context {context} failed: {}", .failures.join("; "))]
    Teardown {
        context: ContextId,
        failures: Vec<String>,
    },
}

impl FixtureError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSpec { .. }
            | Self::DuplicateFixture { .. }
            | Self::UnknownCustomizer { .. }
            | Self::UnsupportedInjectionTarget { .. }
            | Self::Declaration(_) => ErrorKind::Configuration,
            Self::NotRegistered { .. } => ErrorKind::UnregisteredReference,
            Self::Engine(EngineError::Bind { .. } | EngineError::UnsupportedExtension(_)) => {
                ErrorKind::Configuration
            }
            Self::Engine(_) | Self::Host(_) | Self::Teardown { .. } => {
                ErrorKind::ExternalCollaborator
            }
            Self::InstanceStopped { .. }
            | Self::NoDefaultFixture { .. }
            | Self::InvalidState { .. } => ErrorKind::Lifecycle,
        }
    }

    /// Check if this error names a fixture that was never declared.
    #[must_use]
    pub const fn is_not_registered(&self) -> bool {
        matches!(self, Self::NotRegistered { .. })
    }
}

/// Result type for fixture operations.
pub type FixtureResult<T> = Result<T, FixtureError>;
