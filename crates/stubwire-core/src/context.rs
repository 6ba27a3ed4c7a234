//! Test context identity and lifecycle states.
//!
//! # Lifecycle States
//!
//! ```text
//! ┌──────────────┐ setup ┌─────────────┐  ok   ┌───────┐ first stop ┌─────────────┐ last stop ┌────────┐
//! │ Unconfigured │──────►│ Configuring │──────►│ Ready │───────────►│ TearingDown │──────────►│ Closed │
//! └──────────────┘       └─────────────┘◄──────└───────┘            └─────────────┘           └────────┘
//!                                       nested setup
//! ```
//!
//! A failed setup leaves the context in `Configuring`; it never becomes `Ready`.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one test context (one dependency-injection container).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    /// Create a fresh random context identity.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a context identity with a caller-chosen name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the identity as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a test context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No setup has run yet.
    #[default]
    Unconfigured,

    /// Fixtures are being resolved, or a setup failed.
    Configuring,

    /// Every declared fixture is live.
    Ready,

    /// Shutdown has started stopping fixtures.
    TearingDown,

    /// Every fixture is stopped.
    Closed,
}

impl LifecycleState {
    /// Check if fixture setup may start from this state.
    #[must_use]
    pub const fn can_configure(&self) -> bool {
        matches!(self, Self::Unconfigured | Self::Ready)
    }

    /// Check if tests may run in this state.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if shutdown has begun.
    #[must_use]
    pub const fn is_shutting_down(&self) -> bool {
        matches!(self, Self::TearingDown | Self::Closed)
    }

    /// Get the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::Configuring => "configuring",
            Self::Ready => "ready",
            Self::TearingDown => "tearing_down",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
