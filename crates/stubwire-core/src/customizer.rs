//! Pluggable server-configuration customizers.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::{FixtureError, FixtureResult, FixtureSpec, ServerConfig};

/// Adjusts a [`ServerConfig`] before the server starts.
///
/// Customizers run in declaration order, before the fixture's extensions are
/// added to the configuration.
pub trait ConfigurationCustomizer: Send + Sync {
    /// Mutate the configuration for the given fixture.
    fn customize(&self, config: &mut ServerConfig, spec: &FixtureSpec);
}

type Factory = fn() -> Box<dyn ConfigurationCustomizer>;

/// Maps customizer identifiers to no-argument factories.
#[derive(Default, Clone)]
pub struct CustomizerRegistry {
    factories: HashMap<String, Factory>,
}

impl fmt::Debug for CustomizerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.factories.keys().collect();
        ids.sort();
        f.debug_struct("CustomizerRegistry").field("ids", &ids).finish()
    }
}

fn instantiate<C: ConfigurationCustomizer + Default + 'static>() -> Box<dyn ConfigurationCustomizer> {
    Box::new(C::default())
}

impl CustomizerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a customizer type under an identifier.
    pub fn register<C>(&mut self, id: impl Into<String>)
    where
        C: ConfigurationCustomizer + Default + 'static,
    {
        self.factories.insert(id.into(), instantiate::<C>);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with<C>(mut self, id: impl Into<String>) -> Self
    where
        C: ConfigurationCustomizer + Default + 'static,
    {
        self.register::<C>(id);
        self
    }

    /// Check if an identifier is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Instantiate a fresh customizer.
    ///
    /// # Errors
    /// Returns [`FixtureError::UnknownCustomizer`] for unregistered identifiers.
    pub fn instantiate(&self, id: &str) -> FixtureResult<Box<dyn ConfigurationCustomizer>> {
        self.factories
            .get(id)
            .map(|factory| factory())
            .ok_or_else(|| FixtureError::UnknownCustomizer { id: id.into() })
    }

    /// Apply every customizer of `spec`, in order.
    ///
    /// All identifiers are instantiated before any of them runs, so a missing
    /// one leaves `config` untouched.
    ///
    /// # Errors
    /// Returns [`FixtureError::UnknownCustomizer`] for unregistered identifiers.
    pub fn apply(&self, config: &mut ServerConfig, spec: &FixtureSpec) -> FixtureResult<()> {
        let customizers = spec
            .customizers
            .iter()
            .map(|id| self.instantiate(id).map(|c| (id, c)))
            .collect::<FixtureResult<Vec<_>>>()?;
        for (id, customizer) in customizers {
            debug!(fixture = %spec.name, customizer = %id, "applying configuration customizer");
            customizer.customize(config, spec);
        }
        Ok(())
    }
}
