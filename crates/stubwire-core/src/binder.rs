//! Writes a fixture's runtime address and port into the host configuration.

use std::sync::Arc;

use tracing::debug;

use crate::{
    ContextId, FixtureResult, FixtureSpec, PropertySource, RunningInstance, StubEngine, TestHost,
};

/// Prefix of the property source written for each fixture.
pub const PROPERTY_SOURCE_PREFIX: &str = "stubwire.";

/// Name of the property source holding a fixture's bindings.
#[must_use]
pub fn property_source_name(fixture: &str) -> String {
    format!("{PROPERTY_SOURCE_PREFIX}{fixture}")
}

/// The address to publish for a fixture.
///
/// Non-HTTP protocols are addressed without the port segment, so a trailing
/// numeric `:port` is stripped. Colons of `scheme://` and of a bracketed IPv6
/// host are kept.
#[must_use]
pub fn effective_address(spec: &FixtureSpec, base_url: &str) -> String {
    if !spec.is_non_http() {
        return base_url.to_owned();
    }
    match base_url.rsplit_once(':') {
        Some((host, port))
            if !port.is_empty()
                && port.bytes().all(|b| b.is_ascii_digit())
                && host.rfind('[') <= host.rfind(']') =>
        {
            host.to_owned()
        }
        _ => base_url.to_owned(),
    }
}

/// Publishes fixture addresses into a [`TestHost`].
#[derive(Clone)]
pub struct ConfigurationBinder {
    host: Arc<dyn TestHost>,
}

impl ConfigurationBinder {
    /// Create a binder writing into `host`.
    #[must_use]
    pub fn new(host: Arc<dyn TestHost>) -> Self {
        Self { host }
    }

    /// Build the property batch for an instance without writing it.
    #[must_use]
    pub fn property_source<E: StubEngine>(instance: &RunningInstance<E>) -> PropertySource {
        let spec = instance.spec();
        let address = effective_address(spec, &instance.base_url());
        let source = spec
            .property_keys()
            .fold(PropertySource::new(property_source_name(&spec.name)), |source, key| {
                source.with(key, address.as_str())
            });
        source.with(spec.port_property.as_str(), instance.port())
    }

    /// Write every address key and the port key in one batch.
    ///
    /// Binding the same fixture again replaces its previous batch.
    ///
    /// # Errors
    /// Returns the host's store error unchanged.
    pub fn bind<E: StubEngine>(
        &self,
        context: &ContextId,
        instance: &RunningInstance<E>,
    ) -> FixtureResult<PropertySource> {
        let source = Self::property_source(instance);
        debug!(
            context = %context,
            fixture = %instance.name(),
            entries = ?source.entries,
            "adding fixture properties"
        );
        self.host.add_property_source(context, source.clone())?;
        Ok(source)
    }
}
