//! Declarative description of a single stub server fixture.

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{FixtureError, FixtureResult, FixtureSettings};

/// Property that receives the server port when a fixture does not name one.
pub const DEFAULT_PORT_PROPERTY: &str = "fixture.server.port";

// ─────────────────────────────────────────────────────────────────────────────
// Extension Identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Identifier of a transport/protocol extension loaded into the stub engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtensionId(Cow<'static, str>);

impl ExtensionId {
    /// gRPC served over the same port as HTTP, addressed without the port segment.
    pub const GRPC: Self = Self(Cow::Borrowed("grpc"));

    /// Create an extension identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(Cow::Owned(id.into()))
    }

    /// Get the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if this extension switches the fixture to a non-HTTP protocol.
    #[must_use]
    pub fn is_non_http(&self) -> bool {
        *self == Self::GRPC
    }
}

impl fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stub Source
// ─────────────────────────────────────────────────────────────────────────────

/// Where a fixture reads its recorded stub mappings from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubSource {
    /// Relative to the resource root from [`FixtureSettings`].
    Resource(PathBuf),
    /// A directory on the file system, used as given.
    Directory(PathBuf),
}

impl StubSource {
    /// Resolve to a concrete directory.
    #[must_use]
    pub fn resolve(&self, settings: &FixtureSettings) -> PathBuf {
        match self {
            Self::Resource(relative) => settings.resource_root.join(relative),
            Self::Directory(dir) => dir.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fixture Spec
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable description of one stub server to provision.
///
/// Parsed from a `[[enable.fixture]]` table or built with [`FixtureSpec::new`]
/// and the `with_*` methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureSpec {
    /// Unique fixture name; key into the registry.
    pub name: String,

    /// Fixed port, or `0` for an ephemeral one.
    #[serde(default)]
    pub port: u16,

    /// Configuration keys that receive the server's base address.
    #[serde(default)]
    pub properties: Vec<String>,

    /// Configuration key that receives the server port.
    #[serde(default = "default_port_property")]
    pub port_property: String,

    /// Stub directory; defaults to `<namespace>/<name>` under the resource root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stub_location: Option<String>,

    /// Resolve `stub_location` against the resource root instead of the file system.
    #[serde(default = "default_true")]
    pub stub_location_is_resource: bool,

    /// Extensions to load into the stub engine.
    #[serde(default)]
    pub extensions: Vec<ExtensionId>,

    /// Customizers applied, in order, to the server configuration.
    #[serde(default)]
    pub customizers: Vec<String>,
}

fn default_port_property() -> String {
    DEFAULT_PORT_PROPERTY.into()
}

const fn default_true() -> bool {
    true
}

impl FixtureSpec {
    /// Create a fixture spec with default options.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port: 0,
            properties: Vec::new(),
            port_property: default_port_property(),
            stub_location: None,
            stub_location_is_resource: true,
            extensions: Vec::new(),
            customizers: Vec::new(),
        }
    }

    /// Use a fixed port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Bind the base address to an additional configuration key.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>) -> Self {
        self.properties.push(key.into());
        self
    }

    /// Bind the port to the given configuration key.
    #[must_use]
    pub fn with_port_property(mut self, key: impl Into<String>) -> Self {
        self.port_property = key.into();
        self
    }

    /// Read stubs from a location relative to the resource root.
    #[must_use]
    pub fn with_stub_resource(mut self, location: impl Into<String>) -> Self {
        self.stub_location = Some(location.into());
        self.stub_location_is_resource = true;
        self
    }

    /// Read stubs from a file system directory.
    #[must_use]
    pub fn with_stub_directory(mut self, dir: impl AsRef<Path>) -> Self {
        self.stub_location = Some(dir.as_ref().to_string_lossy().into_owned());
        self.stub_location_is_resource = false;
        self
    }

    /// Load an extension.
    #[must_use]
    pub fn with_extension(mut self, extension: ExtensionId) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Append a customizer.
    #[must_use]
    pub fn with_customizer(mut self, id: impl Into<String>) -> Self {
        self.customizers.push(id.into());
        self
    }

    /// Check if any loaded extension marks a non-HTTP protocol.
    #[must_use]
    pub fn is_non_http(&self) -> bool {
        self.extensions.iter().any(ExtensionId::is_non_http)
    }

    /// Address property keys with blanks skipped and duplicates collapsed, in order.
    pub fn property_keys(&self) -> impl Iterator<Item = &str> {
        self.properties
            .iter()
            .enumerate()
            .filter(|(i, key)| {
                !key.trim().is_empty() && !self.properties[..*i].contains(*key)
            })
            .map(|(_, key)| key.as_str())
    }

    /// Where stub mappings come from.
    #[must_use]
    pub fn stub_source(&self, settings: &FixtureSettings) -> StubSource {
        let location = self
            .stub_location
            .as_deref()
            .filter(|location| !location.trim().is_empty());
        match (location, self.stub_location_is_resource) {
            (Some(location), true) => StubSource::Resource(PathBuf::from(location)),
            (Some(location), false) => StubSource::Directory(PathBuf::from(location)),
            (None, _) => {
                StubSource::Resource(Path::new(&settings.stub_namespace).join(&self.name))
            }
        }
    }

    /// Check the declaration for internal consistency.
    ///
    /// # Errors
    /// Returns [`FixtureError::InvalidSpec`] on a blank name, a blank port
    /// property, or a file system stub source without a location.
    pub fn validate(&self) -> FixtureResult<()> {
        if self.name.trim().is_empty() {
            return Err(self.invalid("name must not be empty"));
        }
        if self.port_property.trim().is_empty() {
            return Err(self.invalid("port_property must not be empty"));
        }
        if !self.stub_location_is_resource
            && self.stub_location.as_deref().is_none_or(|l| l.trim().is_empty())
        {
            return Err(self.invalid("stub_location is required when it is not a resource"));
        }
        Ok(())
    }

    fn invalid(&self, message: &str) -> FixtureError {
        FixtureError::InvalidSpec {
            name: self.name.clone(),
            message: message.into(),
        }
    }
}
