//! Process-wide settings for resolving stub locations and binding servers.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{FixtureError, FixtureResult};

/// Environment variable overriding [`FixtureSettings::resource_root`].
pub const RESOURCE_ROOT_ENV: &str = "STUBWIRE_RESOURCE_ROOT";
/// Environment variable overriding [`FixtureSettings::stub_namespace`].
pub const STUB_NAMESPACE_ENV: &str = "STUBWIRE_STUB_NAMESPACE";
/// Environment variable overriding [`FixtureSettings::bind_host`].
pub const BIND_HOST_ENV: &str = "STUBWIRE_BIND_HOST";

/// Settings shared by every fixture in a controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureSettings {
    /// Root that resource stub locations are resolved against.
    #[serde(default = "default_resource_root")]
    pub resource_root: PathBuf,

    /// First path segment of the default stub location (`<namespace>/<name>`).
    #[serde(default = "default_stub_namespace")]
    pub stub_namespace: String,

    /// Address stub servers listen on.
    #[serde(default = "default_bind_host")]
    pub bind_host: IpAddr,
}

fn default_resource_root() -> PathBuf {
    std::env::var_os("CARGO_MANIFEST_DIR")
        .map_or_else(|| PathBuf::from("."), PathBuf::from)
        .join("tests")
        .join("resources")
}

fn default_stub_namespace() -> String {
    "wiremock".into()
}

const fn default_bind_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

impl Default for FixtureSettings {
    fn default() -> Self {
        Self {
            resource_root: default_resource_root(),
            stub_namespace: default_stub_namespace(),
            bind_host: default_bind_host(),
        }
    }
}

impl FixtureSettings {
    /// Load settings from `STUBWIRE_*` environment variables, falling back to defaults.
    ///
    /// # Errors
    /// Returns an error if `STUBWIRE_BIND_HOST` is not an IP address.
    pub fn from_env() -> FixtureResult<Self> {
        let mut settings = Self::default();
        if let Some(root) = std::env::var_os(RESOURCE_ROOT_ENV) {
            settings.resource_root = PathBuf::from(root);
        }
        if let Ok(namespace) = std::env::var(STUB_NAMESPACE_ENV) {
            settings.stub_namespace = namespace;
        }
        if let Ok(host) = std::env::var(BIND_HOST_ENV) {
            settings.bind_host = host.parse().map_err(|_| FixtureError::InvalidSpec {
                name: BIND_HOST_ENV.into(),
                message: format!("'{host}' is not an IP address"),
            })?;
        }
        Ok(settings)
    }

    /// Parse settings from TOML.
    ///
    /// # Errors
    /// Returns an error if the TOML is malformed.
    pub fn from_toml_str(input: &str) -> FixtureResult<Self> {
        Ok(toml::from_str(input)?)
    }
}
