//! Ready-made fixture declarations and response bodies.

use std::path::Path;

use stubwire_core::{ConfigurationCustomizer, ExtensionId, FixtureSpec, ScopeDeclaration, ServerConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Spec Fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP fixture whose base address is bound to `<name>.url`.
#[must_use]
pub fn http_client(name: &str) -> FixtureSpec {
    FixtureSpec::new(name).with_property(format!("{name}.url"))
}

/// gRPC fixture with its address bound to `<name>.address` and its port to `<name>.port`.
#[must_use]
pub fn grpc_service(name: &str) -> FixtureSpec {
    FixtureSpec::new(name)
        .with_extension(ExtensionId::GRPC)
        .with_property(format!("{name}.address"))
        .with_port_property(format!("{name}.port"))
}

/// Scope declaring one fixture per name, each bound to `<name>.url`.
#[must_use]
pub fn scope_of(scope: &str, names: &[&str]) -> ScopeDeclaration {
    names
        .iter()
        .fold(ScopeDeclaration::new(scope), |declaration, name| {
            declaration.with_fixture(http_client(name))
        })
}

// ─────────────────────────────────────────────────────────────────────────────
// Stub Directory Fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// Write a mapping file under `<dir>/mappings/`.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn write_mapping(dir: &Path, file: &str, mapping: &serde_json::Value) -> std::io::Result<()> {
    let mappings = dir.join("mappings");
    std::fs::create_dir_all(&mappings)?;
    std::fs::write(mappings.join(file), serde_json::to_vec_pretty(mapping)?)
}

/// A mapping answering `GET url_path` with a JSON body.
#[must_use]
pub fn get_mapping(url_path: &str, body: &serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "request": { "method": "GET", "urlPath": url_path },
        "response": { "status": 200, "jsonBody": body }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Customizer Fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// Port forced by [`FixedPortCustomizer`].
pub const CUSTOMIZED_PORT: u16 = 9561;

/// Pins every fixture it is applied to on [`CUSTOMIZED_PORT`].
#[derive(Debug, Default)]
pub struct FixedPortCustomizer;

impl ConfigurationCustomizer for FixedPortCustomizer {
    fn customize(&self, config: &mut ServerConfig, _spec: &FixtureSpec) {
        config.port = CUSTOMIZED_PORT;
    }
}

/// Drops the stub directory, so the server starts with no file stubs.
#[derive(Debug, Default)]
pub struct NoFileStubsCustomizer;

impl ConfigurationCustomizer for NoFileStubsCustomizer {
    fn customize(&self, config: &mut ServerConfig, _spec: &FixtureSpec) {
        config.stub_dir = None;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON Fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// Common response bodies.
pub mod json {
    use serde_json::json;

    /// A user record.
    #[must_use]
    pub fn user(id: u64, name: &str) -> serde_json::Value {
        json!({ "id": id, "name": name })
    }

    /// A todo item.
    #[must_use]
    pub fn todo(id: u64, title: &str, done: bool) -> serde_json::Value {
        json!({ "id": id, "title": title, "completed": done })
    }

    /// Error envelope.
    #[must_use]
    pub fn error(code: &str, message: &str) -> serde_json::Value {
        json!({
            "error": {
                "code": code,
                "message": message
            }
        })
    }

    /// Not found error response.
    #[must_use]
    pub fn not_found(resource: &str) -> serde_json::Value {
        error("NOT_FOUND", &format!("{resource} not found"))
    }
}
