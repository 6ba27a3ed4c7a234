//! File-backed stub mappings.
//!
//! Reads `<stub_dir>/mappings/*.json` in a subset of the WireMock mapping
//! format and turns each mapping into a [`wiremock::Mock`]:
//!
//! ```json
//! {
//!   "priority": 1,
//!   "request": {
//!     "method": "GET",
//!     "urlPath": "/users/1",
//!     "queryParameters": { "expand": { "equalTo": "todos" } },
//!     "headers": { "Accept": { "equalTo": "application/json" } }
//!   },
//!   "response": { "status": 200, "jsonBody": { "id": 1 } }
//! }
//! ```
//!
//! A file holds either one mapping or `{"mappings": [...]}`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use http::{HeaderName, HeaderValue, Method, StatusCode};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use stubwire_core::EngineError;
use tracing::debug;
use wiremock::matchers::{any, body_json, header, method, path, path_regex, query_param};
use wiremock::{Mock, ResponseTemplate};

/// Sub-directory of a stub directory that holds mapping files.
pub const MAPPINGS_DIR: &str = "mappings";

/// One request-to-response mapping.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StubMapping {
    /// Lower values win; 1 is the highest priority.
    #[serde(default)]
    pub priority: Option<u8>,
    /// Request matchers.
    #[serde(default)]
    pub request: RequestPattern,
    /// Response to serve.
    #[serde(default)]
    pub response: ResponseDefinition,
}

/// Request side of a mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPattern {
    /// HTTP method; absent or `ANY` matches every method.
    #[serde(default)]
    pub method: Option<String>,
    /// Exact path plus query string.
    #[serde(default)]
    pub url: Option<String>,
    /// Exact path, query ignored.
    #[serde(default)]
    pub url_path: Option<String>,
    /// Path regular expression.
    #[serde(default)]
    pub url_path_pattern: Option<String>,
    #[serde(default)]
    pub query_parameters: BTreeMap<String, EqualTo>,
    #[serde(default)]
    pub headers: BTreeMap<String, EqualTo>,
    #[serde(default)]
    pub body_patterns: Vec<BodyPattern>,
}

/// `{"equalTo": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EqualTo {
    pub equal_to: String,
}

/// `{"equalToJson": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BodyPattern {
    pub equal_to_json: Value,
}

/// Response side of a mapping.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDefinition {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub json_body: Option<Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

const fn default_status() -> u16 {
    200
}

impl Default for ResponseDefinition {
    fn default() -> Self {
        Self {
            status: default_status(),
            body: None,
            json_body: None,
            headers: BTreeMap::new(),
        }
    }
}

impl StubMapping {
    /// Check every value that the wiremock builders would reject.
    ///
    /// # Errors
    /// Returns a description of the first invalid method, path pattern,
    /// header or status.
    pub fn check(&self) -> Result<(), String> {
        let request = &self.request;
        if let Some(verb) = request.method.as_deref() {
            Method::from_bytes(verb.to_ascii_uppercase().as_bytes())
                .map_err(|e| format!("method '{verb}': {e}"))?;
        }
        if let Some(pattern) = &request.url_path_pattern {
            Regex::new(pattern).map_err(|e| format!("urlPathPattern '{pattern}': {e}"))?;
        }
        for (name, value) in &request.headers {
            check_header(name, &value.equal_to)?;
        }
        for (name, value) in &self.response.headers {
            check_header(name, value)?;
        }
        StatusCode::from_u16(self.response.status)
            .map_err(|e| format!("status {}: {e}", self.response.status))?;
        Ok(())
    }

    /// Build a mountable mock.
    ///
    /// Mappings returned by [`parse_mappings`] have passed [`check`](Self::check);
    /// building one that fails it panics inside wiremock.
    #[must_use]
    pub fn to_mock(&self) -> Mock {
        let request = &self.request;
        let mut builder = Mock::given(any());

        if let Some(verb) = request
            .method
            .as_deref()
            .filter(|verb| !verb.eq_ignore_ascii_case("ANY"))
        {
            builder = builder.and(method(verb.to_ascii_uppercase()));
        }
        if let Some(url) = &request.url {
            let (url_path, query) = url.split_once('?').unwrap_or((url.as_str(), ""));
            builder = builder.and(path(url_path));
            for (key, value) in query
                .split('&')
                .filter(|pair| !pair.is_empty())
                .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
            {
                builder = builder.and(query_param(key, value));
            }
        }
        if let Some(url_path) = &request.url_path {
            builder = builder.and(path(url_path.as_str()));
        }
        if let Some(pattern) = &request.url_path_pattern {
            builder = builder.and(path_regex(pattern.as_str()));
        }
        for (key, value) in &request.query_parameters {
            builder = builder.and(query_param(key.as_str(), value.equal_to.as_str()));
        }
        for (name, value) in &request.headers {
            builder = builder.and(header(name.as_str(), value.equal_to.as_str()));
        }
        for pattern in &request.body_patterns {
            builder = builder.and(body_json(&pattern.equal_to_json));
        }

        let mock = builder.respond_with(self.response.to_template());
        match self.priority {
            Some(priority) => mock.with_priority(priority.max(1)),
            None => mock,
        }
    }
}

impl ResponseDefinition {
    fn to_template(&self) -> ResponseTemplate {
        let mut template = ResponseTemplate::new(self.status);
        if let Some(json) = &self.json_body {
            template = template.set_body_json(json);
        } else if let Some(body) = &self.body {
            template = template.set_body_string(body.as_str());
        }
        for (name, value) in &self.headers {
            template = template.insert_header(name.as_str(), value.as_str());
        }
        template
    }
}

fn check_header(name: &str, value: &str) -> Result<(), String> {
    HeaderName::try_from(name).map_err(|e| format!("header name '{name}': {e}"))?;
    HeaderValue::try_from(value).map_err(|e| format!("header '{name}' value: {e}"))?;
    Ok(())
}

fn mapping_error(file: &Path, message: impl ToString) -> EngineError {
    EngineError::StubMapping {
        path: file.display().to_string(),
        message: message.to_string(),
    }
}

/// Parse one mapping file's contents.
///
/// # Errors
/// Returns [`EngineError::StubMapping`] if the JSON is malformed, uses an
/// unsupported matcher, or holds a value wiremock cannot build a mock from.
pub fn parse_mappings(file: &Path, contents: &str) -> Result<Vec<StubMapping>, EngineError> {
    let mut document: Value =
        serde_json::from_str(contents).map_err(|e| mapping_error(file, e))?;
    let parsed: Vec<StubMapping> = match document.get_mut("mappings").map(Value::take) {
        Some(list) => serde_json::from_value(list),
        None => serde_json::from_value(document).map(|one| vec![one]),
    }
    .map_err(|e| mapping_error(file, e))?;

    for mapping in &parsed {
        mapping.check().map_err(|e| mapping_error(file, e))?;
    }
    Ok(parsed)
}

/// Load every mapping under `<stub_dir>/mappings`, files in name order.
///
/// A missing directory yields no mappings.
///
/// # Errors
/// Returns [`EngineError::Io`] on read failures and
/// [`EngineError::StubMapping`] on unparseable files.
pub fn load_mappings(stub_dir: &Path) -> Result<Vec<StubMapping>, EngineError> {
    let dir = stub_dir.join(MAPPINGS_DIR);
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "no stub mappings directory");
        return Ok(Vec::new());
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|file| file.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut mappings = Vec::new();
    for file in &files {
        let contents = std::fs::read_to_string(file)?;
        mappings.extend(parse_mappings(file, &contents)?);
    }
    debug!(dir = %dir.display(), files = files.len(), mappings = mappings.len(), "loaded stub mappings");
    Ok(mappings)
}
