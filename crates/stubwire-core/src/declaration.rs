//! Fixture declarations attached to a test scope.
//!
//! A scope corresponds to a test type; nested test types get a nested scope
//! whose parent is the enclosing one. Declarations are written in TOML:
//!
//! ```toml
//! [[enable]]
//! [[enable.fixture]]
//! name = "user-client"
//! properties = ["user-client.url"]
//!
//! [[enable.fixture]]
//! name = "greeter"
//! extensions = ["grpc"]
//! ```
//!
//! Several `[[enable]]` blocks may appear; their fixtures are concatenated in
//! order.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;

use crate::{FixtureError, FixtureResult, FixtureSpec};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeclarationDocument {
    #[serde(default)]
    enable: Vec<EnableBlock>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct EnableBlock {
    #[serde(default)]
    fixture: Vec<FixtureSpec>,
}

/// The fixtures declared directly on one test scope, plus a link to the
/// enclosing scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeDeclaration {
    name: String,
    fixtures: Vec<FixtureSpec>,
    parent: Option<Arc<ScopeDeclaration>>,
}

impl ScopeDeclaration {
    /// Create an empty top-level scope.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fixtures: Vec::new(),
            parent: None,
        }
    }

    /// Create an empty scope nested inside `parent`.
    #[must_use]
    pub fn nested(parent: &Arc<Self>, name: impl Into<String>) -> Self {
        Self::new(name).within(parent)
    }

    /// Parse a scope from its TOML declaration.
    ///
    /// # Errors
    /// Returns [`FixtureError::Declaration`] on malformed TOML or unknown options.
    pub fn from_toml_str(name: impl Into<String>, source: &str) -> FixtureResult<Self> {
        let document: DeclarationDocument = toml::from_str(source)?;
        Ok(Self {
            name: name.into(),
            fixtures: document
                .enable
                .into_iter()
                .flat_map(|block| block.fixture)
                .collect(),
            parent: None,
        })
    }

    /// Attach this scope to an enclosing one.
    #[must_use]
    pub fn within(mut self, parent: &Arc<Self>) -> Self {
        self.parent = Some(Arc::clone(parent));
        self
    }

    /// Declare a fixture on this scope.
    #[must_use]
    pub fn with_fixture(mut self, spec: FixtureSpec) -> Self {
        self.fixtures.push(spec);
        self
    }

    /// Scope name, used in error messages.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fixtures declared directly on this scope.
    #[must_use]
    pub fn fixtures(&self) -> &[FixtureSpec] {
        &self.fixtures
    }

    /// Enclosing scope, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&Arc<Self>> {
        self.parent.as_ref()
    }

    /// This scope and its ancestors, outermost first.
    #[must_use]
    pub fn chain(&self) -> Vec<&Self> {
        let mut chain: Vec<&Self> =
            std::iter::successors(Some(self), |scope| scope.parent.as_deref()).collect();
        chain.reverse();
        chain
    }

    /// Validate and flatten the scope chain into the specs to provision.
    ///
    /// Specs are returned outermost scope first, in declaration order. An
    /// identical re-declaration in an inner scope is dropped.
    ///
    /// # Errors
    /// Returns [`FixtureError::InvalidSpec`] for a malformed spec, or
    /// [`FixtureError::DuplicateFixture`] when a name repeats within one scope
    /// or is re-declared with different settings in an inner scope.
    pub fn collect_specs(&self) -> FixtureResult<Vec<FixtureSpec>> {
        let mut collected: Vec<FixtureSpec> = Vec::new();
        for scope in self.chain() {
            let mut local = HashSet::new();
            for spec in &scope.fixtures {
                spec.validate()?;
                if !local.insert(spec.name.as_str()) {
                    return Err(scope.duplicate(&spec.name));
                }
                match collected.iter().find(|existing| existing.name == spec.name) {
                    Some(existing) if existing == spec => {}
                    Some(_) => return Err(scope.duplicate(&spec.name)),
                    None => collected.push(spec.clone()),
                }
            }
        }
        Ok(collected)
    }

    fn duplicate(&self, name: &str) -> FixtureError {
        FixtureError::DuplicateFixture {
            name: name.into(),
            scope: format!("scope '{}'", self.name),
        }
    }
}
