//! Name-based injection of live fixture handles into test code.
//!
//! A fixture exposes up to two handles: the primary stub server and, when a
//! protocol extension was loaded, a facade over the same running server.
//! [`InjectionResolver`] hands them out by name; [`InjectionPlan`] is a typed
//! table of setters that fills a test struct in one call.

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;

use crate::{ContextId, FixtureError, FixtureResult, InstanceRegistry, StubEngine};

// ─────────────────────────────────────────────────────────────────────────────
// Capability
// ─────────────────────────────────────────────────────────────────────────────

/// Which handle of a fixture is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// The primary stub server handle.
    Server,
    /// The protocol facade over the same server.
    Facade,
}

impl Capability {
    /// Map a handle type to a capability, or `None` if `H` is neither handle.
    #[must_use]
    pub fn of<E: StubEngine, H: 'static>() -> Option<Self> {
        let requested = TypeId::of::<H>();
        if requested == TypeId::of::<Arc<E::Server>>() {
            Some(Self::Server)
        } else if requested == TypeId::of::<Arc<E::Facade>>() {
            Some(Self::Facade)
        } else {
            None
        }
    }

    /// Get the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "stub server",
            Self::Facade => "protocol facade",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved fixture handle.
pub enum FixtureRef<E: StubEngine> {
    /// Primary server.
    Server(Arc<E::Server>),
    /// Protocol facade.
    Facade(Arc<E::Facade>),
}

impl<E: StubEngine> FixtureRef<E> {
    /// The capability this handle satisfies.
    #[must_use]
    pub const fn capability(&self) -> Capability {
        match self {
            Self::Server(_) => Capability::Server,
            Self::Facade(_) => Capability::Facade,
        }
    }

    /// Take the server handle.
    #[must_use]
    pub fn into_server(self) -> Option<Arc<E::Server>> {
        match self {
            Self::Server(server) => Some(server),
            Self::Facade(_) => None,
        }
    }

    /// Take the facade handle.
    #[must_use]
    pub fn into_facade(self) -> Option<Arc<E::Facade>> {
        match self {
            Self::Facade(facade) => Some(facade),
            Self::Server(_) => None,
        }
    }

    fn into_any(self) -> Box<dyn Any> {
        match self {
            Self::Server(server) => Box::new(server),
            Self::Facade(facade) => Box::new(facade),
        }
    }
}

impl<E: StubEngine> Clone for FixtureRef<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Server(server) => Self::Server(Arc::clone(server)),
            Self::Facade(facade) => Self::Facade(Arc::clone(facade)),
        }
    }
}

impl<E: StubEngine> fmt::Debug for FixtureRef<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FixtureRef").field(&self.capability()).finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolver
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves fixture handles by name within one context.
///
/// Lookups never create instances; a name that was not declared in the
/// active or an enclosing scope is a [`FixtureError::NotRegistered`].
pub struct InjectionResolver<E: StubEngine> {
    registry: Arc<InstanceRegistry<E>>,
    context: ContextId,
}

impl<E: StubEngine> InjectionResolver<E> {
    /// Create a resolver over a context's registry entries.
    #[must_use]
    pub const fn new(registry: Arc<InstanceRegistry<E>>, context: ContextId) -> Self {
        Self { registry, context }
    }

    /// The context this resolver reads from.
    #[must_use]
    pub const fn context(&self) -> &ContextId {
        &self.context
    }

    /// Resolve a handle by name and capability.
    ///
    /// # Errors
    /// Returns [`FixtureError::NotRegistered`] if no such handle exists.
    pub fn resolve(&self, name: &str, capability: Capability) -> FixtureResult<FixtureRef<E>> {
        let resolved = match capability {
            Capability::Server => self
                .registry
                .find(&self.context, name)
                .map(|instance| FixtureRef::Server(Arc::clone(instance.server()))),
            Capability::Facade => self
                .registry
                .find_facade(&self.context, name)
                .map(FixtureRef::Facade),
        };
        resolved.ok_or_else(|| FixtureError::NotRegistered {
            name: name.into(),
            capability,
        })
    }

    /// Resolve into a concrete handle type: `Arc<E::Server>` or `Arc<E::Facade>`.
    ///
    /// # Errors
    /// Returns [`FixtureError::UnsupportedInjectionTarget`] for any other type,
    /// or [`FixtureError::NotRegistered`] if the handle does not exist.
    pub fn resolve_as<H: 'static>(&self, name: &str) -> FixtureResult<H> {
        let unsupported = || FixtureError::UnsupportedInjectionTarget {
            type_name: type_name::<H>(),
        };
        let capability = Capability::of::<E, H>().ok_or_else(unsupported)?;
        self.resolve(name, capability)?
            .into_any()
            .downcast::<H>()
            .map(|handle| *handle)
            .map_err(|_| unsupported())
    }

    /// Resolve the primary server handle.
    ///
    /// # Errors
    /// Returns [`FixtureError::NotRegistered`] if the name is not declared.
    pub fn server(&self, name: &str) -> FixtureResult<Arc<E::Server>> {
        self.resolve(name, Capability::Server)
            .map(|r| r.into_server())?
            .ok_or_else(|| FixtureError::NotRegistered {
                name: name.into(),
                capability: Capability::Server,
            })
    }

    /// Resolve the protocol facade.
    ///
    /// # Errors
    /// Returns [`FixtureError::NotRegistered`] if the name is not declared or
    /// the fixture loaded no protocol extension.
    pub fn facade(&self, name: &str) -> FixtureResult<Arc<E::Facade>> {
        self.resolve(name, Capability::Facade)
            .map(|r| r.into_facade())?
            .ok_or_else(|| FixtureError::NotRegistered {
                name: name.into(),
                capability: Capability::Facade,
            })
    }
}

impl<E: StubEngine> fmt::Debug for InjectionResolver<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionResolver")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Injection Plan
// ─────────────────────────────────────────────────────────────────────────────

type Setter<E, T> = Box<dyn Fn(&InjectionResolver<E>, &mut T) -> FixtureResult<()> + Send + Sync>;

struct InjectionPoint<E: StubEngine, T> {
    name: String,
    capability: Capability,
    setter: Setter<E, T>,
}

/// Setter table for one test type, built once and applied before each test.
///
/// ```
/// # use std::sync::Arc;
/// # use stubwire_core::{InjectionPlan, StubEngine, FixtureResult};
/// struct UserTests<E: StubEngine> {
///     user_client: Option<Arc<E::Server>>,
/// }
///
/// fn plan<E: StubEngine>() -> FixtureResult<InjectionPlan<E, UserTests<E>>> {
///     InjectionPlan::new().inject::<Arc<E::Server>>("user-client", |t: &mut UserTests<E>, s| t.user_client = Some(s))
/// }
/// ```
pub struct InjectionPlan<E: StubEngine, T> {
    points: Vec<InjectionPoint<E, T>>,
}

impl<E: StubEngine, T> Default for InjectionPlan<E, T> {
    fn default() -> Self {
        Self { points: Vec::new() }
    }
}

impl<E: StubEngine, T> InjectionPlan<E, T> {
    /// Create an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an injection point for the fixture `name`.
    ///
    /// The capability is derived from `H` here, so an unsupported handle type
    /// fails when the plan is built rather than when a test runs.
    ///
    /// # Errors
    /// Returns [`FixtureError::UnsupportedInjectionTarget`] if `H` is neither
    /// `Arc<E::Server>` nor `Arc<E::Facade>`.
    pub fn inject<H>(
        mut self,
        name: impl Into<String>,
        setter: impl Fn(&mut T, H) + Send + Sync + 'static,
    ) -> FixtureResult<Self>
    where
        H: 'static,
    {
        let capability =
            Capability::of::<E, H>().ok_or(FixtureError::UnsupportedInjectionTarget {
                type_name: type_name::<H>(),
            })?;
        let name = name.into();
        let lookup = name.clone();
        self.points.push(InjectionPoint {
            name,
            capability,
            setter: Box::new(move |resolver, target| {
                setter(target, resolver.resolve_as::<H>(&lookup)?);
                Ok(())
            }),
        });
        Ok(self)
    }

    /// Number of injection points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the plan has no injection points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// `(name, capability)` of every injection point, in registration order.
    pub fn points(&self) -> impl Iterator<Item = (&str, Capability)> {
        self.points.iter().map(|p| (p.name.as_str(), p.capability))
    }

    /// Fill `target` from `resolver`. Stops at the first unresolved point.
    ///
    /// # Errors
    /// Returns [`FixtureError::NotRegistered`] for a name the context does not know.
    pub fn apply(&self, resolver: &InjectionResolver<E>, target: &mut T) -> FixtureResult<()> {
        for point in &self.points {
            (point.setter)(resolver, target)?;
        }
        Ok(())
    }
}

impl<E: StubEngine, T> fmt::Debug for InjectionPlan<E, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.points.iter().map(|p| (&p.name, p.capability)))
            .finish()
    }
}
