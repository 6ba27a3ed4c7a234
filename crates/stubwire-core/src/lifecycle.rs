//! Context setup, per-test reset, and exactly-once teardown of fixtures.
//!
//! The host drives three callbacks:
//!
//! 1. [`LifecycleController::on_context_setup`] when a test context (or a
//!    nested scope within it) is set up;
//! 2. [`LifecycleController::on_before_each_test`] before every test method;
//! 3. the [`ShutdownListener`]s registered per fixture, when the host closes
//!    the context.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::{
    ConfigurationBinder, ContextId, CustomizerRegistry, FixtureError, FixtureResult,
    FixtureSettings, FixtureSpec, InjectionResolver, InstanceRegistry, LifecycleState,
    Provisioning, RunningInstance, ScopeDeclaration, ServerConfig, ShutdownListener, StubEngine,
    StubServer, TestHost,
};

// ─────────────────────────────────────────────────────────────────────────────
// Context States
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ContextRecord {
    state: LifecycleState,
    specs: Vec<FixtureSpec>,
}

#[derive(Debug, Default)]
struct ContextStates {
    records: RwLock<HashMap<ContextId, ContextRecord>>,
}

impl ContextStates {
    fn state(&self, context: &ContextId) -> LifecycleState {
        self.records
            .read()
            .get(context)
            .map(|record| record.state)
            .unwrap_or_default()
    }

    fn set(&self, context: &ContextId, state: LifecycleState) {
        let mut records = self.records.write();
        let record = records.entry(context.clone()).or_default();
        debug!(context = %context, from = %record.state, to = %state, "context state change");
        record.state = state;
    }

    /// Move to `TearingDown` unless the context already got that far.
    fn begin_teardown(&self, context: &ContextId) {
        if !self.state(context).is_shutting_down() {
            self.set(context, LifecycleState::TearingDown);
        }
    }

    /// Mark the context closed and drop everything but that marker.
    fn close(&self, context: &ContextId) {
        let mut records = self.records.write();
        let record = records.entry(context.clone()).or_default();
        debug!(context = %context, from = %record.state, to = %LifecycleState::Closed, "context state change");
        record.state = LifecycleState::Closed;
        record.specs = Vec::new();
    }

    /// Merge newly collected specs into the context, keeping first-seen order.
    fn record_specs(&self, context: &ContextId, specs: &[FixtureSpec]) -> usize {
        let mut records = self.records.write();
        let record = records.entry(context.clone()).or_default();
        for spec in specs {
            if !record.specs.iter().any(|known| known.name == spec.name) {
                record.specs.push(spec.clone());
            }
        }
        record.specs.len()
    }

    fn specs(&self, context: &ContextId) -> Vec<FixtureSpec> {
        self.records
            .read()
            .get(context)
            .map(|record| record.specs.clone())
            .unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shutdown Listener
// ─────────────────────────────────────────────────────────────────────────────

/// Stops one fixture when its context shuts down.
struct StopFixture<E: StubEngine> {
    context: ContextId,
    instance: Arc<RunningInstance<E>>,
    registry: Arc<InstanceRegistry<E>>,
    states: Arc<ContextStates>,
}

#[async_trait]
impl<E: StubEngine> ShutdownListener for StopFixture<E> {
    fn describe(&self) -> String {
        format!("stop fixture '{}'", self.instance.name())
    }

    async fn on_shutdown(&self) -> FixtureResult<()> {
        self.states.begin_teardown(&self.context);
        let stopped = self.instance.stop().await;

        let remaining = self
            .registry
            .all_instances(&self.context)
            .iter()
            .filter(|instance| instance.is_running())
            .count();
        if remaining == 0 {
            info!(context = %self.context, "all fixtures stopped");
            self.states.close(&self.context);
            self.registry.remove_context(&self.context);
        }

        stopped.map(|_| ())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Controller
// ─────────────────────────────────────────────────────────────────────────────

/// Orchestrates fixtures for every context of one host runtime.
pub struct LifecycleController<E: StubEngine> {
    engine: Arc<E>,
    host: Arc<dyn TestHost>,
    binder: ConfigurationBinder,
    registry: Arc<InstanceRegistry<E>>,
    customizers: CustomizerRegistry,
    settings: FixtureSettings,
    states: Arc<ContextStates>,
}

impl<E: StubEngine> LifecycleController<E> {
    /// Create a controller with default settings and no customizers.
    #[must_use]
    pub fn new(engine: E, host: Arc<dyn TestHost>) -> Self {
        Self {
            engine: Arc::new(engine),
            binder: ConfigurationBinder::new(Arc::clone(&host)),
            host,
            registry: Arc::new(InstanceRegistry::new()),
            customizers: CustomizerRegistry::new(),
            settings: FixtureSettings::default(),
            states: Arc::new(ContextStates::default()),
        }
    }

    /// Use the given settings.
    #[must_use]
    pub fn with_settings(mut self, settings: FixtureSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Use the given customizer registry.
    #[must_use]
    pub fn with_customizers(mut self, customizers: CustomizerRegistry) -> Self {
        self.customizers = customizers;
        self
    }

    /// The stub engine.
    #[must_use]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The instance registry shared with resolvers and listeners.
    #[must_use]
    pub const fn registry(&self) -> &Arc<InstanceRegistry<E>> {
        &self.registry
    }

    /// Active settings.
    #[must_use]
    pub const fn settings(&self) -> &FixtureSettings {
        &self.settings
    }

    /// Current state of a context.
    #[must_use]
    pub fn state(&self, context: &ContextId) -> LifecycleState {
        self.states.state(context)
    }

    /// Every spec provisioned in a context so far, in first-seen order.
    #[must_use]
    pub fn specs(&self, context: &ContextId) -> Vec<FixtureSpec> {
        self.states.specs(context)
    }

    /// Set up every fixture declared on `scope` and its enclosing scopes.
    ///
    /// Already-running fixtures are reused. Calling this again from `Ready`
    /// adds the fixtures of a nested scope. On failure the context stays in
    /// `Configuring`; fixtures created before the failure are still stopped
    /// at host shutdown.
    ///
    /// # Errors
    /// Returns [`FixtureError::InvalidState`] outside `Unconfigured` and
    /// `Ready`, or the first declaration, engine or host error.
    pub async fn on_context_setup(
        &self,
        context: &ContextId,
        scope: &ScopeDeclaration,
    ) -> FixtureResult<()> {
        let state = self.state(context);
        if !state.can_configure() {
            return Err(FixtureError::InvalidState {
                context: context.clone(),
                state,
                operation: "set up",
            });
        }
        self.states.set(context, LifecycleState::Configuring);

        let specs = scope.collect_specs()?;
        info!(context = %context, scope = %scope.name(), fixtures = specs.len(), "configuring fixtures");
        for spec in &specs {
            self.provision(context, spec).await?;
        }

        let declared = self.states.record_specs(context, &specs);
        let known = self.states.specs(context);
        match known.as_slice() {
            [only] => {
                debug!(context = %context, fixture = %only.name, "setting default fixture");
                self.registry.set_default(context, Some(&only.name));
            }
            _ => self.registry.set_default(context, None),
        }

        self.states.set(context, LifecycleState::Ready);
        info!(context = %context, fixtures = declared, "context ready");
        Ok(())
    }

    async fn provision(
        &self,
        context: &ContextId,
        spec: &FixtureSpec,
    ) -> FixtureResult<Arc<RunningInstance<E>>> {
        let (instance, provisioning) = self
            .registry
            .get_or_create(context, spec, || self.create(spec))
            .await?;

        if provisioning == Provisioning::Created {
            self.host.register_shutdown_listener(
                context,
                Box::new(StopFixture {
                    context: context.clone(),
                    instance: Arc::clone(&instance),
                    registry: Arc::clone(&self.registry),
                    states: Arc::clone(&self.states),
                }),
            )?;
            self.binder.bind(context, &instance)?;
        }
        Ok(instance)
    }

    async fn create(&self, spec: &FixtureSpec) -> FixtureResult<RunningInstance<E>> {
        let mut config = ServerConfig::for_spec(spec, &self.settings);
        self.customizers.apply(&mut config, spec)?;
        config.extensions.extend(spec.extensions.iter().cloned());

        // Extensions a customizer added count as declared from here on.
        let mut effective = spec.clone();
        for extension in &config.extensions {
            if !effective.extensions.contains(extension) {
                effective.extensions.push(extension.clone());
            }
        }

        info!("Configuring stub server with name '{}' on port {}", spec.name, config.port);
        let server = self.engine.start(config).await?;
        let facade = self.engine.facade(&server, &effective);
        if facade.is_none() && effective.is_non_http() {
            warn!(fixture = %spec.name, "engine built no facade for a non-HTTP fixture");
        }
        info!(fixture = %spec.name, base_url = %server.base_url(), "stub server started");

        Ok(RunningInstance::new(Arc::new(effective), server, facade))
    }

    /// Reset every fixture of a ready context and return its resolver.
    ///
    /// # Errors
    /// Returns [`FixtureError::InvalidState`] unless the context is `Ready`,
    /// or the first reset failure.
    pub async fn on_before_each_test(
        &self,
        context: &ContextId,
    ) -> FixtureResult<InjectionResolver<E>> {
        let state = self.state(context);
        if !state.is_ready() {
            return Err(FixtureError::InvalidState {
                context: context.clone(),
                state,
                operation: "prepare a test in",
            });
        }
        for instance in self.registry.all_instances(context) {
            instance.reset().await?;
        }
        Ok(InjectionResolver::new(
            Arc::clone(&self.registry),
            context.clone(),
        ))
    }

    /// The context's only fixture, for call sites that stub without a name.
    ///
    /// # Errors
    /// Returns [`FixtureError::NoDefaultFixture`] unless exactly one fixture
    /// was declared for the context.
    pub fn default_server(&self, context: &ContextId) -> FixtureResult<Arc<E::Server>> {
        self.registry
            .default_instance(context)
            .map(|instance| Arc::clone(instance.server()))
            .ok_or_else(|| FixtureError::NoDefaultFixture {
                context: context.clone(),
                declared: self.specs(context).len(),
            })
    }
}
