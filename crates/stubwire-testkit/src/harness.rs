//! Test harness that plays the host test framework for one context.
//!
//! The [`FixtureHarness`] owns an in-memory [`TestRuntime`], a
//! [`LifecycleController`] and one [`ContextId`], and provides:
//! - The setup / before-each / shutdown callbacks a test framework would issue
//! - Recording and timing of every callback for assertions
//! - Direct access to the context's bound properties

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use stubwire_core::{
    ContextId, CustomizerRegistry, FixtureResult, FixtureSettings, InjectionPlan,
    InjectionResolver, LifecycleController, LifecycleState, PropertyValue, ScopeDeclaration,
    StubEngine, TestHost, TestRuntime,
};
use tracing::{debug, info};

/// Recorded host callback for test inspection.
#[derive(Debug, Clone)]
pub struct RecordedOperation {
    /// Callback name (`setup`, `before_each`, `shutdown`)
    pub operation: String,
    /// What the callback was invoked for, e.g. the scope name
    pub detail: Option<String>,
    /// `Ok` or the error message
    pub result: Result<(), String>,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

/// Drives one test context through its lifecycle.
pub struct FixtureHarness<E: StubEngine> {
    runtime: Arc<TestRuntime>,
    controller: LifecycleController<E>,
    context: ContextId,
    operations: Vec<RecordedOperation>,
}

impl<E: StubEngine> FixtureHarness<E> {
    /// Create a harness with a fresh runtime and a random context.
    pub fn new(engine: E) -> Self {
        let runtime = Arc::new(TestRuntime::new());
        let host: Arc<dyn TestHost> = runtime.clone();
        Self {
            controller: LifecycleController::new(engine, host),
            runtime,
            context: ContextId::random(),
            operations: Vec::new(),
        }
    }

    /// Use the given settings.
    #[must_use]
    pub fn with_settings(mut self, settings: FixtureSettings) -> Self {
        self.controller = self.controller.with_settings(settings);
        self
    }

    /// Use the given customizer registry.
    #[must_use]
    pub fn with_customizers(mut self, customizers: CustomizerRegistry) -> Self {
        self.controller = self.controller.with_customizers(customizers);
        self
    }

    /// Use a caller-chosen context identity.
    #[must_use]
    pub fn with_context(mut self, context: ContextId) -> Self {
        self.context = context;
        self
    }

    /// The context this harness drives.
    pub const fn context(&self) -> &ContextId {
        &self.context
    }

    /// The in-memory host runtime.
    pub const fn runtime(&self) -> &Arc<TestRuntime> {
        &self.runtime
    }

    /// The lifecycle controller.
    pub const fn controller(&self) -> &LifecycleController<E> {
        &self.controller
    }

    /// Current lifecycle state of the context.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.controller.state(&self.context)
    }

    /// Read a property bound into the context.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        self.runtime.get_property(&self.context, key)
    }

    /// Get all recorded operations.
    #[must_use]
    pub fn operations(&self) -> &[RecordedOperation] {
        &self.operations
    }

    /// Get the last recorded operation.
    #[must_use]
    pub fn last_operation(&self) -> Option<&RecordedOperation> {
        self.operations.last()
    }

    fn record<T>(
        &mut self,
        operation: &str,
        detail: Option<String>,
        start: Instant,
        result: &FixtureResult<T>,
    ) {
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.operations.push(RecordedOperation {
            operation: operation.to_string(),
            detail,
            result: result.as_ref().map(|_| ()).map_err(ToString::to_string),
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Host Callbacks
    // ─────────────────────────────────────────────────────────────────────────────

    /// Set up the fixtures of `scope` (and its enclosing scopes).
    ///
    /// # Errors
    ///
    /// Returns an error if any fixture cannot be provisioned.
    pub async fn setup(&mut self, scope: &ScopeDeclaration) -> FixtureResult<()> {
        let start = Instant::now();
        info!(context = %self.context, scope = %scope.name(), "harness setup");

        let result = self.controller.on_context_setup(&self.context, scope).await;

        self.record("setup", Some(scope.name().to_string()), start, &result);
        result
    }

    /// Reset every fixture and return the context's resolver.
    ///
    /// # Errors
    ///
    /// Returns an error if the context is not ready or a reset fails.
    pub async fn before_each(&mut self) -> FixtureResult<InjectionResolver<E>> {
        let start = Instant::now();
        debug!(context = %self.context, "harness before_each");

        let result = self.controller.on_before_each_test(&self.context).await;

        self.record("before_each", None, start, &result);
        result
    }

    /// Run `before_each` and fill `target` from `plan`.
    ///
    /// # Errors
    ///
    /// Returns an error if `before_each` fails or a name is not registered.
    pub async fn inject<T>(
        &mut self,
        plan: &InjectionPlan<E, T>,
        target: &mut T,
    ) -> FixtureResult<InjectionResolver<E>> {
        let resolver = self.before_each().await?;
        plan.apply(&resolver, target)?;
        Ok(resolver)
    }

    /// Close the context, running every shutdown listener.
    ///
    /// # Errors
    ///
    /// Returns the aggregated listener failures.
    pub async fn shutdown(&mut self) -> FixtureResult<()> {
        let start = Instant::now();
        info!(context = %self.context, "harness shutdown");

        let result = self.runtime.shutdown(&self.context).await;

        self.record("shutdown", None, start, &result);
        result
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Assertions
    // ─────────────────────────────────────────────────────────────────────────────

    /// Assert that the last operation succeeded.
    ///
    /// # Panics
    ///
    /// Panics if the last operation failed or no operations recorded.
    pub fn assert_last_success(&self) {
        match self.last_operation() {
            Some(op) => assert!(op.result.is_ok(), "Last operation failed: {:?}", op.result),
            None => panic!("No operations recorded"),
        }
    }

    /// Assert that the last operation failed.
    ///
    /// # Panics
    ///
    /// Panics if the last operation succeeded or no operations recorded.
    pub fn assert_last_failure(&self) {
        match self.last_operation() {
            Some(op) => assert!(op.result.is_err(), "Expected failure but got: {:?}", op.result),
            None => panic!("No operations recorded"),
        }
    }

    /// Assert the context is in `expected`.
    ///
    /// # Panics
    ///
    /// Panics if the state differs.
    pub fn assert_state(&self, expected: LifecycleState) {
        let actual = self.state();
        assert_eq!(
            actual, expected,
            "Context {} is {actual}, expected {expected}",
            self.context
        );
    }

    /// Assert how many times `operation` was recorded.
    ///
    /// # Panics
    ///
    /// Panics if count doesn't match.
    pub fn assert_operation_count(&self, operation: &str, expected: usize) {
        let actual = self
            .operations
            .iter()
            .filter(|op| op.operation == operation)
            .count();
        assert_eq!(
            actual, expected,
            "Expected {expected} '{operation}' operations but got {actual}"
        );
    }
}
