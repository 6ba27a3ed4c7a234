//! Per-context registry of running fixtures.
//!
//! Maps `(context, fixture name)` to exactly one [`RunningInstance`]. Creation
//! is serialized per name, so two concurrent callers for the same fixture
//! never start two servers; distinct names never wait on each other.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::{
    ContextId, EngineError, FixtureError, FixtureResult, FixtureSpec, StubEngine, StubServer,
};

// ─────────────────────────────────────────────────────────────────────────────
// Running Instance
// ─────────────────────────────────────────────────────────────────────────────

/// A started fixture: the primary server handle plus an optional protocol facade.
pub struct RunningInstance<E: StubEngine> {
    spec: Arc<FixtureSpec>,
    server: Arc<E::Server>,
    facade: Option<Arc<E::Facade>>,
    running: AtomicBool,
}

impl<E: StubEngine> RunningInstance<E> {
    /// Wrap a started server.
    #[must_use]
    pub fn new(
        spec: Arc<FixtureSpec>,
        server: Arc<E::Server>,
        facade: Option<Arc<E::Facade>>,
    ) -> Self {
        Self {
            spec,
            server,
            facade,
            running: AtomicBool::new(true),
        }
    }

    /// Fixture name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// The fixture declaration this instance was created from.
    #[must_use]
    pub fn spec(&self) -> &FixtureSpec {
        &self.spec
    }

    /// Primary server handle.
    #[must_use]
    pub const fn server(&self) -> &Arc<E::Server> {
        &self.server
    }

    /// Protocol facade, present only when a matching extension was loaded.
    #[must_use]
    pub const fn facade(&self) -> Option<&Arc<E::Facade>> {
        self.facade.as_ref()
    }

    /// Bound port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.server.port()
    }

    /// Base URL including the port.
    #[must_use]
    pub fn base_url(&self) -> String {
        self.server.base_url()
    }

    /// False once [`stop`](Self::stop) has run.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Not stopped by us, and the engine still reports the server as up.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.is_running() && self.server.is_running()
    }

    /// Clear stub state without changing identity, port or address.
    ///
    /// # Errors
    /// Returns [`EngineError::Stopped`] after stop, or the engine's reset failure.
    pub async fn reset(&self) -> FixtureResult<()> {
        if !self.is_running() {
            return Err(EngineError::Stopped.into());
        }
        debug!(fixture = %self.name(), "resetting stub server");
        self.server.reset_all().await?;
        Ok(())
    }

    /// Stop the primary server. Returns `false` if it was already stopped.
    ///
    /// The facade is never stopped on its own; it dies with the server.
    ///
    /// # Errors
    /// Returns the engine's stop failure.
    pub async fn stop(&self) -> FixtureResult<bool> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }
        info!("Stopping stub server with name '{}'", self.name());
        self.server.stop().await?;
        Ok(true)
    }
}

impl<E: StubEngine> fmt::Debug for RunningInstance<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningInstance")
            .field("name", &self.spec.name)
            .field("base_url", &self.server.base_url())
            .field("facade", &self.facade.is_some())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Whether [`InstanceRegistry::get_or_create`] started a new server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioning {
    /// The creator ran and its instance was stored.
    Created,
    /// A live instance already existed.
    Reused,
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

struct ContextSlot<E: StubEngine> {
    instances: RwLock<HashMap<String, Arc<RunningInstance<E>>>>,
    creation_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    default_fixture: RwLock<Option<String>>,
}

impl<E: StubEngine> ContextSlot<E> {
    fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            creation_locks: Mutex::new(HashMap::new()),
            default_fixture: RwLock::new(None),
        }
    }

    fn creation_lock(&self, name: &str) -> Arc<AsyncMutex<()>> {
        Arc::clone(
            self.creation_locks
                .lock()
                .entry(name.to_owned())
                .or_default(),
        )
    }

    fn get(&self, name: &str) -> Option<Arc<RunningInstance<E>>> {
        self.instances.read().get(name).cloned()
    }
}

/// Keyed store of running fixtures, one map per test context.
pub struct InstanceRegistry<E: StubEngine> {
    contexts: RwLock<HashMap<ContextId, Arc<ContextSlot<E>>>>,
}

impl<E: StubEngine> Default for InstanceRegistry<E> {
    fn default() -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
        }
    }
}

impl<E: StubEngine> InstanceRegistry<E> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, context: &ContextId) -> Option<Arc<ContextSlot<E>>> {
        self.contexts.read().get(context).cloned()
    }

    fn slot_or_insert(&self, context: &ContextId) -> Arc<ContextSlot<E>> {
        if let Some(slot) = self.slot(context) {
            return slot;
        }
        Arc::clone(
            self.contexts
                .write()
                .entry(context.clone())
                .or_insert_with(|| Arc::new(ContextSlot::new())),
        )
    }

    /// Return the live instance for `spec.name`, or run `creator` and store its result.
    ///
    /// At most one creator runs per `(context, name)` at a time; waiters reuse
    /// the winner. An instance whose server died outside our control is
    /// replaced; one stopped by [`RunningInstance::stop`] is never recreated.
    ///
    /// # Errors
    /// Returns [`FixtureError::InstanceStopped`] for a stopped fixture, or the
    /// creator's error unchanged.
    pub async fn get_or_create<F, Fut>(
        &self,
        context: &ContextId,
        spec: &FixtureSpec,
        creator: F,
    ) -> FixtureResult<(Arc<RunningInstance<E>>, Provisioning)>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = FixtureResult<RunningInstance<E>>> + Send,
    {
        let slot = self.slot_or_insert(context);
        let lock = slot.creation_lock(&spec.name);
        let _guard = lock.lock().await;

        if let Some(existing) = slot.get(&spec.name) {
            if existing.is_live() {
                info!("Stub server with name '{}' is already configured", spec.name);
                return Ok((existing, Provisioning::Reused));
            }
            if !existing.is_running() {
                return Err(FixtureError::InstanceStopped {
                    name: spec.name.clone(),
                    context: context.clone(),
                });
            }
            warn!(fixture = %spec.name, "stub server is no longer running; starting a new one");
        }

        let created = Arc::new(creator().await?);
        slot.instances
            .write()
            .insert(spec.name.clone(), Arc::clone(&created));
        Ok((created, Provisioning::Created))
    }

    /// Snapshot of every instance in a context, in no particular order.
    #[must_use]
    pub fn all_instances(&self, context: &ContextId) -> Vec<Arc<RunningInstance<E>>> {
        self.slot(context)
            .map(|slot| slot.instances.read().values().cloned().collect())
            .unwrap_or_default()
    }

    /// Look up an instance by name; never creates.
    #[must_use]
    pub fn find(&self, context: &ContextId, name: &str) -> Option<Arc<RunningInstance<E>>> {
        self.slot(context)?.get(name)
    }

    /// Look up the protocol facade registered under a fixture name.
    #[must_use]
    pub fn find_facade(&self, context: &ContextId, name: &str) -> Option<Arc<E::Facade>> {
        self.find(context, name)?.facade().cloned()
    }

    /// Set or clear the context's default fixture.
    pub fn set_default(&self, context: &ContextId, name: Option<&str>) {
        let slot = self.slot_or_insert(context);
        *slot.default_fixture.write() = name.map(str::to_owned);
    }

    /// The context's default fixture, if exactly one was declared.
    #[must_use]
    pub fn default_instance(&self, context: &ContextId) -> Option<Arc<RunningInstance<E>>> {
        let slot = self.slot(context)?;
        let name = slot.default_fixture.read().clone()?;
        slot.get(&name)
    }

    /// Drop every entry of a context.
    pub fn remove_context(&self, context: &ContextId) {
        self.contexts.write().remove(context);
    }

    /// Number of contexts with at least one registry entry.
    #[must_use]
    pub fn context_count(&self) -> usize {
        self.contexts.read().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::test_support::{FakeEngine, FakeServer};

    fn instance(spec: &FixtureSpec, port: u16) -> RunningInstance<FakeEngine> {
        RunningInstance::new(Arc::new(spec.clone()), Arc::new(FakeServer::new(port)), None)
    }

    #[tokio::test]
    async fn same_name_in_same_context_is_reused() {
        let registry = InstanceRegistry::<FakeEngine>::new();
        let ctx = ContextId::named("ctx");
        let spec = FixtureSpec::new("user-client");
        let starts = AtomicUsize::new(0);

        let (first, p1) = registry
            .get_or_create(&ctx, &spec, || async {
                starts.fetch_add(1, Ordering::SeqCst);
                Ok(instance(&spec, 9000))
            })
            .await
            .unwrap();
        let (second, p2) = registry
            .get_or_create(&ctx, &spec, || async {
                starts.fetch_add(1, Ordering::SeqCst);
                Ok(instance(&spec, 9001))
            })
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!((p1, p2), (Provisioning::Created, Provisioning::Reused));
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn contexts_do_not_share_instances() {
        let registry = InstanceRegistry::<FakeEngine>::new();
        let spec = FixtureSpec::new("svc");
        let (a, _) = registry
            .get_or_create(&ContextId::named("a"), &spec, || async { Ok(instance(&spec, 1)) })
            .await
            .unwrap();
        let (b, _) = registry
            .get_or_create(&ContextId::named("b"), &spec, || async { Ok(instance(&spec, 2)) })
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.context_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_creation_of_one_name_starts_once() {
        let registry = Arc::new(InstanceRegistry::<FakeEngine>::new());
        let ctx = ContextId::named("ctx");
        let starts = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let ctx = ctx.clone();
                let starts = Arc::clone(&starts);
                tokio::spawn(async move {
                    let spec = FixtureSpec::new("shared");
                    let (instance, _) = registry
                        .get_or_create(&ctx, &spec, || async {
                            starts.fetch_add(1, Ordering::SeqCst);
                            tokio::task::yield_now().await;
                            Ok(instance(&spec, 7000 + i))
                        })
                        .await
                        .unwrap();
                    instance
                })
            })
            .collect();

        let instances = futures_util::future::join_all(tasks).await;
        let first = instances[0].as_ref().unwrap();
        for other in &instances {
            assert!(Arc::ptr_eq(first, other.as_ref().unwrap()));
        }
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_names_in_one_context_are_created_in_parallel() {
        const NAMES: u16 = 4;
        let registry = Arc::new(InstanceRegistry::<FakeEngine>::new());
        let ctx = ContextId::named("ctx");
        let starts = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(tokio::sync::Notify::new());

        // Creator 0 blocks until creator 1 runs, which only works if one name
        // never holds up another.
        let tasks: Vec<_> = (0..NAMES)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let ctx = ctx.clone();
                let starts = Arc::clone(&starts);
                let released = Arc::clone(&released);
                tokio::spawn(async move {
                    let spec = FixtureSpec::new(format!("svc-{i}"));
                    let (instance, provisioning) = registry
                        .get_or_create(&ctx, &spec, || async {
                            starts.fetch_add(1, Ordering::SeqCst);
                            match i {
                                0 => released.notified().await,
                                1 => released.notify_one(),
                                _ => tokio::task::yield_now().await,
                            }
                            Ok(instance(&spec, 8000 + i))
                        })
                        .await
                        .unwrap();
                    assert_eq!(provisioning, Provisioning::Created);
                    instance
                })
            })
            .collect();

        let instances = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            futures_util::future::join_all(tasks),
        )
        .await
        .expect("creators for distinct names must not serialize");

        let ports: std::collections::BTreeSet<u16> = instances
            .into_iter()
            .map(|joined| joined.unwrap().port())
            .collect();
        assert_eq!(ports.len(), usize::from(NAMES));
        assert_eq!(starts.load(Ordering::SeqCst), usize::from(NAMES));
        for i in 0..NAMES {
            assert!(registry.find(&ctx, &format!("svc-{i}")).is_some());
        }
    }

    #[tokio::test]
    async fn creator_failure_propagates_and_stores_nothing() {
        let registry = InstanceRegistry::<FakeEngine>::new();
        let ctx = ContextId::named("ctx");
        let spec = FixtureSpec::new("svc").with_port(80);

        let err = registry
            .get_or_create(&ctx, &spec, || async {
                Err(EngineError::Other("port in use".into()).into())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, FixtureError::Engine(_)));
        assert!(registry.find(&ctx, "svc").is_none());
    }

    #[tokio::test]
    async fn stopped_instance_is_never_recreated() {
        let registry = InstanceRegistry::<FakeEngine>::new();
        let ctx = ContextId::named("ctx");
        let spec = FixtureSpec::new("svc");
        let (first, _) = registry
            .get_or_create(&ctx, &spec, || async { Ok(instance(&spec, 1)) })
            .await
            .unwrap();
        assert!(first.stop().await.unwrap());
        assert!(!first.stop().await.unwrap());

        let err = registry
            .get_or_create(&ctx, &spec, || async { Ok(instance(&spec, 2)) })
            .await
            .unwrap_err();
        assert!(matches!(err, FixtureError::InstanceStopped { .. }));
    }

    #[tokio::test]
    async fn externally_dead_server_is_replaced() {
        let registry = InstanceRegistry::<FakeEngine>::new();
        let ctx = ContextId::named("ctx");
        let spec = FixtureSpec::new("svc");
        let (first, _) = registry
            .get_or_create(&ctx, &spec, || async { Ok(instance(&spec, 1)) })
            .await
            .unwrap();
        first.server().kill();

        let (second, provisioning) = registry
            .get_or_create(&ctx, &spec, || async { Ok(instance(&spec, 2)) })
            .await
            .unwrap();
        assert_eq!(provisioning, Provisioning::Created);
        assert_eq!(second.port(), 2);
    }

    #[tokio::test]
    async fn default_instance_follows_set_default() {
        let registry = InstanceRegistry::<FakeEngine>::new();
        let ctx = ContextId::named("ctx");
        let spec = FixtureSpec::new("only");
        registry
            .get_or_create(&ctx, &spec, || async { Ok(instance(&spec, 5)) })
            .await
            .unwrap();

        assert!(registry.default_instance(&ctx).is_none());
        registry.set_default(&ctx, Some("only"));
        assert_eq!(registry.default_instance(&ctx).unwrap().port(), 5);
        registry.set_default(&ctx, None);
        assert!(registry.default_instance(&ctx).is_none());
    }
}
