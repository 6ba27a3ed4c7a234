//! Lifecycle guarantees checked against the in-memory recording engine.

use std::sync::Arc;

use stubwire_core::{
    Capability, ContextId, CustomizerRegistry, DEFAULT_PORT_PROPERTY, ErrorKind, FixtureError,
    FixtureSpec, InjectionPlan, LifecycleController, LifecycleState, ScopeDeclaration, StubServer,
    TestHost, TestRuntime,
};
use stubwire_testkit::fixtures::{
    CUSTOMIZED_PORT, FixedPortCustomizer, grpc_service, http_client, scope_of,
};
use stubwire_testkit::{
    FixtureHarness, RecordingEngine, RecordingFacade, RecordingServer, assert_fixture_bound,
    assert_not_registered, assert_property, init_test_tracing,
};

#[derive(Default)]
struct UserTests {
    user_client: Option<Arc<RecordingServer>>,
}

#[tokio::test]
async fn scenario_a_property_and_injection_point_at_same_instance() {
    init_test_tracing();
    let mut harness = FixtureHarness::new(RecordingEngine::new());
    harness
        .setup(&scope_of("UserTests", &["user-client"]))
        .await
        .unwrap();
    harness.assert_state(LifecycleState::Ready);

    let plan = InjectionPlan::<RecordingEngine, UserTests>::new()
        .inject::<Arc<RecordingServer>>("user-client", |t, s| t.user_client = Some(s))
        .unwrap();
    let mut tests = UserTests::default();
    let resolver = harness.inject(&plan, &mut tests).await.unwrap();

    let injected = tests.user_client.unwrap();
    assert!(Arc::ptr_eq(&injected, &resolver.server("user-client").unwrap()));
    assert_fixture_bound(
        harness.runtime().as_ref(),
        harness.context(),
        injected.as_ref(),
        &["user-client.url"],
        DEFAULT_PORT_PROPERTY,
    );
}

#[tokio::test]
async fn scenario_b_unknown_name_is_not_registered() {
    init_test_tracing();
    let mut harness = FixtureHarness::new(RecordingEngine::new());
    harness
        .setup(&scope_of("Tests", &["svc-a", "svc-b"]))
        .await
        .unwrap();
    let resolver = harness.before_each().await.unwrap();

    assert_not_registered(&resolver.server("svc-c"), "svc-c", Capability::Server);

    let plan = InjectionPlan::<RecordingEngine, UserTests>::new()
        .inject::<Arc<RecordingServer>>("svc-c", |t, s| t.user_client = Some(s))
        .unwrap();
    let mut tests = UserTests::default();
    let err = harness.inject(&plan, &mut tests).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnregisteredReference);
    assert!(tests.user_client.is_none());
}

#[tokio::test]
async fn scenario_c_grpc_binds_stripped_address_and_real_port() {
    init_test_tracing();
    let mut harness = FixtureHarness::new(RecordingEngine::new());
    harness
        .setup(&ScopeDeclaration::new("GreeterTests").with_fixture(grpc_service("greeter")))
        .await
        .unwrap();
    let resolver = harness.before_each().await.unwrap();

    let server = resolver.server("greeter").unwrap();
    let facade: Arc<RecordingFacade> = resolver.resolve_as("greeter").unwrap();

    assert_eq!(facade.port(), server.port());
    assert_eq!(facade.name(), "greeter");
    assert_property(
        harness.runtime().as_ref(),
        harness.context(),
        "greeter.address",
        "http://127.0.0.1",
    );
    assert_eq!(
        harness.property("greeter.port").and_then(|v| v.as_port()),
        Some(server.port())
    );
}

#[tokio::test]
async fn scenario_d_default_server_only_for_single_fixture() {
    init_test_tracing();
    let mut single = FixtureHarness::new(RecordingEngine::new());
    single
        .setup(&scope_of("One", &["only"]))
        .await
        .unwrap();
    let default = single
        .controller()
        .default_server(single.context())
        .unwrap();
    default.stub_for("GET /ping".into()).await.unwrap();
    assert_eq!(default.name(), "only");
    assert_eq!(default.stubs(), vec!["GET /ping"]);

    let mut double = FixtureHarness::new(RecordingEngine::new());
    double
        .setup(&scope_of("Two", &["svc-a", "svc-b"]))
        .await
        .unwrap();
    let err = double
        .controller()
        .default_server(double.context())
        .unwrap_err();
    assert!(matches!(err, FixtureError::NoDefaultFixture { declared: 2, .. }));
}

#[tokio::test]
async fn teardown_stops_each_fixture_exactly_once() {
    init_test_tracing();
    let mut harness = FixtureHarness::new(RecordingEngine::new());
    harness
        .setup(&scope_of("Tests", &["svc-a", "svc-b", "svc-c"]))
        .await
        .unwrap();
    for _ in 0..5 {
        harness.before_each().await.unwrap();
    }

    harness.shutdown().await.unwrap();

    let engine = harness.controller().engine();
    assert_eq!(engine.starts(), 3);
    assert_eq!(engine.stops(), 3);
    assert_eq!(engine.ports_in_use(), 0);
    harness.assert_state(LifecycleState::Closed);
    harness.assert_operation_count("before_each", 5);
    assert!(harness.controller().registry().all_instances(harness.context()).is_empty());

    // A second shutdown finds nothing left to stop.
    harness.shutdown().await.unwrap();
    assert_eq!(harness.controller().engine().stops(), 3);
}

#[tokio::test]
async fn reset_keeps_identity_port_and_address() {
    init_test_tracing();
    let mut harness = FixtureHarness::new(RecordingEngine::new());
    harness
        .setup(&scope_of("Tests", &["svc"]))
        .await
        .unwrap();
    let first = harness.before_each().await.unwrap().server("svc").unwrap();
    first.stub_for("GET /a".into()).await.unwrap();

    for _ in 0..3 {
        let again = harness.before_each().await.unwrap().server("svc").unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(again.base_url(), first.base_url());
    }
    assert_eq!(first.reset_count(), 4);
    assert!(first.stubs().is_empty());
    assert_eq!(
        harness.property("svc.url").map(|v| v.to_string()),
        Some(first.base_url())
    );
}

#[tokio::test]
async fn contexts_get_their_own_instances() {
    init_test_tracing();
    let runtime = Arc::new(TestRuntime::new());
    let host: Arc<dyn TestHost> = runtime.clone();
    let controller = Arc::new(LifecycleController::new(RecordingEngine::new(), host));
    let scope = Arc::new(scope_of("Tests", &["shared-name"]));

    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let controller = Arc::clone(&controller);
            let scope = Arc::clone(&scope);
            tokio::spawn(async move {
                let ctx = ContextId::named(format!("ctx-{i}"));
                controller.on_context_setup(&ctx, &scope).await.unwrap();
                controller.on_context_setup(&ctx, &scope).await.unwrap();
                let server = controller
                    .on_before_each_test(&ctx)
                    .await
                    .unwrap()
                    .server("shared-name")
                    .unwrap();
                (ctx, server.port())
            })
        })
        .collect();

    let mut ports = Vec::new();
    for (ctx, port) in futures_util::future::join_all(tasks)
        .await
        .into_iter()
        .map(Result::unwrap)
    {
        assert_eq!(
            runtime.get_property(&ctx, "shared-name.url").map(|v| v.to_string()),
            Some(format!("http://127.0.0.1:{port}"))
        );
        ports.push(port);
    }
    ports.sort_unstable();
    ports.dedup();
    assert_eq!(ports.len(), 4);
    assert_eq!(controller.engine().starts(), 4);
}

#[tokio::test]
async fn nested_scope_sees_outer_fixtures() {
    init_test_tracing();
    let mut harness = FixtureHarness::new(RecordingEngine::new());
    let outer = Arc::new(scope_of("UserTests", &["user-client"]));
    let inner = ScopeDeclaration::nested(&outer, "WhenTodosExist").with_fixture(http_client("todo-client"));

    harness.setup(&outer).await.unwrap();
    harness.setup(&inner).await.unwrap();

    let resolver = harness.before_each().await.unwrap();
    assert!(resolver.server("user-client").is_ok());
    assert!(resolver.server("todo-client").is_ok());
    assert_eq!(harness.controller().engine().starts(), 2);
    assert!(harness.controller().default_server(harness.context()).is_err());
}

#[tokio::test]
async fn nested_setup_replaces_crashed_server() {
    init_test_tracing();
    let mut harness = FixtureHarness::new(RecordingEngine::new());
    let outer = Arc::new(scope_of("Outer", &["svc"]));
    harness.setup(&outer).await.unwrap();
    let crashed = harness.before_each().await.unwrap().server("svc").unwrap();
    crashed.crash();

    harness
        .setup(&ScopeDeclaration::nested(&outer, "Inner"))
        .await
        .unwrap();

    let replacement = harness.before_each().await.unwrap().server("svc").unwrap();
    assert!(!Arc::ptr_eq(&crashed, &replacement));
    assert!(replacement.is_running());
    assert_eq!(
        harness.property("svc.url").map(|v| v.to_string()),
        Some(replacement.base_url())
    );
}

#[tokio::test]
async fn customizer_overrides_port_before_start() {
    init_test_tracing();
    let mut harness = FixtureHarness::new(RecordingEngine::new()).with_customizers(
        CustomizerRegistry::new().with::<FixedPortCustomizer>("fixed-port"),
    );
    harness
        .setup(
            &ScopeDeclaration::new("Tests")
                .with_fixture(http_client("svc").with_customizer("fixed-port")),
        )
        .await
        .unwrap();

    let server = harness.before_each().await.unwrap().server("svc").unwrap();
    assert_eq!(server.port(), CUSTOMIZED_PORT);
    assert_eq!(
        harness.property(DEFAULT_PORT_PROPERTY).and_then(|v| v.as_port()),
        Some(CUSTOMIZED_PORT)
    );
}

#[tokio::test]
async fn extensions_are_added_after_customizers() {
    init_test_tracing();
    let mut harness = FixtureHarness::new(RecordingEngine::new()).with_customizers(
        CustomizerRegistry::new().with::<FixedPortCustomizer>("fixed-port"),
    );
    harness
        .setup(
            &ScopeDeclaration::new("Tests")
                .with_fixture(grpc_service("greeter").with_customizer("fixed-port")),
        )
        .await
        .unwrap();

    let configs = harness.controller().engine().configs();
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].port, CUSTOMIZED_PORT);
    assert_eq!(configs[0].extensions.len(), 1);
}

#[tokio::test]
async fn unknown_customizer_fails_setup() {
    init_test_tracing();
    let mut harness = FixtureHarness::new(RecordingEngine::new());
    let err = harness
        .setup(
            &ScopeDeclaration::new("Tests")
                .with_fixture(FixtureSpec::new("svc").with_customizer("does-not-exist")),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Configuration);
    harness.assert_last_failure();
    harness.assert_state(LifecycleState::Configuring);
    assert_eq!(harness.controller().engine().starts(), 0);
}

#[tokio::test]
async fn failed_start_leaves_earlier_fixtures_for_teardown() {
    init_test_tracing();
    let mut harness = FixtureHarness::new(RecordingEngine::new().failing_for("broken"));
    let err = harness
        .setup(&scope_of("Tests", &["ok-a", "broken", "never"]))
        .await
        .unwrap_err();
    assert!(matches!(err, FixtureError::Engine(_)));
    assert!(harness.before_each().await.is_err());

    harness.shutdown().await.unwrap();
    assert_eq!(harness.controller().engine().starts(), 1);
    assert_eq!(harness.controller().engine().stops(), 1);
    harness.assert_state(LifecycleState::Closed);
}

#[tokio::test]
async fn setup_after_close_is_rejected() {
    init_test_tracing();
    let mut harness = FixtureHarness::new(RecordingEngine::new());
    let scope = scope_of("Tests", &["svc"]);
    harness.setup(&scope).await.unwrap();
    harness.shutdown().await.unwrap();

    let err = harness.setup(&scope).await.unwrap_err();
    assert!(matches!(
        err,
        FixtureError::InvalidState {
            state: LifecycleState::Closed,
            ..
        }
    ));
}

#[tokio::test]
async fn every_address_key_is_bound() {
    init_test_tracing();
    let mut harness = FixtureHarness::new(RecordingEngine::new());
    let scope = ScopeDeclaration::from_toml_str(
        "LegacyTests",
        r#"
        [[enable]]
        [[enable.fixture]]
        name = "user-service"
        properties = ["user-service.url", "legacy.user.endpoint", ""]
        port_property = "user-service.port"
        "#,
    )
    .unwrap();
    harness.setup(&scope).await.unwrap();

    let server = harness.before_each().await.unwrap().server("user-service").unwrap();
    assert_fixture_bound(
        harness.runtime().as_ref(),
        harness.context(),
        server.as_ref(),
        &["user-service.url", "legacy.user.endpoint"],
        "user-service.port",
    );
    assert!(harness.property(DEFAULT_PORT_PROPERTY).is_none());
    assert_eq!(
        harness.runtime().property_sources(harness.context()),
        vec!["stubwire.user-service"]
    );
}

#[tokio::test]
async fn unsupported_injection_type_is_a_usage_error() {
    init_test_tracing();
    let mut harness = FixtureHarness::new(RecordingEngine::new());
    harness.setup(&scope_of("Tests", &["svc"])).await.unwrap();
    let resolver = harness.before_each().await.unwrap();

    let err = resolver.resolve_as::<String>("svc").unwrap_err();
    assert!(matches!(err, FixtureError::UnsupportedInjectionTarget { .. }));
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = resolver.facade("svc").unwrap_err();
    assert_not_registered::<()>(&Err(err), "svc", Capability::Facade);
}
