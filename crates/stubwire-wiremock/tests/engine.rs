//! End-to-end checks of the wiremock engine over real sockets.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, TcpListener};
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use stubwire_core::{EngineError, ExtensionId, FixtureSpec, ServerConfig, StubEngine, StubServer};
use stubwire_wiremock::{
    GrpcResponse, Mock, ResponseTemplate, WiremockEngine, decode_frame, matchers,
};

fn config(name: &str, port: u16, stub_dir: Option<&Path>) -> ServerConfig {
    ServerConfig {
        fixture: name.into(),
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port,
        stub_dir: stub_dir.map(Path::to_path_buf),
        extensions: BTreeSet::new(),
    }
}

fn write_mapping(dir: &Path, file: &str, contents: &str) {
    let mappings = dir.join("mappings");
    std::fs::create_dir_all(&mappings).unwrap();
    std::fs::write(mappings.join(file), contents).unwrap();
}

#[tokio::test]
async fn fixed_port_in_use_is_a_bind_error() {
    let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let err = WiremockEngine::new()
        .start(config("svc", port, None))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Bind { .. }), "{err}");
}

#[tokio::test]
async fn fixed_port_is_honoured() {
    let port = {
        let free = TcpListener::bind("127.0.0.1:0").unwrap();
        free.local_addr().unwrap().port()
    };

    let server = WiremockEngine::new()
        .start(config("svc", port, None))
        .await
        .unwrap();

    assert_eq!(server.port(), port);
    assert_eq!(server.base_url(), format!("http://127.0.0.1:{port}"));
}

#[tokio::test]
async fn file_stubs_survive_reset_but_programmatic_stubs_do_not() {
    let dir = tempfile::tempdir().unwrap();
    write_mapping(
        dir.path(),
        "users.json",
        r#"{
            "request": {"method": "GET", "urlPath": "/users/1"},
            "response": {"status": 200, "jsonBody": {"id": 1, "name": "Ada"}}
        }"#,
    );
    let server = WiremockEngine::new()
        .start(config("user-service", 0, Some(dir.path())))
        .await
        .unwrap();
    server
        .expect_get("/todos", json!([{"id": 7}]))
        .await
        .unwrap();
    let client = reqwest::Client::new();

    let user: serde_json::Value = client
        .get(format!("{}/users/1", server.base_url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(user["name"], "Ada");

    let port = server.port();
    server.reset_all().await.unwrap();
    server.reset_all().await.unwrap();
    assert_eq!(server.port(), port);
    server.assert_request_count(0).await;

    let user = client
        .get(format!("{}/users/1", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(user.status(), 200);
    let todos = client
        .get(format!("{}/todos", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(todos.status(), 404);
}

#[tokio::test]
async fn malformed_mapping_fails_start() {
    let dir = tempfile::tempdir().unwrap();
    write_mapping(dir.path(), "broken.json", "{ not json");

    let err = WiremockEngine::new()
        .start(config("svc", 0, Some(dir.path())))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::StubMapping { .. }), "{err}");
}

#[tokio::test]
async fn unbuildable_mapping_fails_start_before_binding() {
    let dir = tempfile::tempdir().unwrap();
    write_mapping(
        dir.path(),
        "users.json",
        r#"{"request": {"urlPathPattern": "/users/(["}}"#,
    );
    let port = {
        let free = TcpListener::bind("127.0.0.1:0").unwrap();
        free.local_addr().unwrap().port()
    };

    let err = WiremockEngine::new()
        .start(config("svc", port, Some(dir.path())))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::StubMapping { .. }), "{err}");
    assert!(TcpListener::bind(("127.0.0.1", port)).is_ok());
}

#[tokio::test]
async fn stub_for_mounts_a_raw_mock() {
    let server = WiremockEngine::new()
        .start(config("svc", 0, None))
        .await
        .unwrap();
    server
        .stub_for(
            Mock::given(matchers::method("DELETE"))
                .and(matchers::path("/items/3"))
                .respond_with(ResponseTemplate::new(204)),
        )
        .await
        .unwrap();

    let response = reqwest::Client::new()
        .delete(format!("{}/items/3", server.base_url()))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 204);
    server.assert_received("/items/3").await;
}

#[tokio::test]
async fn grpc_facade_shares_port_and_serves_frames() {
    let engine = WiremockEngine::new();
    let spec = FixtureSpec::new("greeter").with_extension(ExtensionId::GRPC);
    let mut cfg = config("greeter", 0, None);
    cfg.extensions.insert(ExtensionId::GRPC);
    let server = engine.start(cfg).await.unwrap();

    let facade = engine.facade(&server, &spec).unwrap();
    assert_eq!(facade.port(), server.port());
    assert_eq!(facade.name(), "greeter");
    assert!(engine.facade(&server, &FixtureSpec::new("plain")).is_none());

    facade
        .stub_for("greeter.Greeter/SayHello", GrpcResponse::ok(b"hello".to_vec()))
        .await
        .unwrap();

    let response = reqwest::Client::new()
        .post(format!("{}/greeter.Greeter/SayHello", facade.base_url()))
        .header("content-type", "application/grpc")
        .body(vec![0, 0, 0, 0, 0])
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()["grpc-status"], "0");
    let body = response.bytes().await.unwrap();
    assert_eq!(decode_frame(&body), Some(&b"hello"[..]));
}

#[tokio::test]
async fn facade_stops_with_its_server() {
    let engine = WiremockEngine::new();
    let spec = FixtureSpec::new("greeter").with_extension(ExtensionId::GRPC);
    let mut cfg = config("greeter", 0, None);
    cfg.extensions.insert(ExtensionId::GRPC);
    let server = engine.start(cfg).await.unwrap();
    let facade = engine.facade(&server, &spec).unwrap();

    server.stop().await.unwrap();

    let err = facade
        .stub_for("greeter.Greeter/SayHello", GrpcResponse::error(14, "unavailable"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Stopped));
    assert_eq!(Arc::strong_count(&server), 2);
}
