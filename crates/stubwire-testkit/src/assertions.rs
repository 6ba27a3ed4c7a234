//! Assertion helpers for fixture tests.

use std::fmt::Debug;

use stubwire_core::{
    Capability, ContextId, FixtureError, FixtureResult, PropertyValue, StubServer, TestHost,
};

// ─────────────────────────────────────────────────────────────────────────────
// Result Assertions
// ─────────────────────────────────────────────────────────────────────────────

/// Assert that a result is successful.
///
/// # Panics
///
/// Panics if the result is an error.
pub fn assert_ok<T: Debug>(result: &FixtureResult<T>) {
    assert!(result.is_ok(), "Expected Ok but got: {result:?}");
}

/// Assert that a result is a `NotRegistered` error for `name` and `capability`.
///
/// # Panics
///
/// Panics on success or any other error.
pub fn assert_not_registered<T: Debug>(
    result: &FixtureResult<T>,
    name: &str,
    capability: Capability,
) {
    match result {
        Err(FixtureError::NotRegistered {
            name: actual,
            capability: actual_capability,
        }) => {
            assert_eq!(actual, name, "NotRegistered for the wrong name");
            assert_eq!(*actual_capability, capability, "NotRegistered for the wrong capability");
        }
        other => panic!("Expected NotRegistered('{name}') but got: {other:?}"),
    }
}

/// Assert that a result failed with an error whose message contains `expected`.
///
/// # Panics
///
/// Panics on success or a non-matching message.
pub fn assert_error_contains<T: Debug>(result: &FixtureResult<T>, expected: &str) {
    match result {
        Ok(v) => panic!("Expected error containing '{expected}' but got Ok({v:?})"),
        Err(e) => {
            let message = e.to_string();
            assert!(
                message.contains(expected),
                "Expected error containing '{expected}' but got: {message}"
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Binding Assertions
// ─────────────────────────────────────────────────────────────────────────────

/// Assert that `key` holds exactly `expected` in the context.
///
/// # Panics
///
/// Panics if the property is missing or differs.
pub fn assert_property(host: &dyn TestHost, context: &ContextId, key: &str, expected: &str) {
    match host.get_property(context, key) {
        Some(value) => assert_eq!(
            value.to_string(),
            expected,
            "Property '{key}' in context {context}"
        ),
        None => panic!("Property '{key}' is not bound in context {context}"),
    }
}

/// Assert that every address key resolves to the server's base URL and the
/// port key to its port.
///
/// # Panics
///
/// Panics if any key is missing or differs.
pub fn assert_fixture_bound<S: StubServer>(
    host: &dyn TestHost,
    context: &ContextId,
    server: &S,
    address_keys: &[&str],
    port_key: &str,
) {
    let base_url = server.base_url();
    for key in address_keys {
        assert_property(host, context, key, &base_url);
    }
    let port = host.get_property(context, port_key).as_ref().and_then(PropertyValue::as_port);
    assert_eq!(
        port,
        Some(server.port()),
        "Port property '{port_key}' in context {context}"
    );
}

/// Assert that `key` is not bound in the context.
///
/// # Panics
///
/// Panics if the property exists.
pub fn assert_unbound(host: &dyn TestHost, context: &ContextId, key: &str) {
    if let Some(value) = host.get_property(context, key) {
        panic!("Expected '{key}' to be unbound in context {context} but found '{value}'");
    }
}
