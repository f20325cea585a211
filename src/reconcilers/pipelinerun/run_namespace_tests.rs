// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `run_namespace.rs`

use super::{compose_run_namespace_name, ProvisionError};
use crate::config::ConfigError;
use crate::reconcilers::pipelinerun::secrets::MaterializeError;

#[test]
fn test_run_namespace_name_shape() {
    let name = compose_run_namespace_name("steward-run", "ok-1", 6);

    let suffix = name.strip_prefix("steward-run-ok-1-").unwrap();
    assert_eq!(suffix.len(), 6);
    assert!(suffix
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
}

#[test]
fn test_run_namespace_name_sanitizes_run_name() {
    let name = compose_run_namespace_name("steward-run", "My.Weird_Run", 0);
    assert_eq!(name, "steward-run-my-weird-run");
}

#[test]
fn test_run_namespace_name_respects_length_limit() {
    let long_run_name = "x".repeat(100);
    let name = compose_run_namespace_name("steward-run", &long_run_name, 6);
    assert!(name.len() <= 63, "{} chars: {name}", name.len());
    assert!(name.starts_with("steward-run-x"));
}

#[test]
fn test_run_namespace_names_differ_between_calls() {
    let a = compose_run_namespace_name("steward-run", "ok-1", 8);
    let b = compose_run_namespace_name("steward-run", "ok-1", 8);
    assert_ne!(a, b);
}

#[test]
fn test_provision_error_classification_from_materialize() {
    let err: ProvisionError =
        MaterializeError::MissingSecret("foo".to_string(), "client1".to_string()).into();
    assert!(matches!(err, ProvisionError::Content(_)));

    let err: ProvisionError = MaterializeError::DuplicateTarget("duplicate".to_string()).into();
    assert!(matches!(err, ProvisionError::Content(_)));
}

#[test]
fn test_provision_error_classification_from_config() {
    let err: ProvisionError =
        ConfigError::invalid("network policy profile \"nope\" not configured").into();
    assert!(matches!(err, ProvisionError::Config(_)));
}

#[test]
fn test_content_error_message_names_the_secret() {
    let err: ProvisionError =
        MaterializeError::MissingSecret("with-secret-foo".to_string(), "client1".to_string())
            .into();
    let message = err.to_string();
    assert!(message.contains("with-secret-foo"));
    assert!(message.contains("client1"));
}
