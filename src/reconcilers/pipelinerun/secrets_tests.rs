// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `secrets.rs`

use super::{copy_of, is_valid_secret_name, resolve_target_names, MaterializeError};
use crate::labels::{ANNOTATION_SECRET_RENAME_TO, LABEL_SYSTEM_MANAGED};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

fn basic_auth_secret(name: &str, rename_to: Option<&str>) -> Secret {
    let mut data = BTreeMap::new();
    data.insert("username".to_string(), ByteString(b"bar".to_vec()));
    data.insert("password".to_string(), ByteString(b"baz".to_vec()));

    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("client1".to_string()),
            resource_version: Some("12345".to_string()),
            uid: Some("a-uid".to_string()),
            annotations: rename_to.map(|target| {
                [(
                    ANNOTATION_SECRET_RENAME_TO.to_string(),
                    target.to_string(),
                )]
                .into_iter()
                .collect()
            }),
            owner_references: Some(vec![OwnerReference {
                api_version: "v1".to_string(),
                kind: "Whatever".to_string(),
                name: "owner1".to_string(),
                uid: "owner-uid".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        },
        type_: Some("kubernetes.io/basic-auth".to_string()),
        data: Some(data),
        ..Default::default()
    }
}

// ----------------------------------------------------------------------------
// Name validation
// ----------------------------------------------------------------------------

#[test]
fn test_valid_secret_names() {
    assert!(is_valid_secret_name("renamed-secret-new-name"));
    assert!(is_valid_secret_name("a"));
    assert!(is_valid_secret_name("a1"));
    assert!(is_valid_secret_name("0secret9"));
}

#[test]
fn test_invalid_secret_names() {
    // uppercase is rejected
    assert!(!is_valid_secret_name("InvalidName"));
    assert!(!is_valid_secret_name(""));
    assert!(!is_valid_secret_name("-leading"));
    assert!(!is_valid_secret_name("trailing-"));
    assert!(!is_valid_secret_name("under_score"));
    assert!(!is_valid_secret_name("dotted.name"));
    assert!(!is_valid_secret_name(&"a".repeat(64)));
}

#[test]
fn test_secret_name_at_length_limit() {
    assert!(is_valid_secret_name(&"a".repeat(63)));
}

// ----------------------------------------------------------------------------
// Target resolution
// ----------------------------------------------------------------------------

#[test]
fn test_resolve_without_rename_uses_source_name() {
    let secrets = vec![basic_auth_secret("with-secret-foo", None)];
    let targets = resolve_target_names(&secrets).unwrap();
    assert_eq!(targets, vec!["with-secret-foo"]);
}

#[test]
fn test_resolve_with_rename() {
    let secrets = vec![basic_auth_secret(
        "renamed-secret-foo",
        Some("renamed-secret-new-name"),
    )];
    let targets = resolve_target_names(&secrets).unwrap();
    assert_eq!(targets, vec!["renamed-secret-new-name"]);
}

#[test]
fn test_resolve_rejects_invalid_rename() {
    let secrets = vec![basic_auth_secret("invalid-secret-foo", Some("InvalidName"))];

    let err = resolve_target_names(&secrets).unwrap_err();
    match &err {
        MaterializeError::InvalidRename { secret, target } => {
            assert_eq!(secret, "invalid-secret-foo");
            assert_eq!(target, "InvalidName");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.is_content_error());
}

#[test]
fn test_resolve_rejects_duplicate_targets() {
    let secrets = vec![
        basic_auth_secret("duplicate-secret-foo", Some("duplicate")),
        basic_auth_secret("duplicate-secret-bar", Some("duplicate")),
    ];

    let err = resolve_target_names(&secrets).unwrap_err();
    match &err {
        MaterializeError::DuplicateTarget(target) => assert_eq!(target, "duplicate"),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.is_content_error());
}

#[test]
fn test_resolve_rejects_rename_colliding_with_plain_name() {
    let secrets = vec![
        basic_auth_secret("taken", None),
        basic_auth_secret("other", Some("taken")),
    ];

    assert!(matches!(
        resolve_target_names(&secrets),
        Err(MaterializeError::DuplicateTarget(_))
    ));
}

// ----------------------------------------------------------------------------
// Copy transform
// ----------------------------------------------------------------------------

#[test]
fn test_copy_strips_identity_metadata() {
    let source = basic_auth_secret("renamed-secret-foo", Some("renamed-secret-new-name"));
    let copy = copy_of(&source, "renamed-secret-new-name", "steward-run-x-1");

    assert_eq!(copy.metadata.name.as_deref(), Some("renamed-secret-new-name"));
    assert_eq!(copy.metadata.namespace.as_deref(), Some("steward-run-x-1"));
    assert!(copy.metadata.resource_version.is_none());
    assert!(copy.metadata.uid.is_none());
    assert!(copy.metadata.owner_references.is_none());
}

#[test]
fn test_copy_clears_rename_annotation_and_keeps_payload() {
    let source = basic_auth_secret("renamed-secret-foo", Some("renamed-secret-new-name"));
    let copy = copy_of(&source, "renamed-secret-new-name", "steward-run-x-1");

    let annotations = copy.metadata.annotations.unwrap_or_default();
    assert!(!annotations.contains_key(ANNOTATION_SECRET_RENAME_TO));

    assert_eq!(copy.type_.as_deref(), Some("kubernetes.io/basic-auth"));
    assert_eq!(copy.data, source.data);
}

#[test]
fn test_copy_is_labeled_system_managed() {
    let source = basic_auth_secret("with-secret-foo", None);
    let copy = copy_of(&source, "with-secret-foo", "steward-run-x-1");

    let labels = copy.metadata.labels.unwrap();
    assert!(labels.contains_key(LABEL_SYSTEM_MANAGED));
}
