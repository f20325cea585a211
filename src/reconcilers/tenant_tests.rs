// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `tenant.rs`

use super::{
    compose_tenant_namespace_name, desired_role_binding, role_binding_matches,
    select_retained_role_binding, TenantClientConfig,
};
use crate::labels::{
    ANNOTATION_TENANT_NAMESPACE_PREFIX, ANNOTATION_TENANT_NAMESPACE_SUFFIX_LENGTH,
    ANNOTATION_TENANT_ROLE, LABEL_SYSTEM_MANAGED,
};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;

fn client_namespace(annotations: &[(&str, &str)]) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some("client1".to_string()),
            annotations: Some(
                annotations
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn named_binding(name: &str, binding: &RoleBinding) -> RoleBinding {
    let mut named = binding.clone();
    named.metadata.name = Some(name.to_string());
    named.metadata.generate_name = None;
    named
}

// ----------------------------------------------------------------------------
// Client namespace configuration
// ----------------------------------------------------------------------------

#[test]
fn test_client_config_from_annotations() {
    let namespace = client_namespace(&[
        (ANNOTATION_TENANT_NAMESPACE_PREFIX, "prefix1"),
        (ANNOTATION_TENANT_ROLE, "tenantClusterRole1"),
    ]);

    let config = TenantClientConfig::from_namespace(&namespace).unwrap();
    assert_eq!(config.namespace_prefix, "prefix1");
    assert_eq!(config.role_name, "tenantClusterRole1");
    // default suffix length is nonzero
    assert!(config.suffix_length > 0);
}

#[test]
fn test_client_config_explicit_suffix_length() {
    let namespace = client_namespace(&[
        (ANNOTATION_TENANT_NAMESPACE_PREFIX, "prefix1"),
        (ANNOTATION_TENANT_NAMESPACE_SUFFIX_LENGTH, "0"),
        (ANNOTATION_TENANT_ROLE, "tenantClusterRole1"),
    ]);

    let config = TenantClientConfig::from_namespace(&namespace).unwrap();
    assert_eq!(config.suffix_length, 0);
}

#[test]
fn test_client_config_requires_prefix_and_role() {
    let namespace = client_namespace(&[(ANNOTATION_TENANT_ROLE, "tenantClusterRole1")]);
    assert!(TenantClientConfig::from_namespace(&namespace).is_err());

    let namespace = client_namespace(&[(ANNOTATION_TENANT_NAMESPACE_PREFIX, "prefix1")]);
    assert!(TenantClientConfig::from_namespace(&namespace).is_err());
}

#[test]
fn test_client_config_rejects_bad_suffix_length() {
    let namespace = client_namespace(&[
        (ANNOTATION_TENANT_NAMESPACE_PREFIX, "prefix1"),
        (ANNOTATION_TENANT_NAMESPACE_SUFFIX_LENGTH, "many"),
        (ANNOTATION_TENANT_ROLE, "tenantClusterRole1"),
    ]);
    assert!(TenantClientConfig::from_namespace(&namespace).is_err());
}

// ----------------------------------------------------------------------------
// Namespace name composition
// ----------------------------------------------------------------------------

#[test]
fn test_namespace_name_with_suffix() {
    let name = compose_tenant_namespace_name("prefix1", "tenant1", 6);

    let re_ok = name
        .strip_prefix("prefix1-tenant1-")
        .is_some_and(|suffix| {
            suffix.len() == 6
                && suffix
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        });
    assert!(re_ok, "unexpected namespace name {name:?}");
}

#[test]
fn test_namespace_name_without_suffix_is_deterministic() {
    let name = compose_tenant_namespace_name("prefix1", "tenant1", 0);
    assert_eq!(name, "prefix1-tenant1");
}

#[test]
fn test_namespace_name_suffixes_differ() {
    let a = compose_tenant_namespace_name("prefix1", "tenant1", 8);
    let b = compose_tenant_namespace_name("prefix1", "tenant1", 8);
    // 36^8 combinations; a collision here means the suffix is not random
    assert_ne!(a, b);
}

// ----------------------------------------------------------------------------
// Role binding shape
// ----------------------------------------------------------------------------

#[test]
fn test_desired_role_binding_shape() {
    let binding = desired_role_binding("prefix1-tenant1-xyz", "client1", "tenantClusterRole1");

    assert_eq!(binding.role_ref.api_group, "rbac.authorization.k8s.io");
    assert_eq!(binding.role_ref.kind, "ClusterRole");
    assert_eq!(binding.role_ref.name, "tenantClusterRole1");

    let subjects = binding.subjects.as_ref().unwrap();
    assert_eq!(subjects.len(), 2);
    assert_eq!(subjects[0].kind, "ServiceAccount");
    assert_eq!(subjects[0].name, "default");
    assert_eq!(subjects[0].namespace.as_deref(), Some("prefix1-tenant1-xyz"));
    assert_eq!(subjects[1].kind, "ServiceAccount");
    assert_eq!(subjects[1].name, "default");
    assert_eq!(subjects[1].namespace.as_deref(), Some("client1"));

    let labels: &BTreeMap<String, String> = binding.metadata.labels.as_ref().unwrap();
    assert!(labels.contains_key(LABEL_SYSTEM_MANAGED));
}

#[test]
fn test_role_binding_matches_ignores_name() {
    let desired = desired_role_binding("tenantNS1", "client1", "tenantClusterRole1");
    let actual = named_binding("steward-tenant-role-binding-abc12", &desired);
    assert!(role_binding_matches(&desired, &actual));
}

#[test]
fn test_role_binding_matches_detects_role_change() {
    let desired = desired_role_binding("tenantNS1", "client1", "tenantClusterRole1");
    let outdated = desired_role_binding("tenantNS1", "client1", "oldRole");
    assert!(!role_binding_matches(&desired, &outdated));
}

#[test]
fn test_role_binding_matches_detects_subject_change() {
    let desired = desired_role_binding("tenantNS1", "client1", "tenantClusterRole1");
    let mut actual = desired.clone();
    actual.subjects.as_mut().unwrap().remove(1);
    assert!(!role_binding_matches(&desired, &actual));
}

// ----------------------------------------------------------------------------
// Retention tie-break
// ----------------------------------------------------------------------------

#[test]
fn test_select_retained_keeps_single_match() {
    let desired = desired_role_binding("tenantNS1", "client1", "tenantClusterRole1");
    let bindings = vec![named_binding("rb-1", &desired)];

    let (retained, obsolete) = select_retained_role_binding(&bindings, &desired);
    assert_eq!(retained.unwrap().name_any(), "rb-1");
    assert!(obsolete.is_empty());
}

#[test]
fn test_select_retained_prefers_smallest_name() {
    let desired = desired_role_binding("tenantNS1", "client1", "tenantClusterRole1");
    let bindings = vec![
        named_binding("rb-c", &desired),
        named_binding("rb-a", &desired),
        named_binding("rb-b", &desired),
    ];

    let (retained, obsolete) = select_retained_role_binding(&bindings, &desired);
    assert_eq!(retained.unwrap().name_any(), "rb-a");

    let mut deleted: Vec<String> = obsolete.iter().map(|b| b.name_any()).collect();
    deleted.sort();
    assert_eq!(deleted, vec!["rb-b", "rb-c"]);
}

#[test]
fn test_select_retained_deletes_mismatched_bindings() {
    let desired = desired_role_binding("tenantNS1", "client1", "tenantClusterRole1");
    let outdated = desired_role_binding("tenantNS1", "client1", "oldRole");
    let bindings = vec![
        named_binding("rb-old", &outdated),
        named_binding("rb-new", &desired),
    ];

    let (retained, obsolete) = select_retained_role_binding(&bindings, &desired);
    assert_eq!(retained.unwrap().name_any(), "rb-new");
    assert_eq!(obsolete.len(), 1);
    assert_eq!(obsolete[0].name_any(), "rb-old");
}

#[test]
fn test_select_retained_with_no_match_marks_all_obsolete() {
    let desired = desired_role_binding("tenantNS1", "client1", "tenantClusterRole1");
    let outdated = desired_role_binding("tenantNS1", "client1", "oldRole");
    let bindings = vec![named_binding("rb-old", &outdated)];

    let (retained, obsolete) = select_retained_role_binding(&bindings, &desired);
    assert!(retained.is_none());
    assert_eq!(obsolete.len(), 1);
}
