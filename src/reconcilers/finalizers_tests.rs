// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `finalizers.rs`

use super::has_finalizer;
use crate::crd::Tenant;
use crate::labels::FINALIZER_TENANT;
use kube::core::ObjectMeta;

fn tenant_with_finalizers(finalizers: Option<Vec<&str>>) -> Tenant {
    let mut tenant = Tenant::new("tenant1", crate::crd::TenantSpec::default());
    tenant.metadata = ObjectMeta {
        name: Some("tenant1".to_string()),
        namespace: Some("client1".to_string()),
        finalizers: finalizers.map(|f| f.into_iter().map(String::from).collect()),
        ..Default::default()
    };
    tenant
}

#[test]
fn test_has_finalizer_absent() {
    let tenant = tenant_with_finalizers(None);
    assert!(!has_finalizer(&tenant, FINALIZER_TENANT));

    let tenant = tenant_with_finalizers(Some(vec![]));
    assert!(!has_finalizer(&tenant, FINALIZER_TENANT));
}

#[test]
fn test_has_finalizer_present() {
    let tenant = tenant_with_finalizers(Some(vec![FINALIZER_TENANT]));
    assert!(has_finalizer(&tenant, FINALIZER_TENANT));
}

#[test]
fn test_has_finalizer_ignores_foreign_finalizers() {
    let tenant = tenant_with_finalizers(Some(vec!["not-our-finalizer"]));
    assert!(!has_finalizer(&tenant, FINALIZER_TENANT));

    let tenant = tenant_with_finalizers(Some(vec!["not-our-finalizer", FINALIZER_TENANT]));
    assert!(has_finalizer(&tenant, FINALIZER_TENANT));
}
