// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Tenant reconciliation logic.
//!
//! The tenant controller provisions one dedicated namespace per `Tenant`
//! object, keeps a single system-managed `RoleBinding` in that namespace in
//! sync with the client namespace annotations, and removes the namespace
//! again when the tenant is deleted.
//!
//! The client namespace configures tenant behavior via annotations:
//! the tenant namespace prefix, the length of the random namespace suffix
//! and the `ClusterRole` to bind for the tenant's service accounts.

use crate::constants::{DEFAULT_TENANT_NAMESPACE_SUFFIX_LENGTH, TENANT_ROLE_BINDING_NAME_PREFIX};
use crate::crd::{Tenant, REASON_DEPENDENT_RESOURCE_STATE, REASON_FAILED};
use crate::labels::{
    ANNOTATION_TENANT_NAMESPACE_PREFIX, ANNOTATION_TENANT_NAMESPACE_SUFFIX_LENGTH,
    ANNOTATION_TENANT_ROLE, FINALIZER_TENANT, LABEL_SYSTEM_MANAGED,
};
use crate::reconcilers::finalizers::{ensure_finalizer, has_finalizer, remove_finalizer};
use crate::reconcilers::retry::retry_api_call;
use crate::reconcilers::status::{not_ready_condition, ready_condition};
use anyhow::{Context as _, Result};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use kube::api::{DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use rand::Rng;
use serde_json::json;
use tracing::{debug, info, warn};

/// Ready=False message on a namespace name clash.
const MSG_NAMESPACE_CREATE_FAILED: &str = "Failed to create a new tenant namespace.";

/// Ready=False message when the first role binding sync of a fresh tenant
/// namespace fails.
const MSG_ROLE_BINDING_INIT_FAILED: &str =
    "Failed to initialize a new tenant namespace because the RoleBinding could not be created.";

/// Per-tenant configuration read from the client namespace annotations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantClientConfig {
    /// Prefix of the tenant namespace name.
    pub namespace_prefix: String,

    /// Length of the random suffix appended to the tenant namespace name;
    /// zero makes the name fully deterministic.
    pub suffix_length: usize,

    /// `ClusterRole` bound in the tenant namespace.
    pub role_name: String,
}

impl TenantClientConfig {
    /// Extract the configuration from a client namespace object.
    ///
    /// # Errors
    ///
    /// Returns an error when the prefix or role annotation is missing or
    /// the suffix length does not parse.
    pub fn from_namespace(namespace: &Namespace) -> Result<Self> {
        let annotations = namespace.annotations();
        let ns_name = namespace.name_any();

        let namespace_prefix = annotations
            .get(ANNOTATION_TENANT_NAMESPACE_PREFIX)
            .filter(|v| !v.is_empty())
            .with_context(|| {
                format!(
                    "client namespace {ns_name:?} lacks the {ANNOTATION_TENANT_NAMESPACE_PREFIX} annotation"
                )
            })?
            .clone();

        let role_name = annotations
            .get(ANNOTATION_TENANT_ROLE)
            .filter(|v| !v.is_empty())
            .with_context(|| {
                format!("client namespace {ns_name:?} lacks the {ANNOTATION_TENANT_ROLE} annotation")
            })?
            .clone();

        let suffix_length = match annotations.get(ANNOTATION_TENANT_NAMESPACE_SUFFIX_LENGTH) {
            None => DEFAULT_TENANT_NAMESPACE_SUFFIX_LENGTH,
            Some(raw) => raw.parse().with_context(|| {
                format!(
                    "client namespace {ns_name:?}: invalid {ANNOTATION_TENANT_NAMESPACE_SUFFIX_LENGTH} value {raw:?}"
                )
            })?,
        };

        Ok(Self {
            namespace_prefix,
            suffix_length,
            role_name,
        })
    }
}

/// Random lowercase alphanumeric suffix of `len` characters.
fn random_suffix(len: usize) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Compose the tenant namespace name: `prefix-tenantID` plus a random
/// suffix when the configured suffix length is nonzero.
#[must_use]
pub fn compose_tenant_namespace_name(prefix: &str, tenant_id: &str, suffix_length: usize) -> String {
    if suffix_length == 0 {
        format!("{prefix}-{tenant_id}")
    } else {
        format!("{prefix}-{tenant_id}-{}", random_suffix(suffix_length))
    }
}

/// The one role binding a healthy tenant namespace must contain: the
/// configured cluster role granted to the `default` service accounts of the
/// tenant namespace and the client namespace.
#[must_use]
pub fn desired_role_binding(
    tenant_namespace: &str,
    client_namespace: &str,
    role_name: &str,
) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            generate_name: Some(TENANT_ROLE_BINDING_NAME_PREFIX.to_string()),
            namespace: Some(tenant_namespace.to_string()),
            labels: Some(
                [(LABEL_SYSTEM_MANAGED.to_string(), "true".to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: role_name.to_string(),
        },
        subjects: Some(vec![
            Subject {
                kind: "ServiceAccount".to_string(),
                name: "default".to_string(),
                namespace: Some(tenant_namespace.to_string()),
                ..Default::default()
            },
            Subject {
                kind: "ServiceAccount".to_string(),
                name: "default".to_string(),
                namespace: Some(client_namespace.to_string()),
                ..Default::default()
            },
        ]),
    }
}

/// Whether an existing role binding matches the desired one in `RoleRef`
/// and subjects. Names are not compared; the name carries a random suffix.
#[must_use]
pub fn role_binding_matches(desired: &RoleBinding, actual: &RoleBinding) -> bool {
    desired.role_ref == actual.role_ref && desired.subjects == actual.subjects
}

/// Split the labeled role bindings into the one to retain and the rest.
///
/// When several bindings match the desired spec, the lexicographically
/// smallest name wins; every other labeled binding is deleted.
#[must_use]
pub fn select_retained_role_binding<'a>(
    bindings: &'a [RoleBinding],
    desired: &RoleBinding,
) -> (Option<&'a RoleBinding>, Vec<&'a RoleBinding>) {
    let retained = bindings
        .iter()
        .filter(|b| role_binding_matches(desired, b))
        .min_by(|a, b| a.name_any().cmp(&b.name_any()));

    let obsolete = bindings
        .iter()
        .filter(|b| {
            retained.is_none_or(|keep| !std::ptr::eq(*b, keep))
        })
        .collect();

    (retained, obsolete)
}

/// Reconcile a `Tenant` resource.
///
/// Provisions the tenant namespace on first sight, keeps the role binding
/// in sync afterwards, and tears the namespace down when the tenant is
/// deleted and our finalizer is present.
///
/// # Errors
///
/// Returns an error for the work queue to requeue: transient API failures,
/// unloadable client configuration, a vanished tenant namespace or a
/// namespace name clash.
pub async fn reconcile_tenant(client: Client, tenant: Tenant) -> Result<()> {
    let client_namespace = tenant.namespace().unwrap_or_default();
    let tenant_id = tenant.name_any();

    info!("Reconciling Tenant: {}/{}", client_namespace, tenant_id);

    let config = load_client_config(&client, &client_namespace).await?;

    if tenant.metadata.deletion_timestamp.is_some() {
        return handle_tenant_deletion(&client, &tenant).await;
    }

    ensure_finalizer(&client, &tenant, FINALIZER_TENANT).await?;

    match tenant
        .status
        .as_ref()
        .and_then(|s| s.tenant_namespace_name.clone())
    {
        None => initialize_tenant(&client, &tenant, &config).await,
        Some(tenant_namespace) => sync_tenant(&client, &tenant, &config, &tenant_namespace).await,
    }
}

/// Read and parse the client namespace annotations. Transient API errors
/// are retried inline; a missing namespace fails fast.
async fn load_client_config(client: &Client, client_namespace: &str) -> Result<TenantClientConfig> {
    let api: Api<Namespace> = Api::all(client.clone());
    let namespace = retry_api_call(
        || api.get(client_namespace),
        &format!("get client namespace {client_namespace}"),
    )
    .await
    .with_context(|| format!("failed to get client namespace {client_namespace:?}"))?;
    TenantClientConfig::from_namespace(&namespace)
}

/// Delete the tenant namespace and release the finalizer.
async fn handle_tenant_deletion(client: &Client, tenant: &Tenant) -> Result<()> {
    let client_namespace = tenant.namespace().unwrap_or_default();
    let tenant_id = tenant.name_any();

    if !has_finalizer(tenant, FINALIZER_TENANT) {
        debug!(
            "Tenant {}/{} deleted without our finalizer, nothing to clean up",
            client_namespace, tenant_id
        );
        return Ok(());
    }

    if let Some(tenant_namespace) = tenant
        .status
        .as_ref()
        .and_then(|s| s.tenant_namespace_name.as_deref())
    {
        let api: Api<Namespace> = Api::all(client.clone());
        match api.delete(tenant_namespace, &DeleteParams::default()).await {
            Ok(_) => info!("Deleted tenant namespace {tenant_namespace}"),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!("Tenant namespace {tenant_namespace} already gone");
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to delete tenant namespace {tenant_namespace:?}"))
            }
        }
    }

    remove_finalizer(client, tenant, FINALIZER_TENANT).await
}

/// First reconcile of a tenant: create the namespace, sync the role
/// binding, then publish everything in one status update. Every failure
/// after namespace creation rolls the namespace back so a later retry
/// starts from a clean slate.
async fn initialize_tenant(
    client: &Client,
    tenant: &Tenant,
    config: &TenantClientConfig,
) -> Result<()> {
    let client_namespace = tenant.namespace().unwrap_or_default();
    let tenant_id = tenant.name_any();

    let tenant_namespace = compose_tenant_namespace_name(
        &config.namespace_prefix,
        &tenant_id,
        config.suffix_length,
    );

    let api: Api<Namespace> = Api::all(client.clone());
    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(tenant_namespace.clone()),
            ..Default::default()
        },
        ..Default::default()
    };
    if let Err(e) = api.create(&PostParams::default(), &namespace).await {
        update_status_condition(
            client,
            tenant,
            not_ready_condition(REASON_FAILED, MSG_NAMESPACE_CREATE_FAILED),
            None,
        )
        .await?;
        return Err(anyhow::Error::from(e).context("failed to create new tenant namespace"));
    }
    info!("Created tenant namespace {tenant_namespace}");

    if let Err(e) = sync_role_binding(client, &tenant_namespace, &client_namespace, config).await {
        rollback_tenant_namespace(client, &tenant_namespace).await;
        update_status_condition(
            client,
            tenant,
            not_ready_condition(REASON_FAILED, MSG_ROLE_BINDING_INIT_FAILED),
            None,
        )
        .await?;
        return Err(e);
    }

    if let Err(e) = update_status_condition(
        client,
        tenant,
        ready_condition(),
        Some(&tenant_namespace),
    )
    .await
    {
        rollback_tenant_namespace(client, &tenant_namespace).await;
        return Err(e);
    }

    Ok(())
}

/// Reconcile of an already initialized tenant: the namespace name in status
/// is authoritative and never rewritten.
async fn sync_tenant(
    client: &Client,
    tenant: &Tenant,
    config: &TenantClientConfig,
    tenant_namespace: &str,
) -> Result<()> {
    let client_namespace = tenant.namespace().unwrap_or_default();

    let api: Api<Namespace> = Api::all(client.clone());
    match api.get_opt(tenant_namespace).await? {
        Some(_) => {}
        None => {
            update_status_condition(
                client,
                tenant,
                not_ready_condition(
                    REASON_DEPENDENT_RESOURCE_STATE,
                    &format!(
                        "The tenant namespace \"{tenant_namespace}\" does not exist anymore. \
                         This issue must be analyzed and fixed by an operator."
                    ),
                ),
                None,
            )
            .await?;
            anyhow::bail!("tenant namespace \"{tenant_namespace}\" does not exist anymore");
        }
    }

    if let Err(e) = sync_role_binding(client, tenant_namespace, &client_namespace, config).await {
        update_status_condition(
            client,
            tenant,
            not_ready_condition(
                REASON_DEPENDENT_RESOURCE_STATE,
                &format!(
                    "The RoleBinding in tenant namespace \"{tenant_namespace}\" is outdated \
                     but could not be updated."
                ),
            ),
            None,
        )
        .await?;
        return Err(e);
    }

    update_status_condition(client, tenant, ready_condition(), None).await
}

/// Bring the tenant namespace to exactly one matching, system-managed role
/// binding.
///
/// `RoleRef` is immutable, so an outdated binding is replaced by
/// delete-and-create rather than patched. Extra labeled bindings are
/// deleted; among several matching ones the lexicographically smallest name
/// is retained.
async fn sync_role_binding(
    client: &Client,
    tenant_namespace: &str,
    client_namespace: &str,
    config: &TenantClientConfig,
) -> Result<()> {
    let api: Api<RoleBinding> = Api::namespaced(client.clone(), tenant_namespace);

    let labeled = api
        .list(&ListParams::default().labels(LABEL_SYSTEM_MANAGED))
        .await
        .with_context(|| {
            format!("failed to get all managed RoleBindings from namespace {tenant_namespace:?}")
        })
        .with_context(|| {
            format!("failed to reconcile the RoleBinding in tenant namespace {tenant_namespace:?}")
        })?;

    let desired = desired_role_binding(tenant_namespace, client_namespace, &config.role_name);
    let (retained, obsolete) = select_retained_role_binding(&labeled.items, &desired);

    if retained.is_none() {
        api.create(&PostParams::default(), &desired)
            .await
            .with_context(|| {
                format!(
                    "failed to reconcile the RoleBinding in tenant namespace {tenant_namespace:?}"
                )
            })?;
        debug!("Created role binding in tenant namespace {tenant_namespace}");
    }

    for binding in obsolete {
        let name = binding.name_any();
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => debug!("Deleted obsolete role binding {name} in {tenant_namespace}"),
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => {
                return Err(anyhow::Error::from(e)).with_context(|| {
                    format!(
                        "failed to reconcile the RoleBinding in tenant namespace {tenant_namespace:?}"
                    )
                })
            }
        }
    }

    Ok(())
}

/// Best-effort removal of a namespace created earlier in the same pass.
async fn rollback_tenant_namespace(client: &Client, tenant_namespace: &str) {
    let api: Api<Namespace> = Api::all(client.clone());
    if let Err(e) = api.delete(tenant_namespace, &DeleteParams::default()).await {
        warn!("Failed to roll back tenant namespace {tenant_namespace}: {e}");
    }
}

/// Patch the tenant status with a fresh Ready condition and, during
/// initialization, the namespace name.
async fn update_status_condition(
    client: &Client,
    tenant: &Tenant,
    condition: crate::crd::Condition,
    tenant_namespace: Option<&str>,
) -> Result<()> {
    let client_namespace = tenant.namespace().unwrap_or_default();
    let tenant_id = tenant.name_any();

    let mut status = tenant.status.clone().unwrap_or_default();
    status.set_ready_condition(condition);
    if let Some(name) = tenant_namespace {
        status.tenant_namespace_name = Some(name.to_string());
    }

    let api: Api<Tenant> = Api::namespaced(client.clone(), &client_namespace);
    api.patch_status(
        &tenant_id,
        &PatchParams::default(),
        &Patch::Merge(json!({ "status": status })),
    )
    .await
    .with_context(|| {
        format!("failed to update status of tenant {tenant_id:?} in namespace {client_namespace:?}")
    })?;

    Ok(())
}

#[cfg(test)]
#[path = "tenant_tests.rs"]
mod tenant_tests;
