// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-run namespace management.
//!
//! Every `PipelineRun` executes in a short-lived, system-managed namespace.
//! This module creates that namespace, provisions its content in one pass
//! (secret copies, the selected network policy, the limit range, the
//! optional resource quota, the `PodSecurityPolicy` use grant and the
//! default service account) and tears it down again during cleaning.
//!
//! The client namespace is never touched by deletion.

#[allow(clippy::wildcard_imports)]
use super::types::*;
use super::secrets::{materialize_secrets, MaterializeError};
use crate::constants::RUN_NAMESPACE_PSP_ROLE_NAME;
use k8s_openapi::api::core::v1::{LimitRange, ObjectReference, ResourceQuota};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use rand::Rng;
use thiserror::Error;

/// Failures while provisioning the run namespace.
///
/// The variant decides how the run is classified: `Content` becomes
/// `error_content`, `Config` becomes `error_config`, and `Api` is transient
/// and requeues without touching user-visible state.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("{0}")]
    Content(String),

    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    Api(#[from] kube::Error),
}

impl From<MaterializeError> for ProvisionError {
    fn from(err: MaterializeError) -> Self {
        match err {
            MaterializeError::Api(e) => ProvisionError::Api(e),
            content => ProvisionError::Content(content.to_string()),
        }
    }
}

impl From<ConfigError> for ProvisionError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Load(e) => ProvisionError::Api(e),
            ConfigError::Invalid { message, .. } => ProvisionError::Config(message),
        }
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

/// Compose the run namespace name from the configured prefix, the run name
/// and a random suffix. The run name is sanitized to DNS-1123 characters
/// and the result stays within the 63 character namespace name limit.
#[must_use]
pub fn compose_run_namespace_name(prefix: &str, run_name: &str, suffix_length: usize) -> String {
    let sanitized: String = run_name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .collect();
    let sanitized = sanitized.trim_matches('-');

    // budget: prefix + '-' + run + ('-' + suffix)
    let suffix_budget = if suffix_length == 0 { 0 } else { suffix_length + 1 };
    let max_run_len = 63usize
        .saturating_sub(prefix.len() + 1)
        .saturating_sub(suffix_budget);
    let truncated: String = sanitized.chars().take(max_run_len).collect();
    let truncated = truncated.trim_matches('-');

    if suffix_length == 0 {
        format!("{prefix}-{truncated}")
    } else {
        format!("{prefix}-{truncated}-{}", random_suffix(suffix_length))
    }
}

/// Create the run namespace, labeled system-managed. `AlreadyExists` is
/// treated as adopted: the name was assigned to this run in a prior attempt.
///
/// # Errors
///
/// Returns API errors other than `AlreadyExists`.
pub async fn create_run_namespace(client: &Client, name: &str) -> Result<(), kube::Error> {
    let api: Api<Namespace> = Api::all(client.clone());
    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                [(LABEL_SYSTEM_MANAGED.to_string(), "true".to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    };

    match api.create(&PostParams::default(), &namespace).await {
        Ok(_) => {
            info!("Created run namespace {name}");
            Ok(())
        }
        Err(kube::Error::Api(e)) if e.code == 409 => {
            debug!("Run namespace {name} already exists, adopting");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Provision the content of the run namespace in one pass.
///
/// Order matters: the secrets are copied before the service account
/// references them, and the run does not advance past `preparing` until all
/// of this is observed, so the pipeline pod is never scheduled without
/// policies in effect.
///
/// On any failure the namespace is torn down best-effort before the error
/// surfaces, so a retry starts from a clean slate.
///
/// # Errors
///
/// See [`ProvisionError`] for classification.
pub async fn provision_run_namespace(
    client: &Client,
    config: &PipelineRunsConfig,
    run: &PipelineRun,
    run_namespace: &str,
) -> Result<(), ProvisionError> {
    let client_namespace = run.namespace().unwrap_or_default();

    let result = provision_inner(client, config, run, &client_namespace, run_namespace).await;
    if result.is_err() {
        teardown_best_effort(client, run_namespace).await;
    }
    result
}

async fn provision_inner(
    client: &Client,
    config: &PipelineRunsConfig,
    run: &PipelineRun,
    client_namespace: &str,
    run_namespace: &str,
) -> Result<(), ProvisionError> {
    // the repository auth secret is mounted by the runner pod, so it must
    // be materialized like the declared secrets
    let mut declared = run.spec.secrets.clone();
    if let Some(auth_secret) = &run.spec.jenkins_file.repo_auth_secret {
        if !declared.contains(auth_secret) {
            declared.push(auth_secret.clone());
        }
    }

    let secret_names =
        materialize_secrets(client, &declared, client_namespace, run_namespace).await?;

    apply_network_policy(client, config, run, run_namespace).await?;
    apply_limit_range(client, config, run_namespace).await?;
    apply_resource_quota(client, config, run_namespace).await?;
    apply_psp_grant(client, config, run_namespace).await?;
    apply_service_account(client, run_namespace, &secret_names).await?;

    Ok(())
}

/// Apply the network policy profile selected by the run, or the cluster
/// default when the spec does not name one.
async fn apply_network_policy(
    client: &Client,
    config: &PipelineRunsConfig,
    run: &PipelineRun,
    run_namespace: &str,
) -> Result<(), ProvisionError> {
    let selected = run
        .spec
        .profiles
        .as_ref()
        .and_then(|p| p.network.as_deref());
    let template = config.network_policy_for(selected)?;

    let mut policy = template.clone();
    policy.metadata.namespace = Some(run_namespace.to_string());
    policy.metadata.resource_version = None;
    policy
        .metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(LABEL_SYSTEM_MANAGED.to_string(), "true".to_string());
    if policy.metadata.name.is_none() {
        policy.metadata.name = Some("steward-run".to_string());
    }

    let api: Api<NetworkPolicy> = Api::namespaced(client.clone(), run_namespace);
    create_ignoring_conflict(&api, &policy).await?;
    debug!(
        profile = selected.unwrap_or(&config.default_network_profile),
        namespace = run_namespace,
        "Applied network policy"
    );
    Ok(())
}

async fn apply_limit_range(
    client: &Client,
    config: &PipelineRunsConfig,
    run_namespace: &str,
) -> Result<(), ProvisionError> {
    let Some(template) = &config.limit_range else {
        return Ok(());
    };

    let mut limit_range = template.clone();
    limit_range.metadata.namespace = Some(run_namespace.to_string());
    limit_range.metadata.resource_version = None;
    if limit_range.metadata.name.is_none() {
        limit_range.metadata.name = Some("steward-run".to_string());
    }

    let api: Api<LimitRange> = Api::namespaced(client.clone(), run_namespace);
    create_ignoring_conflict(&api, &limit_range).await?;
    Ok(())
}

async fn apply_resource_quota(
    client: &Client,
    config: &PipelineRunsConfig,
    run_namespace: &str,
) -> Result<(), ProvisionError> {
    let Some(template) = &config.resource_quota else {
        return Ok(());
    };

    let mut quota = template.clone();
    quota.metadata.namespace = Some(run_namespace.to_string());
    quota.metadata.resource_version = None;
    if quota.metadata.name.is_none() {
        quota.metadata.name = Some("steward-run".to_string());
    }

    let api: Api<ResourceQuota> = Api::namespaced(client.clone(), run_namespace);
    create_ignoring_conflict(&api, &quota).await?;
    Ok(())
}

/// Grant the default service account `use` of the configured
/// `PodSecurityPolicy`, when one is configured.
async fn apply_psp_grant(
    client: &Client,
    config: &PipelineRunsConfig,
    run_namespace: &str,
) -> Result<(), ProvisionError> {
    let Some(psp_name) = &config.pod_security_policy_name else {
        return Ok(());
    };

    let role = Role {
        metadata: ObjectMeta {
            name: Some(RUN_NAMESPACE_PSP_ROLE_NAME.to_string()),
            namespace: Some(run_namespace.to_string()),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec!["policy".to_string()]),
            resources: Some(vec!["podsecuritypolicies".to_string()]),
            resource_names: Some(vec![psp_name.clone()]),
            verbs: vec!["use".to_string()],
            ..Default::default()
        }]),
    };

    let binding = RoleBinding {
        metadata: ObjectMeta {
            name: Some(RUN_NAMESPACE_PSP_ROLE_NAME.to_string()),
            namespace: Some(run_namespace.to_string()),
            labels: Some(
                [(LABEL_SYSTEM_MANAGED.to_string(), "true".to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: RUN_NAMESPACE_PSP_ROLE_NAME.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: "default".to_string(),
            namespace: Some(run_namespace.to_string()),
            ..Default::default()
        }]),
    };

    let role_api: Api<Role> = Api::namespaced(client.clone(), run_namespace);
    create_ignoring_conflict(&role_api, &role).await?;
    let binding_api: Api<RoleBinding> = Api::namespaced(client.clone(), run_namespace);
    create_ignoring_conflict(&binding_api, &binding).await?;
    Ok(())
}

/// Point the default service account at the copied secrets. The account is
/// created by the namespace controller; it may not exist yet right after
/// namespace creation, in which case it is created here.
async fn apply_service_account(
    client: &Client,
    run_namespace: &str,
    secret_names: &[String],
) -> Result<(), ProvisionError> {
    let api: Api<ServiceAccount> = Api::namespaced(client.clone(), run_namespace);
    let secrets: Vec<ObjectReference> = secret_names
        .iter()
        .map(|name| ObjectReference {
            name: Some(name.clone()),
            namespace: Some(run_namespace.to_string()),
            ..Default::default()
        })
        .collect();

    match api.get_opt("default").await? {
        Some(_) => {
            api.patch(
                "default",
                &PatchParams::default(),
                &Patch::Merge(json!({ "secrets": secrets })),
            )
            .await?;
        }
        None => {
            let account = ServiceAccount {
                metadata: ObjectMeta {
                    name: Some("default".to_string()),
                    namespace: Some(run_namespace.to_string()),
                    ..Default::default()
                },
                secrets: Some(secrets),
                ..Default::default()
            };
            create_ignoring_conflict(&api, &account).await?;
        }
    }
    Ok(())
}

/// Ensure the run namespace is gone.
///
/// Returns `true` when the namespace no longer exists; `false` when a
/// delete was issued but the namespace is still terminating, in which case
/// the caller requeues.
///
/// # Errors
///
/// Returns API errors other than `NotFound`.
pub async fn ensure_run_namespace_deleted(
    client: &Client,
    name: &str,
) -> Result<bool, kube::Error> {
    let api: Api<Namespace> = Api::all(client.clone());

    match api.get_opt(name).await? {
        None => Ok(true),
        Some(existing) => {
            if existing.metadata.deletion_timestamp.is_none() {
                match api.delete(name, &DeleteParams::default()).await {
                    Ok(_) => info!("Deleting run namespace {name}"),
                    Err(kube::Error::Api(e)) if e.code == 404 => return Ok(true),
                    Err(e) => return Err(e),
                }
            }
            Ok(false)
        }
    }
}

/// Best-effort teardown after a failed provisioning pass. Deleting the
/// namespace removes every artifact created so far.
async fn teardown_best_effort(client: &Client, run_namespace: &str) {
    let api: Api<Namespace> = Api::all(client.clone());
    match api.delete(run_namespace, &DeleteParams::default()).await {
        Ok(_) => debug!("Tore down partially provisioned run namespace {run_namespace}"),
        Err(kube::Error::Api(e)) if e.code == 404 => {}
        Err(e) => warn!("Failed to tear down run namespace {run_namespace}: {e}"),
    }
}

async fn create_ignoring_conflict<T>(api: &Api<T>, resource: &T) -> Result<(), kube::Error>
where
    T: Clone + std::fmt::Debug + serde::Serialize + for<'de> serde::Deserialize<'de>,
{
    match api.create(&PostParams::default(), resource).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
#[path = "run_namespace_tests.rs"]
mod run_namespace_tests;
