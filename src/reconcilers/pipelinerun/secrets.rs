// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Secret materialization for pipeline runs.
//!
//! Copies the secrets a `PipelineRun` declares from the client namespace
//! into the per-run namespace. A declared secret may carry the rename
//! annotation to receive a different name in the copy; rename targets must
//! be valid DNS-1123 labels and unique across the run.
//!
//! Copies are stripped of identity metadata (ownerReferences,
//! resourceVersion, uid), lose the rename annotation, keep type and data,
//! and are labeled system-managed so cleanup can find them.

#[allow(clippy::wildcard_imports)]
use super::types::*;
use std::collections::BTreeSet;
use thiserror::Error;

/// Failures while materializing secrets.
///
/// [`MaterializeError::Api`] is transient and requeues; every other variant
/// is content the user must fix and classifies the run as `error_content`.
#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("secret \"{0}\" not found in namespace \"{1}\"")]
    MissingSecret(String, String),

    #[error(
        "rename target \"{target}\" of secret \"{secret}\" is invalid: \
         must consist of lower case alphanumeric characters or '-', \
         and must start and end with an alphanumeric character"
    )]
    InvalidRename { secret: String, target: String },

    #[error("multiple declared secrets map to the same target name \"{0}\"")]
    DuplicateTarget(String),

    #[error(transparent)]
    Api(#[from] kube::Error),
}

impl MaterializeError {
    /// Whether this failure is pipeline content the user must fix, as
    /// opposed to a transient platform problem.
    #[must_use]
    pub fn is_content_error(&self) -> bool {
        !matches!(self, MaterializeError::Api(_))
    }
}

/// Whether `name` is a valid DNS-1123 label: `[a-z0-9]([-a-z0-9]*[a-z0-9])?`
/// and at most 63 characters.
#[must_use]
pub fn is_valid_secret_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 63 {
        return false;
    }
    let bytes = name.as_bytes();
    let inner_ok = bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-');
    let edge = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    inner_ok && edge(bytes[0]) && edge(bytes[bytes.len() - 1])
}

/// Target name of a secret copy: the rename annotation when present,
/// otherwise the source name.
#[must_use]
pub fn rename_target(secret: &Secret) -> Option<&str> {
    secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_SECRET_RENAME_TO))
        .map(String::as_str)
}

/// Resolve the target name of each source secret, validating renames and
/// rejecting duplicates across the whole declared set.
///
/// # Errors
///
/// Returns [`MaterializeError::InvalidRename`] or
/// [`MaterializeError::DuplicateTarget`]; both are content errors.
pub fn resolve_target_names(secrets: &[Secret]) -> Result<Vec<String>, MaterializeError> {
    let mut targets = Vec::with_capacity(secrets.len());
    let mut seen = BTreeSet::new();

    for secret in secrets {
        let source_name = secret.name_any();
        let target = match rename_target(secret) {
            Some(rename) => {
                if !is_valid_secret_name(rename) {
                    return Err(MaterializeError::InvalidRename {
                        secret: source_name,
                        target: rename.to_string(),
                    });
                }
                rename.to_string()
            }
            None => source_name.clone(),
        };

        if !seen.insert(target.clone()) {
            return Err(MaterializeError::DuplicateTarget(target));
        }
        targets.push(target);
    }

    Ok(targets)
}

/// Build the copy of a source secret for the run namespace.
///
/// Identity metadata is stripped, the rename annotation is cleared, type
/// and data are preserved and the system-managed label is applied.
#[must_use]
pub fn copy_of(source: &Secret, target_name: &str, target_namespace: &str) -> Secret {
    let annotations = source.metadata.annotations.as_ref().map(|a| {
        a.iter()
            .filter(|(k, _)| k.as_str() != ANNOTATION_SECRET_RENAME_TO)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    });

    let mut labels = source.metadata.labels.clone().unwrap_or_default();
    labels.insert(LABEL_SYSTEM_MANAGED.to_string(), "true".to_string());

    Secret {
        metadata: ObjectMeta {
            name: Some(target_name.to_string()),
            namespace: Some(target_namespace.to_string()),
            annotations,
            labels: Some(labels),
            ..Default::default()
        },
        type_: source.type_.clone(),
        data: source.data.clone(),
        string_data: source.string_data.clone(),
        immutable: None,
    }
}

/// Copy all declared secrets into the run namespace.
///
/// Returns the names of the copies for the default service account to
/// reference. The operation is idempotent: an existing target secret with
/// identical content is left alone, differing content is overwritten.
///
/// # Errors
///
/// Content errors (missing source, invalid rename, duplicate target) and
/// transient API errors, distinguishable via
/// [`MaterializeError::is_content_error`].
pub async fn materialize_secrets(
    client: &Client,
    declared: &[String],
    client_namespace: &str,
    run_namespace: &str,
) -> Result<Vec<String>, MaterializeError> {
    let source_api: Api<Secret> = Api::namespaced(client.clone(), client_namespace);

    let mut sources = Vec::with_capacity(declared.len());
    for name in declared {
        match source_api.get_opt(name).await? {
            Some(secret) => sources.push(secret),
            None => {
                return Err(MaterializeError::MissingSecret(
                    name.clone(),
                    client_namespace.to_string(),
                ))
            }
        }
    }

    let targets = resolve_target_names(&sources)?;

    let target_api: Api<Secret> = Api::namespaced(client.clone(), run_namespace);
    for (source, target_name) in sources.iter().zip(&targets) {
        let copy = copy_of(source, target_name, run_namespace);

        match target_api.create(&PostParams::default(), &copy).await {
            Ok(_) => {
                debug!(
                    secret = %target_name,
                    namespace = %run_namespace,
                    "Copied secret into run namespace"
                );
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                let existing = target_api.get(target_name).await?;
                if existing.data == copy.data && existing.type_ == copy.type_ {
                    debug!(
                        secret = %target_name,
                        "Target secret already up to date"
                    );
                } else {
                    let mut replacement = copy.clone();
                    replacement.metadata.resource_version = existing.metadata.resource_version;
                    target_api
                        .replace(target_name, &PostParams::default(), &replacement)
                        .await?;
                    info!(
                        secret = %target_name,
                        namespace = %run_namespace,
                        "Overwrote outdated secret copy"
                    );
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(targets)
}

#[cfg(test)]
#[path = "secrets_tests.rs"]
mod secrets_tests;
