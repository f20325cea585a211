// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared types and imports for `PipelineRun` reconciliation.
//!
//! This module provides common type re-exports and shared utilities
//! used across the pipelinerun reconciliation modules.

#![allow(clippy::wildcard_imports)]

// Re-export commonly used types from parent modules
pub use crate::config::{ConfigError, PipelineRunsConfig};
pub use crate::crd::{
    Intent, PipelineRun, PipelineRunSpec, PipelineRunStatus, RunResult, State, StateItem,
};
pub use crate::labels::{ANNOTATION_SECRET_RENAME_TO, FINALIZER_PIPELINE_RUN, LABEL_SYSTEM_MANAGED};

// Re-export commonly used Kubernetes types
pub use k8s_openapi::api::core::v1::{
    Namespace, Pod, Secret, ServiceAccount,
};
pub use k8s_openapi::api::networking::v1::NetworkPolicy;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

// Re-export kube-rs types
pub use kube::{
    api::{DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams},
    client::Client,
    Api, ResourceExt,
};

// Re-export common utilities
pub use anyhow::{Context as _, Result};
pub use chrono::Utc;
pub use serde_json::json;
pub use std::sync::Arc;
pub use std::time::Duration;
pub use tracing::{debug, error, info, warn};
