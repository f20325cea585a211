// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the Steward controllers.
//!
//! This module contains all numeric and string constants used throughout the
//! codebase. Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for all Steward CRDs
pub const API_GROUP: &str = "steward.sap.com";

/// API version for all Steward CRDs
pub const API_VERSION: &str = "v1alpha1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "steward.sap.com/v1alpha1";

/// Kind name for `Tenant` resources
pub const KIND_TENANT: &str = "Tenant";

/// Kind name for `PipelineRun` resources
pub const KIND_PIPELINE_RUN: &str = "PipelineRun";

// ============================================================================
// Tenant Namespace Constants
// ============================================================================

/// Length of the random tenant namespace suffix when the client namespace
/// does not carry the suffix-length annotation
pub const DEFAULT_TENANT_NAMESPACE_SUFFIX_LENGTH: usize = 6;

/// Name prefix for the managed RoleBinding in tenant namespaces
pub const TENANT_ROLE_BINDING_NAME_PREFIX: &str = "steward-tenant-role-binding-";

// ============================================================================
// Run Namespace Constants
// ============================================================================

/// Default prefix for per-run namespaces
pub const DEFAULT_RUN_NAMESPACE_PREFIX: &str = "steward-run";

/// Length of the random run namespace suffix
pub const RUN_NAMESPACE_SUFFIX_LENGTH: usize = 6;

/// Name of the Role granting `use` of the configured PodSecurityPolicy
/// inside a run namespace
pub const RUN_NAMESPACE_PSP_ROLE_NAME: &str = "steward-run-psp";

// ============================================================================
// Jenkinsfile Runner Constants
// ============================================================================

/// Name of the pipeline pod and its container inside a run namespace
pub const JFR_POD_NAME: &str = "jenkinsfile-runner";

/// Fixed command line of the Jenkinsfile runner, up to the per-run arguments.
/// `--build-number <n> -f <path>` are appended from the PipelineRun spec.
pub const JFR_COMMAND: [&str; 8] = [
    "/app/bin/jenkinsfile-runner",
    "-w",
    "/app/jenkins",
    "-p",
    "/usr/share/jenkins/ref/plugins",
    "--runHome",
    "/jenkins_home",
    "--no-sandbox",
];

/// Termination message the runner emits when the Jenkinsfile path does not
/// exist in the cloned repository
pub const JFR_NO_JENKINSFILE_MESSAGE: &str = "no Jenkinsfile in current directory.";

/// Fallback runner image when the configuration omits one
pub const DEFAULT_JFR_IMAGE: &str = "stewardci/stewardci-jenkinsfile-runner:latest";

// ============================================================================
// Controller Error Handling Constants
// ============================================================================

/// Requeue duration for controller errors (30 seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// Requeue interval while a PipelineRun is waiting on dependent resources
/// or a running pod (3 seconds)
pub const PROGRESS_REQUEUE_DURATION_SECS: u64 = 3;

// ============================================================================
// Controller Runtime Constants
// ============================================================================

/// Number of worker threads for the Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

/// Default reconcile concurrency per controller ("threadiness")
pub const DEFAULT_THREADINESS: u16 = 2;

/// Default heartbeat interval in seconds
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 60;

// ============================================================================
// Configuration Defaults
// ============================================================================

/// Namespace holding the Steward configuration maps when `STEWARD_NAMESPACE`
/// is not set
pub const DEFAULT_SYSTEM_NAMESPACE: &str = "steward-system";

/// Name of the pipeline-runs configuration map
pub const CONFIG_MAP_PIPELINE_RUNS: &str = "steward-pipelineruns";

/// Name of the network-policy catalog configuration map
pub const CONFIG_MAP_NETWORK_POLICIES: &str = "steward-pipelineruns-network-policies";

/// Cluster-wide maximum run duration when the configuration omits one (60m)
pub const DEFAULT_MAX_RUN_TIMEOUT_SECS: u64 = 3600;

/// Grace period for a pipeline pod stuck in Pending before the run is
/// classified as an infrastructure error (5m)
pub const DEFAULT_POD_WAITING_TIMEOUT_SECS: u64 = 300;

// ============================================================================
// Leader Election Constants
// ============================================================================

/// Default leader election lease duration (15 seconds)
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 15;

/// Default leader election retry period (2 seconds)
pub const DEFAULT_LEASE_RETRY_PERIOD_SECS: u64 = 2;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Port for the Prometheus metrics HTTP server
pub const METRICS_SERVER_PORT: u16 = 8080;

/// Path for the Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Bind address for the metrics HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0";
