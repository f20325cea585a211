// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for the Steward pipeline platform.
//!
//! This module defines the Kubernetes Custom Resource Definitions used by the
//! Steward controllers.
//!
//! # Resource Types
//!
//! - [`Tenant`] - An isolation unit owning a dedicated namespace, managed by
//!   the tenant controller
//! - [`PipelineRun`] - A single execution of a Jenkinsfile-based pipeline in
//!   a short-lived, dedicated namespace
//!
//! # Example: Creating a PipelineRun
//!
//! ```rust,no_run
//! use steward::crd::{JenkinsFile, PipelineRunSpec};
//!
//! let spec = PipelineRunSpec {
//!     jenkins_file: JenkinsFile {
//!         repo_url: "https://github.com/example/pipelines".to_string(),
//!         relative_path: "success/Jenkinsfile".to_string(),
//!         revision: "main".to_string(),
//!         repo_auth_secret: None,
//!     },
//!     ..Default::default()
//! };
//! ```

use k8s_openapi::api::core::v1::ContainerState;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition represents an observation of a resource's current state.
///
/// Conditions are used in status subresources to communicate the state of
/// a resource to users and controllers.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition. Steward resources report a `Ready` condition.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Condition type reported by both Steward resources
pub const CONDITION_TYPE_READY: &str = "Ready";

/// Condition reason for terminal, operator-visible problems
pub const REASON_FAILED: &str = "Failed";

/// Condition reason for inconsistencies with managed dependent resources
/// that should self-heal where possible
pub const REASON_DEPENDENT_RESOURCE_STATE: &str = "DependentResourceState";

// ============================================================================
// Tenant
// ============================================================================

/// `Tenant` carves a dedicated namespace out of the cluster for one tenant of
/// a client namespace. The tenant controller provisions the namespace, binds
/// the configured ClusterRole and removes everything again on deletion.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "steward.sap.com",
    version = "v1alpha1",
    kind = "Tenant",
    namespaced,
    shortname = "stn",
    shortname = "stns",
    doc = "Tenant is an isolation unit owning a dedicated namespace created and governed by the tenant controller.",
    printcolumn = r#"{"name":"Namespace","type":"string","jsonPath":".status.tenantNamespaceName"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#
)]
#[kube(status = "TenantStatus")]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {}

/// `Tenant` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatus {
    /// Name of the namespace provisioned for this tenant. Written exactly
    /// once; never rewritten afterwards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_namespace_name: Option<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl TenantStatus {
    /// The `Ready` condition, if present.
    #[must_use]
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.r#type == CONDITION_TYPE_READY)
    }

    /// Replace the `Ready` condition, keeping other condition types.
    pub fn set_ready_condition(&mut self, condition: Condition) {
        self.conditions.retain(|c| c.r#type != CONDITION_TYPE_READY);
        self.conditions.push(condition);
    }
}

// ============================================================================
// PipelineRun
// ============================================================================

/// Reference to the Jenkinsfile to execute.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsFile {
    /// URL of the Git repository containing the Jenkinsfile.
    pub repo_url: String,

    /// Path of the Jenkinsfile relative to the repository root.
    pub relative_path: String,

    /// Revision (branch, tag or commit) to check out.
    pub revision: String,

    /// Name of a basic-auth secret in the client namespace used to clone
    /// the repository.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_auth_secret: Option<String>,
}

/// A named pipeline argument. Opaque to the controllers; handed to the
/// Jenkinsfile runner unmodified.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NameValuePair {
    pub name: String,
    pub value: String,
}

/// Metadata about the build this run represents.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunDetails {
    /// Name of the job this run belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,

    /// What caused this run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,

    /// Build number handed to the runner via `--build-number`.
    #[serde(default)]
    pub sequence_number: i32,
}

/// Elasticsearch log sink binding.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Elasticsearch {
    /// Index URL the runner ships its logs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_url: Option<String>,

    /// Opaque run identifier attached to every log entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<serde_json::Value>,
}

/// Logging options of a run.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Logging {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elasticsearch: Option<Elasticsearch>,
}

/// Profile selectors of a run.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Profiles {
    /// Name of a network policy profile from the cluster catalog. The
    /// cluster default profile is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

/// What the user wants to happen with this run.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Intent {
    /// Execute the pipeline (default).
    #[default]
    Run,
    /// Stop the pipeline and clean up.
    Abort,
}

/// `PipelineRun` requests one execution of a Jenkinsfile-based pipeline.
///
/// The pipeline-run controller drives each run through an isolated,
/// short-lived namespace: it copies the declared secrets, applies resource
/// and network policy, launches the Jenkinsfile runner pod, classifies its
/// outcome and tears everything down again.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "steward.sap.com",
    version = "v1alpha1",
    kind = "PipelineRun",
    namespaced,
    shortname = "spr",
    shortname = "sprs",
    doc = "PipelineRun requests a single execution of a Jenkinsfile-based pipeline in an isolated, short-lived namespace.",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Result","type":"string","jsonPath":".status.result"}"#,
    printcolumn = r#"{"name":"Started","type":"date","jsonPath":".status.startedAt"}"#
)]
#[kube(status = "PipelineRunStatus")]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunSpec {
    /// The Jenkinsfile to execute.
    pub jenkins_file: JenkinsFile,

    /// Pipeline arguments, passed to the runner unmodified.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<NameValuePair>,

    /// Names of secrets in the client namespace to copy into the run
    /// namespace. A secret may carry the rename annotation to receive a
    /// different name in the copy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,

    /// Requested action; setting `abort` stops the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,

    /// Build metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_details: Option<RunDetails>,

    /// Log shipping options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<Logging>,

    /// Profile selectors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profiles: Option<Profiles>,

    /// Maximum execution time of this run, e.g. `"30m"`. Bounded by the
    /// cluster-wide maximum; the cluster maximum applies when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// Lifecycle state of a `PipelineRun`.
///
/// States only ever progress in declaration order; `Finished` is terminal.
#[derive(
    Clone, Copy, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq, PartialOrd, Ord,
)]
#[serde(rename_all = "camelCase")]
pub enum State {
    /// Not yet picked up by the controller.
    #[default]
    New,
    /// Run namespace and its content are being provisioned.
    Preparing,
    /// Prerequisites are ready; the pipeline pod is being launched.
    Waiting,
    /// The pipeline pod is executing.
    Running,
    /// The run namespace is being torn down.
    Cleaning,
    /// Terminal; nothing left to do.
    Finished,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            State::New => "new",
            State::Preparing => "preparing",
            State::Waiting => "waiting",
            State::Running => "running",
            State::Cleaning => "cleaning",
            State::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// Terminal classification of a `PipelineRun`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum RunResult {
    /// The pipeline completed successfully.
    #[serde(rename = "success")]
    Success,
    /// The run was aborted, either on request or by timeout.
    #[serde(rename = "aborted")]
    Aborted,
    /// The pipeline content failed: bad Jenkinsfile, bad secret, runtime
    /// error inside the pipeline.
    #[serde(rename = "error_content")]
    ErrorContent,
    /// The cluster configuration for pipeline runs is invalid.
    #[serde(rename = "error_config")]
    ErrorConfig,
    /// The platform failed while the run was in progress.
    #[serde(rename = "error_infra")]
    ErrorInfra,
}

impl std::fmt::Display for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunResult::Success => "success",
            RunResult::Aborted => "aborted",
            RunResult::ErrorContent => "error_content",
            RunResult::ErrorConfig => "error_config",
            RunResult::ErrorInfra => "error_infra",
        };
        f.write_str(s)
    }
}

/// One entry of the state history of a run.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StateItem {
    pub state: State,

    /// When the run entered this state (RFC3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,

    /// When the run left this state (RFC3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

/// `PipelineRun` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunStatus {
    /// Current lifecycle state.
    #[serde(default)]
    pub state: State,

    /// Details of the current state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_details: Option<StateItem>,

    /// All states this run has passed through, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub state_history: Vec<StateItem>,

    /// Terminal classification; set exactly once, at the transition into
    /// `cleaning`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RunResult>,

    /// Human-readable outcome message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Short form of `message` for list output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_short: Option<String>,

    /// Name of the per-run namespace. Written exactly once; never rewritten.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Last observed state of the pipeline container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerState>,

    /// When the pipeline pod started executing (RFC3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,

    /// When the run reached its terminal state (RFC3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl PipelineRunStatus {
    /// Advance to `state`, closing the current history entry and opening a
    /// new one stamped with `now`.
    ///
    /// States never regress: a request to enter a state earlier than or
    /// equal to the current one is refused.
    ///
    /// # Errors
    ///
    /// Returns an error if `state` is not strictly later than the current
    /// state.
    pub fn advance_state(&mut self, state: State, now: &str) -> anyhow::Result<()> {
        if state <= self.state {
            anyhow::bail!(
                "refusing state regression from {} to {}",
                self.state,
                state
            );
        }

        if let Some(mut current) = self.state_details.take() {
            current.finished_at = Some(now.to_string());
            self.state_history.push(current);
        }
        self.state_details = Some(StateItem {
            state,
            started_at: Some(now.to_string()),
            finished_at: None,
        });
        self.state = state;
        Ok(())
    }

    /// Record the terminal result. The result is write-once: a second call
    /// with a different value is refused.
    ///
    /// # Errors
    ///
    /// Returns an error on an attempt to overwrite an existing result with
    /// a different value.
    pub fn set_result(&mut self, result: RunResult) -> anyhow::Result<()> {
        match self.result {
            None => {
                self.result = Some(result);
                Ok(())
            }
            Some(existing) if existing == result => Ok(()),
            Some(existing) => {
                anyhow::bail!("refusing to change result from {existing} to {result}")
            }
        }
    }

    /// Record the run namespace name. Write-once, like the namespace itself.
    ///
    /// # Errors
    ///
    /// Returns an error on an attempt to rewrite an already assigned
    /// namespace name.
    pub fn set_namespace(&mut self, name: &str) -> anyhow::Result<()> {
        match self.namespace.as_deref() {
            None => {
                self.namespace = Some(name.to_string());
                Ok(())
            }
            Some(existing) if existing == name => Ok(()),
            Some(existing) => {
                anyhow::bail!("refusing to rewrite run namespace from {existing} to {name}")
            }
        }
    }

    /// The `Ready` condition, if present.
    #[must_use]
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.r#type == CONDITION_TYPE_READY)
    }
}

impl PipelineRunSpec {
    /// Effective intent; `Run` when unset.
    #[must_use]
    pub fn intent(&self) -> Intent {
        self.intent.unwrap_or_default()
    }

    /// Build number handed to the runner; 1 when run details are absent.
    #[must_use]
    pub fn build_number(&self) -> i32 {
        self.run_details
            .as_ref()
            .map_or(1, |d| d.sequence_number.max(1))
    }
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
