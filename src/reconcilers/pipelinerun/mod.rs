// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Pipeline run reconciliation logic.
//!
//! This module drives each `PipelineRun` through its lifecycle: an isolated
//! run namespace is provisioned with the declared secrets and the
//! configured policies, the Jenkinsfile runner pod executes the pipeline,
//! its outcome is classified into a terminal result, and everything is torn
//! down again.
//!
//! ## Module Structure
//!
//! - [`machine`] - the pure state machine deciding the next step
//! - [`run_namespace`] - per-run namespace lifecycle
//! - [`runner`] - pipeline pod construction and classification
//! - [`secrets`] - secret materialization
//! - [`types`] - shared types and imports
//!
//! The reconciler is the only mutator of a run: it observes current state,
//! performs exactly one forward move and either requeues or rests.

// Submodules
pub mod machine;
pub mod run_namespace;
pub mod runner;
pub mod secrets;
pub mod types;

use machine::{next_step, Observed, Step};
use run_namespace::{
    compose_run_namespace_name, create_run_namespace, ensure_run_namespace_deleted,
    provision_run_namespace, ProvisionError,
};
use runner::{
    build_runner_pod, create_runner_pod, delete_runner_pod, get_runner_pod, observe_pod,
    runner_command, PodObservation,
};

#[allow(clippy::wildcard_imports)]
use types::*;

use crate::config::{ConfigStore, FLAG_RETRY_ON_INVALID_PIPELINE_RUNS_CONFIG};
use crate::constants::PROGRESS_REQUEUE_DURATION_SECS;
use crate::metrics;
use crate::reconcilers::finalizers::{
    ensure_finalizer, handle_deletion, remove_finalizer, FinalizerCleanup,
};
use crate::reconcilers::retry::retry_api_call;
use anyhow::Context as _;
use chrono::DateTime;

/// What the controller runtime should do after a successful reconcile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Check back after the given duration; work remains.
    Requeue(Duration),
    /// Rest until the next watch event.
    Rest,
}

/// Deleting a `PipelineRun` object tears down its run namespace, wherever
/// in the lifecycle the run was.
#[async_trait::async_trait]
impl FinalizerCleanup for PipelineRun {
    async fn cleanup(&self, client: &Client) -> Result<()> {
        let Some(run_namespace) = self.status.as_ref().and_then(|s| s.namespace.as_deref()) else {
            return Ok(());
        };

        ensure_run_namespace_deleted(client, run_namespace)
            .await
            .with_context(|| format!("failed to delete run namespace {run_namespace:?}"))?;
        Ok(())
    }
}

/// Reconcile a `PipelineRun`.
///
/// Performs at most one forward transition per pass. Transient API errors
/// are returned for a rate-limited requeue and never change user-visible
/// state; content and configuration problems classify the run instead.
///
/// # Errors
///
/// Returns an error for the work queue to requeue with backoff.
pub async fn reconcile_pipelinerun(
    client: Client,
    config_store: Arc<ConfigStore>,
    run: PipelineRun,
) -> Result<ReconcileOutcome> {
    let client_namespace = run.namespace().unwrap_or_default();
    let run_name = run.name_any();

    info!("Reconciling PipelineRun: {}/{}", client_namespace, run_name);

    if run.metadata.deletion_timestamp.is_some() {
        handle_deletion(&client, &run, FINALIZER_PIPELINE_RUN).await?;
        return Ok(ReconcileOutcome::Rest);
    }

    let status = run.status.clone().unwrap_or_default();
    if status.state == State::Finished {
        return Ok(ReconcileOutcome::Rest);
    }

    let config = match config_store.snapshot().await {
        Ok(config) => config,
        Err(ConfigError::Load(e)) => {
            return Err(anyhow::Error::from(e).context("failed to load configuration"))
        }
        Err(ConfigError::Invalid {
            message,
            feature_flags,
        }) => {
            if feature_flags.is_enabled(FLAG_RETRY_ON_INVALID_PIPELINE_RUNS_CONFIG) {
                // operator-visible alert expected; keep the run untouched
                anyhow::bail!("invalid pipeline runs configuration (will retry): {message}");
            }
            warn!(
                "Terminating run {}/{} due to invalid configuration: {message}",
                client_namespace, run_name
            );
            return enter_cleaning(
                &client,
                &run,
                status,
                RunResult::ErrorInfra,
                Some(format!("invalid pipeline runs configuration: {message}")),
                false,
            )
            .await;
        }
    };

    let effective_timeout = match config.effective_timeout(run.spec.timeout.as_deref()) {
        Ok(timeout) => timeout,
        Err(e) => {
            return enter_cleaning(
                &client,
                &run,
                status,
                RunResult::ErrorContent,
                Some(format!("spec.timeout is invalid: {e}")),
                false,
            )
            .await;
        }
    };

    // observe the pipeline pod where it can exist; transient read errors
    // are retried inline so a flaky observation never shortcuts a state
    let pod = match (status.namespace.as_deref(), status.state) {
        (Some(ns), State::Waiting | State::Running) => {
            retry_api_call(|| get_runner_pod(&client, ns), "get pipeline pod").await?
        }
        _ => None,
    };
    let pod_observation = observe_pod(pod.as_ref());

    let namespace_gone = if status.state == State::Cleaning {
        match status.namespace.as_deref() {
            Some(ns) => {
                let api: Api<Namespace> = Api::all(client.clone());
                api.get_opt(ns).await?.is_none()
            }
            None => true,
        }
    } else {
        false
    };

    let observed = Observed {
        state: status.state,
        intent: run.spec.intent(),
        pod: pod_observation.clone(),
        waiting_elapsed: state_elapsed(&status, State::Waiting),
        running_elapsed: state_elapsed(&status, State::Running),
        pod_waiting_timeout: config.pod_waiting_timeout,
        effective_timeout,
        namespace_gone,
    };

    let command = runner_command(run.spec.build_number(), &run.spec.jenkins_file.relative_path);
    let step = next_step(&observed, &command);
    debug!(
        state = %status.state,
        step = ?step,
        "Decided next step"
    );

    match step {
        Step::StartPreparing => start_preparing(&client, &config, &run, status).await,

        Step::Provision => {
            let run_namespace = status
                .namespace
                .clone()
                .context("preparing run without an assigned namespace")?;
            create_run_namespace(&client, &run_namespace).await?;

            match provision_run_namespace(&client, &config, &run, &run_namespace).await {
                Ok(()) => {
                    let mut status = status;
                    advance(&mut status, State::Waiting)?;
                    patch_status(&client, &run, &status).await?;
                    Ok(ReconcileOutcome::Requeue(progress_interval()))
                }
                Err(ProvisionError::Content(message)) => {
                    enter_cleaning(&client, &run, status, RunResult::ErrorContent, Some(message), false)
                        .await
                }
                Err(ProvisionError::Config(message)) => {
                    enter_cleaning(&client, &run, status, RunResult::ErrorConfig, Some(message), false)
                        .await
                }
                Err(ProvisionError::Api(e)) => {
                    Err(anyhow::Error::from(e).context("failed to provision run namespace"))
                }
            }
        }

        Step::LaunchPod => {
            let run_namespace = status
                .namespace
                .clone()
                .context("waiting run without an assigned namespace")?;
            if pod_observation == PodObservation::NotFound {
                let pod = build_runner_pod(&run, &config, &run_namespace);
                create_runner_pod(&client, &pod).await?;
            }
            Ok(ReconcileOutcome::Requeue(progress_interval()))
        }

        Step::StartRunning => {
            let mut status = status;
            let now = Utc::now().to_rfc3339();
            status.started_at = Some(now.clone());
            status.container = container_state(pod.as_ref());
            advance(&mut status, State::Running)?;
            patch_status(&client, &run, &status).await?;
            Ok(ReconcileOutcome::Requeue(progress_interval()))
        }

        Step::WatchPod => {
            let container = container_state(pod.as_ref());
            if container != status.container {
                let mut status = status;
                status.container = container;
                patch_status(&client, &run, &status).await?;
            }
            Ok(ReconcileOutcome::Requeue(progress_interval()))
        }

        Step::EnterCleaning {
            result,
            message,
            delete_pod,
        } => {
            if delete_pod {
                if let Some(ns) = status.namespace.as_deref() {
                    delete_runner_pod(&client, ns).await?;
                }
            }
            let mut status = status;
            status.container = container_state(pod.as_ref());
            enter_cleaning(&client, &run, status, result, message, true).await
        }

        Step::Clean => {
            let gone = match status.namespace.as_deref() {
                Some(ns) => ensure_run_namespace_deleted(&client, ns).await?,
                None => true,
            };
            if gone {
                finish(&client, &run, status).await
            } else {
                Ok(ReconcileOutcome::Requeue(progress_interval()))
            }
        }

        Step::Finish => finish(&client, &run, status).await,

        Step::Rest => Ok(ReconcileOutcome::Rest),
    }
}

/// First transition: validate the spec, assign the run namespace name and
/// enter `preparing`.
async fn start_preparing(
    client: &Client,
    config: &PipelineRunsConfig,
    run: &PipelineRun,
    status: PipelineRunStatus,
) -> Result<ReconcileOutcome> {
    if let Err(message) = validate_spec(&run.spec) {
        return enter_cleaning(
            client,
            run,
            status,
            RunResult::ErrorContent,
            Some(message),
            false,
        )
        .await;
    }

    ensure_finalizer(client, run, FINALIZER_PIPELINE_RUN).await?;

    let mut status = status;
    if status.namespace.is_none() {
        let name = compose_run_namespace_name(
            &config.run_namespace_prefix,
            &run.name_any(),
            config.run_namespace_suffix_length,
        );
        status.set_namespace(&name)?;
    }
    advance(&mut status, State::Preparing)?;
    patch_status(client, run, &status).await?;
    Ok(ReconcileOutcome::Requeue(progress_interval()))
}

/// Record the terminal result and enter `cleaning`. The result is decided
/// exactly here; later passes only tear down.
async fn enter_cleaning(
    client: &Client,
    run: &PipelineRun,
    mut status: PipelineRunStatus,
    result: RunResult,
    message: Option<String>,
    container_known: bool,
) -> Result<ReconcileOutcome> {
    status.set_result(result)?;
    if let Some(message) = message {
        status.message_short = Some(message.lines().next().unwrap_or_default().to_string());
        status.message = Some(message);
    }
    if !container_known {
        status.container = None;
    }
    status.finished_at = Some(Utc::now().to_rfc3339());
    advance(&mut status, State::Cleaning)?;
    patch_status(client, run, &status).await?;

    metrics::record_result(&result.to_string());
    info!(
        run = %run.name_any(),
        result = %result,
        "Pipeline run reached terminal result"
    );
    Ok(ReconcileOutcome::Requeue(progress_interval()))
}

/// Last transition: seal the status, clear the pod reference and release
/// the finalizer. The finalizer is removed only here.
async fn finish(
    client: &Client,
    run: &PipelineRun,
    mut status: PipelineRunStatus,
) -> Result<ReconcileOutcome> {
    status.container = None;
    if status.finished_at.is_none() {
        status.finished_at = Some(Utc::now().to_rfc3339());
    }
    advance(&mut status, State::Finished)?;
    patch_status(client, run, &status).await?;
    remove_finalizer(client, run, FINALIZER_PIPELINE_RUN).await?;

    info!(run = %run.name_any(), "Pipeline run finished");
    Ok(ReconcileOutcome::Rest)
}

/// Advance the status state, recording the transition metric.
fn advance(status: &mut PipelineRunStatus, to: State) -> Result<()> {
    let from = status.state;
    status.advance_state(to, &Utc::now().to_rfc3339())?;
    metrics::record_state_transition(&from.to_string(), &to.to_string());
    Ok(())
}

/// Spec validation performed once, before anything is provisioned.
/// Violations are content errors; they terminate the run without retry.
fn validate_spec(spec: &PipelineRunSpec) -> Result<(), String> {
    if spec.jenkins_file.repo_url.trim().is_empty() {
        return Err("spec.jenkinsFile.repoUrl must not be empty".to_string());
    }
    if spec.jenkins_file.relative_path.trim().is_empty() {
        return Err("spec.jenkinsFile.relativePath must not be empty".to_string());
    }
    if spec.jenkins_file.revision.trim().is_empty() {
        return Err("spec.jenkinsFile.revision must not be empty".to_string());
    }
    Ok(())
}

/// How long the run has been in `state`, according to the status history.
fn state_elapsed(status: &PipelineRunStatus, state: State) -> Option<Duration> {
    let details = status.state_details.as_ref()?;
    if details.state != state {
        return None;
    }
    let started_at = details.started_at.as_deref()?;
    let started = DateTime::parse_from_rfc3339(started_at).ok()?;
    let elapsed = Utc::now().signed_duration_since(started);
    elapsed.to_std().ok()
}

/// Current state of the runner container, for the status summary.
fn container_state(pod: Option<&Pod>) -> Option<k8s_openapi::api::core::v1::ContainerState> {
    pod.and_then(|p| p.status.as_ref())
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|statuses| {
            statuses
                .iter()
                .find(|c| c.name == crate::constants::JFR_POD_NAME)
        })
        .and_then(|c| c.state.clone())
}

fn progress_interval() -> Duration {
    Duration::from_secs(PROGRESS_REQUEUE_DURATION_SECS)
}

async fn patch_status(client: &Client, run: &PipelineRun, status: &PipelineRunStatus) -> Result<()> {
    let namespace = run.namespace().unwrap_or_default();
    let name = run.name_any();

    // a cleared container reference must be an explicit null, otherwise the
    // merge patch keeps the previous value
    let mut status_value = serde_json::to_value(status)?;
    if status.container.is_none() {
        status_value["container"] = serde_json::Value::Null;
    }

    let api: Api<PipelineRun> = Api::namespaced(client.clone(), &namespace);
    api.patch_status(
        &name,
        &PatchParams::default(),
        &Patch::Merge(json!({ "status": status_value })),
    )
    .await
    .with_context(|| {
        format!("failed to update status of pipeline run {name:?} in namespace {namespace:?}")
    })?;
    Ok(())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
