// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Jenkinsfile runner pod management.
//!
//! Constructs the pipeline pod from the `PipelineRun` spec and the cluster
//! configuration, launches it into the run namespace and interprets its
//! container state into a terminal run classification.
//!
//! # Container contract
//!
//! The runner command line is fixed up to the per-run arguments. Exit code
//! 0 means success, except when the termination message is the well-known
//! `no Jenkinsfile in current directory.` line, which is a content error.
//! Every other non-zero exit is a content error with the command line and
//! the error output preserved verbatim in the run message.

#[allow(clippy::wildcard_imports)]
use super::types::*;
use crate::constants::{JFR_COMMAND, JFR_NO_JENKINSFILE_MESSAGE, JFR_POD_NAME};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PodSpec, SecretVolumeSource, Volume, VolumeMount,
};

/// Where the repository auth secret is mounted inside the runner container.
const REPO_AUTH_MOUNT_PATH: &str = "/var/run/secrets/steward/repo-auth";

/// Full runner command line for a run: the fixed part plus
/// `--build-number <n> -f <path>`.
#[must_use]
pub fn runner_command(build_number: i32, jenkinsfile_path: &str) -> Vec<String> {
    let mut command: Vec<String> = JFR_COMMAND.iter().map(ToString::to_string).collect();
    command.push("--build-number".to_string());
    command.push(build_number.to_string());
    command.push("-f".to_string());
    command.push(jenkinsfile_path.to_string());
    command
}

/// Format the user-visible message of a failed runner invocation.
///
/// The format is part of the container contract and is preserved verbatim:
///
/// ```text
/// Command ['/app/bin/jenkinsfile-runner' '-w' ...] failed with exit code 255
/// Error output:
/// no Jenkinsfile in current directory.
/// ```
#[must_use]
pub fn format_command_failure(command: &[String], exit_code: i32, error_output: &str) -> String {
    let quoted: Vec<String> = command.iter().map(|arg| format!("'{arg}'")).collect();
    format!(
        "Command [{}] failed with exit code {exit_code}\nError output:\n{error_output}",
        quoted.join(" ")
    )
}

/// Message of a run aborted by its execution deadline.
#[must_use]
pub fn timeout_message() -> String {
    "Aborted because the maximum execution time was exceeded: timeout exceeded".to_string()
}

/// What the controller currently sees of the pipeline pod.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PodObservation {
    /// No pod with the expected name exists.
    NotFound,
    /// The pod has not been scheduled onto a node yet.
    Pending,
    /// The pod is scheduled and the container is starting or running.
    Running,
    /// The container terminated.
    Terminated {
        exit_code: i32,
        /// Container termination message; empty when the runtime provided
        /// none.
        message: String,
    },
}

/// Derive the observation from the pod object, if any.
#[must_use]
pub fn observe_pod(pod: Option<&Pod>) -> PodObservation {
    let Some(pod) = pod else {
        return PodObservation::NotFound;
    };

    let status = pod.status.as_ref();
    let terminated = status
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|statuses| {
            statuses
                .iter()
                .find(|c| c.name == JFR_POD_NAME)
                .and_then(|c| c.state.as_ref())
                .and_then(|state| state.terminated.as_ref())
        });

    if let Some(terminated) = terminated {
        return PodObservation::Terminated {
            exit_code: terminated.exit_code,
            message: terminated.message.clone().unwrap_or_default().trim_end().to_string(),
        };
    }

    match status.and_then(|s| s.phase.as_deref()) {
        Some("Pending") | None => PodObservation::Pending,
        Some("Succeeded" | "Failed") => {
            // terminal phase without container status; treated as an
            // unclassifiable termination
            PodObservation::Terminated {
                exit_code: -1,
                message: String::new(),
            }
        }
        Some(_) => PodObservation::Running,
    }
}

/// Classify a terminated runner container.
///
/// Returns the terminal result plus the user-visible message.
#[must_use]
pub fn classify_termination(
    command: &[String],
    exit_code: i32,
    message: &str,
) -> (RunResult, Option<String>) {
    if exit_code == 0 {
        if message == JFR_NO_JENKINSFILE_MESSAGE {
            return (
                RunResult::ErrorContent,
                Some(format_command_failure(command, exit_code, message)),
            );
        }
        return (RunResult::Success, None);
    }

    if exit_code < 0 {
        // pod reached a terminal phase without a usable container status
        return (
            RunResult::ErrorInfra,
            Some("pipeline pod terminated without a container status".to_string()),
        );
    }

    (
        RunResult::ErrorContent,
        Some(format_command_failure(command, exit_code, message)),
    )
}

/// Build the pipeline pod for a run.
///
/// Everything about the pod is determined by the `PipelineRun` spec plus
/// the cluster configuration: image, command line, environment, resources,
/// security context and the optional repository auth secret mount. The
/// owner reference points at the `PipelineRun` as a garbage collection
/// safety net; cleanup nevertheless deletes the namespace explicitly.
#[must_use]
pub fn build_runner_pod(
    run: &PipelineRun,
    config: &PipelineRunsConfig,
    run_namespace: &str,
) -> Pod {
    let spec = &run.spec;
    let command = runner_command(spec.build_number(), &spec.jenkins_file.relative_path);

    let mut env = vec![
        env_var("PIPELINE_GIT_URL", &spec.jenkins_file.repo_url),
        env_var("PIPELINE_GIT_REVISION", &spec.jenkins_file.revision),
        env_var("PIPELINE_FILE", &spec.jenkins_file.relative_path),
        env_var("RUN_NAMESPACE", run_namespace),
    ];

    if let Some(details) = &spec.run_details {
        if let Some(job_name) = &details.job_name {
            env.push(env_var("JOB_NAME", job_name));
        }
        if let Some(cause) = &details.cause {
            env.push(env_var("RUN_CAUSE", cause));
        }
    }

    if !spec.args.is_empty() {
        let params: serde_json::Map<String, serde_json::Value> = spec
            .args
            .iter()
            .map(|arg| (arg.name.clone(), serde_json::Value::String(arg.value.clone())))
            .collect();
        env.push(env_var(
            "PIPELINE_PARAMS_JSON",
            &serde_json::Value::Object(params).to_string(),
        ));
    }

    if let Some(elasticsearch) = spec.logging.as_ref().and_then(|l| l.elasticsearch.as_ref()) {
        if let Some(index_url) = &elasticsearch.index_url {
            env.push(env_var("PIPELINE_LOG_ELASTICSEARCH_INDEX_URL", index_url));
        }
        if let Some(run_id) = &elasticsearch.run_id {
            env.push(env_var(
                "PIPELINE_LOG_ELASTICSEARCH_RUN_ID_JSON",
                &run_id.to_string(),
            ));
        }
    }

    if let Some(java_opts) = &config.jfr_java_opts {
        env.push(env_var("JFR_JAVA_OPTS", java_opts));
    }
    if let Some(interval) = config.jfr_clone_retry_interval_secs {
        env.push(env_var(
            "PIPELINE_CLONE_RETRY_INTERVAL_SEC",
            &interval.to_string(),
        ));
    }
    if let Some(timeout) = config.jfr_clone_retry_timeout_secs {
        env.push(env_var(
            "PIPELINE_CLONE_RETRY_TIMEOUT_SEC",
            &timeout.to_string(),
        ));
    }

    let mut volumes = None;
    let mut volume_mounts = None;
    if let Some(repo_auth_secret) = &spec.jenkins_file.repo_auth_secret {
        env.push(env_var("PIPELINE_GIT_AUTH_SECRET_PATH", REPO_AUTH_MOUNT_PATH));
        volumes = Some(vec![Volume {
            name: "repo-auth".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(repo_auth_secret.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }]);
        volume_mounts = Some(vec![VolumeMount {
            name: "repo-auth".to_string(),
            mount_path: REPO_AUTH_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]);
    }

    let container = Container {
        name: JFR_POD_NAME.to_string(),
        image: Some(config.jfr_image.clone()),
        image_pull_policy: config.jfr_image_pull_policy.clone(),
        command: Some(command),
        env: Some(env),
        resources: config.jfr_resources.clone(),
        volume_mounts,
        ..Default::default()
    };

    Pod {
        metadata: ObjectMeta {
            name: Some(JFR_POD_NAME.to_string()),
            namespace: Some(run_namespace.to_string()),
            labels: Some(
                [(LABEL_SYSTEM_MANAGED.to_string(), "true".to_string())]
                    .into_iter()
                    .collect(),
            ),
            owner_references: run.metadata.uid.as_ref().map(|uid| {
                vec![OwnerReference {
                    api_version: crate::constants::API_GROUP_VERSION.to_string(),
                    kind: crate::constants::KIND_PIPELINE_RUN.to_string(),
                    name: run.name_any(),
                    uid: uid.clone(),
                    ..Default::default()
                }]
            }),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![container],
            restart_policy: Some("Never".to_string()),
            service_account_name: Some("default".to_string()),
            security_context: config.jfr_pod_security_context.clone(),
            volumes,
            ..Default::default()
        }),
        status: None,
    }
}

/// Create the pipeline pod. `AlreadyExists` is treated as adopted: the
/// same name inside the same run namespace implies a prior attempt of this
/// run.
///
/// # Errors
///
/// Returns API errors other than `AlreadyExists`.
pub async fn create_runner_pod(client: &Client, pod: &Pod) -> Result<(), kube::Error> {
    let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);

    match api.create(&PostParams::default(), pod).await {
        Ok(_) => {
            info!(namespace, "Created pipeline pod");
            Ok(())
        }
        Err(kube::Error::Api(e)) if e.code == 409 => {
            debug!(namespace, "Pipeline pod already exists, adopting");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Fetch the pipeline pod of a run, if it exists.
///
/// # Errors
///
/// Returns transient API errors.
pub async fn get_runner_pod(client: &Client, run_namespace: &str) -> Result<Option<Pod>, kube::Error> {
    let api: Api<Pod> = Api::namespaced(client.clone(), run_namespace);
    api.get_opt(JFR_POD_NAME).await
}

/// Delete the pipeline pod, ignoring `NotFound`.
///
/// # Errors
///
/// Returns API errors other than `NotFound`.
pub async fn delete_runner_pod(client: &Client, run_namespace: &str) -> Result<(), kube::Error> {
    let api: Api<Pod> = Api::namespaced(client.clone(), run_namespace);
    match api.delete(JFR_POD_NAME, &DeleteParams::default()).await {
        Ok(_) => {
            info!(namespace = run_namespace, "Deleted pipeline pod");
            Ok(())
        }
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(e),
    }
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod runner_tests;
