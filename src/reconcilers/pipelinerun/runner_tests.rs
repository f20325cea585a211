// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `runner.rs`

use super::{
    build_runner_pod, classify_termination, format_command_failure, observe_pod, runner_command,
    PodObservation,
};
use crate::config::PipelineRunsConfig;
use crate::crd::{
    JenkinsFile, Logging, NameValuePair, PipelineRun, PipelineRunSpec, RunDetails, RunResult,
};
use crate::labels::LABEL_SYSTEM_MANAGED;
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateTerminated, ContainerStatus, Pod, PodStatus,
};

fn run_with_spec(spec: PipelineRunSpec) -> PipelineRun {
    let mut run = PipelineRun::new("wrong-jenkinsfile-path-1", spec);
    run.metadata.namespace = Some("client1".to_string());
    run.metadata.uid = Some("run-uid-1".to_string());
    run
}

fn simple_spec() -> PipelineRunSpec {
    PipelineRunSpec {
        jenkins_file: JenkinsFile {
            repo_url: "https://github.com/SAP-samples/stewardci-example-pipelines".to_string(),
            relative_path: "success/Jenkinsfile".to_string(),
            revision: "main".to_string(),
            repo_auth_secret: None,
        },
        ..Default::default()
    }
}

fn terminated_pod(exit_code: i32, message: Option<&str>) -> Pod {
    Pod {
        status: Some(PodStatus {
            phase: Some(if exit_code == 0 { "Succeeded" } else { "Failed" }.to_string()),
            container_statuses: Some(vec![ContainerStatus {
                name: "jenkinsfile-runner".to_string(),
                state: Some(ContainerState {
                    terminated: Some(ContainerStateTerminated {
                        exit_code,
                        message: message.map(String::from),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// ----------------------------------------------------------------------------
// Command line
// ----------------------------------------------------------------------------

#[test]
fn test_runner_command_line() {
    let command = runner_command(1, "not_existing_path/Jenkinsfile");
    assert_eq!(
        command,
        vec![
            "/app/bin/jenkinsfile-runner",
            "-w",
            "/app/jenkins",
            "-p",
            "/usr/share/jenkins/ref/plugins",
            "--runHome",
            "/jenkins_home",
            "--no-sandbox",
            "--build-number",
            "1",
            "-f",
            "not_existing_path/Jenkinsfile",
        ]
    );
}

#[test]
fn test_failure_message_format_matches_contract() {
    let command = runner_command(1, "not_existing_path/Jenkinsfile");
    let message = format_command_failure(&command, 255, "no Jenkinsfile in current directory.");

    assert_eq!(
        message,
        "Command ['/app/bin/jenkinsfile-runner' '-w' '/app/jenkins' '-p' \
         '/usr/share/jenkins/ref/plugins' '--runHome' '/jenkins_home' '--no-sandbox' \
         '--build-number' '1' '-f' 'not_existing_path/Jenkinsfile'] failed with exit code 255\n\
         Error output:\nno Jenkinsfile in current directory."
    );
}

// ----------------------------------------------------------------------------
// Pod observation
// ----------------------------------------------------------------------------

#[test]
fn test_observe_missing_pod() {
    assert_eq!(observe_pod(None), PodObservation::NotFound);
}

#[test]
fn test_observe_pending_pod() {
    let pod = Pod {
        status: Some(PodStatus {
            phase: Some("Pending".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    };
    assert_eq!(observe_pod(Some(&pod)), PodObservation::Pending);

    // no status at all counts as pending
    assert_eq!(observe_pod(Some(&Pod::default())), PodObservation::Pending);
}

#[test]
fn test_observe_running_pod() {
    let pod = Pod {
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    };
    assert_eq!(observe_pod(Some(&pod)), PodObservation::Running);
}

#[test]
fn test_observe_terminated_pod() {
    let pod = terminated_pod(255, Some("no Jenkinsfile in current directory.\n"));
    assert_eq!(
        observe_pod(Some(&pod)),
        PodObservation::Terminated {
            exit_code: 255,
            message: "no Jenkinsfile in current directory.".to_string(),
        }
    );
}

#[test]
fn test_observe_terminal_phase_without_container_status() {
    let pod = Pod {
        status: Some(PodStatus {
            phase: Some("Failed".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    };
    assert_eq!(
        observe_pod(Some(&pod)),
        PodObservation::Terminated {
            exit_code: -1,
            message: String::new(),
        }
    );
}

// ----------------------------------------------------------------------------
// Classification
// ----------------------------------------------------------------------------

#[test]
fn test_classify_success() {
    let command = runner_command(17, "success/Jenkinsfile");
    let (result, message) = classify_termination(&command, 0, "");
    assert_eq!(result, RunResult::Success);
    assert!(message.is_none());
}

#[test]
fn test_classify_wrong_jenkinsfile_path() {
    let command = runner_command(1, "not_existing_path/Jenkinsfile");
    let (result, message) =
        classify_termination(&command, 255, "no Jenkinsfile in current directory.");

    assert_eq!(result, RunResult::ErrorContent);
    assert_eq!(
        message.unwrap(),
        "Command ['/app/bin/jenkinsfile-runner' '-w' '/app/jenkins' '-p' \
         '/usr/share/jenkins/ref/plugins' '--runHome' '/jenkins_home' '--no-sandbox' \
         '--build-number' '1' '-f' 'not_existing_path/Jenkinsfile'] failed with exit code 255\n\
         Error output:\nno Jenkinsfile in current directory."
    );
}

#[test]
fn test_classify_exit_zero_with_no_jenkinsfile_message() {
    let command = runner_command(1, "Jenkinsfile");
    let (result, message) =
        classify_termination(&command, 0, "no Jenkinsfile in current directory.");

    assert_eq!(result, RunResult::ErrorContent);
    assert!(message
        .unwrap()
        .ends_with("Error output:\nno Jenkinsfile in current directory."));
}

#[test]
fn test_classify_generic_failure_preserves_stderr() {
    let command = runner_command(3, "error/Jenkinsfile");
    let (result, message) = classify_termination(&command, 1, "something broke");

    assert_eq!(result, RunResult::ErrorContent);
    assert!(message.unwrap().contains("something broke"));
}

#[test]
fn test_classify_termination_without_container_status_is_infra() {
    let command = runner_command(1, "Jenkinsfile");
    let (result, _) = classify_termination(&command, -1, "");
    assert_eq!(result, RunResult::ErrorInfra);
}

// ----------------------------------------------------------------------------
// Pod construction
// ----------------------------------------------------------------------------

#[test]
fn test_pod_spec_basics() {
    let run = run_with_spec(simple_spec());
    let config = PipelineRunsConfig {
        jfr_image: "registry.example.com/jfr:1.2.3".to_string(),
        ..Default::default()
    };

    let pod = build_runner_pod(&run, &config, "steward-run-x-1");

    assert_eq!(pod.metadata.name.as_deref(), Some("jenkinsfile-runner"));
    assert_eq!(pod.metadata.namespace.as_deref(), Some("steward-run-x-1"));
    assert!(pod
        .metadata
        .labels
        .as_ref()
        .unwrap()
        .contains_key(LABEL_SYSTEM_MANAGED));

    let owner = &pod.metadata.owner_references.as_ref().unwrap()[0];
    assert_eq!(owner.kind, "PipelineRun");
    assert_eq!(owner.name, "wrong-jenkinsfile-path-1");

    let spec = pod.spec.unwrap();
    assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
    let container = &spec.containers[0];
    assert_eq!(container.image.as_deref(), Some("registry.example.com/jfr:1.2.3"));
    assert_eq!(
        container.command.as_ref().unwrap()[0],
        "/app/bin/jenkinsfile-runner"
    );
}

#[test]
fn test_pod_env_carries_run_parameters() {
    let mut spec = simple_spec();
    spec.args = vec![
        NameValuePair {
            name: "SECRETID".to_string(),
            value: "with-secret-foo".to_string(),
        },
        NameValuePair {
            name: "EXPECTEDUSER".to_string(),
            value: "bar".to_string(),
        },
    ];
    spec.run_details = Some(RunDetails {
        job_name: Some("myJobName1".to_string()),
        cause: Some("myCause1".to_string()),
        sequence_number: 17,
    });
    spec.logging = Some(Logging {
        elasticsearch: Some(crate::crd::Elasticsearch {
            index_url: Some("https://elasticsearch.example.com/logs".to_string()),
            run_id: Some(serde_json::json!({"id": "run-1"})),
        }),
    });
    let run = run_with_spec(spec);
    let config = PipelineRunsConfig {
        jfr_java_opts: Some("-Xmx1g".to_string()),
        ..Default::default()
    };

    let pod = build_runner_pod(&run, &config, "steward-run-x-1");
    let container = &pod.spec.unwrap().containers[0];
    let env = container.env.as_ref().unwrap();
    let get = |name: &str| {
        env.iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.clone())
    };

    assert_eq!(get("JOB_NAME").as_deref(), Some("myJobName1"));
    assert_eq!(get("RUN_CAUSE").as_deref(), Some("myCause1"));
    assert_eq!(get("JFR_JAVA_OPTS").as_deref(), Some("-Xmx1g"));
    assert_eq!(get("RUN_NAMESPACE").as_deref(), Some("steward-run-x-1"));
    assert_eq!(
        get("PIPELINE_LOG_ELASTICSEARCH_INDEX_URL").as_deref(),
        Some("https://elasticsearch.example.com/logs")
    );

    let params: serde_json::Value =
        serde_json::from_str(&get("PIPELINE_PARAMS_JSON").unwrap()).unwrap();
    assert_eq!(params["SECRETID"], "with-secret-foo");
    assert_eq!(params["EXPECTEDUSER"], "bar");

    // command carries the build number from run details
    let command = container.command.as_ref().unwrap();
    let build_number_pos = command
        .iter()
        .position(|arg| arg == "--build-number")
        .unwrap();
    assert_eq!(command[build_number_pos + 1], "17");
}

#[test]
fn test_pod_mounts_repo_auth_secret() {
    let mut spec = simple_spec();
    spec.jenkins_file.repo_auth_secret = Some("repo-auth".to_string());
    let run = run_with_spec(spec);

    let pod = build_runner_pod(&run, &PipelineRunsConfig::default(), "steward-run-x-1");
    let pod_spec = pod.spec.unwrap();

    let volume = &pod_spec.volumes.as_ref().unwrap()[0];
    assert_eq!(
        volume.secret.as_ref().unwrap().secret_name.as_deref(),
        Some("repo-auth")
    );

    let mount = &pod_spec.containers[0].volume_mounts.as_ref().unwrap()[0];
    assert_eq!(mount.read_only, Some(true));
    assert_eq!(mount.mount_path, "/var/run/secrets/steward/repo-auth");
}

#[test]
fn test_pod_without_auth_secret_has_no_volumes() {
    let run = run_with_spec(simple_spec());
    let pod = build_runner_pod(&run, &PipelineRunsConfig::default(), "steward-run-x-1");
    let pod_spec = pod.spec.unwrap();
    assert!(pod_spec.volumes.is_none());
    assert!(pod_spec.containers[0].volume_mounts.is_none());
}
