// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the pipeline run driver helpers.

use super::{state_elapsed, validate_spec};
use crate::crd::{JenkinsFile, PipelineRunSpec, PipelineRunStatus, State};
use chrono::{Duration as ChronoDuration, Utc};

fn valid_spec() -> PipelineRunSpec {
    PipelineRunSpec {
        jenkins_file: JenkinsFile {
            repo_url: "https://github.com/example/pipelines".to_string(),
            relative_path: "success/Jenkinsfile".to_string(),
            revision: "main".to_string(),
            repo_auth_secret: None,
        },
        ..Default::default()
    }
}

#[test]
fn test_validate_spec_accepts_complete_jenkinsfile_ref() {
    assert!(validate_spec(&valid_spec()).is_ok());
}

#[test]
fn test_validate_spec_rejects_missing_fields() {
    let mut spec = valid_spec();
    spec.jenkins_file.repo_url = String::new();
    assert!(validate_spec(&spec).unwrap_err().contains("repoUrl"));

    let mut spec = valid_spec();
    spec.jenkins_file.relative_path = "  ".to_string();
    assert!(validate_spec(&spec).unwrap_err().contains("relativePath"));

    let mut spec = valid_spec();
    spec.jenkins_file.revision = String::new();
    assert!(validate_spec(&spec).unwrap_err().contains("revision"));
}

#[test]
fn test_state_elapsed_measures_current_state() {
    let mut status = PipelineRunStatus::default();
    let two_minutes_ago = (Utc::now() - ChronoDuration::minutes(2)).to_rfc3339();
    status.advance_state(State::Preparing, &two_minutes_ago).unwrap();
    status.advance_state(State::Waiting, &two_minutes_ago).unwrap();
    status.advance_state(State::Running, &two_minutes_ago).unwrap();

    let elapsed = state_elapsed(&status, State::Running).unwrap();
    assert!(elapsed.as_secs() >= 119, "elapsed {elapsed:?}");

    // querying a state the run is no longer in yields nothing
    assert!(state_elapsed(&status, State::Waiting).is_none());
}

#[test]
fn test_state_elapsed_without_timestamps() {
    let status = PipelineRunStatus::default();
    assert!(state_elapsed(&status, State::Running).is_none());
}
