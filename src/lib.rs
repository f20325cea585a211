// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # Steward - Multi-Tenant Pipeline Execution for Kubernetes
//!
//! Steward is a Kubernetes controller suite that turns declarative
//! `PipelineRun` resources into isolated, short-lived execution
//! environments running a Jenkinsfile-based build, and manages per-tenant
//! namespaces via `Tenant` resources.
//!
//! ## Overview
//!
//! This library provides the core functionality of the Steward controllers:
//!
//! - Custom Resource Definitions for tenants and pipeline runs
//! - The tenant reconciler: namespace provisioning, role binding
//!   synchronization, finalizer-driven cleanup
//! - The pipeline run reconciler: a state machine driving each run through
//!   preparation, execution, result collection, cleanup and finalization
//! - Secret materialization into per-run namespaces, including renames
//! - Network policy, limit range and resource quota enforcement per run
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types
//! - [`config`] - pipeline-runs configuration loading and snapshots
//! - [`reconcilers`] - reconciliation logic for each resource type
//! - [`metrics`] - Prometheus metrics
//! - [`heartbeat`] - controller liveness heartbeat
//!
//! ## Example
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

pub mod config;
pub mod constants;
pub mod crd;
pub mod heartbeat;
pub mod labels;
pub mod metrics;
pub mod reconcilers;
