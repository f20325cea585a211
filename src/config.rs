// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster-scoped pipeline-runs configuration.
//!
//! The pipeline-run controller reads its configuration from two `ConfigMap`s
//! in the Steward system namespace:
//!
//! - `steward-pipelineruns` - runner image, JVM options, resource manifests,
//!   timeouts and feature flags
//! - `steward-pipelineruns-network-policies` - a catalog of named
//!   `NetworkPolicy` manifests; the special key `_default` names the profile
//!   used when a `PipelineRun` does not select one
//!
//! Values are snapshotted for the duration of one reconcile: the
//! [`ConfigStore`] hands out an `Arc` to an immutable snapshot and swaps the
//! pointer when a watch event invalidates the cache, so a mid-reconcile
//! configuration change can never split-brain a transition.

use crate::constants::{
    CONFIG_MAP_NETWORK_POLICIES, CONFIG_MAP_PIPELINE_RUNS, DEFAULT_JFR_IMAGE,
    DEFAULT_MAX_RUN_TIMEOUT_SECS, DEFAULT_POD_WAITING_TIMEOUT_SECS, DEFAULT_RUN_NAMESPACE_PREFIX,
    RUN_NAMESPACE_SUFFIX_LENGTH,
};
use k8s_openapi::api::core::v1::{ConfigMap, LimitRange, PodSecurityContext, ResourceRequirements};
use k8s_openapi::api::core::v1::ResourceQuota;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::{Api, Client};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Feature flag enabling indefinite rate-limited requeue of runs while the
/// pipeline-runs configuration is invalid. Without it, unfinished runs are
/// terminated with an infrastructure error instead.
pub const FLAG_RETRY_ON_INVALID_PIPELINE_RUNS_CONFIG: &str = "RetryOnInvalidPipelineRunsConfig";

/// Catalog key naming the default network policy profile.
const NETWORK_POLICIES_DEFAULT_KEY: &str = "_default";

/// Errors raised while loading or validating the configuration.
///
/// The distinction matters to the reconciler: [`ConfigError::Load`] is a
/// transient API problem and requeues silently, while [`ConfigError::Invalid`]
/// is operator-visible. An `Invalid` error still carries the feature flags
/// (parsed before anything else) because they decide how unfinished runs are
/// treated while the configuration is broken.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration could not be fetched from the API server.
    #[error("failed to load pipeline runs configuration: {0}")]
    Load(#[from] kube::Error),

    /// The configuration was fetched but its content is not usable.
    #[error("invalid pipeline runs configuration: {message}")]
    Invalid {
        message: String,
        feature_flags: FeatureFlags,
    },
}

impl ConfigError {
    /// Shorthand for an `Invalid` error without interesting feature flags.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            message: message.into(),
            feature_flags: FeatureFlags::default(),
        }
    }
}

/// Errors raised by the duration grammar.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DurationError {
    #[error("invalid duration {0:?}")]
    Invalid(String),

    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),

    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },

    #[error("negative duration {0:?} not allowed here")]
    Negative(String),
}

/// Parse a duration per the `Ns | Nm | Nh | N(ms|us|µs|ns)` grammar.
///
/// Numbers may be fractional, an optional sign may precede the whole value
/// and segments concatenate (`"1h30m"`). The bare string `"0"` is accepted
/// without a unit and means "no timeout". A negative total is rejected.
///
/// # Errors
///
/// Returns a [`DurationError`] for empty input, numbers without units,
/// unknown units and negative totals.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let mut s = input;
    let mut negative = false;
    if let Some(rest) = s.strip_prefix('-') {
        negative = true;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }

    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(DurationError::Invalid(input.to_string()));
    }

    let mut total_secs = 0f64;
    while !s.is_empty() {
        let number_len = s
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(s.len());
        if number_len == 0 {
            return Err(DurationError::Invalid(input.to_string()));
        }
        let number: f64 = s[..number_len]
            .parse()
            .map_err(|_| DurationError::Invalid(input.to_string()))?;
        s = &s[number_len..];

        // longest-match unit lookup; `µs` is multi-byte
        let (scale, unit_len) = if let Some(rest) = s.strip_prefix("ns") {
            (1e-9, s.len() - rest.len())
        } else if let Some(rest) = s.strip_prefix("us").or_else(|| s.strip_prefix("µs")) {
            (1e-6, s.len() - rest.len())
        } else if let Some(rest) = s.strip_prefix("ms") {
            (1e-3, s.len() - rest.len())
        } else if let Some(rest) = s.strip_prefix('s') {
            (1.0, s.len() - rest.len())
        } else if let Some(rest) = s.strip_prefix('m') {
            (60.0, s.len() - rest.len())
        } else if let Some(rest) = s.strip_prefix('h') {
            (3600.0, s.len() - rest.len())
        } else if s.is_empty() {
            return Err(DurationError::MissingUnit(input.to_string()));
        } else {
            let unit: String = s.chars().take_while(|c| c.is_alphabetic()).collect();
            return Err(DurationError::UnknownUnit {
                unit,
                input: input.to_string(),
            });
        };

        total_secs += number * scale;
        s = &s[unit_len..];
    }

    if negative && total_secs > 0.0 {
        return Err(DurationError::Negative(input.to_string()));
    }

    Ok(Duration::from_secs_f64(total_secs))
}

/// Set of enabled feature flags.
///
/// Parsed from a whitespace- or comma-separated token list. A `+` prefix or
/// a bare name enables a flag, a `-` prefix disables it, and the last
/// occurrence of a name wins. Leading, trailing and repeated separators are
/// tolerated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    enabled: BTreeSet<String>,
}

impl FeatureFlags {
    /// Parse a feature flag expression.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let mut enabled = BTreeSet::new();
        for token in input.split([' ', '\t', '\n', '\r', ',']) {
            if token.is_empty() {
                continue;
            }
            if let Some(name) = token.strip_prefix('-') {
                enabled.remove(name);
            } else {
                let name = token.strip_prefix('+').unwrap_or(token);
                if !name.is_empty() {
                    enabled.insert(name.to_string());
                }
            }
        }
        Self { enabled }
    }

    /// Whether a flag is enabled.
    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.contains(name)
    }
}

/// Immutable snapshot of the pipeline-runs configuration.
#[derive(Clone, Debug, Default)]
pub struct PipelineRunsConfig {
    /// Jenkinsfile runner image.
    pub jfr_image: String,

    /// Image pull policy for the runner container.
    pub jfr_image_pull_policy: Option<String>,

    /// JVM options handed to the runner via environment.
    pub jfr_java_opts: Option<String>,

    /// Resource requirements of the runner container.
    pub jfr_resources: Option<ResourceRequirements>,

    /// Pod-level security context of the pipeline pod.
    pub jfr_pod_security_context: Option<PodSecurityContext>,

    /// Seconds between clone retries inside the runner.
    pub jfr_clone_retry_interval_secs: Option<u32>,

    /// Total clone retry budget in seconds inside the runner.
    pub jfr_clone_retry_timeout_secs: Option<u32>,

    /// `LimitRange` applied to every run namespace.
    pub limit_range: Option<LimitRange>,

    /// Optional `ResourceQuota` applied to every run namespace.
    pub resource_quota: Option<ResourceQuota>,

    /// Prefix of run namespace names.
    pub run_namespace_prefix: String,

    /// Length of the random run namespace suffix.
    pub run_namespace_suffix_length: usize,

    /// Grace period for a pipeline pod stuck in Pending.
    pub pod_waiting_timeout: Duration,

    /// Cluster-wide maximum run duration; `Duration::ZERO` disables the
    /// timeout entirely.
    pub max_run_timeout: Duration,

    /// Name of the default network policy profile.
    pub default_network_profile: String,

    /// Catalog of network policy profiles.
    pub network_profiles: BTreeMap<String, NetworkPolicy>,

    /// `PodSecurityPolicy` the run namespace service account may use.
    pub pod_security_policy_name: Option<String>,

    /// Enabled feature flags.
    pub feature_flags: FeatureFlags,
}

impl PipelineRunsConfig {
    /// Resolve the network policy for a run.
    ///
    /// `selected` is the profile name from the run spec; the cluster default
    /// applies when it is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the requested or default
    /// profile is not in the catalog.
    pub fn network_policy_for(&self, selected: Option<&str>) -> Result<&NetworkPolicy, ConfigError> {
        let profile = selected.unwrap_or(&self.default_network_profile);
        self.network_profiles.get(profile).ok_or_else(|| {
            ConfigError::invalid(format!("network policy profile {profile:?} not configured"))
        })
    }

    /// Effective timeout of a run: the spec timeout bounded by the cluster
    /// maximum; `None` when timeouts are disabled.
    ///
    /// # Errors
    ///
    /// Returns [`DurationError`] when the spec carries an unparsable value.
    pub fn effective_timeout(&self, spec_timeout: Option<&str>) -> Result<Option<Duration>, DurationError> {
        let cluster_max = self.max_run_timeout;
        let requested = match spec_timeout {
            None | Some("") => None,
            Some(raw) => Some(parse_duration(raw)?),
        };
        Ok(match requested {
            Some(d) if d.is_zero() => {
                // "0" means no timeout, still bounded by the cluster maximum
                (!cluster_max.is_zero()).then_some(cluster_max)
            }
            Some(d) if cluster_max.is_zero() => Some(d),
            Some(d) => Some(d.min(cluster_max)),
            None => (!cluster_max.is_zero()).then_some(cluster_max),
        })
    }

    /// Build a configuration from the raw data of the two config maps.
    ///
    /// The feature flags are parsed before everything else so that an
    /// [`ConfigError::Invalid`] result still carries them.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] on malformed values.
    pub fn from_config_map_data(
        data: &BTreeMap<String, String>,
        network_policies: &BTreeMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let feature_flags =
            FeatureFlags::parse(data.get("featureFlags").map_or("", String::as_str));

        Self::parse_config_map_data(data, network_policies, feature_flags.clone()).map_err(|e| {
            match e {
                ConfigError::Invalid { message, .. } => ConfigError::Invalid {
                    message,
                    feature_flags,
                },
                other => other,
            }
        })
    }

    fn parse_config_map_data(
        data: &BTreeMap<String, String>,
        network_policies: &BTreeMap<String, String>,
        feature_flags: FeatureFlags,
    ) -> Result<Self, ConfigError> {
        let parse_opt_duration = |key: &str, default: Duration| -> Result<Duration, ConfigError> {
            match data.get(key).map(String::as_str) {
                None | Some("") => Ok(default),
                Some(raw) => parse_duration(raw)
                    .map_err(|e| ConfigError::invalid(format!("key {key:?}: {e}"))),
            }
        };
        let parse_opt_u32 = |key: &str| -> Result<Option<u32>, ConfigError> {
            data.get(key)
                .filter(|v| !v.is_empty())
                .map(|v| {
                    v.parse()
                        .map_err(|_| ConfigError::invalid(format!("key {key:?}: not a number")))
                })
                .transpose()
        };
        let parse_opt_i64 = |key: &str| -> Result<Option<i64>, ConfigError> {
            data.get(key)
                .filter(|v| !v.is_empty())
                .map(|v| {
                    v.parse()
                        .map_err(|_| ConfigError::invalid(format!("key {key:?}: not a number")))
                })
                .transpose()
        };
        fn parse_yaml<T: serde::de::DeserializeOwned>(
            key: &str,
            data: &BTreeMap<String, String>,
        ) -> Result<Option<T>, ConfigError> {
            data.get(key)
                .filter(|v| !v.trim().is_empty())
                .map(|v| {
                    serde_yaml::from_str(v)
                        .map_err(|e| ConfigError::invalid(format!("key {key:?}: {e}")))
                })
                .transpose()
        }

        let pod_security_context = {
            let run_as_user = parse_opt_i64("jenkinsfileRunner.podSecurityContext.runAsUser")?;
            let run_as_group = parse_opt_i64("jenkinsfileRunner.podSecurityContext.runAsGroup")?;
            let fs_group = parse_opt_i64("jenkinsfileRunner.podSecurityContext.fsGroup")?;
            if run_as_user.is_none() && run_as_group.is_none() && fs_group.is_none() {
                None
            } else {
                Some(PodSecurityContext {
                    run_as_user,
                    run_as_group,
                    fs_group,
                    ..Default::default()
                })
            }
        };

        let mut profiles = BTreeMap::new();
        let mut default_profile = None;
        for (name, manifest) in network_policies {
            if name == NETWORK_POLICIES_DEFAULT_KEY {
                default_profile = Some(manifest.trim().to_string());
                continue;
            }
            let policy: NetworkPolicy = serde_yaml::from_str(manifest).map_err(|e| {
                ConfigError::invalid(format!("network policy profile {name:?}: {e}"))
            })?;
            profiles.insert(name.clone(), policy);
        }
        let default_network_profile = default_profile.ok_or_else(|| {
            ConfigError::invalid(format!(
                "network policies config map lacks the {NETWORK_POLICIES_DEFAULT_KEY:?} key"
            ))
        })?;
        if !profiles.contains_key(&default_network_profile) {
            return Err(ConfigError::invalid(format!(
                "default network policy profile {default_network_profile:?} not in catalog"
            )));
        }

        let run_namespace_suffix_length = parse_opt_u32("runNamespaceSuffixLength")?
            .map_or(RUN_NAMESPACE_SUFFIX_LENGTH, |v| v as usize);

        Ok(Self {
            jfr_image: data
                .get("jenkinsfileRunner.image")
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or_else(|| DEFAULT_JFR_IMAGE.to_string()),
            jfr_image_pull_policy: data
                .get("jenkinsfileRunner.imagePullPolicy")
                .filter(|v| !v.is_empty())
                .cloned(),
            jfr_java_opts: data
                .get("jenkinsfileRunner.javaOpts")
                .filter(|v| !v.is_empty())
                .cloned(),
            jfr_resources: parse_yaml("jenkinsfileRunner.resources", data)?,
            jfr_pod_security_context: pod_security_context,
            jfr_clone_retry_interval_secs: parse_opt_u32(
                "jenkinsfileRunner.pipelineCloneRetryIntervalSec",
            )?,
            jfr_clone_retry_timeout_secs: parse_opt_u32(
                "jenkinsfileRunner.pipelineCloneRetryTimeoutSec",
            )?,
            limit_range: parse_yaml("limitRange", data)?,
            resource_quota: parse_yaml("resourceQuota", data)?,
            run_namespace_prefix: data
                .get("runNamespacePrefix")
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or_else(|| DEFAULT_RUN_NAMESPACE_PREFIX.to_string()),
            run_namespace_suffix_length,
            pod_waiting_timeout: parse_opt_duration(
                "pipelineRunPodWaitingTimeout",
                Duration::from_secs(DEFAULT_POD_WAITING_TIMEOUT_SECS),
            )?,
            max_run_timeout: parse_opt_duration(
                "timeout",
                Duration::from_secs(DEFAULT_MAX_RUN_TIMEOUT_SECS),
            )?,
            default_network_profile,
            network_profiles: profiles,
            pod_security_policy_name: data
                .get("podSecurityPolicyName")
                .filter(|v| !v.is_empty())
                .cloned(),
            feature_flags,
        })
    }
}

/// Process-wide, watch-invalidated configuration cache.
///
/// Reconcilers call [`ConfigStore::snapshot`] once per pass and work with
/// the returned `Arc` for the rest of the pass. The watcher task calls
/// [`ConfigStore::invalidate`] whenever one of the config maps changes, so
/// the next snapshot reloads from the (informer-backed) API.
pub struct ConfigStore {
    client: Client,
    namespace: String,
    cached: RwLock<Option<Arc<PipelineRunsConfig>>>,
}

impl ConfigStore {
    #[must_use]
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            cached: RwLock::new(None),
        }
    }

    /// Namespace the configuration is read from.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Take a consistent snapshot, loading from the API when the cache is
    /// cold or was invalidated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] on API failures and
    /// [`ConfigError::Invalid`] on malformed configuration.
    pub async fn snapshot(&self) -> Result<Arc<PipelineRunsConfig>, ConfigError> {
        if let Some(config) = self
            .cached
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
        {
            return Ok(config);
        }

        let config = Arc::new(self.load().await?);
        *self
            .cached
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(config.clone());
        Ok(config)
    }

    /// Drop the cached snapshot; the next [`ConfigStore::snapshot`] reloads.
    pub fn invalidate(&self) {
        self.cached
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
    }

    async fn load(&self) -> Result<PipelineRunsConfig, ConfigError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);

        let main = api.get(CONFIG_MAP_PIPELINE_RUNS).await?;
        let policies = api.get(CONFIG_MAP_NETWORK_POLICIES).await?;

        let config = PipelineRunsConfig::from_config_map_data(
            &main.data.unwrap_or_default(),
            &policies.data.unwrap_or_default(),
        )?;
        debug!(
            namespace = %self.namespace,
            profiles = config.network_profiles.len(),
            "Loaded pipeline runs configuration"
        );
        Ok(config)
    }

    /// Watch the configuration maps and invalidate the cache on changes.
    ///
    /// Runs until the watch stream ends; intended to be spawned once at
    /// startup.
    pub async fn watch(self: Arc<Self>) {
        use futures::StreamExt;
        use kube::runtime::{watcher, WatchStreamExt};

        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);

        info!(namespace = %self.namespace, "Watching pipeline runs configuration");
        let mut stream = Box::pin(watcher(api, watcher::Config::default()).touched_objects());
        while let Some(event) = stream.next().await {
            match event {
                Ok(config_map) => {
                    let name = config_map.metadata.name.as_deref().unwrap_or_default();
                    if name == CONFIG_MAP_PIPELINE_RUNS || name == CONFIG_MAP_NETWORK_POLICIES {
                        debug!(config_map = name, "Configuration changed, dropping snapshot");
                        self.invalidate();
                    }
                }
                Err(e) => {
                    warn!("Configuration watch error: {e}");
                    self.invalidate();
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
