// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use axum::{routing::get, Router};
use futures::StreamExt;
use kube::{
    runtime::{controller, controller::Action, watcher::Config, Controller},
    Api, Client, ResourceExt,
};
use kube_lease_manager::{LeaseManager, LeaseManagerBuilder};
use std::sync::Arc;
use std::time::Duration;
use steward::{
    config::ConfigStore,
    constants::{
        DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_LEASE_DURATION_SECS,
        DEFAULT_LEASE_RETRY_PERIOD_SECS, DEFAULT_SYSTEM_NAMESPACE, DEFAULT_THREADINESS,
        ERROR_REQUEUE_DURATION_SECS, KIND_PIPELINE_RUN, KIND_TENANT, METRICS_SERVER_BIND_ADDRESS,
        METRICS_SERVER_PATH, METRICS_SERVER_PORT, TOKIO_WORKER_THREADS,
    },
    crd::{PipelineRun, Tenant},
    heartbeat::{self, BeatLogLevel},
    metrics,
    reconcilers::{reconcile_pipelinerun, reconcile_tenant, ReconcileOutcome},
};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] anyhow::Error);

/// Requeue interval for resources that look healthy (5 minutes)
const REQUEUE_WHEN_READY_SECS: u64 = 300;

/// Requeue interval for resources still converging (30 seconds)
const REQUEUE_WHEN_NOT_READY_SECS: u64 = 30;

fn main() -> Result<()> {
    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("steward-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

/// Which controllers this process runs; the two cores can be deployed
/// separately via `STEWARD_CONTROLLERS=tenant|pipelinerun|all`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ControllerSelection {
    All,
    Tenant,
    PipelineRun,
}

impl ControllerSelection {
    fn from_env() -> Self {
        match std::env::var("STEWARD_CONTROLLERS")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "tenant" => Self::Tenant,
            "pipelinerun" => Self::PipelineRun,
            _ => Self::All,
        }
    }

    fn runs_tenant(self) -> bool {
        matches!(self, Self::All | Self::Tenant)
    }

    fn runs_pipelinerun(self) -> bool {
        matches!(self, Self::All | Self::PipelineRun)
    }
}

/// Initialize logging with custom format
///
/// Respects `RUST_LOG` environment variable if set; otherwise derives the
/// level from the conventional 0-5 `STEWARD_VERBOSITY` integer (default:
/// INFO). Respects `RUST_LOG_FORMAT` for output format (json or text).
fn initialize_logging() {
    let default_filter = match std::env::var("STEWARD_VERBOSITY")
        .ok()
        .and_then(|v| v.parse::<u8>().ok())
    {
        Some(0) => "error",
        Some(1) => "warn",
        Some(2) | None => "info",
        Some(3) => "debug",
        Some(_) => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    info!("Starting Steward controllers");
}

/// Start the Prometheus metrics HTTP server
///
/// Serves metrics on the configured port and path (default: 0.0.0.0:8080/metrics)
fn start_metrics_server() -> tokio::task::JoinHandle<()> {
    info!(
        bind_address = METRICS_SERVER_BIND_ADDRESS,
        port = METRICS_SERVER_PORT,
        path = METRICS_SERVER_PATH,
        "Starting Prometheus metrics HTTP server"
    );

    tokio::spawn(async move {
        async fn metrics_handler() -> String {
            match metrics::gather_metrics() {
                Ok(metrics_text) => metrics_text,
                Err(e) => {
                    error!("Failed to gather metrics: {}", e);
                    String::from("# Error gathering metrics\n")
                }
            }
        }

        let app = Router::new().route(METRICS_SERVER_PATH, get(metrics_handler));

        let bind_addr = format!("{METRICS_SERVER_BIND_ADDRESS}:{METRICS_SERVER_PORT}");
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind metrics server to {bind_addr}: {e}");
                return;
            }
        };

        info!("Metrics server listening on http://{bind_addr}{METRICS_SERVER_PATH}");

        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {e}");
        }
    })
}

/// Leader election configuration
struct LeaderElectionConfig {
    enabled: bool,
    lease_name: String,
    lease_namespace: String,
    identity: String,
    lease_duration: u64,
    retry_period: u64,
}

/// Load leader election configuration from environment variables
fn load_leader_election_config() -> LeaderElectionConfig {
    let enabled = std::env::var("STEWARD_ENABLE_LEADER_ELECTION")
        .unwrap_or_else(|_| "true".to_string())
        .parse::<bool>()
        .unwrap_or(true);

    let lease_name =
        std::env::var("STEWARD_LEASE_NAME").unwrap_or_else(|_| "steward-leader".to_string());

    let lease_namespace = std::env::var("STEWARD_LEASE_NAMESPACE")
        .or_else(|_| std::env::var("POD_NAMESPACE"))
        .unwrap_or_else(|_| DEFAULT_SYSTEM_NAMESPACE.to_string());

    let lease_duration = std::env::var("STEWARD_LEASE_DURATION_SECONDS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_LEASE_DURATION_SECS);

    let retry_period = std::env::var("STEWARD_LEASE_RETRY_PERIOD_SECONDS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_LEASE_RETRY_PERIOD_SECS);

    let identity = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("steward-{}", rand::random::<u32>()));

    LeaderElectionConfig {
        enabled,
        lease_name,
        lease_namespace,
        identity,
        lease_duration,
        retry_period,
    }
}

/// Reconcile concurrency per controller ("threadiness").
fn threadiness() -> u16 {
    std::env::var("STEWARD_THREADINESS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_THREADINESS)
}

fn heartbeat_interval() -> Duration {
    Duration::from_secs(
        std::env::var("STEWARD_HEARTBEAT_INTERVAL_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS),
    )
}

async fn async_main() -> Result<()> {
    initialize_logging();

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;

    let system_namespace =
        std::env::var("STEWARD_NAMESPACE").unwrap_or_else(|_| DEFAULT_SYSTEM_NAMESPACE.to_string());
    let config_store = Arc::new(ConfigStore::new(client.clone(), &system_namespace));

    let _metrics_handle = start_metrics_server();

    let beat_level = BeatLogLevel::from_env_value(
        &std::env::var("STEWARD_HEARTBEAT_LOG_LEVEL").unwrap_or_default(),
    );
    tokio::spawn(heartbeat::run("steward", heartbeat_interval(), beat_level));

    let selection = ControllerSelection::from_env();
    let config = load_leader_election_config();

    if config.enabled {
        info!(
            lease_name = %config.lease_name,
            lease_namespace = %config.lease_namespace,
            identity = %config.identity,
            lease_duration_secs = config.lease_duration,
            "Leader election enabled"
        );
        info!("Starting leader election, waiting to acquire leadership...");

        let lease_manager = LeaseManagerBuilder::new(client.clone(), &config.lease_name)
            .with_namespace(&config.lease_namespace)
            .with_identity(&config.identity)
            .with_duration(config.lease_duration)
            .with_grace(config.retry_period)
            .build()
            .await?;

        let (leader_rx, lease_handle) = lease_manager.watch().await;

        let mut rx = leader_rx.clone();
        while !*rx.borrow_and_update() {
            rx.changed().await?;
        }

        info!("Leadership acquired, starting controllers");

        run_controllers_with_leader_election(
            client,
            config_store,
            selection,
            leader_rx,
            lease_handle,
        )
        .await?;
    } else {
        run_controllers_without_leader_election(client, config_store, selection).await?;
    }

    Ok(())
}

/// Monitor leadership status - returns when leadership is lost or an error occurs
async fn monitor_leadership(
    mut leader_rx: tokio::sync::watch::Receiver<bool>,
) -> Result<(), anyhow::Error> {
    loop {
        leader_rx.changed().await?;
        if !*leader_rx.borrow() {
            return Ok(());
        }
    }
}

/// Wait for SIGTERM (Kubernetes sends this when deleting pods)
async fn sigterm() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        sigterm.recv().await;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Run the selected controllers without leader election, with signal handling
async fn run_controllers_without_leader_election(
    client: Client,
    config_store: Arc<ConfigStore>,
    selection: ControllerSelection,
) -> Result<()> {
    warn!("Leader election DISABLED - running without high availability");
    info!("Starting controllers with signal handling");

    let shutdown_result: Result<()> = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            result.map_err(anyhow::Error::from)
        }

        result = sigterm() => {
            info!("Received SIGTERM (pod termination), initiating graceful shutdown...");
            result
        }

        result = run_selected_controllers(client.clone(), config_store, selection) => {
            result
        }
    };

    shutdown_result?;
    info!("Graceful shutdown completed successfully");

    Ok(())
}

/// Run controllers with leader election
///
/// If leadership is lost or SIGTERM/SIGINT is received, all controllers are
/// stopped and the process exits gracefully.
async fn run_controllers_with_leader_election(
    client: Client,
    config_store: Arc<ConfigStore>,
    selection: ControllerSelection,
    leader_rx: tokio::sync::watch::Receiver<bool>,
    _lease_handle: tokio::task::JoinHandle<
        Result<LeaseManager, kube_lease_manager::LeaseManagerError>,
    >,
) -> Result<()> {
    info!("Running controllers with leader election and signal handling");

    let shutdown_result: Result<()> = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            info!("Stopping all controllers and releasing leader election lease...");
            result.map_err(anyhow::Error::from)
        }

        result = sigterm() => {
            info!("Received SIGTERM (pod termination), initiating graceful shutdown...");
            info!("Stopping all controllers and releasing leader election lease...");
            result
        }

        result = monitor_leadership(leader_rx) => {
            match result {
                Ok(()) => {
                    warn!("Leadership lost! Stopping all controllers...");
                    anyhow::bail!("Leadership lost - stepping down")
                }
                Err(e) => {
                    error!("Leadership monitor error: {:?}", e);
                    anyhow::bail!("Leadership monitoring failed: {e}")
                }
            }
        }

        result = run_selected_controllers(client, config_store, selection) => {
            result
        }
    };

    shutdown_result?;
    info!("Graceful shutdown completed successfully, leader election lease released");
    Ok(())
}

/// Run the selected controllers; none of them is expected to exit.
async fn run_selected_controllers(
    client: Client,
    config_store: Arc<ConfigStore>,
    selection: ControllerSelection,
) -> Result<()> {
    if selection.runs_pipelinerun() {
        tokio::spawn(config_store.clone().watch());
    }

    match selection {
        ControllerSelection::All => {
            tokio::select! {
                result = run_tenant_controller(client.clone()) => {
                    error!("CRITICAL: Tenant controller exited unexpectedly: {:?}", result);
                    result?;
                    anyhow::bail!("Tenant controller exited unexpectedly without error")
                }
                result = run_pipelinerun_controller(client.clone(), config_store) => {
                    error!("CRITICAL: PipelineRun controller exited unexpectedly: {:?}", result);
                    result?;
                    anyhow::bail!("PipelineRun controller exited unexpectedly without error")
                }
            }
        }
        ControllerSelection::Tenant => {
            let result = run_tenant_controller(client).await;
            error!("CRITICAL: Tenant controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Tenant controller exited unexpectedly without error")
        }
        ControllerSelection::PipelineRun => {
            let result = run_pipelinerun_controller(client, config_store).await;
            error!("CRITICAL: PipelineRun controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("PipelineRun controller exited unexpectedly without error")
        }
    }
}

/// Run the `Tenant` controller
async fn run_tenant_controller(client: Client) -> Result<()> {
    info!("Starting Tenant controller");

    let api = Api::<Tenant>::all(client.clone());

    Controller::new(api, Config::default())
        .with_config(controller::Config::default().concurrency(threadiness()))
        .run(reconcile_tenant_wrapper, error_policy_tenant, Arc::new(client))
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `PipelineRun` controller
async fn run_pipelinerun_controller(client: Client, config_store: Arc<ConfigStore>) -> Result<()> {
    info!("Starting PipelineRun controller");

    let api = Api::<PipelineRun>::all(client.clone());

    Controller::new(api, Config::default())
        .with_config(controller::Config::default().concurrency(threadiness()))
        .run(
            reconcile_pipelinerun_wrapper,
            error_policy_pipelinerun,
            Arc::new((client, config_store)),
        )
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Reconcile wrapper for `Tenant`
///
/// Adds metrics, panic recovery and the ready-dependent requeue interval
/// around the reconciler.
async fn reconcile_tenant_wrapper(
    tenant: Arc<Tenant>,
    ctx: Arc<Client>,
) -> Result<Action, ReconcileError> {
    let start = std::time::Instant::now();

    debug!(
        tenant = %tenant.name_any(),
        namespace = ?tenant.namespace(),
        "Reconcile wrapper called for Tenant"
    );

    let client = (*ctx).clone();
    let object = (*tenant).clone();
    let result = recover_panic(
        KIND_TENANT,
        tokio::spawn(reconcile_tenant(client, object)).await,
    );
    let duration = start.elapsed();

    match result {
        Ok(()) => {
            info!("Successfully reconciled Tenant: {}", tenant.name_any());
            metrics::record_reconciliation_success(KIND_TENANT, duration);

            let is_ready = tenant
                .status
                .as_ref()
                .and_then(|status| status.ready_condition())
                .is_some_and(|condition| condition.status == "True");

            if is_ready {
                Ok(Action::requeue(Duration::from_secs(REQUEUE_WHEN_READY_SECS)))
            } else {
                Ok(Action::requeue(Duration::from_secs(
                    REQUEUE_WHEN_NOT_READY_SECS,
                )))
            }
        }
        Err(e) => {
            error!("Failed to reconcile Tenant: {}", e);
            metrics::record_reconciliation_error(KIND_TENANT, duration);
            metrics::record_error(KIND_TENANT, "reconcile_error");
            Err(e.into())
        }
    }
}

/// Reconcile wrapper for `PipelineRun`
async fn reconcile_pipelinerun_wrapper(
    run: Arc<PipelineRun>,
    ctx: Arc<(Client, Arc<ConfigStore>)>,
) -> Result<Action, ReconcileError> {
    let start = std::time::Instant::now();

    let client = ctx.0.clone();
    let config_store = ctx.1.clone();
    let object = (*run).clone();
    let result = recover_panic(
        KIND_PIPELINE_RUN,
        tokio::spawn(reconcile_pipelinerun(client, config_store, object)).await,
    );
    let duration = start.elapsed();

    match result {
        Ok(outcome) => {
            debug!(
                run = %run.name_any(),
                outcome = ?outcome,
                "Successfully reconciled PipelineRun"
            );
            metrics::record_reconciliation_success(KIND_PIPELINE_RUN, duration);

            Ok(match outcome {
                ReconcileOutcome::Requeue(after) => Action::requeue(after),
                ReconcileOutcome::Rest => Action::await_change(),
            })
        }
        Err(e) => {
            error!("Failed to reconcile PipelineRun {}: {}", run.name_any(), e);
            metrics::record_reconciliation_error(KIND_PIPELINE_RUN, duration);
            metrics::record_error(KIND_PIPELINE_RUN, "reconcile_error");
            Err(e.into())
        }
    }
}

/// Convert a panicking reconcile task into a requeue-able error.
///
/// Panics in reconcilers are recovered at the worker boundary, logged with
/// the panic payload and turned into an ordinary reconcile error.
fn recover_panic<T>(
    kind: &str,
    joined: Result<anyhow::Result<T>, tokio::task::JoinError>,
) -> anyhow::Result<T> {
    match joined {
        Ok(result) => result,
        Err(join_error) => {
            metrics::record_error(kind, "panic");
            if join_error.is_panic() {
                error!("Reconciler for {kind} panicked: {join_error}");
                Err(anyhow::anyhow!("reconciler panicked: {join_error}"))
            } else {
                Err(anyhow::anyhow!("reconciler task cancelled: {join_error}"))
            }
        }
    }
}

/// Generic error policy for all controllers.
///
/// Handles reconciliation errors by requeuing the resource after a fixed
/// delay.
fn error_policy<T, C>(_resource: Arc<T>, _err: &ReconcileError, _ctx: Arc<C>) -> Action
where
    T: std::fmt::Debug,
{
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}

/// Error policy for the `Tenant` controller.
fn error_policy_tenant(
    resource: Arc<impl std::fmt::Debug>,
    err: &ReconcileError,
    ctx: Arc<Client>,
) -> Action {
    error_policy(resource, err, ctx)
}

/// Error policy for the `PipelineRun` controller.
fn error_policy_pipelinerun(
    resource: Arc<impl std::fmt::Debug>,
    err: &ReconcileError,
    ctx: Arc<(Client, Arc<ConfigStore>)>,
) -> Action {
    error_policy(resource, err, ctx)
}
