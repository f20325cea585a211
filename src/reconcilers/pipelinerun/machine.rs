// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The pipeline run state machine.
//!
//! `new → preparing → waiting → running → cleaning → finished`, with abort
//! and failure shortcuts. The machine is a pure function from an observed
//! snapshot to the next step; the driver in [`super`] performs the side
//! effects and status updates. Keeping the machine pure makes every
//! transition unit-testable without a cluster.
//!
//! Invariants enforced here and by the status accessors:
//! - progression is forward-only
//! - the result is decided exactly once, at the transition into `cleaning`
//! - a transient observation never shortcuts a state

#[allow(clippy::wildcard_imports)]
use super::types::*;
use super::runner::{classify_termination, timeout_message, PodObservation};

/// Snapshot of everything the machine needs to decide the next step.
#[derive(Clone, Debug)]
pub struct Observed {
    /// Current lifecycle state from status.
    pub state: State,

    /// Effective intent from the spec.
    pub intent: Intent,

    /// Current view of the pipeline pod.
    pub pod: PodObservation,

    /// How long the run has been in `waiting`.
    pub waiting_elapsed: Option<Duration>,

    /// How long the run has been in `running`.
    pub running_elapsed: Option<Duration>,

    /// Grace period for a pod stuck in Pending.
    pub pod_waiting_timeout: Duration,

    /// Effective run timeout (spec bounded by cluster max); `None` when
    /// timeouts are disabled.
    pub effective_timeout: Option<Duration>,

    /// Whether the run namespace is observed gone (only meaningful in
    /// `cleaning`).
    pub namespace_gone: bool,
}

/// The one forward move the driver should perform next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// Validate the spec, assign the run namespace name in status and move
    /// to `preparing`.
    StartPreparing,

    /// Create the run namespace and provision its content; move to
    /// `waiting` once everything is in place.
    Provision,

    /// Create the pipeline pod (idempotent) and watch for it being
    /// scheduled.
    LaunchPod,

    /// The pod is scheduled; move to `running`.
    StartRunning,

    /// Keep watching the running pod.
    WatchPod,

    /// Decide the terminal result and move to `cleaning`.
    EnterCleaning {
        result: RunResult,
        message: Option<String>,
        /// Whether the pipeline pod must be deleted (abort/timeout).
        delete_pod: bool,
    },

    /// Delete the run namespace (idempotent) and wait for it to be gone.
    Clean,

    /// Seal timestamps, remove the finalizer and move to `finished`.
    Finish,

    /// Nothing to do; rest until the next event.
    Rest,
}

/// Decide the next step for a run.
///
/// `command` is the full runner command line of this run, needed to build
/// the user-visible message when a terminated container is classified.
#[must_use]
pub fn next_step(observed: &Observed, command: &[String]) -> Step {
    match observed.state {
        State::Finished => Step::Rest,

        // cleaning is not abortable; it already leads to the end
        State::Cleaning => {
            if observed.namespace_gone {
                Step::Finish
            } else {
                Step::Clean
            }
        }

        _ if observed.intent == Intent::Abort => Step::EnterCleaning {
            result: RunResult::Aborted,
            message: Some("Aborted because it was requested by the user.".to_string()),
            delete_pod: observed.pod != PodObservation::NotFound,
        },

        State::New => Step::StartPreparing,

        State::Preparing => Step::Provision,

        State::Waiting => match &observed.pod {
            PodObservation::NotFound => Step::LaunchPod,
            PodObservation::Pending => {
                if observed
                    .waiting_elapsed
                    .is_some_and(|elapsed| elapsed > observed.pod_waiting_timeout)
                {
                    Step::EnterCleaning {
                        result: RunResult::ErrorInfra,
                        message: Some(format!(
                            "The pipeline pod could not be scheduled within {} seconds.",
                            observed.pod_waiting_timeout.as_secs()
                        )),
                        delete_pod: true,
                    }
                } else {
                    Step::LaunchPod
                }
            }
            PodObservation::Running | PodObservation::Terminated { .. } => Step::StartRunning,
        },

        State::Running => {
            if observed
                .effective_timeout
                .zip(observed.running_elapsed)
                .is_some_and(|(timeout, elapsed)| elapsed > timeout)
            {
                return Step::EnterCleaning {
                    result: RunResult::Aborted,
                    message: Some(timeout_message()),
                    delete_pod: true,
                };
            }

            match &observed.pod {
                PodObservation::Terminated { exit_code, message } => {
                    let (result, message) = classify_termination(command, *exit_code, message);
                    Step::EnterCleaning {
                        result,
                        message,
                        delete_pod: false,
                    }
                }
                PodObservation::NotFound => Step::EnterCleaning {
                    result: RunResult::ErrorInfra,
                    message: Some("The pipeline pod was deleted externally.".to_string()),
                    delete_pod: false,
                },
                PodObservation::Pending | PodObservation::Running => Step::WatchPod,
            }
        }
    }
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod machine_tests;
