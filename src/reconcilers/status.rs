// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition helpers for Steward resources.
//!
//! This module provides utility functions for creating and comparing the
//! knative-style conditions both CRDs carry in their status.

use crate::crd::{Condition, CONDITION_TYPE_READY};
use chrono::Utc;

/// Create a new condition with the current timestamp.
///
/// # Arguments
///
/// * `condition_type` - The type of condition (e.g., "Ready")
/// * `status` - The status: "True", "False", or "Unknown"
/// * `reason` - A programmatic identifier in `CamelCase` (e.g., "Failed")
/// * `message` - A human-readable explanation
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// Create a `Ready=True` condition without reason or message.
///
/// Transient/in-progress reasons are suppressed per the error handling
/// policy, so a healthy resource carries a bare `Ready=True`.
#[must_use]
pub fn ready_condition() -> Condition {
    Condition {
        r#type: CONDITION_TYPE_READY.to_string(),
        status: "True".to_string(),
        reason: None,
        message: None,
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// Create a `Ready=False` condition with reason and message.
#[must_use]
pub fn not_ready_condition(reason: &str, message: &str) -> Condition {
    create_condition(CONDITION_TYPE_READY, "False", reason, message)
}

/// Check whether a condition differs from the existing one.
///
/// A condition is considered changed if the type, status or message differ.
/// The `lastTransitionTime` is not compared since it changes with the
/// condition itself.
#[must_use]
pub fn condition_changed(existing: Option<&Condition>, new_condition: &Condition) -> bool {
    existing.is_none_or(|current| {
        current.r#type != new_condition.r#type
            || current.status != new_condition.status
            || current.message != new_condition.message
    })
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
