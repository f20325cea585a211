// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `status.rs`

use super::{condition_changed, create_condition, not_ready_condition, ready_condition};
use crate::crd::{REASON_DEPENDENT_RESOURCE_STATE, REASON_FAILED};

#[test]
fn test_create_condition_sets_all_fields() {
    let condition = create_condition(
        "Ready",
        "False",
        REASON_FAILED,
        "Failed to create a new tenant namespace.",
    );

    assert_eq!(condition.r#type, "Ready");
    assert_eq!(condition.status, "False");
    assert_eq!(condition.reason.as_deref(), Some(REASON_FAILED));
    assert_eq!(
        condition.message.as_deref(),
        Some("Failed to create a new tenant namespace.")
    );
    assert!(condition.last_transition_time.is_some());
}

#[test]
fn test_ready_condition_suppresses_reason() {
    let condition = ready_condition();
    assert_eq!(condition.r#type, "Ready");
    assert_eq!(condition.status, "True");
    assert!(condition.reason.is_none());
    assert!(condition.message.is_none());
}

#[test]
fn test_not_ready_condition() {
    let condition = not_ready_condition(
        REASON_DEPENDENT_RESOURCE_STATE,
        "The tenant namespace \"somename1\" does not exist anymore.",
    );
    assert_eq!(condition.status, "False");
    assert_eq!(
        condition.reason.as_deref(),
        Some(REASON_DEPENDENT_RESOURCE_STATE)
    );
}

#[test]
fn test_condition_changed() {
    let current = ready_condition();

    // no existing condition counts as changed
    assert!(condition_changed(None, &current));

    // identical type/status/message is unchanged
    assert!(!condition_changed(Some(&current), &ready_condition()));

    // status flip is a change
    let failed = not_ready_condition(REASON_FAILED, "boom");
    assert!(condition_changed(Some(&current), &failed));

    // message change alone is a change
    let other_message = not_ready_condition(REASON_FAILED, "different");
    assert!(condition_changed(Some(&failed), &other_message));
}
