// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label, annotation and finalizer constants used across all reconcilers.
//!
//! This module defines the Steward-specific labels and annotations to ensure
//! consistency across all resources created by the controllers.

// ============================================================================
// Steward-Specific Labels
// ============================================================================

/// Label marking Namespaces, RoleBindings, Secrets and Pods created and owned
/// by the Steward controllers. Managed cleanup filters by the presence of this
/// label; its value is not significant.
pub const LABEL_SYSTEM_MANAGED: &str = "steward.sap.com/system-managed";

// ============================================================================
// Client Namespace Annotations
// ============================================================================

/// Annotation on a client namespace naming the prefix for tenant namespaces
pub const ANNOTATION_TENANT_NAMESPACE_PREFIX: &str = "steward.sap.com/tenant-namespace-prefix";

/// Annotation on a client namespace giving the length of the random suffix
/// appended to tenant namespace names (decimal, optional)
pub const ANNOTATION_TENANT_NAMESPACE_SUFFIX_LENGTH: &str =
    "steward.sap.com/tenant-namespace-suffix-length";

/// Annotation on a client namespace naming the ClusterRole to bind in tenant
/// namespaces
pub const ANNOTATION_TENANT_ROLE: &str = "steward.sap.com/tenant-role";

// ============================================================================
// Secret Annotations
// ============================================================================

/// Annotation on a declared secret requesting a different name for the copy
/// placed into the run namespace
pub const ANNOTATION_SECRET_RENAME_TO: &str = "steward.sap.com/secret-rename-to";

// ============================================================================
// Finalizers
// ============================================================================

/// Finalizer for `Tenant` resources
pub const FINALIZER_TENANT: &str = "steward.sap.com/tenant-finalizer";

/// Finalizer for `PipelineRun` resources
pub const FINALIZER_PIPELINE_RUN: &str = "steward.sap.com/pipelinerun-finalizer";
