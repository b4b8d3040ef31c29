//! Custom error types for milvus-upgrade.

use thiserror::Error;

use crate::version::VersionError;

/// Errors that can terminate an upgrade run.
#[derive(Error, Debug)]
pub enum UpgradeError {
    #[error(transparent)]
    Version(#[from] VersionError),

    #[error("Unsupported target version: {0}")]
    UnsupportedTargetVersion(String),

    #[error(
        "{dependency} version {current} does not meet the requirement (>= {required}); please upgrade {dependency}"
    )]
    DependencyVersionTooLow {
        dependency: String,
        current: String,
        required: String,
    },

    #[error("Upgrade aborted by user due to unknown {dependency} version")]
    UserAbortedOnUnknownDependency { dependency: String },

    #[error("Milvus instance {instance} not found in namespace {namespace}")]
    InstanceNotFound { instance: String, namespace: String },

    #[error("Invalid image reference: {0} (expected <repository>:<tag>)")]
    ImageTagUnparsable(String),

    #[error(
        "Update of Milvus {namespace}/{instance} kept conflicting with concurrent writes after {attempts} attempt(s)"
    )]
    Conflict {
        instance: String,
        namespace: String,
        attempts: u32,
    },

    #[error("Kubernetes API error: {0}")]
    Transport(String),

    #[error("Another upgrade of Milvus {namespace}/{instance} is in progress (held by {holder})")]
    UpgradeInProgress {
        instance: String,
        namespace: String,
        holder: String,
    },

    #[error("Downgrade from {source_version} to {target_version} cancelled")]
    DowngradeCancelled {
        source_version: String,
        target_version: String,
    },

    #[error("Kubeconfig error: {0}")]
    Kubeconfig(String),
}
