//! Milvus upgrade engine.
//!
//! - Dependency compatibility checks against the target version band
//! - Minor/major classification
//! - Annotate-then-patch mutation of the Milvus resource

pub mod compat;
pub mod mutator;
pub mod orchestrator;
pub mod plan;

/// One upgrade invocation, fixed before the run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub instance: String,
    pub namespace: String,
    /// Detected from the live image tag when `None`.
    pub source_version: Option<String>,
    pub target_version: String,
    /// Repository for the new image; derived from the live image when `None`.
    pub image_repo: Option<String>,
    /// Skip destructive-change confirmations.
    pub force: bool,
    pub skip_checks: bool,
    /// Compute the patch without writing it.
    pub dry_run: bool,
}

impl UpgradeRequest {
    pub fn new(instance: &str, namespace: &str, target_version: &str) -> Self {
        Self {
            instance: instance.to_string(),
            namespace: namespace.to_string(),
            source_version: None,
            target_version: target_version.to_string(),
            image_repo: None,
            force: false,
            skip_checks: false,
            dry_run: false,
        }
    }
}
