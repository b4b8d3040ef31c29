//! Abstract access to the managed Milvus resource.
//!
//! The upgrade engine only needs to read and conditionally replace a single
//! namespaced object; everything else about the API server stays behind this
//! trait so the engine can be driven by an in-memory fake in tests.

use async_trait::async_trait;
use thiserror::Error;

use super::milvus::MilvusResource;

/// Outcomes of a resource call that are not a successful read or write.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("resource not found")]
    NotFound,

    /// The update was based on a stale `resourceVersion`.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0}")]
    Transport(String),
}

/// Get/update capability for a named Milvus resource in a namespace.
#[async_trait]
pub trait ClusterResourceHandle: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<MilvusResource, ResourceError>;

    /// Replace the whole object. Must be rejected with
    /// [`ResourceError::Conflict`] when `resource` is stale.
    async fn update(
        &self,
        namespace: &str,
        resource: &MilvusResource,
    ) -> Result<MilvusResource, ResourceError>;
}
