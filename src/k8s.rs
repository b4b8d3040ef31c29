//! Kubernetes access: client bootstrap and the Milvus resource handle.

pub mod client;
#[cfg(test)]
pub mod fake;
pub mod handle;
pub mod milvus;
