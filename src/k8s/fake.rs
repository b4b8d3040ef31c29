//! In-memory [`ClusterResourceHandle`] for tests.
//!
//! Emulates the API server's optimistic concurrency: every accepted update
//! bumps `resourceVersion`, and an update carrying a stale one is rejected.

use std::sync::Mutex;

use async_trait::async_trait;

use super::handle::{ClusterResourceHandle, ResourceError};
use super::milvus::MilvusResource;

type ExternalWrite = Box<dyn FnOnce(&mut MilvusResource) + Send>;

#[derive(Default)]
struct FakeState {
    resource: Option<MilvusResource>,
    revision: u64,
    get_calls: usize,
    update_calls: usize,
    accepted: Vec<MilvusResource>,
    external_writes: Vec<(usize, ExternalWrite)>,
    call_failures: Vec<(usize, ResourceError)>,
    update_error: Option<ResourceError>,
}

impl FakeState {
    fn store(&mut self, resource: &MilvusResource) -> MilvusResource {
        self.revision += 1;
        let mut obj = resource.to_dynamic();
        obj.metadata.resource_version = Some(self.revision.to_string());
        let stored = MilvusResource::from_dynamic(obj);
        self.resource = Some(stored.clone());
        stored
    }
}

fn is_named(resource: &MilvusResource, namespace: &str, name: &str) -> bool {
    resource.name == name
        && resource.to_dynamic().metadata.namespace.as_deref() == Some(namespace)
}

#[derive(Default)]
pub struct FakeMilvusHandle {
    state: Mutex<FakeState>,
}

impl FakeMilvusHandle {
    /// A handle holding no resource; every `get` is `NotFound`.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_resource(resource: MilvusResource) -> Self {
        let handle = Self::default();
        handle.lock().store(&resource);
        handle
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a write by another client, applied right before update call
    /// number `call` (1-based) is evaluated.
    pub fn write_before_update(
        &self,
        call: usize,
        write: impl FnOnce(&mut MilvusResource) + Send + 'static,
    ) {
        self.lock().external_writes.push((call, Box::new(write)));
    }

    /// Fail update call number `call` (1-based) with `err`.
    pub fn fail_update_call(&self, call: usize, err: ResourceError) {
        self.lock().call_failures.push((call, err));
    }

    /// Make every subsequent update fail with `err`.
    pub fn fail_updates_with(&self, err: ResourceError) {
        self.lock().update_error = Some(err);
    }

    pub fn get_calls(&self) -> usize {
        self.lock().get_calls
    }

    pub fn update_calls(&self) -> usize {
        self.lock().update_calls
    }

    /// Updates that were accepted, in order.
    pub fn accepted_updates(&self) -> Vec<MilvusResource> {
        self.lock().accepted.clone()
    }

    pub fn current(&self) -> Option<MilvusResource> {
        self.lock().resource.clone()
    }
}

#[async_trait]
impl ClusterResourceHandle for FakeMilvusHandle {
    async fn get(&self, namespace: &str, name: &str) -> Result<MilvusResource, ResourceError> {
        let mut state = self.lock();
        state.get_calls += 1;
        state
            .resource
            .clone()
            .filter(|r| is_named(r, namespace, name))
            .ok_or(ResourceError::NotFound)
    }

    async fn update(
        &self,
        namespace: &str,
        resource: &MilvusResource,
    ) -> Result<MilvusResource, ResourceError> {
        let mut state = self.lock();
        state.update_calls += 1;
        let call = state.update_calls;

        if let Some(err) = state.update_error.clone() {
            return Err(err);
        }
        if let Some(pos) = state.call_failures.iter().position(|(n, _)| *n == call) {
            let (_, err) = state.call_failures.remove(pos);
            return Err(err);
        }

        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.external_writes)
            .into_iter()
            .partition(|(n, _)| *n == call);
        state.external_writes = pending;
        for (_, write) in due {
            if let Some(mut current) = state.resource.clone() {
                write(&mut current);
                state.store(&current);
            }
        }

        let current_version = match &state.resource {
            Some(r) if is_named(r, namespace, &resource.name) => {
                r.resource_version.clone()
            }
            _ => return Err(ResourceError::NotFound),
        };

        if current_version != resource.resource_version {
            return Err(ResourceError::Conflict(format!(
                "resourceVersion {:?} is stale (current {:?})",
                resource.resource_version, current_version
            )));
        }

        let stored = state.store(resource);
        state.accepted.push(stored.clone());
        Ok(stored)
    }
}
