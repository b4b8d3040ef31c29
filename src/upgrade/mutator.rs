//! Milvus resource mutation: fetch, annotate, patch and submit.
//!
//! The reconcile marker is written in a separate update before the version
//! patch so the Milvus operator re-observes the resource even when its own
//! change detection would skip the write. Both writes are whole-object
//! replacements of the freshest read; a conflict re-reads and retries.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::error::UpgradeError;
use crate::k8s::handle::{ClusterResourceHandle, ResourceError};
use crate::k8s::milvus::{LOCK_ANNOTATION, MilvusResource, RECONCILE_ANNOTATION};

use super::plan::UpgradeKind;

pub const DEFAULT_IMAGE_REPO: &str = "milvusdb/milvus";
pub const ROLLING_UPGRADE_MODE: &str = "rollingUpgrade";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_LOCK_TTL_MINUTES: i64 = 15;

/// Build `<repo>:<tag>`.
pub fn target_image(repo: &str, tag: &str) -> String {
    format!("{}:{}", repo, tag)
}

/// Split an image reference into repository and tag.
///
/// Only references with exactly one `:` are accepted, so registry ports and
/// digests are rejected rather than guessed at.
pub fn split_image(image: &str) -> Result<(&str, &str), UpgradeError> {
    let parts: Vec<&str> = image.split(':').collect();
    match parts.as_slice() {
        [repo, tag] if !repo.is_empty() && !tag.is_empty() => Ok((repo, tag)),
        _ => Err(UpgradeError::ImageTagUnparsable(image.to_string())),
    }
}

/// Set the fields that express an upgrade of `kind` to `image`.
pub fn apply_upgrade_patch(resource: &mut MilvusResource, kind: UpgradeKind, image: &str) {
    resource.components.image = Some(image.to_string());
    if kind == UpgradeKind::Major {
        resource.components.enable_rolling_update = Some(true);
        resource.components.image_update_mode = Some(ROLLING_UPGRADE_MODE.to_string());
    }
}

/// Ownership marker for an in-flight upgrade, stored as an annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeLock {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
}

impl UpgradeLock {
    pub fn parse(value: &str) -> Option<Self> {
        let (holder, ts) = value.rsplit_once('@')?;
        if holder.is_empty() {
            return None;
        }
        let acquired_at = DateTime::parse_from_rfc3339(ts).ok()?.with_timezone(&Utc);
        Some(Self {
            holder: holder.to_string(),
            acquired_at,
        })
    }

    pub fn to_annotation(&self) -> String {
        format!("{}@{}", self.holder, self.acquired_at.to_rfc3339())
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        now - self.acquired_at >= ttl
    }
}

/// Lock on `resource` held by someone other than `holder` and still live.
pub fn foreign_lock(
    resource: &MilvusResource,
    holder: &str,
    now: DateTime<Utc>,
    ttl: TimeDelta,
) -> Option<UpgradeLock> {
    let raw = resource.annotations.get(LOCK_ANNOTATION)?;
    let Some(lock) = UpgradeLock::parse(raw) else {
        warn!("Ignoring malformed upgrade lock annotation '{}'", raw);
        return None;
    };
    if lock.holder == holder {
        return None;
    }
    if lock.is_expired(now, ttl) {
        warn!(
            "Taking over expired upgrade lock held by {} since {}",
            lock.holder, lock.acquired_at
        );
        return None;
    }
    Some(lock)
}

/// Identity written into the lock annotation.
pub fn default_lock_holder() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "milvus-upgrade".to_string());
    format!("{}-{}", host, std::process::id())
}

#[derive(Debug, Clone)]
pub struct MutatorSettings {
    /// Attempts per write before a conflict becomes terminal.
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub lock_holder: String,
    pub lock_ttl: TimeDelta,
}

impl Default for MutatorSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(500),
            lock_holder: default_lock_holder(),
            lock_ttl: TimeDelta::minutes(DEFAULT_LOCK_TTL_MINUTES),
        }
    }
}

/// Progress of one mutation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Idle,
    Fetched,
    Annotated,
    Patched,
    Submitted,
    Done,
    Failed,
}

/// Result of a submitted mutation.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub kind: UpgradeKind,
    pub image: String,
    pub previous_image: Option<String>,
    pub resource_version: Option<String>,
    /// Attempts used by the version patch write.
    pub attempts: u32,
}

pub struct ResourceMutator<'a> {
    handle: &'a dyn ClusterResourceHandle,
    namespace: &'a str,
    instance: &'a str,
    settings: &'a MutatorSettings,
    phase: MutationPhase,
    lock_acquired: bool,
}

impl<'a> ResourceMutator<'a> {
    pub fn new(
        handle: &'a dyn ClusterResourceHandle,
        namespace: &'a str,
        instance: &'a str,
        settings: &'a MutatorSettings,
    ) -> Self {
        Self {
            handle,
            namespace,
            instance,
            settings,
            phase: MutationPhase::Idle,
            lock_acquired: false,
        }
    }

    pub fn phase(&self) -> MutationPhase {
        self.phase
    }

    /// Run the full fetch/annotate/patch/submit sequence.
    pub async fn apply(
        &mut self,
        kind: UpgradeKind,
        image: &str,
    ) -> Result<MutationOutcome, UpgradeError> {
        match self.run(kind, image).await {
            Ok(outcome) => {
                self.transition(MutationPhase::Done);
                Ok(outcome)
            }
            Err(e) => {
                self.transition(MutationPhase::Failed);
                if self.lock_acquired {
                    self.release_lock().await;
                }
                Err(e)
            }
        }
    }

    async fn run(
        &mut self,
        kind: UpgradeKind,
        image: &str,
    ) -> Result<MutationOutcome, UpgradeError> {
        let current = self.read().await?;
        self.transition(MutationPhase::Fetched);
        let previous_image = current.components.image.clone();

        self.annotate(current).await?;

        let (submitted, attempts) = self.patch_and_submit(kind, image).await?;
        info!(
            "Submitted {} upgrade of Milvus {}/{} to {} (resourceVersion: {})",
            kind,
            self.namespace,
            self.instance,
            image,
            submitted.resource_version.as_deref().unwrap_or("unknown")
        );

        Ok(MutationOutcome {
            kind,
            image: image.to_string(),
            previous_image,
            resource_version: submitted.resource_version,
            attempts,
        })
    }

    /// Stamp the reconcile marker and take the upgrade lock.
    async fn annotate(&mut self, mut resource: MilvusResource) -> Result<(), UpgradeError> {
        let mut attempt = 1;
        loop {
            self.ensure_not_locked(&resource)?;

            let lock = UpgradeLock {
                holder: self.settings.lock_holder.clone(),
                acquired_at: Utc::now(),
            };
            resource
                .annotations
                .insert(RECONCILE_ANNOTATION.to_string(), "true".to_string());
            resource
                .annotations
                .insert(LOCK_ANNOTATION.to_string(), lock.to_annotation());

            match self.handle.update(self.namespace, &resource).await {
                Ok(_) => {
                    self.lock_acquired = true;
                    self.transition(MutationPhase::Annotated);
                    return Ok(());
                }
                Err(ResourceError::Conflict(msg)) if attempt < self.settings.max_attempts => {
                    self.backoff("annotate", attempt, &msg).await;
                    attempt += 1;
                    resource = self.read().await?;
                }
                Err(e) => return Err(self.map_error(e, attempt)),
            }
        }
    }

    /// Re-read, apply the version patch, release the lock and submit.
    async fn patch_and_submit(
        &mut self,
        kind: UpgradeKind,
        image: &str,
    ) -> Result<(MilvusResource, u32), UpgradeError> {
        let mut attempt = 1;
        loop {
            // Always patch the freshest copy; the controller may have written
            // status or other fields since the annotate update.
            let mut resource = self.read().await?;
            self.ensure_not_locked(&resource)?;

            apply_upgrade_patch(&mut resource, kind, image);
            resource
                .annotations
                .insert(RECONCILE_ANNOTATION.to_string(), "true".to_string());
            resource.annotations.remove(LOCK_ANNOTATION);
            self.transition(MutationPhase::Patched);

            match self.handle.update(self.namespace, &resource).await {
                Ok(updated) => {
                    self.lock_acquired = false;
                    self.transition(MutationPhase::Submitted);
                    return Ok((updated, attempt));
                }
                Err(ResourceError::Conflict(msg)) if attempt < self.settings.max_attempts => {
                    self.backoff("patch", attempt, &msg).await;
                    attempt += 1;
                }
                Err(e) => return Err(self.map_error(e, attempt)),
            }
        }
    }

    /// Best-effort removal of our lock after a failed run.
    async fn release_lock(&mut self) {
        let mut resource = match self.read().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Could not release upgrade lock: {}", e);
                return;
            }
        };

        let ours = resource
            .annotations
            .get(LOCK_ANNOTATION)
            .and_then(|v| UpgradeLock::parse(v))
            .is_some_and(|lock| lock.holder == self.settings.lock_holder);
        if !ours {
            return;
        }

        resource.annotations.remove(LOCK_ANNOTATION);
        match self.handle.update(self.namespace, &resource).await {
            Ok(_) => {
                self.lock_acquired = false;
                debug!("Released upgrade lock on {}/{}", self.namespace, self.instance);
            }
            Err(e) => warn!(
                "Could not release upgrade lock on {}/{}: {}",
                self.namespace, self.instance, e
            ),
        }
    }

    fn ensure_not_locked(&self, resource: &MilvusResource) -> Result<(), UpgradeError> {
        match foreign_lock(
            resource,
            &self.settings.lock_holder,
            Utc::now(),
            self.settings.lock_ttl,
        ) {
            Some(lock) => Err(UpgradeError::UpgradeInProgress {
                instance: self.instance.to_string(),
                namespace: self.namespace.to_string(),
                holder: lock.holder,
            }),
            None => Ok(()),
        }
    }

    async fn read(&self) -> Result<MilvusResource, UpgradeError> {
        self.handle
            .get(self.namespace, self.instance)
            .await
            .map_err(|e| self.map_error(e, 1))
    }

    async fn backoff(&self, step: &str, attempt: u32, msg: &str) {
        warn!(
            "Conflict during {} of Milvus {}/{} (attempt {}/{}): {}, retrying with a fresh read",
            step, self.namespace, self.instance, attempt, self.settings.max_attempts, msg
        );
        tokio::time::sleep(self.settings.retry_delay).await;
    }

    fn transition(&mut self, next: MutationPhase) {
        debug!(
            "Milvus {}/{}: {:?} -> {:?}",
            self.namespace, self.instance, self.phase, next
        );
        self.phase = next;
    }

    fn map_error(&self, err: ResourceError, attempts: u32) -> UpgradeError {
        match err {
            ResourceError::NotFound => UpgradeError::InstanceNotFound {
                instance: self.instance.to_string(),
                namespace: self.namespace.to_string(),
            },
            ResourceError::Conflict(_) => UpgradeError::Conflict {
                instance: self.instance.to_string(),
                namespace: self.namespace.to_string(),
                attempts,
            },
            ResourceError::Transport(msg) => UpgradeError::Transport(msg),
        }
    }
}
