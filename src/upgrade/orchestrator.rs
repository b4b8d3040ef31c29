//! Upgrade orchestration.
//!
//! Sequences version resolution, dependency checks, classification and the
//! resource mutation for a single [`UpgradeRequest`]. Dependency checks always
//! complete before the first write.

use tracing::{debug, info, warn};

use crate::error::UpgradeError;
use crate::k8s::handle::{ClusterResourceHandle, ResourceError};
use crate::k8s::milvus::MilvusResource;
use crate::prompt::Confirmer;
use crate::version::Version;

use super::UpgradeRequest;
use super::compat::{self, CompatibilityReport};
use super::mutator::{
    DEFAULT_IMAGE_REPO, MutationOutcome, MutatorSettings, ResourceMutator, split_image,
    target_image,
};
use super::plan::{self, Direction, UpgradeKind};

/// Decisions made for a request before anything is written.
#[derive(Debug, Clone)]
pub struct UpgradePlan {
    pub source: Version,
    pub target: Version,
    pub kind: UpgradeKind,
    pub direction: Direction,
    pub current_image: Option<String>,
    pub image: String,
    /// `None` when checks were skipped.
    pub compatibility: Option<CompatibilityReport>,
}

#[derive(Debug, Clone)]
pub struct UpgradeOutcome {
    pub plan: UpgradePlan,
    /// `None` for dry runs.
    pub mutation: Option<MutationOutcome>,
}

/// Read-only view of what an upgrade to a target would require.
#[derive(Debug, Clone)]
pub struct Assessment {
    pub source: Version,
    pub target: Version,
    pub kind: UpgradeKind,
    pub direction: Direction,
    pub report: CompatibilityReport,
}

pub struct UpgradeOrchestrator<'a> {
    handle: &'a dyn ClusterResourceHandle,
    confirmer: &'a dyn Confirmer,
    settings: MutatorSettings,
}

impl<'a> UpgradeOrchestrator<'a> {
    pub fn new(
        handle: &'a dyn ClusterResourceHandle,
        confirmer: &'a dyn Confirmer,
        settings: MutatorSettings,
    ) -> Self {
        Self {
            handle,
            confirmer,
            settings,
        }
    }

    pub async fn run(&self, request: &UpgradeRequest) -> Result<UpgradeOutcome, UpgradeError> {
        info!(
            "Upgrading Milvus {}/{} to {}",
            request.namespace, request.instance, request.target_version
        );
        if request.force {
            info!("Force upgrade enabled");
        }

        // Malformed input fails before the cluster is contacted.
        let target = Version::parse(&request.target_version)?;
        let explicit_source = request
            .source_version
            .as_deref()
            .map(Version::parse)
            .transpose()?;

        let live = self.fetch(&request.namespace, &request.instance).await?;

        let source = match explicit_source {
            Some(v) => v,
            None => Version::parse(detect_source_version(&live)?)?,
        };
        let direction = plan::direction(&source, &target);
        self.gate_direction(request.force, &source, &target, direction)?;

        let compatibility = if request.skip_checks {
            warn!("Skipping dependency compatibility checks");
            None
        } else {
            Some(compat::check(&target, &live, self.confirmer)?)
        };

        let kind = plan::classify(&source, &target);
        let repo = resolve_image_repo(request.image_repo.as_deref(), &live);
        let image = target_image(&repo, request.target_version.trim());
        info!(
            "Classified {} -> {} as a {} upgrade, new image {}",
            source, target, kind, image
        );

        let plan = UpgradePlan {
            source,
            target,
            kind,
            direction,
            current_image: live.components.image.clone(),
            image,
            compatibility,
        };

        if request.dry_run {
            info!("Dry run: not writing Milvus {}/{}", request.namespace, request.instance);
            return Ok(UpgradeOutcome {
                plan,
                mutation: None,
            });
        }

        let mut mutator = ResourceMutator::new(
            self.handle,
            &request.namespace,
            &request.instance,
            &self.settings,
        );
        let result = mutator.apply(plan.kind, &plan.image).await;
        debug!(
            "Mutation of Milvus {}/{} ended in phase {:?}",
            request.namespace,
            request.instance,
            mutator.phase()
        );
        let mutation = result?;

        Ok(UpgradeOutcome {
            plan,
            mutation: Some(mutation),
        })
    }

    /// Evaluate compatibility and classification without prompting or writing.
    pub async fn assess(
        &self,
        namespace: &str,
        instance: &str,
        target_version: &str,
    ) -> Result<Assessment, UpgradeError> {
        let target = Version::parse(target_version)?;
        let live = self.fetch(namespace, instance).await?;
        let source = Version::parse(detect_source_version(&live)?)?;
        let report = compat::evaluate(&target, &live)?;

        Ok(Assessment {
            source,
            target,
            kind: plan::classify(&source, &target),
            direction: plan::direction(&source, &target),
            report,
        })
    }

    fn gate_direction(
        &self,
        force: bool,
        source: &Version,
        target: &Version,
        direction: Direction,
    ) -> Result<(), UpgradeError> {
        match direction {
            Direction::Upgrade => Ok(()),
            Direction::Reapply => {
                info!(
                    "Instance already runs {}; re-applying to trigger reconciliation",
                    target
                );
                Ok(())
            }
            Direction::Downgrade if force => {
                warn!("Force enabled: downgrading from {} to {}", source, target);
                Ok(())
            }
            Direction::Downgrade => {
                let prompt = format!(
                    "Target version {} is older than current version {}. Downgrade anyway?",
                    target, source
                );
                match self.confirmer.confirm(&prompt) {
                    Ok(true) => Ok(()),
                    Ok(false) | Err(_) => Err(UpgradeError::DowngradeCancelled {
                        source_version: source.to_string(),
                        target_version: target.to_string(),
                    }),
                }
            }
        }
    }

    async fn fetch(&self, namespace: &str, instance: &str) -> Result<MilvusResource, UpgradeError> {
        self.handle
            .get(namespace, instance)
            .await
            .map_err(|e| match e {
                ResourceError::NotFound => UpgradeError::InstanceNotFound {
                    instance: instance.to_string(),
                    namespace: namespace.to_string(),
                },
                ResourceError::Conflict(msg) | ResourceError::Transport(msg) => {
                    UpgradeError::Transport(msg)
                }
            })
    }
}

/// Tag of the live `spec.components.image` reference.
pub fn detect_source_version(resource: &MilvusResource) -> Result<&str, UpgradeError> {
    let image = resource.components.image.as_deref().ok_or_else(|| {
        UpgradeError::ImageTagUnparsable("<missing spec.components.image>".to_string())
    })?;
    let (_, tag) = split_image(image)?;
    Ok(tag)
}

/// Explicit repository, else the live one, else the public Milvus image.
pub fn resolve_image_repo(explicit: Option<&str>, resource: &MilvusResource) -> String {
    if let Some(repo) = explicit.filter(|r| !r.trim().is_empty()) {
        return repo.trim().to_string();
    }
    resource
        .components
        .image
        .as_deref()
        .and_then(|image| split_image(image).ok())
        .map(|(repo, _)| repo.to_string())
        .unwrap_or_else(|| DEFAULT_IMAGE_REPO.to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;

    use super::*;
    use crate::k8s::fake::FakeMilvusHandle;
    use crate::k8s::milvus::{LOCK_ANNOTATION, RECONCILE_ANNOTATION};
    use crate::prompt::FixedAnswer;
    use crate::prompt::testing::ScriptedConfirmer;
    use crate::upgrade::compat::DependencyStatus;
    use crate::upgrade::mutator::ROLLING_UPGRADE_MODE;

    const NS: &str = "milvus";
    const NAME: &str = "my-release";

    fn resource(image: &str, pulsar: Option<&str>, etcd: Option<&str>) -> MilvusResource {
        let mut deps = serde_json::Map::new();
        if let Some(tag) = pulsar {
            deps.insert(
                "pulsar".to_string(),
                serde_json::json!({"inCluster": {"values": {"images": {"broker": {"tag": tag}}}}}),
            );
        }
        if let Some(tag) = etcd {
            deps.insert(
                "etcd".to_string(),
                serde_json::json!({"inCluster": {"values": {"image": {"tag": tag}}}}),
            );
        }
        MilvusResource::from_document(
            NAME,
            NS,
            serde_json::json!({
                "spec": {
                    "mode": "cluster",
                    "components": {"image": image},
                    "dependencies": deps
                }
            }),
        )
    }

    fn healthy(image: &str) -> MilvusResource {
        resource(image, Some("3.0.7"), Some("3.5.18-r1"))
    }

    fn settings() -> MutatorSettings {
        MutatorSettings {
            max_attempts: 3,
            retry_delay: Duration::ZERO,
            lock_holder: "orchestrator-test".to_string(),
            lock_ttl: TimeDelta::minutes(15),
        }
    }

    fn request(target: &str) -> UpgradeRequest {
        UpgradeRequest::new(NAME, NS, target)
    }

    #[tokio::test]
    async fn test_minor_upgrade_detects_source_from_image() {
        let handle = FakeMilvusHandle::with_resource(healthy("milvusdb/milvus:v2.5.3"));
        let confirmer = FixedAnswer(false);
        let orchestrator = UpgradeOrchestrator::new(&handle, &confirmer, settings());

        let outcome = orchestrator.run(&request("v2.5.9")).await.unwrap();

        assert_eq!(outcome.plan.source, Version::new(2, 5, 3));
        assert_eq!(outcome.plan.kind, UpgradeKind::Minor);
        assert_eq!(outcome.plan.image, "milvusdb/milvus:v2.5.9");
        assert!(outcome.plan.compatibility.unwrap().is_compatible());
        assert!(outcome.mutation.is_some());
        assert_eq!(handle.update_calls(), 2);

        let current = handle.current().unwrap();
        assert_eq!(
            current.components.image.as_deref(),
            Some("milvusdb/milvus:v2.5.9")
        );
        assert_eq!(current.components.image_update_mode, None);
        assert!(current.annotations.contains_key(RECONCILE_ANNOTATION));
        assert!(!current.annotations.contains_key(LOCK_ANNOTATION));
    }

    #[tokio::test]
    async fn test_major_upgrade_with_explicit_source_and_repo() {
        let handle = FakeMilvusHandle::with_resource(healthy("milvusdb/milvus:v2.4.9"));
        let confirmer = FixedAnswer(false);
        let orchestrator = UpgradeOrchestrator::new(&handle, &confirmer, settings());

        let mut req = request("2.5.0");
        req.source_version = Some("2.4.9".to_string());
        req.image_repo = Some("registry.example.com/milvus".to_string());
        let outcome = orchestrator.run(&req).await.unwrap();

        assert_eq!(outcome.plan.kind, UpgradeKind::Major);
        let current = handle.current().unwrap();
        assert_eq!(
            current.components.image.as_deref(),
            Some("registry.example.com/milvus:2.5.0")
        );
        assert_eq!(current.components.enable_rolling_update, Some(true));
        assert_eq!(
            current.components.image_update_mode.as_deref(),
            Some(ROLLING_UPGRADE_MODE)
        );
    }

    #[tokio::test]
    async fn test_unknown_dependency_declined_issues_no_update() {
        let handle = FakeMilvusHandle::with_resource(resource(
            "milvusdb/milvus:v2.5.3",
            None,
            Some("3.5.18"),
        ));
        let confirmer = ScriptedConfirmer::answering(&[false]);
        let orchestrator = UpgradeOrchestrator::new(&handle, &confirmer, settings());

        let err = orchestrator.run(&request("v2.5.9")).await.unwrap_err();

        assert!(matches!(
            err,
            UpgradeError::UserAbortedOnUnknownDependency { ref dependency } if dependency == "Pulsar"
        ));
        assert_eq!(handle.update_calls(), 0);
        assert_eq!(confirmer.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_dependency_confirmed_proceeds() {
        let handle = FakeMilvusHandle::with_resource(resource(
            "milvusdb/milvus:v2.5.3",
            Some("3.0.7"),
            None,
        ));
        let confirmer = ScriptedConfirmer::answering(&[true]);
        let orchestrator = UpgradeOrchestrator::new(&handle, &confirmer, settings());

        orchestrator.run(&request("v2.5.9")).await.unwrap();
        assert_eq!(handle.update_calls(), 2);
    }

    #[tokio::test]
    async fn test_dependency_too_low_blocks_before_any_write() {
        let handle = FakeMilvusHandle::with_resource(resource(
            "milvusdb/milvus:v2.4.9",
            Some("2.9.0"),
            Some("3.5.18"),
        ));
        let confirmer = FixedAnswer(true);
        let orchestrator = UpgradeOrchestrator::new(&handle, &confirmer, settings());

        let err = orchestrator.run(&request("2.5.0")).await.unwrap_err();
        assert!(matches!(err, UpgradeError::DependencyVersionTooLow { .. }));
        assert_eq!(handle.update_calls(), 0);
    }

    #[tokio::test]
    async fn test_skip_checks_bypasses_dependency_gate() {
        let handle = FakeMilvusHandle::with_resource(resource(
            "milvusdb/milvus:v2.4.9",
            Some("2.9.0"),
            None,
        ));
        let confirmer = ScriptedConfirmer::default();
        let orchestrator = UpgradeOrchestrator::new(&handle, &confirmer, settings());

        let mut req = request("v2.5.0");
        req.skip_checks = true;
        let outcome = orchestrator.run(&req).await.unwrap();

        assert!(outcome.plan.compatibility.is_none());
        assert!(confirmer.prompts().is_empty());
        assert_eq!(handle.update_calls(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_target_version() {
        let handle = FakeMilvusHandle::with_resource(healthy("milvusdb/milvus:v2.0.2"));
        let confirmer = FixedAnswer(true);
        let orchestrator = UpgradeOrchestrator::new(&handle, &confirmer, settings());

        let err = orchestrator.run(&request("2.1.4")).await.unwrap_err();
        assert!(matches!(err, UpgradeError::UnsupportedTargetVersion(_)));
        assert_eq!(handle.update_calls(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let handle = FakeMilvusHandle::with_resource(healthy("milvusdb/milvus:v2.4.9"));
        let confirmer = FixedAnswer(false);
        let orchestrator = UpgradeOrchestrator::new(&handle, &confirmer, settings());

        let mut req = request("v2.5.4");
        req.dry_run = true;
        let outcome = orchestrator.run(&req).await.unwrap();

        assert!(outcome.mutation.is_none());
        assert_eq!(handle.get_calls(), 1);
        assert_eq!(outcome.plan.kind, UpgradeKind::Major);
        assert_eq!(outcome.plan.image, "milvusdb/milvus:v2.5.4");
        assert_eq!(
            outcome.plan.current_image.as_deref(),
            Some("milvusdb/milvus:v2.4.9")
        );
        assert_eq!(handle.update_calls(), 0);
    }

    #[tokio::test]
    async fn test_instance_not_found() {
        let handle = FakeMilvusHandle::empty();
        let confirmer = FixedAnswer(true);
        let orchestrator = UpgradeOrchestrator::new(&handle, &confirmer, settings());

        let err = orchestrator.run(&request("2.5.9")).await.unwrap_err();
        assert!(matches!(
            err,
            UpgradeError::InstanceNotFound { ref instance, ref namespace }
                if instance == NAME && namespace == NS
        ));
    }

    #[tokio::test]
    async fn test_image_without_tag_cannot_detect_source() {
        let handle = FakeMilvusHandle::with_resource(healthy("milvusdb/milvus"));
        let confirmer = FixedAnswer(true);
        let orchestrator = UpgradeOrchestrator::new(&handle, &confirmer, settings());

        let err = orchestrator.run(&request("2.5.9")).await.unwrap_err();
        assert!(matches!(err, UpgradeError::ImageTagUnparsable(_)));
    }

    #[tokio::test]
    async fn test_malformed_target_version() {
        let handle = FakeMilvusHandle::with_resource(healthy("milvusdb/milvus:v2.5.3"));
        let confirmer = FixedAnswer(true);
        let orchestrator = UpgradeOrchestrator::new(&handle, &confirmer, settings());

        let err = orchestrator.run(&request("2.5")).await.unwrap_err();
        assert!(matches!(err, UpgradeError::Version(_)));
        assert_eq!(handle.update_calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_versions_fail_before_fetch() {
        let handle = FakeMilvusHandle::empty();
        let confirmer = FixedAnswer(true);
        let orchestrator = UpgradeOrchestrator::new(&handle, &confirmer, settings());

        let err = orchestrator.run(&request("2.5")).await.unwrap_err();
        assert!(matches!(err, UpgradeError::Version(_)));

        let mut req = request("2.5.4");
        req.source_version = Some("latest".to_string());
        let err = orchestrator.run(&req).await.unwrap_err();
        assert!(matches!(err, UpgradeError::Version(_)));

        let err = orchestrator.assess(NS, NAME, "v2").await.unwrap_err();
        assert!(matches!(err, UpgradeError::Version(_)));
        assert_eq!(handle.get_calls(), 0);
    }

    #[tokio::test]
    async fn test_downgrade_requires_confirmation() {
        let handle = FakeMilvusHandle::with_resource(healthy("milvusdb/milvus:v2.5.3"));
        let confirmer = ScriptedConfirmer::answering(&[false]);
        let orchestrator = UpgradeOrchestrator::new(&handle, &confirmer, settings());

        let err = orchestrator.run(&request("v2.5.1")).await.unwrap_err();
        assert!(matches!(err, UpgradeError::DowngradeCancelled { .. }));
        assert!(confirmer.prompts()[0].contains("older than current version 2.5.3"));
        assert_eq!(handle.update_calls(), 0);
    }

    #[tokio::test]
    async fn test_forced_downgrade_skips_confirmation() {
        let handle = FakeMilvusHandle::with_resource(healthy("milvusdb/milvus:v2.5.3"));
        let confirmer = ScriptedConfirmer::default();
        let orchestrator = UpgradeOrchestrator::new(&handle, &confirmer, settings());

        let mut req = request("v2.5.1");
        req.force = true;
        let outcome = orchestrator.run(&req).await.unwrap();

        assert_eq!(outcome.plan.direction, Direction::Downgrade);
        assert!(confirmer.prompts().is_empty());
        assert_eq!(
            handle.current().unwrap().components.image.as_deref(),
            Some("milvusdb/milvus:v2.5.1")
        );
    }

    #[tokio::test]
    async fn test_assess_reports_without_prompting() {
        let handle = FakeMilvusHandle::with_resource(resource(
            "milvusdb/milvus:v2.4.9",
            Some("2.9.0"),
            None,
        ));
        let confirmer = ScriptedConfirmer::default();
        let orchestrator = UpgradeOrchestrator::new(&handle, &confirmer, settings());

        let assessment = orchestrator.assess(NS, NAME, "2.5.0").await.unwrap();
        assert_eq!(assessment.kind, UpgradeKind::Major);
        assert_eq!(assessment.report.checks[0].status, DependencyStatus::TooLow);
        assert_eq!(assessment.report.checks[1].status, DependencyStatus::Unknown);
        assert!(confirmer.prompts().is_empty());
        assert_eq!(handle.update_calls(), 0);
    }

    #[test]
    fn test_resolve_image_repo() {
        let res = healthy("harbor.internal/ai/milvus:v2.5.3");
        assert_eq!(resolve_image_repo(None, &res), "harbor.internal/ai/milvus");
        assert_eq!(
            resolve_image_repo(Some("mirror/milvus"), &res),
            "mirror/milvus"
        );
        let odd = healthy("registry:5000/milvus:v2.5.3");
        assert_eq!(resolve_image_repo(None, &odd), DEFAULT_IMAGE_REPO);
    }
}
