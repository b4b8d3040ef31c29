//! Dependency compatibility checks for a target Milvus version.
//!
//! Each target band requires minimum Pulsar and etcd versions. The live
//! versions are read from the in-cluster dependency values stored on the
//! Milvus resource; a version that cannot be read is confirmed by the operator.

use std::fmt;

use tracing::{debug, info, warn};

use crate::error::UpgradeError;
use crate::k8s::milvus::MilvusResource;
use crate::prompt::Confirmer;
use crate::version::Version;

/// Supporting services whose versions gate an upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    Pulsar,
    Etcd,
}

impl Dependency {
    /// Check order.
    pub const ALL: [Dependency; 2] = [Dependency::Pulsar, Dependency::Etcd];

    pub fn name(self) -> &'static str {
        match self {
            Dependency::Pulsar => "Pulsar",
            Dependency::Etcd => "Etcd",
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Minimum dependency versions for a band of target versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRequirement {
    /// Lowest `(major, minor)` in the band.
    pub from: (u32, u32),
    /// Highest `(major, minor)` in the band; open-ended when `None`.
    pub through: Option<(u32, u32)>,
    pub pulsar: Version,
    pub etcd: Version,
}

impl DependencyRequirement {
    pub fn matches(&self, target: &Version) -> bool {
        let key = (target.major, target.minor);
        key >= self.from && self.through.is_none_or(|upper| key <= upper)
    }

    pub fn required(&self, dependency: Dependency) -> Version {
        match dependency {
            Dependency::Pulsar => self.pulsar,
            Dependency::Etcd => self.etcd,
        }
    }

    /// Human-readable band, e.g. `2.2-2.4` or `2.5+`.
    pub fn band(&self) -> String {
        match self.through {
            Some((major, minor)) => {
                format!("{}.{}-{}.{}", self.from.0, self.from.1, major, minor)
            }
            None => format!("{}.{}+", self.from.0, self.from.1),
        }
    }
}

/// Ordered compatibility matrix; the first matching band wins.
pub static COMPATIBILITY_MATRIX: &[DependencyRequirement] = &[
    DependencyRequirement {
        from: (2, 2),
        through: Some((2, 4)),
        pulsar: Version::new(2, 8, 0),
        etcd: Version::new(3, 5, 0),
    },
    DependencyRequirement {
        from: (2, 5),
        through: None,
        pulsar: Version::new(3, 0, 0),
        etcd: Version::new(3, 5, 16),
    },
];

/// Look up the requirement row for `target`.
pub fn requirement_for(target: &Version) -> Result<&'static DependencyRequirement, UpgradeError> {
    COMPATIBILITY_MATRIX
        .iter()
        .find(|row| row.matches(target))
        .ok_or_else(|| UpgradeError::UnsupportedTargetVersion(target.to_string()))
}

/// Raw dependency version read from the resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyProbe {
    Known(String),
    Unknown,
}

impl fmt::Display for DependencyProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyProbe::Known(v) => f.write_str(v),
            DependencyProbe::Unknown => f.write_str("unknown"),
        }
    }
}

/// Source of live dependency versions.
pub trait DependencyProber {
    fn probe(&self, dependency: Dependency) -> DependencyProbe;
}

impl DependencyProber for MilvusResource {
    fn probe(&self, dependency: Dependency) -> DependencyProbe {
        let tag = match dependency {
            Dependency::Pulsar => &self.dependencies.pulsar,
            Dependency::Etcd => &self.dependencies.etcd,
        };
        match tag.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => DependencyProbe::Known(t.to_string()),
            _ => DependencyProbe::Unknown,
        }
    }
}

/// Outcome of comparing one probe against its minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyStatus {
    Satisfied,
    TooLow,
    Unparsable,
    Unknown,
}

impl DependencyStatus {
    pub fn is_blocking(self) -> bool {
        matches!(self, DependencyStatus::TooLow | DependencyStatus::Unparsable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCheck {
    pub dependency: Dependency,
    pub probe: DependencyProbe,
    pub required: Version,
    pub status: DependencyStatus,
}

#[derive(Debug, Clone)]
pub struct CompatibilityReport {
    pub target: Version,
    pub requirement: &'static DependencyRequirement,
    pub checks: Vec<DependencyCheck>,
}

impl CompatibilityReport {
    /// True when every dependency was read and meets its minimum.
    pub fn is_compatible(&self) -> bool {
        self.checks
            .iter()
            .all(|c| c.status == DependencyStatus::Satisfied)
    }

    pub fn has_blocking(&self) -> bool {
        self.checks.iter().any(|c| c.status.is_blocking())
    }
}

/// Probe all dependencies and compare them against the target's band.
///
/// Does not prompt; unknown versions are reported as [`DependencyStatus::Unknown`].
pub fn evaluate(
    target: &Version,
    prober: &impl DependencyProber,
) -> Result<CompatibilityReport, UpgradeError> {
    let requirement = requirement_for(target)?;
    debug!(
        "Target {} falls in band {} (Pulsar >= {}, Etcd >= {})",
        target,
        requirement.band(),
        requirement.pulsar,
        requirement.etcd
    );

    let checks = Dependency::ALL
        .iter()
        .map(|&dependency| {
            let required = requirement.required(dependency);
            let probe = prober.probe(dependency);
            let status = match &probe {
                DependencyProbe::Unknown => DependencyStatus::Unknown,
                DependencyProbe::Known(raw) => match Version::parse(raw) {
                    Ok(current) if current.meets_minimum(&required) => DependencyStatus::Satisfied,
                    Ok(_) => DependencyStatus::TooLow,
                    Err(e) => {
                        warn!(
                            "Failed to parse {} version '{}': {}, treating as incompatible",
                            dependency, raw, e
                        );
                        DependencyStatus::Unparsable
                    }
                },
            };
            info!(
                "Current {} version: {}, required version: >= {}",
                dependency, probe, required
            );
            DependencyCheck {
                dependency,
                probe,
                required,
                status,
            }
        })
        .collect();

    Ok(CompatibilityReport {
        target: *target,
        requirement,
        checks,
    })
}

/// Walk the report in check order, failing on the first incompatible
/// dependency and asking the operator about unknown ones.
pub fn enforce(report: &CompatibilityReport, confirmer: &dyn Confirmer) -> Result<(), UpgradeError> {
    for check in &report.checks {
        match check.status {
            DependencyStatus::Satisfied => {}
            DependencyStatus::TooLow | DependencyStatus::Unparsable => {
                return Err(UpgradeError::DependencyVersionTooLow {
                    dependency: check.dependency.to_string(),
                    current: check.probe.to_string(),
                    required: check.required.to_string(),
                });
            }
            DependencyStatus::Unknown => {
                let prompt = format!(
                    "{} version is unknown. Please confirm your {} version meets the requirement (>= {}). Continue with upgrade?",
                    check.dependency, check.dependency, check.required
                );
                let accepted = confirmer.confirm(&prompt).unwrap_or_else(|e| {
                    warn!(
                        "Could not read confirmation for unknown {} version: {}",
                        check.dependency, e
                    );
                    false
                });
                if !accepted {
                    return Err(UpgradeError::UserAbortedOnUnknownDependency {
                        dependency: check.dependency.to_string(),
                    });
                }
                warn!(
                    "Proceeding with unknown {} version on operator confirmation",
                    check.dependency
                );
            }
        }
    }

    info!(
        "All dependencies meet the requirements for target version {}",
        report.target
    );
    Ok(())
}

/// Evaluate and enforce in one step.
pub fn check(
    target: &Version,
    prober: &impl DependencyProber,
    confirmer: &dyn Confirmer,
) -> Result<CompatibilityReport, UpgradeError> {
    let report = evaluate(target, prober)?;
    enforce(&report, confirmer)?;
    Ok(report)
}
