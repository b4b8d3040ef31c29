//! Upgrade classification.
//!
//! Decided fresh on every run from the source and target versions.

use std::cmp::Ordering;
use std::fmt;

use crate::version::Version;

/// How the version change is expressed on the Milvus resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeKind {
    /// Same major.minor; only the image changes.
    Minor,
    /// Crosses a major or minor boundary; rolling upgrade is enabled explicitly.
    Major,
}

impl fmt::Display for UpgradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeKind::Minor => f.write_str("minor"),
            UpgradeKind::Major => f.write_str("major"),
        }
    }
}

/// Direction of the version change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upgrade,
    Reapply,
    Downgrade,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upgrade => f.write_str("upgrade"),
            Direction::Reapply => f.write_str("re-apply"),
            Direction::Downgrade => f.write_str("downgrade"),
        }
    }
}

pub fn classify(source: &Version, target: &Version) -> UpgradeKind {
    if source.is_minor_equivalent(target) {
        UpgradeKind::Minor
    } else {
        UpgradeKind::Major
    }
}

pub fn direction(source: &Version, target: &Version) -> Direction {
    match target.compare(source) {
        Ordering::Greater => Direction::Upgrade,
        Ordering::Equal => Direction::Reapply,
        Ordering::Less => Direction::Downgrade,
    }
}
