//! Milvus and dependency version parsing.
//!
//! Accepts tags such as `2.5.3`, `v2.5.3` and `3.5.18-r1`. Only the first three
//! numeric components are significant; release suffixes are ignored.

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

/// Errors produced while parsing a version string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Invalid version format: {input} ({reason})")]
    Malformed { input: String, reason: String },
}

impl VersionError {
    fn malformed(input: &str, reason: impl Into<String>) -> Self {
        VersionError::Malformed {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// A `major.minor.patch` version. Ordering is lexicographic over the triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a version string, stripping an optional leading `v`.
    ///
    /// Components may be separated by `.`, `-` or `_`. At least three
    /// components are required and the first three must be unsigned integers.
    pub fn parse(text: &str) -> Result<Self, VersionError> {
        let trimmed = text.trim();
        let body = trimmed.strip_prefix('v').unwrap_or(trimmed);

        let parts: Vec<&str> = body
            .split(['.', '-', '_'])
            .filter(|p| !p.is_empty())
            .collect();

        if parts.len() < 3 {
            return Err(VersionError::malformed(
                text,
                "expected at least major.minor.patch",
            ));
        }

        let component = |idx: usize, name: &str| -> Result<u32, VersionError> {
            parts[idx].parse::<u32>().map_err(|_| {
                VersionError::malformed(text, format!("invalid {} version '{}'", name, parts[idx]))
            })
        };

        Ok(Self {
            major: component(0, "major")?,
            minor: component(1, "minor")?,
            patch: component(2, "patch")?,
        })
    }

    /// Lexicographic comparison over (major, minor, patch).
    pub fn compare(&self, other: &Version) -> Ordering {
        self.cmp(other)
    }

    /// True when both versions share major and minor; patch may differ.
    pub fn is_minor_equivalent(&self, other: &Version) -> bool {
        self.major == other.major && self.minor == other.minor
    }

    /// True when `self >= required` on the full triple.
    pub fn meets_minimum(&self, required: &Version) -> bool {
        *self >= *required
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
