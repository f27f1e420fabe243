use std::ops::RangeInclusive;

use itertools::Itertools;
use tracing::debug;

use crate::{builtin, ResolveError, Result, Role, Signature};

/// Signatures valid for an inclusive range of engine versions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionProfile {
    pub min: i32,
    pub max: i32,
    pub signatures: Vec<Signature>,
}

impl VersionProfile {
    pub fn new(min: i32, max: i32, signatures: Vec<Signature>) -> Self {
        Self {
            min,
            max,
            signatures,
        }
    }

    pub fn range(&self) -> RangeInclusive<i32> {
        self.min..=self.max
    }

    pub fn contains(&self, version: i32) -> bool {
        self.range().contains(&version)
    }

    /// Signature for `role`, looked up by role regardless of list order
    pub fn signature(&self, role: Role) -> Option<&Signature> {
        self.signatures.iter().find(|s| s.role == role)
    }
}

/// Ordered set of [`VersionProfile`]s with pairwise disjoint ranges
#[derive(Debug, Clone)]
pub struct VersionRegistry {
    profiles: Vec<VersionProfile>,
}

impl VersionRegistry {
    /// Build a registry, rejecting inverted or overlapping ranges. Missing roles are not checked
    /// here; the pipeline reports them per role.
    pub fn new(profiles: Vec<VersionProfile>) -> Result<Self> {
        if let Some(p) = profiles.iter().find(|p| p.min > p.max) {
            return Err(ResolveError::InvertedRange {
                min: p.min,
                max: p.max,
            });
        }
        let overlap = profiles
            .iter()
            .sorted_by_key(|p| p.min)
            .tuple_windows()
            .find(|(a, b)| b.min <= a.max);
        if let Some((a, b)) = overlap {
            return Err(ResolveError::OverlappingProfiles {
                first: (a.min, a.max),
                second: (b.min, b.max),
            });
        }
        debug!("registry with {} profiles", profiles.len());
        Ok(Self { profiles })
    }

    /// Registry of the shipped profiles
    pub fn builtin() -> Self {
        Self {
            profiles: builtin::profiles(),
        }
    }

    pub fn profiles(&self) -> &[VersionProfile] {
        &self.profiles
    }

    /// First profile whose range contains `version`
    pub fn lookup(&self, version: i32) -> Result<&VersionProfile> {
        self.profiles
            .iter()
            .find(|p| p.contains(version))
            .ok_or(ResolveError::UnsupportedVersion(version))
    }
}
