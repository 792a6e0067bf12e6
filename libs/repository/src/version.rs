//! Version numbers.

use serde::{Deserialize, Serialize};

/// Position on the repository's commit timeline.
///
/// Every committed outer transaction gets the next number; a row version is
/// valid on the half-open interval `[valid_from, valid_to)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VersionNumber(u64);

impl VersionNumber {
    /// The version bulk-loaded rows start at.
    pub const ZERO: Self = Self(0);

    /// Upper bound of a version that has not been superseded.
    pub const INFINITY: Self = Self(u64::MAX);

    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_infinite(&self) -> bool {
        self.0 == u64::MAX
    }

    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl std::fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_infinite() {
            write!(f, "inf")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<u64> for VersionNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
