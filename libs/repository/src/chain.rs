//! Per-object version history.

use crate::record::Row;
use crate::version::VersionNumber;

/// One immutable version of an object.
#[derive(Debug, Clone, PartialEq)]
pub struct Version<R> {
    pub valid_from: VersionNumber,
    pub valid_to: VersionNumber,
    pub row: Row<R>,
}

impl<R> Version<R> {
    /// True when a reader at `at` sees this version.
    pub fn contains(&self, at: VersionNumber) -> bool {
        self.valid_from <= at && at < self.valid_to
    }

    pub fn is_current(&self) -> bool {
        self.valid_to.is_infinite()
    }
}

/// Append-only sequence of versions for one id.
///
/// Versions are ordered by `valid_from`, each one starting where the previous
/// one ended. At most the last version is open (`valid_to = INFINITY`); a
/// deleted object has none open.
#[derive(Debug, Clone)]
pub struct VersionChain<R> {
    versions: Vec<Version<R>>,
}

impl<R: Clone> VersionChain<R> {
    pub(crate) fn new(row: Row<R>, valid_from: VersionNumber, valid_to: VersionNumber) -> Self {
        Self {
            versions: vec![Version {
                valid_from,
                valid_to,
                row,
            }],
        }
    }

    pub fn versions(&self) -> &[Version<R>] {
        &self.versions
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// The version visible at `at`. Recent versions are checked first since
    /// almost every read is at or near the latest snapshot.
    pub fn at(&self, at: VersionNumber) -> Option<&Version<R>> {
        self.versions.iter().rev().find(|v| v.contains(at))
    }

    pub fn current(&self) -> Option<&Version<R>> {
        self.versions.last().filter(|v| v.is_current())
    }

    /// Closes the current version at `at` and, for an update, appends the
    /// replacement starting at the same number. Returns the superseded row.
    pub(crate) fn supersede(&mut self, at: VersionNumber, next: Option<Row<R>>) -> Option<Row<R>> {
        let previous = match self.versions.last_mut() {
            Some(last) if last.is_current() => {
                last.valid_to = at;
                Some(last.row.clone())
            }
            _ => None,
        };
        if let Some(row) = next {
            self.versions.push(Version {
                valid_from: at,
                valid_to: VersionNumber::INFINITY,
                row,
            });
        }
        previous
    }

    /// Drops versions that closed at or below `floor`. Returns how many.
    pub(crate) fn prune(&mut self, floor: VersionNumber) -> usize {
        let before = self.versions.len();
        self.versions.retain(|v| v.valid_to > floor);
        before - self.versions.len()
    }

    /// Checks that the stored intervals are non-empty, contiguous and that
    /// only the last one may be open.
    pub fn is_partitioned(&self) -> bool {
        let well_formed = self.versions.iter().all(|v| v.valid_from < v.valid_to);
        let contiguous = self
            .versions
            .windows(2)
            .all(|pair| pair[0].valid_to == pair[1].valid_from);
        let open = self.versions.iter().filter(|v| v.is_current()).count();
        let open_is_last = open == 0 || self.current().is_some();
        well_formed && contiguous && open <= 1 && open_is_last
    }
}
