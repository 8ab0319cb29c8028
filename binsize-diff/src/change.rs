use crate::DiffError;
use crate::error::Result;

/// One side or both sides of something being diffed. There's no way to represent neither side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change<T> {
    /// Only present in the after binary.
    Added(T),

    /// Only present in the before binary.
    Removed(T),

    /// Present in both. The two may or may not differ.
    Changed { before: T, after: T },
}

impl<T: Copy> Change<T> {
    /// Fails with `DiffError::InvalidArguments` if both sides are absent. `what` names the kind of
    /// thing being diffed for the error message.
    pub fn from_options(before: Option<T>, after: Option<T>, what: &str) -> Result<Self> {
        match (before, after) {
            (Some(before), Some(after)) => Ok(Change::Changed { before, after }),
            (Some(before), None) => Ok(Change::Removed(before)),
            (None, Some(after)) => Ok(Change::Added(after)),
            (None, None) => Err(DiffError::InvalidArguments(format!(
                "Both before and after {what} are absent"
            ))
            .into()),
        }
    }

    #[must_use]
    pub fn before(&self) -> Option<T> {
        match *self {
            Change::Removed(before) | Change::Changed { before, .. } => Some(before),
            Change::Added(_) => None,
        }
    }

    #[must_use]
    pub fn after(&self) -> Option<T> {
        match *self {
            Change::Added(after) | Change::Changed { after, .. } => Some(after),
            Change::Removed(_) => None,
        }
    }

    /// The before side if present, otherwise the after side.
    #[must_use]
    pub fn either(&self) -> T {
        match *self {
            Change::Removed(before) | Change::Changed { before, .. } => before,
            Change::Added(after) => after,
        }
    }

    /// The after side if present, otherwise the before side.
    #[must_use]
    pub fn latest(&self) -> T {
        match *self {
            Change::Added(after) | Change::Changed { after, .. } => after,
            Change::Removed(before) => before,
        }
    }

    /// `after - before`, treating an absent side as zero.
    pub fn delta(&self, mut f: impl FnMut(T) -> u64) -> i64 {
        let before = self.before().map_or(0, &mut f);
        let after = self.after().map_or(0, &mut f);
        after as i64 - before as i64
    }

    #[must_use]
    pub fn is_changed(&self) -> bool {
        matches!(self, Change::Changed { .. })
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Change::Added(_) => "added",
            Change::Removed(_) => "removed",
            Change::Changed { .. } => "changed",
        }
    }
}
