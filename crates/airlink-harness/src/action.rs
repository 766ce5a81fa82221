//! The operation a sweep runs for each combination.

use crate::changeset::ChangeSet;
use async_trait::async_trait;

/// Result of running an action on one combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The combination completed.
    Done,
    /// A lower-layer resource was unavailable; retry the same combination.
    TryAgain,
    /// Hard failure; the sweep stops here.
    Failed(String),
}

/// Work performed by a [`Sweeper`](crate::sweeper::Sweeper) per combination.
///
/// `cs` is positioned at the combination to run. Implementations that
/// make progress before returning [`ActionOutcome::TryAgain`] must resume
/// from that point on the next call for the same combination.
#[async_trait]
pub trait Action: Send + Sync {
    /// Run the action for the current combination of `cs`.
    async fn act(&self, cs: &ChangeSet) -> ActionOutcome;
}
