//! Review-tool collaborator interface.
//!
//! The pool never talks to a review server directly; everything goes
//! through [`ReviewTool`], which keeps the orchestration testable with the
//! in-memory fake and lets internal and external review instances share one
//! code path.

use thiserror::Error;

use crate::change::{Change, ChangeData};
use crate::ident::PatchDep;

#[derive(Debug, Error)]
pub enum ReviewError {
    /// A dependency lookup matched changes on more than one branch and the
    /// caller demanded an unambiguous answer.
    #[error("query for {dep} matched changes on multiple branches")]
    NotSpecific { dep: String },

    #[error("review tool query failed: {0}")]
    Query(String),

    #[error("submit of {change} failed: {reason}")]
    Submit { change: String, reason: String },
}

pub type ReviewResult<T> = std::result::Result<T, ReviewError>;

/// Lifecycle state of a change on the review server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeStatus {
    New,
    Submitted,
    Merged,
    Abandoned,
}

impl ChangeStatus {
    /// Whether the server considers the change landed (or on its way in).
    pub fn is_landed(self) -> bool {
        matches!(self, ChangeStatus::Submitted | ChangeStatus::Merged)
    }
}

/// Synchronous interface to the review server.
///
/// `dryrun` flags on the mutating operations make a rehearsal run hit the
/// exact same code paths while leaving the server untouched.
pub trait ReviewTool {
    /// All changes currently marked ready for the commit queue.
    fn query_ready_changes(&self) -> ReviewResult<Vec<ChangeData>>;

    /// Whether a dependency target has already been committed. With
    /// `must_match` set, an ambiguous match is an error instead of `false`.
    fn is_change_committed(&self, dep: &PatchDep, must_match: bool) -> ReviewResult<bool>;

    /// Projects whose review config permits content-level (3-way) merging.
    fn find_content_merging_projects(&self) -> ReviewResult<Vec<String>>;

    fn submit_change(&self, change: &Change, dryrun: bool) -> ReviewResult<()>;

    fn change_status(&self, change: &Change) -> ReviewResult<ChangeStatus>;

    /// Strip the commit-ready marker so the change is not picked up again
    /// until the author re-marks it.
    fn remove_commit_ready(&self, change: &Change, dryrun: bool) -> ReviewResult<()>;

    fn post_comment(&self, change: &Change, message: &str, dryrun: bool) -> ReviewResult<()>;
}
