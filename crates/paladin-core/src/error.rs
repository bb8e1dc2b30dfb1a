//! Error taxonomy for patch parsing and application.
//!
//! The two application-failure kinds stay distinguishable end to end: a
//! conflict with another in-flight change resolves itself on the next run,
//! while a tip-of-tree conflict needs the author to rebase. The
//! [`PatchError::short_explanation`] text is what ends up in the review
//! comment, so it carries the prescriptive next step.

use thiserror::Error;

use crate::git::GitError;

/// Errors attributable to a single change while extracting its dependencies
/// or applying it into the checkout.
#[derive(Debug, Error)]
pub enum PatchError {
    /// The cherry-pick conflicted. `inflight` distinguishes "conflicted with
    /// the current patch series" from "no longer applies against ToT".
    #[error("conflicted with {} ({} files)", conflict_target(.inflight), .files.len())]
    ApplyConflict {
        inflight: bool,
        trivial: bool,
        files: Vec<String>,
    },

    /// A pending ancestor commit carries no Change-Id footer at all.
    #[error("ancestor commit {sha1} has no Change-Id in its commit message")]
    MissingChangeId { sha1: String },

    /// A Change-Id footer exists but is not in the strict review-tool form.
    #[error("broken Change-Id: {text}")]
    BrokenChangeId { text: String },

    /// A `CQ-DEPEND` line contains a token that is neither a Change-Id nor
    /// a review number.
    #[error("malformed CQ-DEPEND target {text}: {detail}")]
    BrokenCqDepends { text: String, detail: String },

    /// A declared dependency is neither in the pool nor already committed.
    #[error("depends on {dep}, which is not ready or not in the pool")]
    DependencyNotReady { dep: String },

    /// A declared dependency matched changes on more than one branch.
    #[error("depends on {dep}, which matches changes on multiple branches")]
    AmbiguousDependency { dep: String },

    /// The change's project/branch has no checkout in the current manifest.
    #[error("project {project} could not be found in the manifest")]
    NotInManifest { project: String },

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("internal commit-queue error: {0}")]
    Internal(String),
}

impl PatchError {
    /// Whether this failure conflicts only with the current patch series.
    /// Such changes are held over and retried on the next run without
    /// developer action.
    pub fn is_inflight(&self) -> bool {
        matches!(self, PatchError::ApplyConflict { inflight: true, .. })
    }

    /// A sentence fragment suitable after "Your change ...", carrying the
    /// next step the author should take.
    pub fn short_explanation(&self) -> String {
        match self {
            PatchError::ApplyConflict {
                inflight: true,
                files,
                ..
            } => {
                let mut s = String::from(
                    "conflicted with other change(s) being tested in this run. \
                     If those changes do not pass, yours will be retried \
                     automatically on the next run.",
                );
                push_file_list(&mut s, files);
                s
            }
            PatchError::ApplyConflict {
                inflight: false,
                trivial,
                files,
            } => {
                let mut s = String::from(
                    "no longer cleanly applies against tip-of-tree. \
                     Please rebase your change and re-mark it as ready.",
                );
                if *trivial {
                    s.push_str(" File content merging is disabled for this project.");
                }
                push_file_list(&mut s, files);
                s
            }
            PatchError::MissingChangeId { sha1 } => format!(
                "depends on ancestor commit {sha1}, which has no Change-Id. \
                 Please add a Change-Id footer to that commit."
            ),
            PatchError::BrokenChangeId { text } => format!(
                "has a broken Change-Id: {text}. Please fix the Change-Id \
                 footer in your commit message."
            ),
            PatchError::BrokenCqDepends { text, detail } => {
                format!("has a malformed CQ-DEPEND target: {text} ({detail})")
            }
            PatchError::DependencyNotReady { dep } => format!(
                "depends on {dep}, which is not marked ready and has not \
                 been committed. Mark the dependency as ready first."
            ),
            PatchError::AmbiguousDependency { dep } => format!(
                "depends on {dep}, which matches changes on multiple \
                 branches. Use a full Change-Id or review number."
            ),
            PatchError::NotInManifest { project } => {
                format!("targets {project}, which is not in the current manifest.")
            }
            PatchError::Git(e) => format!("failed due to a git error: {e}"),
            PatchError::Internal(msg) => format!("failed due to a commit-queue issue: {msg}"),
        }
    }
}

fn conflict_target(inflight: &bool) -> &'static str {
    if *inflight {
        "the current patch series"
    } else {
        "ToT"
    }
}

fn push_file_list(s: &mut String, files: &[String]) {
    if files.is_empty() {
        return;
    }
    s.push_str("\n\nThe conflicting files are amongst:\n");
    for f in files {
        s.push_str("\n- ");
        s.push_str(f);
    }
}

/// Result alias for per-change operations.
pub type PatchResult<T> = std::result::Result<T, PatchError>;
