//! In-memory fakes for the pool's collaborators.
//!
//! These stand in for the review server and the tree-status service in
//! tests. They record every mutating call so assertions can check not just
//! outcomes but which side effects were (or were not) attempted.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Mutex;

use crate::change::{Change, ChangeData};
use crate::ident::PatchDep;
use crate::review::{ChangeStatus, ReviewError, ReviewResult, ReviewTool};
use crate::tree_status::{TreeState, TreeStatusSource};

#[derive(Default)]
struct ReviewState {
    ready: Vec<ChangeData>,
    committed: HashSet<PatchDep>,
    ambiguous: HashSet<PatchDep>,
    content_merging: Vec<String>,
    statuses: HashMap<String, ChangeStatus>,
    status_after_submit: HashMap<String, ChangeStatus>,
    fail_submit: HashSet<String>,
    query_calls: u32,
    submitted: Vec<(String, bool)>,
    comments: Vec<(String, String, bool)>,
    removed_ready: Vec<(String, bool)>,
}

/// Fake review server. Changes are keyed by their review number.
#[derive(Default)]
pub struct FakeReviewTool {
    state: Mutex<ReviewState>,
}

impl FakeReviewTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ready_change(&self, data: ChangeData) {
        self.state.lock().unwrap().ready.push(data);
    }

    /// Mark a dependency target as already landed.
    pub fn mark_committed(&self, dep: PatchDep) {
        self.state.lock().unwrap().committed.insert(dep);
    }

    /// Make lookups of a dependency ambiguous (matches on several
    /// branches).
    pub fn mark_ambiguous(&self, dep: PatchDep) {
        self.state.lock().unwrap().ambiguous.insert(dep);
    }

    pub fn set_content_merging_projects(&self, projects: Vec<String>) {
        self.state.lock().unwrap().content_merging = projects;
    }

    pub fn set_status(&self, gerrit_number: &str, status: ChangeStatus) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(gerrit_number.to_string(), status);
    }

    /// Status the change reports after a successful submit; defaults to
    /// [`ChangeStatus::Submitted`].
    pub fn set_status_after_submit(&self, gerrit_number: &str, status: ChangeStatus) {
        self.state
            .lock()
            .unwrap()
            .status_after_submit
            .insert(gerrit_number.to_string(), status);
    }

    /// Make submit attempts for a change fail.
    pub fn fail_submit_for(&self, gerrit_number: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_submit
            .insert(gerrit_number.to_string());
    }

    pub fn query_calls(&self) -> u32 {
        self.state.lock().unwrap().query_calls
    }

    /// `(gerrit_number, dryrun)` per submit attempt, in order.
    pub fn submitted(&self) -> Vec<(String, bool)> {
        self.state.lock().unwrap().submitted.clone()
    }

    /// `(gerrit_number, message, dryrun)` per posted comment.
    pub fn comments(&self) -> Vec<(String, String, bool)> {
        self.state.lock().unwrap().comments.clone()
    }

    /// `(gerrit_number, dryrun)` per commit-ready removal.
    pub fn removed_ready(&self) -> Vec<(String, bool)> {
        self.state.lock().unwrap().removed_ready.clone()
    }
}

impl ReviewTool for FakeReviewTool {
    fn query_ready_changes(&self) -> ReviewResult<Vec<ChangeData>> {
        let mut state = self.state.lock().unwrap();
        state.query_calls += 1;
        Ok(state.ready.clone())
    }

    fn is_change_committed(&self, dep: &PatchDep, must_match: bool) -> ReviewResult<bool> {
        let state = self.state.lock().unwrap();
        if state.ambiguous.contains(dep) {
            if must_match {
                return Err(ReviewError::NotSpecific {
                    dep: dep.to_string(),
                });
            }
            return Ok(false);
        }
        Ok(state.committed.contains(dep))
    }

    fn find_content_merging_projects(&self) -> ReviewResult<Vec<String>> {
        Ok(self.state.lock().unwrap().content_merging.clone())
    }

    fn submit_change(&self, change: &Change, dryrun: bool) -> ReviewResult<()> {
        let mut state = self.state.lock().unwrap();
        let number = change.gerrit_number().to_string();
        state.submitted.push((number.clone(), dryrun));
        if state.fail_submit.contains(&number) {
            return Err(ReviewError::Submit {
                change: change.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        if !dryrun {
            let status = state
                .status_after_submit
                .get(&number)
                .copied()
                .unwrap_or(ChangeStatus::Submitted);
            state.statuses.insert(number, status);
        }
        Ok(())
    }

    fn change_status(&self, change: &Change) -> ReviewResult<ChangeStatus> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .statuses
            .get(change.gerrit_number())
            .copied()
            .unwrap_or(ChangeStatus::New))
    }

    fn remove_commit_ready(&self, change: &Change, dryrun: bool) -> ReviewResult<()> {
        let mut state = self.state.lock().unwrap();
        let number = change.gerrit_number().to_string();
        state.removed_ready.push((number.clone(), dryrun));
        if !dryrun {
            state.ready.retain(|c| c.gerrit_number != number);
        }
        Ok(())
    }

    fn post_comment(&self, change: &Change, message: &str, dryrun: bool) -> ReviewResult<()> {
        self.state.lock().unwrap().comments.push((
            change.gerrit_number().to_string(),
            message.to_string(),
            dryrun,
        ));
        Ok(())
    }
}

/// Fake tree-status service reporting a fixed state, counting fetches.
pub struct FakeTreeStatus {
    state: Mutex<(TreeState, u32)>,
}

impl FakeTreeStatus {
    pub fn new(state: TreeState) -> Self {
        Self {
            state: Mutex::new((state, 0)),
        }
    }

    pub fn set_state(&self, state: TreeState) {
        self.state.lock().unwrap().0 = state;
    }

    pub fn fetch_count(&self) -> u32 {
        self.state.lock().unwrap().1
    }
}

impl TreeStatusSource for FakeTreeStatus {
    fn fetch(&self) -> io::Result<TreeState> {
        let mut guard = self.state.lock().unwrap();
        guard.1 += 1;
        Ok(guard.0)
    }
}
