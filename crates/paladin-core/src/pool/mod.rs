//! The validation pool: acquire, apply, submit.
//!
//! A pool is one commit-queue run's worth of changes. The master builder
//! acquires it from the review tool, applies it into a checkout, records
//! the surviving changes into the manifest it hands to slave builders, and
//! submits the survivors once validation passes. Slave builders replay the
//! identical pool from that manifest instead of re-querying the review
//! tool, so every builder in a run tests the same tree.

pub mod resolver;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::apply;
use crate::change::{Change, ChangeData};
use crate::deps;
use crate::error::{PatchError, PatchResult};
use crate::git::{GitError, GitRepo};
use crate::ident::{PatchDep, PoolLocalId};
use crate::manifest::{filter_non_manifest_changes, Manifest, ManifestError};
use crate::notify::{self, BuildIdentity};
use crate::review::{ReviewError, ReviewTool};
use crate::tree_status::{wait_for_tree_open, TreeStatusSource};

use resolver::PoolIndex;

/// Tree wait used at submit time and by callers with no better idea.
pub const DEFAULT_TREE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid pool configuration: {0}")]
    Config(String),

    #[error("tree closed for longer than {0:?}")]
    TreeClosed(Duration),

    #[error(transparent)]
    Review(#[from] ReviewError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Git(#[from] GitError),

    /// Some changes passed validation but could not be submitted. The batch
    /// was still attempted to the end; this aggregates the stragglers.
    #[error("failed to submit all changes: {failed:?}")]
    FailedToSubmitAllChanges { failed: Vec<String> },
}

pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// Which review-tool realms a builder draws changes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlays {
    Public,
    Private,
    Both,
}

impl Overlays {
    fn admits(self, internal: bool) -> bool {
        match self {
            Overlays::Public => !internal,
            Overlays::Private => internal,
            Overlays::Both => true,
        }
    }
}

/// Static configuration for one pool run. `dryrun` is an explicit field
/// threaded through every mutating call; there is no process-global switch.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub overlays: Overlays,
    pub build_root: PathBuf,
    pub build_number: u32,
    pub builder_name: String,
    pub is_master: bool,
    pub dryrun: bool,
}

impl PoolConfig {
    pub fn new(
        overlays: Overlays,
        build_root: impl Into<PathBuf>,
        build_number: u32,
        builder_name: impl Into<String>,
        is_master: bool,
        dryrun: bool,
    ) -> PoolResult<Self> {
        let builder_name = builder_name.into();
        if builder_name.trim().is_empty() {
            return Err(PoolError::Config("builder name must not be empty".into()));
        }
        Ok(Self {
            overlays,
            build_root: build_root.into(),
            build_number,
            builder_name,
            is_master,
            dryrun,
        })
    }

    fn build_identity(&self) -> BuildIdentity {
        BuildIdentity {
            builder_name: self.builder_name.clone(),
            build_number: self.build_number,
        }
    }
}

/// One run's worth of changes, through acquisition, application and
/// submission.
#[derive(Debug)]
pub struct ValidationPool {
    config: PoolConfig,
    candidates: Vec<Change>,
    /// Successfully applied changes, in application order. Submission
    /// walks this order so dependents never land before dependencies.
    applied: Vec<Change>,
    non_manifest_changes: Vec<Change>,
    /// Inflight conflicts held over for the next run, with their errors.
    held: Vec<(Change, PatchError)>,
}

impl ValidationPool {
    /// Acquire a pool from the review tool. Never queries the review tool
    /// while the tree is closed; a closed tree for the whole window is an
    /// error, not an empty pool. Dryrun skips the tree wait.
    pub fn acquire_pool(
        config: PoolConfig,
        review: &dyn ReviewTool,
        tree: &dyn TreeStatusSource,
        manifest: &Manifest,
        tree_timeout: Duration,
    ) -> PoolResult<Self> {
        if !config.dryrun && !wait_for_tree_open(tree, tree_timeout) {
            return Err(PoolError::TreeClosed(tree_timeout));
        }
        let ready = review.query_ready_changes()?;
        let mut candidates = Vec::new();
        for data in ready {
            if !config.overlays.admits(data.internal) {
                continue;
            }
            let id = PoolLocalId::new(candidates.len());
            candidates.push(Change::admit(id, data));
        }
        let (candidates, non_manifest_changes) =
            filter_non_manifest_changes(candidates, manifest);
        info!(
            candidates = candidates.len(),
            non_manifest = non_manifest_changes.len(),
            "pool acquired"
        );
        Ok(Self {
            config,
            candidates,
            applied: Vec::new(),
            non_manifest_changes,
            held: Vec::new(),
        })
    }

    /// Replay the pool a master builder recorded into a manifest. Used by
    /// slave builders; deterministic, no review-tool or tree-status
    /// traffic.
    pub fn acquire_pool_from_manifest(config: PoolConfig, manifest_xml: &str) -> PoolResult<Self> {
        let manifest = Manifest::parse(manifest_xml)?;
        let mut candidates = Vec::new();
        for pending in manifest.pending_commits() {
            let id = PoolLocalId::new(candidates.len());
            candidates.push(Change::admit(
                id,
                ChangeData {
                    change_id: pending.change_id.clone(),
                    project: pending.project.clone(),
                    internal: false,
                    gerrit_number: pending.gerrit_number.clone(),
                    patch_number: pending.patch_number,
                    sha1: pending.sha1.clone(),
                    url: String::new(),
                    ref_spec: String::new(),
                    tracking_branch: pending.tracking_branch.clone(),
                    commit_message: String::new(),
                    approval_timestamp: 0,
                },
            ));
        }
        info!(candidates = candidates.len(), "pool replayed from manifest");
        Ok(Self {
            config,
            candidates,
            applied: Vec::new(),
            non_manifest_changes: Vec::new(),
            held: Vec::new(),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn candidates(&self) -> &[Change] {
        &self.candidates
    }

    /// Changes applied by the last [`Self::apply_pool_into_repo`] call, in
    /// application order.
    pub fn applied(&self) -> &[Change] {
        &self.applied
    }

    pub fn non_manifest_changes(&self) -> &[Change] {
        &self.non_manifest_changes
    }

    /// Inflight conflicts held over for the next run.
    pub fn held_changes(&self) -> &[(Change, PatchError)] {
        &self.held
    }

    fn candidate(&self, id: PoolLocalId) -> Option<&Change> {
        self.candidates.iter().find(|c| c.id == id)
    }

    fn candidate_mut(&mut self, id: PoolLocalId) -> Option<&mut Change> {
        self.candidates.iter_mut().find(|c| c.id == id)
    }

    /// Apply every candidate chain into `repo` on top of `upstream`.
    ///
    /// Per-change failures never abort the pass: a failed chain blocks only
    /// its own members, and independent changes keep going. Returns whether
    /// anything was applied.
    pub fn apply_pool_into_repo(
        &mut self,
        repo: &GitRepo,
        review: &dyn ReviewTool,
        upstream: &str,
    ) -> PoolResult<bool> {
        let dryrun = self.config.dryrun;
        let content_merging: Vec<String> = if dryrun {
            Vec::new()
        } else {
            review.find_content_merging_projects()?
        };
        let index = PoolIndex::build(&self.candidates);
        let ids: Vec<PoolLocalId> = self.candidates.iter().map(|c| c.id).collect();

        let mut deps_for = |change: &Change| -> PatchResult<Vec<PatchDep>> {
            if !change.data.url.is_empty() && !change.data.ref_spec.is_empty() {
                repo.fetch(&change.data.url, &change.data.ref_spec)?;
            }
            let ancestors = repo.pending_ancestors(change.sha1(), upstream)?;
            let mut combined: Vec<PatchDep> = deps::gerrit_dependencies(&ancestors)?
                .into_iter()
                .map(PatchDep::ChangeId)
                .collect();
            let message = if change.data.commit_message.is_empty() {
                repo.commit_message(change.sha1())?
            } else {
                change.data.commit_message.clone()
            };
            for dep in deps::paladin_dependencies_from_message(&message)? {
                if !combined.contains(&dep) {
                    combined.push(dep);
                }
            }
            Ok(combined)
        };

        let mut applied_ids: Vec<PoolLocalId> = Vec::new();
        // (member, error, held-over?) in discovery order.
        let mut failed: Vec<(PoolLocalId, PatchError, bool)> = Vec::new();

        for root in ids {
            if applied_ids.contains(&root) || failed.iter().any(|f| f.0 == root) {
                continue;
            }
            let chain = match resolver::resolve_chain(
                root,
                &self.candidates,
                &index,
                review,
                &mut deps_for,
            ) {
                Ok(chain) => chain,
                Err(block) => {
                    let error = if block.change == root {
                        block.error
                    } else {
                        PatchError::DependencyNotReady {
                            dep: self.link_for(block.change),
                        }
                    };
                    failed.push((root, error, false));
                    continue;
                }
            };
            // A chain touching a member that already failed this run is
            // blocked the same way (and held over iff the member was).
            if let Some((bad, bad_held)) = failed
                .iter()
                .find(|f| chain.contains(&f.0))
                .map(|f| (f.0, f.2))
            {
                failed.push((
                    root,
                    PatchError::DependencyNotReady {
                        dep: self.link_for(bad),
                    },
                    bad_held,
                ));
                continue;
            }
            'chain: for idx in 0..chain.len() {
                let id = chain[idx];
                if applied_ids.contains(&id) {
                    continue;
                }
                let Some(change) = self.candidate(id) else {
                    continue;
                };
                let trivial =
                    !dryrun && !content_merging.iter().any(|p| p == change.project());
                match apply::apply_change(repo, change, upstream, trivial) {
                    Ok(()) => applied_ids.push(id),
                    Err(error) => {
                        let held = error.is_inflight();
                        let link = change.link();
                        failed.push((id, error, held));
                        for &rest in &chain[idx + 1..] {
                            if applied_ids.contains(&rest)
                                || failed.iter().any(|f| f.0 == rest)
                            {
                                continue;
                            }
                            failed.push((
                                rest,
                                PatchError::DependencyNotReady { dep: link.clone() },
                                held,
                            ));
                        }
                        break 'chain;
                    }
                }
            }
        }

        self.applied = applied_ids
            .iter()
            .filter_map(|id| self.candidate(*id).cloned())
            .collect();

        self.held.clear();
        for (id, error, held) in failed {
            let Some(change) = self.candidate_mut(id) else {
                continue;
            };
            change.apply_error_message = Some(error.short_explanation());
            let change = change.clone();
            if held {
                self.held.push((change, error));
            } else if self.config.is_master {
                self.handle_could_not_apply(review, &change, &error);
            }
        }
        if self.config.is_master {
            for change in &self.applied {
                self.handle_applied(review, change);
            }
        }
        info!(
            applied = self.applied.len(),
            held = self.held.len(),
            "pool application finished"
        );
        Ok(!self.applied.is_empty())
    }

    fn link_for(&self, id: PoolLocalId) -> String {
        self.candidate(id)
            .map(|c| c.link())
            .unwrap_or_else(|| id.to_string())
    }

    /// Submit every applied change, in application order. Master-only.
    ///
    /// Best-effort across the batch: one failed submit never stops the
    /// rest, and the stragglers come back in one aggregate error. Also
    /// notifies the authors of held-over inflight conflicts.
    pub fn submit_pool(
        &mut self,
        review: &dyn ReviewTool,
        tree: &dyn TreeStatusSource,
    ) -> PoolResult<()> {
        let applied = self.applied.clone();
        let result = self.submit_batch(review, tree, &applied);
        if self.config.is_master {
            let held = std::mem::take(&mut self.held);
            for (change, error) in &held {
                self.handle_inflight_conflict(review, change, error);
            }
            self.held = held;
        }
        result
    }

    /// Submit changes whose projects are outside the manifest. They do not
    /// affect the validated tree, so they are submitted without applying.
    pub fn submit_non_manifest_changes(
        &mut self,
        review: &dyn ReviewTool,
        tree: &dyn TreeStatusSource,
    ) -> PoolResult<()> {
        let changes = self.non_manifest_changes.clone();
        self.submit_batch(review, tree, &changes)
    }

    fn submit_batch(
        &self,
        review: &dyn ReviewTool,
        tree: &dyn TreeStatusSource,
        changes: &[Change],
    ) -> PoolResult<()> {
        if !self.config.is_master {
            return Err(PoolError::Config(
                "only the master builder submits changes".into(),
            ));
        }
        if changes.is_empty() {
            return Ok(());
        }
        if !self.config.dryrun && !wait_for_tree_open(tree, DEFAULT_TREE_TIMEOUT) {
            return Err(PoolError::TreeClosed(DEFAULT_TREE_TIMEOUT));
        }
        let mut failed = Vec::new();
        for change in changes {
            if !self.submit_one(review, change) {
                failed.push(change.link());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(PoolError::FailedToSubmitAllChanges { failed })
        }
    }

    fn submit_one(&self, review: &dyn ReviewTool, change: &Change) -> bool {
        let dryrun = self.config.dryrun;
        match review.submit_change(change, dryrun) {
            Err(e) => {
                warn!(change = %change, error = %e, "submit failed");
                self.handle_could_not_submit(review, change);
                false
            }
            Ok(()) => {
                if dryrun {
                    return true;
                }
                // One poll; submission is normally synchronous on the
                // server side.
                match review.change_status(change) {
                    Ok(status) if status.is_landed() => {
                        info!(change = %change, ?status, "submitted");
                        true
                    }
                    Ok(status) => {
                        warn!(change = %change, ?status, "submit not reflected in status");
                        self.handle_could_not_verify(review, change);
                        false
                    }
                    Err(e) => {
                        warn!(change = %change, error = %e, "could not read status after submit");
                        self.handle_could_not_verify(review, change);
                        false
                    }
                }
            }
        }
    }

    fn handle_applied(&self, review: &dyn ReviewTool, change: &Change) {
        let build = self.config.build_identity();
        self.send(review, notify::picked_up(change, &build));
    }

    fn handle_could_not_apply(&self, review: &dyn ReviewTool, change: &Change, error: &PatchError) {
        let build = self.config.build_identity();
        self.send(review, notify::could_not_apply(change, &build, error));
        self.remove_ready(review, change);
    }

    fn handle_inflight_conflict(
        &self,
        review: &dyn ReviewTool,
        change: &Change,
        error: &PatchError,
    ) {
        let build = self.config.build_identity();
        self.send(review, notify::inflight_conflict(change, &build, error));
        // No commit-ready removal: the change is retried automatically.
    }

    fn handle_could_not_submit(&self, review: &dyn ReviewTool, change: &Change) {
        let build = self.config.build_identity();
        self.send(review, notify::could_not_submit(change, &build));
        self.remove_ready(review, change);
    }

    fn handle_could_not_verify(&self, review: &dyn ReviewTool, change: &Change) {
        let build = self.config.build_identity();
        self.send(review, notify::could_not_verify(change, &build));
    }

    /// The validation run itself timed out. Tell every applied change's
    /// author and take the changes out of the queue.
    pub fn handle_validation_timeout(&self, review: &dyn ReviewTool) {
        let build = self.config.build_identity();
        for change in &self.applied {
            self.send(review, notify::validation_timeout(change, &build));
            self.remove_ready(review, change);
        }
    }

    fn send(&self, review: &dyn ReviewTool, message: notify::PaladinMessage<'_>) {
        if let Err(e) = message.send(review, self.config.dryrun) {
            warn!(change = %message.change, error = %e, "failed to notify author");
        }
    }

    fn remove_ready(&self, review: &dyn ReviewTool, change: &Change) {
        if let Err(e) = review.remove_commit_ready(change, self.config.dryrun) {
            warn!(change = %change, error = %e, "failed to remove commit-ready marker");
        }
    }
}
