//! Applying changes into the shared checkout.
//!
//! All picks land on a dedicated `cq-patch` branch so the tracking branch
//! itself is never mutated. Application is idempotent: re-applying a change
//! that is already present is a success no-op, which is what makes crash
//! recovery safe (re-running a pool after an interrupt re-applies the same
//! ordered chain).

use tracing::{debug, info, warn};

use crate::change::Change;
use crate::error::{PatchError, PatchResult};
use crate::git::GitRepo;

/// Branch all pool applications land on.
pub const PATCH_BRANCH: &str = "cq-patch";

/// Outcome of a single cherry-pick attempt, before inflight classification.
enum PickOutcome {
    Applied,
    AlreadyApplied,
    Conflict { trivial: bool, files: Vec<String> },
}

/// Apply one change onto the patch branch of `repo`.
///
/// `upstream` is the remote-tracking revision the patch branch is based on
/// (e.g. `origin/main`). With `trivial` set, only trivial merges are
/// accepted; content-level merging is rejected and reported as a conflict.
/// `change.sha1()` must already be reachable in `repo`: the pool fetches
/// each change's ref while walking its dependencies.
///
/// Conflicts are classified into the two buckets the pool cares about:
/// a conflict that also reproduces against bare tip-of-tree is the author's
/// to fix (`inflight: false`), while one that only appears on top of the
/// current patch series resolves itself on a later run (`inflight: true`).
pub fn apply_change(
    repo: &GitRepo,
    change: &Change,
    upstream: &str,
    trivial: bool,
) -> PatchResult<()> {
    ensure_patch_branch(repo, upstream)?;

    let tot = repo.rev_parse(upstream)?;
    let inflight = repo.head_sha()? != tot;

    match pick_once(repo, change.sha1(), trivial)? {
        PickOutcome::Applied => {
            info!(change = %change, trivial, "applied");
            Ok(())
        }
        PickOutcome::AlreadyApplied => {
            debug!(change = %change, "already applied; skipping");
            Ok(())
        }
        PickOutcome::Conflict {
            trivial: trivial_conflict,
            files,
        } => {
            if !inflight {
                return Err(PatchError::ApplyConflict {
                    inflight: false,
                    trivial: trivial_conflict,
                    files,
                });
            }
            // The pick failed on top of other in-flight changes. Retry
            // against bare ToT to decide who owns the conflict.
            let verdict = classify_against_tot(repo, change, &tot, trivial);
            repo.checkout_branch_force(PATCH_BRANCH)?;
            match verdict? {
                TotVerdict::AppliesCleanly => {
                    warn!(change = %change, "conflicts with the current patch series only");
                    Err(PatchError::ApplyConflict {
                        inflight: true,
                        trivial: trivial_conflict,
                        files,
                    })
                }
                TotVerdict::Conflicts { trivial: t, files } => {
                    warn!(change = %change, "no longer applies against ToT");
                    Err(PatchError::ApplyConflict {
                        inflight: false,
                        trivial: t,
                        files,
                    })
                }
            }
        }
    }
}

/// Make sure `cq-patch` exists and is checked out. An existing branch is
/// reused as-is so a chain applied earlier in the run stays in place.
fn ensure_patch_branch(repo: &GitRepo, upstream: &str) -> PatchResult<()> {
    if repo.local_branch_exists(PATCH_BRANCH)? {
        repo.checkout_branch_force(PATCH_BRANCH)?;
    } else {
        repo.checkout_new_branch(PATCH_BRANCH, upstream)?;
    }
    Ok(())
}

/// Reset the patch branch to its upstream base, dropping everything applied
/// so far in this run.
pub fn reset_patch_branch(repo: &GitRepo, upstream: &str) -> PatchResult<()> {
    ensure_patch_branch(repo, upstream)?;
    repo.reset_hard(upstream)?;
    Ok(())
}

fn pick_once(repo: &GitRepo, sha1: &str, trivial: bool) -> PatchResult<PickOutcome> {
    let out = repo.cherry_pick(sha1, trivial)?;
    match out.code {
        Some(0) => Ok(PickOutcome::Applied),
        Some(1) => {
            let files = repo.unmerged_files()?;
            abort_pick(repo)?;
            if files.is_empty() {
                // A pick that produces an empty commit exits 1 with no
                // unmerged paths: the change is already in the history.
                Ok(PickOutcome::AlreadyApplied)
            } else {
                Ok(PickOutcome::Conflict {
                    trivial: false,
                    files,
                })
            }
        }
        Some(2) if trivial => {
            // Trivial merge was not possible. Retry with content merging
            // allowed so that genuine conflicts are reported as such; a
            // clean content merge is then undone and reported as a
            // trivial-mode rejection.
            abort_pick(repo)?;
            match pick_once(repo, sha1, false)? {
                PickOutcome::Applied => {
                    repo.reset_hard("HEAD^")?;
                    Ok(PickOutcome::Conflict {
                        trivial: true,
                        files: Vec::new(),
                    })
                }
                other => Ok(other),
            }
        }
        code => Err(PatchError::Internal(format!(
            "cherry-pick of {sha1} exited with unexpected code {code:?}: {}",
            out.stderr.trim()
        ))),
    }
}

/// Clear any in-progress cherry-pick state and drop conflict markers.
fn abort_pick(repo: &GitRepo) -> PatchResult<()> {
    // --abort fails when no pick is actually in progress; that is fine.
    let _ = repo.try_run(&["cherry-pick", "--abort"])?;
    repo.reset_hard("HEAD")?;
    Ok(())
}

enum TotVerdict {
    AppliesCleanly,
    Conflicts { trivial: bool, files: Vec<String> },
}

/// Re-attempt the pick on a detached checkout of bare tip-of-tree. The
/// caller restores the patch branch afterwards, whatever happens here.
fn classify_against_tot(
    repo: &GitRepo,
    change: &Change,
    tot: &str,
    trivial: bool,
) -> PatchResult<TotVerdict> {
    repo.checkout_detached(tot)?;
    let verdict = match pick_once(repo, change.sha1(), trivial)? {
        PickOutcome::Applied | PickOutcome::AlreadyApplied => TotVerdict::AppliesCleanly,
        PickOutcome::Conflict { trivial, files } => TotVerdict::Conflicts { trivial, files },
    };
    repo.reset_hard(tot)?;
    Ok(verdict)
}
