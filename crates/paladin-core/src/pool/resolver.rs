//! Dependency-chain resolution.
//!
//! Given one root change, produce the ordered list of pool changes that
//! must be applied for the root to land, dependencies first. Resolution is
//! all-or-nothing per root: any unsatisfiable link blocks the whole chain,
//! and the block carries which change is at fault so the author of a
//! healthy change is never blamed for a broken dependency.

use std::collections::{HashMap, HashSet};

use crate::change::Change;
use crate::error::{PatchError, PatchResult};
use crate::ident::{PatchDep, PoolLocalId};
use crate::review::{ReviewError, ReviewTool};

/// Why a chain could not be scheduled. `change` is the pool member whose
/// dependency declaration (or own metadata) caused the block.
#[derive(Debug)]
pub struct BlockReason {
    pub change: PoolLocalId,
    pub error: PatchError,
}

enum AliasEntry {
    Unique(PoolLocalId),
    Ambiguous,
}

/// Lookup table from dependency targets to pool members. Built once per
/// apply pass.
pub struct PoolIndex {
    by_change_id: HashMap<String, AliasEntry>,
    by_number: HashMap<String, AliasEntry>,
}

impl PoolIndex {
    pub fn build(candidates: &[Change]) -> Self {
        let mut by_change_id: HashMap<String, AliasEntry> = HashMap::new();
        let mut by_number: HashMap<String, AliasEntry> = HashMap::new();
        for change in candidates {
            if let Some(id) = change.change_id() {
                insert_alias(&mut by_change_id, id.as_str().to_string(), change.id);
            }
            insert_alias(&mut by_number, change.gerrit_number().to_string(), change.id);
        }
        Self {
            by_change_id,
            by_number,
        }
    }

    /// Find the pool member a dependency refers to. `Ok(None)` means the
    /// target is not in the pool; an ambiguous alias is an error on the
    /// declaring change.
    pub fn find(&self, dep: &PatchDep) -> PatchResult<Option<PoolLocalId>> {
        let entry = match dep {
            PatchDep::ChangeId(id) => self.by_change_id.get(id.as_str()),
            PatchDep::GerritNumber(n) => self.by_number.get(n.as_str()),
        };
        match entry {
            None => Ok(None),
            Some(AliasEntry::Unique(id)) => Ok(Some(*id)),
            Some(AliasEntry::Ambiguous) => Err(PatchError::AmbiguousDependency {
                dep: dep.to_string(),
            }),
        }
    }
}

fn insert_alias(map: &mut HashMap<String, AliasEntry>, key: String, id: PoolLocalId) {
    map.entry(key)
        .and_modify(|e| *e = AliasEntry::Ambiguous)
        .or_insert(AliasEntry::Unique(id));
}

/// Resolve the application chain for `root`: dependencies first, the root
/// last. Dependencies already landed on the server are satisfied and
/// dropped; dependencies that are neither in the pool nor landed block the
/// chain.
///
/// `deps_for` yields a change's combined dependency list (git ancestry
/// first, then `CQ-DEPEND`), nearest dependency first.
pub fn resolve_chain(
    root: PoolLocalId,
    candidates: &[Change],
    index: &PoolIndex,
    review: &dyn ReviewTool,
    deps_for: &mut dyn FnMut(&Change) -> PatchResult<Vec<PatchDep>>,
) -> Result<Vec<PoolLocalId>, BlockReason> {
    let mut chain = Vec::new();
    let mut visiting = HashSet::new();
    visit(
        root,
        candidates,
        index,
        review,
        deps_for,
        &mut chain,
        &mut visiting,
    )?;
    Ok(chain)
}

#[allow(clippy::too_many_arguments)]
fn visit(
    id: PoolLocalId,
    candidates: &[Change],
    index: &PoolIndex,
    review: &dyn ReviewTool,
    deps_for: &mut dyn FnMut(&Change) -> PatchResult<Vec<PatchDep>>,
    chain: &mut Vec<PoolLocalId>,
    visiting: &mut HashSet<PoolLocalId>,
) -> Result<(), BlockReason> {
    if chain.contains(&id) {
        return Ok(());
    }
    // A cycle is a co-dependent group; its members satisfy each other.
    if !visiting.insert(id) {
        return Ok(());
    }
    let change = candidates
        .iter()
        .find(|c| c.id == id)
        .ok_or_else(|| BlockReason {
            change: id,
            error: PatchError::Internal(format!("{id} disappeared from the pool")),
        })?;
    let deps = deps_for(change).map_err(|error| BlockReason { change: id, error })?;
    for dep in deps {
        match index.find(&dep) {
            Ok(Some(dep_id)) => {
                visit(dep_id, candidates, index, review, deps_for, chain, visiting)?;
            }
            Ok(None) => {
                let committed = review
                    .is_change_committed(&dep, false)
                    .map_err(|e| BlockReason {
                        change: id,
                        error: review_to_patch_error(&dep, e),
                    })?;
                if !committed {
                    return Err(BlockReason {
                        change: id,
                        error: PatchError::DependencyNotReady {
                            dep: dep.to_string(),
                        },
                    });
                }
            }
            Err(error) => return Err(BlockReason { change: id, error }),
        }
    }
    chain.push(id);
    Ok(())
}

fn review_to_patch_error(dep: &PatchDep, e: ReviewError) -> PatchError {
    match e {
        ReviewError::NotSpecific { .. } => PatchError::AmbiguousDependency {
            dep: dep.to_string(),
        },
        other => PatchError::Internal(other.to_string()),
    }
}
