//! Dependency extraction for a change.
//!
//! Two independent sources feed the resolver:
//!
//! * git ancestry — pending ancestor commits literally cannot land after
//!   their children, so their Change-Ids are hard prerequisites;
//! * `CQ-DEPEND` commit-message footers — soft, author-declared co-landing
//!   groups, possibly across projects.
//!
//! Both are surfaced as first-class errors when malformed; a broken
//! declaration fails the declaring change, never the batch.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::change::Change;
use crate::error::{PatchError, PatchResult};
use crate::git::AncestorCommit;
use crate::ident::{ChangeId, PatchDep};

/// Matches any line that looks like a CQ-DEPEND declaration, capturing the
/// prefix separately so near-misses (`CQ_DEPEND:`, `cq-depend=`) can be
/// rejected with a useful message instead of being silently ignored.
static CQ_DEPEND_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^(CQ.?DEPEND.)(.*)$").expect("static regex"));

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^, ]+").expect("static regex"));

const EXPECTED_PREFIX: &str = "CQ-DEPEND=";

/// Parse the `CQ-DEPEND` dependencies out of a change's commit message.
///
/// Tokens are separated by commas and/or whitespace; trailing commas and
/// repeated separators are tolerated. Each token must be a full Change-Id
/// or a bare review number. The result is deduplicated.
pub fn paladin_dependencies(change: &Change) -> PatchResult<Vec<PatchDep>> {
    let deps = paladin_dependencies_from_message(&change.data.commit_message)?;
    if !deps.is_empty() {
        debug!(change = %change, count = deps.len(), "found CQ-DEPEND dependencies");
    }
    Ok(deps)
}

/// Message-level variant of [`paladin_dependencies`], for callers that read
/// the commit message out of git rather than off a [`Change`].
pub fn paladin_dependencies_from_message(message: &str) -> PatchResult<Vec<PatchDep>> {
    let mut deps: Vec<PatchDep> = Vec::new();
    for caps in CQ_DEPEND_LINE_RE.captures_iter(message) {
        let prefix = &caps[1];
        if prefix != EXPECTED_PREFIX {
            return Err(PatchError::BrokenCqDepends {
                text: prefix.to_string(),
                detail: format!("expected {EXPECTED_PREFIX:?}"),
            });
        }
        for token in TOKEN_RE.find_iter(&caps[2]) {
            let token = token.as_str();
            let dep = PatchDep::parse(token).ok_or_else(|| PatchError::BrokenCqDepends {
                text: token.to_string(),
                detail: "not a Change-Id or review number".to_string(),
            })?;
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
    }
    Ok(deps)
}

/// Validate the pending-ancestor chain of a change into an ordered list of
/// Change-Ids, nearest child of the commit first.
///
/// Every pending ancestor must carry a well-formed Change-Id footer: one
/// with no footer at all yields [`PatchError::MissingChangeId`], and a
/// malformed footer yields [`PatchError::BrokenChangeId`]. An empty
/// ancestor list (parent already at tip-of-tree) is simply no dependencies.
pub fn gerrit_dependencies(ancestors: &[AncestorCommit]) -> PatchResult<Vec<ChangeId>> {
    let mut deps = Vec::with_capacity(ancestors.len());
    for ancestor in ancestors {
        let footer = ancestor
            .change_id_footer
            .as_deref()
            .ok_or_else(|| PatchError::MissingChangeId {
                sha1: ancestor.sha1.clone(),
            })?;
        let id = ChangeId::parse(footer).ok_or_else(|| PatchError::BrokenChangeId {
            text: footer.to_string(),
        })?;
        deps.push(id);
    }
    Ok(deps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeData;
    use crate::ident::PoolLocalId;
    use sha2::{Digest, Sha256};

    /// Deterministic test Change-Id derived from a seed string.
    pub(crate) fn test_change_id(seed: &str) -> ChangeId {
        let digest = Sha256::digest(seed.as_bytes());
        let hex40 = &hex::encode(digest)[..40];
        ChangeId::parse(&format!("I{hex40}")).unwrap()
    }

    fn change_with_message(message: &str) -> Change {
        let data = ChangeData {
            change_id: Some(test_change_id("self")),
            project: "platform/widget".to_string(),
            internal: false,
            gerrit_number: "10001".to_string(),
            patch_number: 1,
            sha1: "0".repeat(40),
            url: String::new(),
            ref_spec: String::new(),
            tracking_branch: "main".to_string(),
            commit_message: message.to_string(),
            approval_timestamp: 0,
        };
        Change::admit(PoolLocalId::new(0), data)
    }

    #[test]
    fn no_cq_depend_lines_means_no_deps() {
        let c = change_with_message("subject\n\nBUG=1\n");
        assert!(paladin_dependencies(&c).unwrap().is_empty());
    }

    #[test]
    fn parses_numbers_and_ids_across_multiple_lines() {
        let id = test_change_id("dep");
        let msg = format!("subject\n\nCQ-DEPEND=10001 10002\nCQ-DEPEND={id}\n");
        let c = change_with_message(&msg);
        let deps = paladin_dependencies(&c).unwrap();
        assert_eq!(
            deps,
            vec![
                PatchDep::GerritNumber("10001".to_string()),
                PatchDep::GerritNumber("10002".to_string()),
                PatchDep::ChangeId(id),
            ]
        );
    }

    #[test]
    fn duplicate_tokens_are_deduplicated() {
        let c = change_with_message("subject\n\nCQ-DEPEND=1 1\n");
        let deps = paladin_dependencies(&c).unwrap();
        assert_eq!(deps, vec![PatchDep::GerritNumber("1".to_string())]);
    }

    #[test]
    fn trailing_commas_and_spaces_are_tolerated() {
        let id = test_change_id("x");
        let msg = format!("subject\n\nCQ-DEPEND={id}, 2,\n");
        let deps = paladin_dependencies(&change_with_message(&msg)).unwrap();
        assert_eq!(
            deps,
            vec![
                PatchDep::ChangeId(id),
                PatchDep::GerritNumber("2".to_string()),
            ]
        );
    }

    #[test]
    fn malformed_token_is_rejected() {
        let id = test_change_id("ok");
        let msg = format!("subject\n\nCQ-DEPEND={id} monkeys\n");
        let err = paladin_dependencies(&change_with_message(&msg)).unwrap_err();
        assert!(matches!(err, PatchError::BrokenCqDepends { ref text, .. } if text == "monkeys"));
    }

    #[test]
    fn wrong_prefix_shape_is_rejected() {
        let c = change_with_message("subject\n\nCQ_DEPEND:1234\n");
        let err = paladin_dependencies(&c).unwrap_err();
        assert!(matches!(err, PatchError::BrokenCqDepends { .. }));
    }

    #[test]
    fn gerrit_deps_collects_ids_nearest_first() {
        let near = test_change_id("near");
        let far = test_change_id("far");
        let ancestors = vec![
            AncestorCommit {
                sha1: "a".repeat(40),
                change_id_footer: Some(near.as_str().to_string()),
            },
            AncestorCommit {
                sha1: "b".repeat(40),
                change_id_footer: Some(far.as_str().to_string()),
            },
        ];
        assert_eq!(gerrit_dependencies(&ancestors).unwrap(), vec![near, far]);
    }

    #[test]
    fn gerrit_deps_missing_footer_raises() {
        let ancestors = vec![AncestorCommit {
            sha1: "c".repeat(40),
            change_id_footer: None,
        }];
        let err = gerrit_dependencies(&ancestors).unwrap_err();
        assert!(matches!(err, PatchError::MissingChangeId { .. }));
    }

    #[test]
    fn gerrit_deps_malformed_footer_raises() {
        let ancestors = vec![AncestorCommit {
            sha1: "d".repeat(40),
            change_id_footer: Some("Inotvalid".to_string()),
        }];
        let err = gerrit_dependencies(&ancestors).unwrap_err();
        assert!(matches!(err, PatchError::BrokenChangeId { .. }));
    }

    #[test]
    fn empty_ancestor_chain_is_no_deps() {
        assert!(gerrit_dependencies(&[]).unwrap().is_empty());
    }
}
