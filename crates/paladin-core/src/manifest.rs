//! Repo-tool manifest reading.
//!
//! The pool only needs three things from a manifest: which projects exist,
//! which revision each one tracks, and the `<pending_commit/>` records a
//! master builder embeds so that slave builders can replay the exact same
//! pool deterministically. Only `name=`/`revision=`-style attributes are
//! read, so a small attribute scanner is sufficient.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::warn;

use crate::change::Change;
use crate::ident::ChangeId;

static ELEMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(default|project|pending_commit)\b([^>]*?)/?>").expect("static regex")
});

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][A-Za-z0-9_-]*)\s*=\s*"([^"]*)""#).expect("static regex")
});

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("malformed manifest: {0}")]
    Malformed(String),
}

/// One `<project/>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectEntry {
    pub name: String,
    pub revision: Option<String>,
}

/// One `<pending_commit/>` element: a change a master builder already
/// validated into this manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommit {
    pub project: String,
    pub change_id: Option<ChangeId>,
    pub gerrit_number: String,
    pub patch_number: u32,
    pub sha1: String,
    pub tracking_branch: String,
}

/// Parsed manifest: default revision, per-project entries, pending commits.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    default_revision: Option<String>,
    projects: HashMap<String, ProjectEntry>,
    pending_commits: Vec<PendingCommit>,
}

impl Manifest {
    pub fn parse(xml: &str) -> Result<Self, ManifestError> {
        let mut manifest = Manifest::default();
        for caps in ELEMENT_RE.captures_iter(xml) {
            let attrs = parse_attrs(&caps[2]);
            match &caps[1] {
                "default" => {
                    manifest.default_revision = attrs.get("revision").cloned();
                }
                "project" => {
                    let name = attrs
                        .get("name")
                        .cloned()
                        .ok_or_else(|| Manifest::missing("project", "name"))?;
                    manifest.projects.insert(
                        name.clone(),
                        ProjectEntry {
                            name,
                            revision: attrs.get("revision").cloned(),
                        },
                    );
                }
                "pending_commit" => {
                    manifest.pending_commits.push(PendingCommit {
                        project: attrs
                            .get("project")
                            .cloned()
                            .ok_or_else(|| Manifest::missing("pending_commit", "project"))?,
                        change_id: attrs.get("change_id").and_then(|s| ChangeId::parse(s)),
                        gerrit_number: attrs
                            .get("gerrit_number")
                            .cloned()
                            .ok_or_else(|| Manifest::missing("pending_commit", "gerrit_number"))?,
                        patch_number: attrs
                            .get("patch_number")
                            .and_then(|s| s.parse().ok())
                            .unwrap_or(1),
                        sha1: attrs
                            .get("commit")
                            .cloned()
                            .ok_or_else(|| Manifest::missing("pending_commit", "commit"))?,
                        tracking_branch: attrs
                            .get("tracking_branch")
                            .cloned()
                            .unwrap_or_else(|| "master".to_string()),
                    });
                }
                _ => unreachable!("element regex only matches known tags"),
            }
        }
        Ok(manifest)
    }

    fn missing(element: &str, attr: &str) -> ManifestError {
        ManifestError::Malformed(format!("<{element}> is missing the {attr} attribute"))
    }

    pub fn contains_project(&self, name: &str) -> bool {
        self.projects.contains_key(name)
    }

    /// Revision a project tracks: its own `revision` attribute, falling
    /// back to the manifest default.
    pub fn revision_for(&self, project: &str) -> Option<&str> {
        self.projects
            .get(project)
            .and_then(|p| p.revision.as_deref())
            .or(self.default_revision.as_deref())
    }

    pub fn pending_commits(&self) -> &[PendingCommit] {
        &self.pending_commits
    }
}

/// Compare a change's tracking branch against a manifest revision, ignoring
/// the `refs/heads/` prefix on either side.
pub fn branches_match(tracking_branch: &str, manifest_revision: &str) -> bool {
    branch_basename(tracking_branch) == branch_basename(manifest_revision)
}

fn branch_basename(rev: &str) -> &str {
    rev.strip_prefix("refs/heads/").unwrap_or(rev)
}

/// Partition candidate changes into (in-manifest, non-manifest). Changes
/// whose project is in the manifest but whose tracking branch disagrees
/// with the manifest revision are dropped with a log line; they belong to
/// some other builder's pool.
pub fn filter_non_manifest_changes(
    changes: Vec<Change>,
    manifest: &Manifest,
) -> (Vec<Change>, Vec<Change>) {
    let mut in_manifest = Vec::new();
    let mut non_manifest = Vec::new();
    for change in changes {
        if !manifest.contains_project(change.project()) {
            non_manifest.push(change);
            continue;
        }
        match manifest.revision_for(change.project()) {
            Some(rev) if branches_match(change.tracking_branch(), rev) => {
                in_manifest.push(change);
            }
            Some(rev) => {
                warn!(
                    change = %change,
                    tracking_branch = change.tracking_branch(),
                    manifest_revision = rev,
                    "dropping change: tracking branch not in this manifest"
                );
            }
            None => {
                // No revision info at all; take the change at face value.
                in_manifest.push(change);
            }
        }
    }
    (in_manifest, non_manifest)
}

fn parse_attrs(raw: &str) -> HashMap<String, String> {
    ATTR_RE
        .captures_iter(raw)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}
