//! The unit of work: one reviewable change.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ident::{ChangeId, PoolLocalId};

/// Everything the review tool knows about a change, before pool admission.
///
/// `change_id` may be absent or malformed upstream; it is only trusted for
/// lookups *before* dependency resolution. Afterwards the pool-local id on
/// [`Change`] is the sole graph key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeData {
    pub change_id: Option<ChangeId>,
    pub project: String,
    /// Which review-tool instance / ACL realm owns the change.
    pub internal: bool,
    pub gerrit_number: String,
    pub patch_number: u32,
    pub sha1: String,
    /// Fetch URL for the repository holding the patch commit.
    pub url: String,
    /// Refspec to fetch (e.g. `refs/changes/42/10042/3`).
    pub ref_spec: String,
    /// Remote branch the change targets, without the `refs/heads/` prefix.
    pub tracking_branch: String,
    pub commit_message: String,
    /// Seconds-since-epoch of the newest approval, 0 when unknown.
    pub approval_timestamp: i64,
}

/// A change admitted to a validation pool.
#[derive(Debug, Clone)]
pub struct Change {
    /// Pool-local id, unique within one pool run.
    pub id: PoolLocalId,
    pub data: ChangeData,
    /// Set by the applier when the change fails; read by notification
    /// handlers afterwards.
    pub apply_error_message: Option<String>,
}

impl ChangeData {
    /// Approval time as a wall-clock instant; `None` when the review tool
    /// did not report one.
    pub fn approval_time(&self) -> Option<DateTime<Utc>> {
        if self.approval_timestamp == 0 {
            return None;
        }
        DateTime::<Utc>::from_timestamp(self.approval_timestamp, 0)
    }
}

impl Change {
    pub fn admit(id: PoolLocalId, data: ChangeData) -> Self {
        Self {
            id,
            data,
            apply_error_message: None,
        }
    }

    pub fn change_id(&self) -> Option<&ChangeId> {
        self.data.change_id.as_ref()
    }

    pub fn gerrit_number(&self) -> &str {
        &self.data.gerrit_number
    }

    pub fn project(&self) -> &str {
        &self.data.project
    }

    pub fn sha1(&self) -> &str {
        &self.data.sha1
    }

    pub fn tracking_branch(&self) -> &str {
        &self.data.tracking_branch
    }

    /// Short human-readable link for log lines and review comments.
    /// Internal changes carry the conventional `*` prefix.
    pub fn link(&self) -> String {
        let prefix = if self.data.internal { "*" } else { "" };
        format!("CL:{}{}", prefix, self.data.gerrit_number)
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.data.project, self.link())
    }
}
