//! Review comments the pool posts back to change authors.
//!
//! Every terminal failure path produces exactly one message, and every
//! message names the build that produced it plus the next step the author
//! should take. The wording here is user-facing; changes to it show up in
//! thousands of review threads.

use tracing::info;

use crate::change::Change;
use crate::error::PatchError;
use crate::review::{ReviewResult, ReviewTool};

/// Which builder run a message refers to.
#[derive(Debug, Clone)]
pub struct BuildIdentity {
    pub builder_name: String,
    pub build_number: u32,
}

impl BuildIdentity {
    /// Short audit reference embedded in every message.
    pub fn audit_link(&self) -> String {
        format!("{} build #{}", self.builder_name, self.build_number)
    }
}

/// One comment destined for one change.
#[derive(Debug)]
pub struct PaladinMessage<'a> {
    pub change: &'a Change,
    pub text: String,
}

impl<'a> PaladinMessage<'a> {
    pub fn new(change: &'a Change, text: String) -> Self {
        Self { change, text }
    }

    /// Post the comment. In dryrun the review tool records nothing, but the
    /// message is still logged so rehearsals show what would be said.
    pub fn send(&self, review: &dyn ReviewTool, dryrun: bool) -> ReviewResult<()> {
        info!(change = %self.change, dryrun, "notifying author: {}", self.text);
        review.post_comment(self.change, &self.text, dryrun)
    }
}

pub fn picked_up<'a>(change: &'a Change, build: &BuildIdentity) -> PaladinMessage<'a> {
    PaladinMessage::new(
        change,
        format!(
            "The commit queue has picked up your change and is testing it \
             in {}.",
            build.audit_link()
        ),
    )
}

pub fn could_not_apply<'a>(
    change: &'a Change,
    build: &BuildIdentity,
    error: &PatchError,
) -> PaladinMessage<'a> {
    PaladinMessage::new(
        change,
        format!(
            "The commit queue could not apply your change in {}. Your change {}",
            build.audit_link(),
            error.short_explanation()
        ),
    )
}

pub fn inflight_conflict<'a>(
    change: &'a Change,
    build: &BuildIdentity,
    error: &PatchError,
) -> PaladinMessage<'a> {
    PaladinMessage::new(
        change,
        format!(
            "The commit queue held your change back in {}. Your change {}",
            build.audit_link(),
            error.short_explanation()
        ),
    )
}

pub fn could_not_submit<'a>(change: &'a Change, build: &BuildIdentity) -> PaladinMessage<'a> {
    PaladinMessage::new(
        change,
        format!(
            "The commit queue failed to submit your change in {}, even \
             though it passed validation. This is most likely a transient \
             infrastructure problem; mark the change as ready again to \
             retry.",
            build.audit_link()
        ),
    )
}

pub fn could_not_verify<'a>(change: &'a Change, build: &BuildIdentity) -> PaladinMessage<'a> {
    PaladinMessage::new(
        change,
        format!(
            "The commit queue submitted your change in {}, but could not \
             verify that the review tool recorded it as merged. Please \
             check the change's status by hand.",
            build.audit_link()
        ),
    )
}

pub fn validation_timeout<'a>(change: &'a Change, build: &BuildIdentity) -> PaladinMessage<'a> {
    PaladinMessage::new(
        change,
        format!(
            "The commit queue timed out while validating your change in {}. \
             This is not a problem with the change itself; it will need to \
             be marked as ready again.",
            build.audit_link()
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeData;
    use crate::ident::PoolLocalId;

    fn build() -> BuildIdentity {
        BuildIdentity {
            builder_name: "x86-alex-paladin".to_string(),
            build_number: 1234,
        }
    }

    fn change() -> Change {
        let data = ChangeData {
            change_id: None,
            project: "platform/widget".to_string(),
            internal: false,
            gerrit_number: "10042".to_string(),
            patch_number: 1,
            sha1: "0".repeat(40),
            url: String::new(),
            ref_spec: String::new(),
            tracking_branch: "main".to_string(),
            commit_message: String::new(),
            approval_timestamp: 0,
        };
        Change::admit(PoolLocalId::new(0), data)
    }

    #[test]
    fn every_message_names_the_build() {
        let c = change();
        let b = build();
        let err = PatchError::ApplyConflict {
            inflight: false,
            trivial: false,
            files: vec![],
        };
        for msg in [
            picked_up(&c, &b),
            could_not_apply(&c, &b, &err),
            inflight_conflict(&c, &b, &err),
            could_not_submit(&c, &b),
            could_not_verify(&c, &b),
            validation_timeout(&c, &b),
        ] {
            assert!(
                msg.text.contains("x86-alex-paladin build #1234"),
                "missing audit link in: {}",
                msg.text
            );
        }
    }

    #[test]
    fn apply_failure_message_carries_the_explanation() {
        let c = change();
        let err = PatchError::ApplyConflict {
            inflight: false,
            trivial: false,
            files: vec!["Makefile".to_string()],
        };
        let msg = could_not_apply(&c, &build(), &err);
        assert!(msg.text.contains("rebase"));
        assert!(msg.text.contains("Makefile"));
    }
}
