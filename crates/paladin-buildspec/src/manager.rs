//! The coordination state machine over the spec store.
//!
//! Every mutation follows the same optimistic round: sync the checkout to
//! the remote, mutate the store, commit, push. A rejected push means some
//! other builder moved first; local state is rolled back and the round is
//! retried from the sync. Nothing is ever force-pushed.

use chrono::Utc;

use paladin_core::{GitError, GitRepo};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{BuildSpecError, BuildSpecResult};
use crate::store::{SpecStatus, SpecStore};
use crate::version::{BuildVersion, VersionFile};

pub struct BuildSpecsManager {
    repo: GitRepo,
    store: SpecStore,
    build_name: String,
    remote: String,
    branch: String,
    /// Project path of the coordination repo itself inside the manifests
    /// it stores; lines mentioning it churn on every round and are ignored
    /// when diffing manifests.
    self_project: String,
    retries: u32,
    dryrun: bool,
}

impl BuildSpecsManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        checkout: impl Into<std::path::PathBuf>,
        build_name: impl Into<String>,
        remote: impl Into<String>,
        branch: impl Into<String>,
        self_project: impl Into<String>,
        retries: u32,
        dryrun: bool,
    ) -> Self {
        let checkout = checkout.into();
        let build_name = build_name.into();
        Self {
            repo: GitRepo::new(&checkout),
            store: SpecStore::new(checkout, build_name.clone()),
            build_name,
            remote: remote.into(),
            branch: branch.into(),
            self_project: self_project.into(),
            retries,
            dryrun,
        }
    }

    pub fn store(&self) -> &SpecStore {
        &self.store
    }

    /// Bring the checkout up to date with the coordination remote.
    pub fn sync(&self) -> BuildSpecResult<()> {
        self.repo.sync(&self.remote, &self.branch)?;
        Ok(())
    }

    /// Commit everything staged-or-not and push. A non-fast-forward
    /// rejection comes back as [`BuildSpecError::PushRejected`]; dryrun
    /// skips both the commit and the push.
    pub fn commit_and_push(&self, message: &str) -> BuildSpecResult<()> {
        if self.dryrun {
            debug!(message, "dryrun: skipping commit and push");
            return Ok(());
        }
        self.repo.commit_all(message)?;
        let refspec = format!("HEAD:{}", self.branch);
        let out = self.repo.try_run(&["push", &self.remote, &refspec])?;
        if out.success() {
            return Ok(());
        }
        let stderr = out.stderr;
        if stderr.contains("non-fast-forward")
            || stderr.contains("fetch first")
            || stderr.contains("[rejected]")
        {
            return Err(BuildSpecError::PushRejected(stderr.trim().to_string()));
        }
        Err(GitError::Command {
            args: vec!["push".into(), self.remote.clone(), refspec],
            code: out.code,
            stderr,
        }
        .into())
    }

    /// Throw away all local modifications and reset to the remote branch.
    pub fn clean_git_changes(&self) -> BuildSpecResult<()> {
        self.repo
            .clean_worktree(&format!("{}/{}", self.remote, self.branch))?;
        Ok(())
    }

    pub fn set_in_flight(&self, version: &BuildVersion) -> BuildSpecResult<()> {
        self.transition(SpecStatus::InFlight, version)
    }

    pub fn set_passed(&self, version: &BuildVersion) -> BuildSpecResult<()> {
        self.transition(SpecStatus::Pass, version)
    }

    pub fn set_failed(&self, version: &BuildVersion) -> BuildSpecResult<()> {
        self.transition(SpecStatus::Fail, version)
    }

    fn transition(&self, status: SpecStatus, version: &BuildVersion) -> BuildSpecResult<()> {
        let message = format!(
            "Automatic: {} {} {} {}",
            self.build_name,
            status.dir_name(),
            version,
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );
        let attempts = self.retries.max(1);
        for attempt in 1..=attempts {
            if !self.dryrun {
                self.sync()?;
            }
            self.store.set_symlink(status, version)?;
            match self.commit_and_push(&message) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_race_loss() && attempt < attempts => {
                    warn!(%version, attempt, "lost the push race; retrying");
                    self.clean_git_changes()?;
                }
                Err(e) => {
                    // Roll back so the checkout is usable for the next
                    // operation; the original error wins.
                    if let Err(cleanup) = self.clean_git_changes() {
                        warn!(error = %cleanup, "rollback after failed push also failed");
                    }
                    return Err(e);
                }
            }
        }
        Err(BuildSpecError::ExhaustedRetries { attempts })
    }

    /// The next spec this builder should process: the oldest unprocessed
    /// one, or the newest with `latest` set.
    pub fn find_next_build(
        &self,
        latest: bool,
        last_processed: Option<&BuildVersion>,
    ) -> BuildSpecResult<Option<BuildVersion>> {
        let mut unprocessed = self.store.unprocessed(last_processed)?;
        Ok(if latest {
            unprocessed.pop()
        } else {
            unprocessed.into_iter().next()
        })
    }

    /// Write a new spec for `manifest_xml` if it differs from the latest
    /// stored one. Lines referencing the coordination repo itself are
    /// ignored in the comparison. Returns the new version, or `None` when
    /// nothing changed. Only touches the working tree; committing is the
    /// caller's round.
    pub fn generate_new_build_spec(
        &self,
        manifest_xml: &str,
        version_file: &mut VersionFile,
    ) -> BuildSpecResult<Option<BuildVersion>> {
        if let Some(latest) = self.store.latest()? {
            let existing = self.store.read_spec(&latest)?;
            if manifest_digest(manifest_xml, &self.self_project)
                == manifest_digest(&existing, &self.self_project)
            {
                debug!(%latest, "manifest unchanged; no new spec");
                return Ok(None);
            }
        }
        let mut version = version_file.version()?;
        if self.store.all_specs()?.contains(&version) {
            version = version_file.increment_patch()?;
            version_file.save()?;
        }
        self.store.write_spec(&version, manifest_xml)?;
        info!(%version, "generated new buildspec");
        Ok(Some(version))
    }

    /// Produce the spec this builder should work on: claim an unprocessed
    /// one, or generate a new one from `manifest_xml`. The claim (inflight
    /// link) is committed and pushed; the whole round is retried on a push
    /// race, never force-pushed. `None` means there is genuinely nothing
    /// to do.
    pub fn generate_workload(
        &self,
        manifest_xml: &str,
        version_file: &mut VersionFile,
        latest: bool,
    ) -> BuildSpecResult<Option<BuildVersion>> {
        let attempts = self.retries.max(1);
        for attempt in 1..=attempts {
            if !self.dryrun {
                self.sync()?;
            }
            let round = self.claim_round(manifest_xml, version_file, latest);
            match round {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_race_loss() && attempt < attempts => {
                    warn!(attempt, "lost the workload race; retrying");
                    self.clean_git_changes()?;
                }
                Err(e) if e.is_race_loss() => {
                    return Err(BuildSpecError::ExhaustedRetries { attempts });
                }
                Err(e) => {
                    if let Err(cleanup) = self.clean_git_changes() {
                        warn!(error = %cleanup, "rollback after failed round also failed");
                    }
                    return Err(e);
                }
            }
        }
        Err(BuildSpecError::ExhaustedRetries { attempts })
    }

    fn claim_round(
        &self,
        manifest_xml: &str,
        version_file: &mut VersionFile,
        latest: bool,
    ) -> BuildSpecResult<Option<BuildVersion>> {
        let version = match self.find_next_build(latest, None)? {
            Some(v) => v,
            None => match self.generate_new_build_spec(manifest_xml, version_file)? {
                Some(v) => v,
                None => return Ok(None),
            },
        };
        self.store.set_symlink(SpecStatus::InFlight, &version)?;
        self.commit_and_push(&format!(
            "Automatic: {} claims {} {}",
            self.build_name,
            version,
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        ))?;
        Ok(Some(version))
    }
}

/// Digest of a manifest with lines mentioning `ignore` filtered out.
fn manifest_digest(content: &str, ignore: &str) -> String {
    let mut hasher = Sha256::new();
    for line in content.lines() {
        if !ignore.is_empty() && line.contains(ignore) {
            continue;
        }
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
