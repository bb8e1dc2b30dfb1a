//! Git integration for the validation pool and buildspec coordination.
//!
//! [`GitRepo`] wraps one checkout directory. Every command runs with an
//! explicit working directory; nothing here ever touches the process CWD,
//! so two pools operating on different checkouts cannot interfere through
//! the applier.

use std::path::{Path, PathBuf};
use std::process::Command;

use regex::Regex;
use std::sync::LazyLock;

static CHANGE_ID_FOOTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^Change-Id:[\t ]*(\S+)[\t ]*$").expect("static regex")
});

/// Errors from invoking git.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("failed to run git: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("git {args:?} failed (code {code:?}): {stderr}")]
    Command {
        args: Vec<String>,
        code: Option<i32>,
        stderr: String,
    },

    #[error("unexpected git output: {0}")]
    Parse(String),
}

pub type GitResult<T> = std::result::Result<T, GitError>;

/// Raw outcome of a git command run with a tolerated exit code.
#[derive(Debug)]
pub struct GitOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// One ancestor commit of a patch, as seen between the tracking branch and
/// the patch's parent. `change_id_footer` is the raw footer text, if any;
/// validation happens in [`crate::deps`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AncestorCommit {
    pub sha1: String,
    pub change_id_footer: Option<String>,
}

/// A handle to one git checkout directory.
#[derive(Debug, Clone)]
pub struct GitRepo {
    dir: PathBuf,
}

impl GitRepo {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run git, tolerating a non-zero exit code.
    pub fn try_run(&self, args: &[&str]) -> GitResult<GitOutput> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .output()?;
        Ok(GitOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run git, requiring success.
    pub fn run(&self, args: &[&str]) -> GitResult<String> {
        let out = self.try_run(args)?;
        if !out.success() {
            return Err(GitError::Command {
                args: args.iter().map(|s| s.to_string()).collect(),
                code: out.code,
                stderr: out.stderr,
            });
        }
        Ok(out.stdout)
    }

    /// Check whether a directory is inside a git work tree.
    pub fn is_git_repo(dir: &Path) -> bool {
        Command::new("git")
            .args(["rev-parse", "--is-inside-work-tree"])
            .current_dir(dir)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Resolve a revision to a full SHA.
    pub fn rev_parse(&self, rev: &str) -> GitResult<String> {
        let out = self.run(&["rev-list", "-n1", rev])?;
        let sha = out.trim().to_string();
        if sha.is_empty() {
            return Err(GitError::Parse(format!("empty sha for revision {rev}")));
        }
        Ok(sha)
    }

    /// Capture the HEAD commit SHA.
    pub fn head_sha(&self) -> GitResult<String> {
        self.rev_parse("HEAD")
    }

    pub fn fetch(&self, url: &str, refspec: &str) -> GitResult<()> {
        self.run(&["fetch", url, refspec]).map(|_| ())
    }

    pub fn local_branch_exists(&self, branch: &str) -> GitResult<bool> {
        let out = self.try_run(&["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")])?;
        Ok(out.success())
    }

    /// Create `branch` tracking `upstream` and switch to it.
    pub fn checkout_new_branch(&self, branch: &str, upstream: &str) -> GitResult<()> {
        self.run(&["checkout", "-b", branch, upstream]).map(|_| ())
    }

    pub fn checkout_branch_force(&self, branch: &str) -> GitResult<()> {
        self.run(&["checkout", "-f", branch]).map(|_| ())
    }

    pub fn checkout_detached(&self, rev: &str) -> GitResult<()> {
        self.run(&["checkout", "-f", "--detach", rev]).map(|_| ())
    }

    /// Cherry-pick with the resolve strategy, fast-forwarding when the SHA
    /// need not change. When `trivial` is set, only trivial merges are
    /// attempted. The raw outcome is returned for the applier to classify.
    pub fn cherry_pick(&self, sha1: &str, trivial: bool) -> GitResult<GitOutput> {
        let mut args = vec!["cherry-pick", "--strategy", "resolve", "--ff"];
        if trivial {
            args.extend(["-X", "trivial"]);
        }
        args.push(sha1);
        self.try_run(&args)
    }

    /// Paths with unresolved merge conflicts, one per line.
    pub fn unmerged_files(&self) -> GitResult<Vec<String>> {
        let out = self.run(&["diff", "--name-only", "--diff-filter=U"])?;
        Ok(out.lines().map(|l| l.to_string()).collect())
    }

    pub fn reset_hard(&self, target: &str) -> GitResult<()> {
        self.run(&["reset", "--hard", target]).map(|_| ())
    }

    /// Full commit message of a revision.
    pub fn commit_message(&self, rev: &str) -> GitResult<String> {
        self.run(&["log", "--format=%B", "-n1", rev])
    }

    /// Pending ancestors of `sha1` relative to `upstream`: the commits in
    /// `upstream..sha1^`, child-nearest first, each with the raw Change-Id
    /// footer from the last paragraph of its message (if any). Empty when
    /// the immediate parent is already on the upstream branch.
    pub fn pending_ancestors(&self, sha1: &str, upstream: &str) -> GitResult<Vec<AncestorCommit>> {
        let range = format!("{upstream}..{sha1}^");
        let out = self.try_run(&["rev-list", &range])?;
        if !out.success() {
            // A root commit has no parent; treat it as having no pending
            // ancestors rather than failing the whole change.
            return Ok(Vec::new());
        }
        let mut ancestors = Vec::new();
        for sha in out.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let message = self.commit_message(sha)?;
            ancestors.push(AncestorCommit {
                sha1: sha.to_string(),
                change_id_footer: parse_change_id_footer(&message),
            });
        }
        Ok(ancestors)
    }

    /// Stage everything and commit.
    pub fn commit_all(&self, message: &str) -> GitResult<()> {
        self.run(&["add", "-A"])?;
        self.run(&["commit", "-m", message]).map(|_| ())
    }

    pub fn push(&self, remote: &str, refspec: &str) -> GitResult<()> {
        self.run(&["push", remote, refspec]).map(|_| ())
    }

    /// Discard all local modifications and untracked files, then reset the
    /// current branch to `target`. Used to restore a shared working
    /// directory to a pristine state before a retry.
    pub fn clean_worktree(&self, target: &str) -> GitResult<()> {
        self.reset_hard(target)?;
        self.run(&["clean", "-fd"]).map(|_| ())
    }

    /// Fetch `remote` and hard-reset the current branch to `remote/branch`.
    pub fn sync(&self, remote: &str, branch: &str) -> GitResult<()> {
        self.run(&["fetch", remote])?;
        self.reset_hard(&format!("{remote}/{branch}"))
    }
}

/// Extract the raw Change-Id footer from the last paragraph of a commit
/// message. Returns the footer text unvalidated; a well-formed message has
/// exactly one, and the last one wins when there are several.
pub fn parse_change_id_footer(message: &str) -> Option<String> {
    let trimmed = message.trim_end();
    let last_paragraph = trimmed
        .rsplit_once("\n\n")
        .map(|(_, p)| p)
        .unwrap_or(trimmed);
    CHANGE_ID_FOOTER_RE
        .captures_iter(last_paragraph)
        .last()
        .map(|c| c[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    pub(crate) fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init", "-b", "main"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
        dir
    }

    #[test]
    fn head_sha_returns_40_hex_chars() {
        let dir = make_git_repo();
        let repo = GitRepo::new(dir.path());
        let sha = repo.head_sha().unwrap();
        assert_eq!(sha.len(), 40);
        assert!(sha.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn head_sha_fails_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepo::new(dir.path());
        assert!(repo.head_sha().is_err());
    }

    #[test]
    fn is_git_repo_detection() {
        let repo = make_git_repo();
        assert!(GitRepo::is_git_repo(repo.path()));
        let plain = tempfile::tempdir().unwrap();
        assert!(!GitRepo::is_git_repo(plain.path()));
    }

    #[test]
    fn local_branch_exists_reflects_branches() {
        let dir = make_git_repo();
        let repo = GitRepo::new(dir.path());
        assert!(repo.local_branch_exists("main").unwrap());
        assert!(!repo.local_branch_exists("no-such-branch").unwrap());
    }

    #[test]
    fn footer_parse_takes_last_footer_in_last_paragraph() {
        let msg = "subject\n\nbody text\n\nBUG=123\nChange-Id: Iaaa\nChange-Id: Ibbb\n";
        assert_eq!(parse_change_id_footer(msg), Some("Ibbb".to_string()));
    }

    #[test]
    fn footer_parse_ignores_change_id_in_body() {
        let msg = "subject\n\nChange-Id: Iaaa mentioned in body\n\nBUG=none\n";
        assert_eq!(parse_change_id_footer(msg), None);
    }

    #[test]
    fn footer_parse_single_paragraph_message() {
        let msg = "subject\nChange-Id: Iccc\n";
        assert_eq!(parse_change_id_footer(msg), Some("Iccc".to_string()));
    }

    #[test]
    fn pending_ancestors_empty_for_tip_commit() {
        let dir = make_git_repo();
        let repo = GitRepo::new(dir.path());
        run_git(dir.path(), &["commit", "--allow-empty", "-m", "second"]);
        let head = repo.head_sha().unwrap();
        // Parent of HEAD is the branch tip's ancestor; relative to the
        // commit itself there is nothing pending before it.
        let ancestors = repo.pending_ancestors(&head, "main").unwrap();
        assert!(ancestors.is_empty());
    }
}
