//! End-to-end pool runs against real on-disk git repositories, with the
//! review tool and tree status faked.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use paladin_core::fakes::{FakeReviewTool, FakeTreeStatus};
use paladin_core::pool::{Overlays, PoolConfig, ValidationPool};
use paladin_core::tree_status::TreeState;
use paladin_core::{ChangeData, ChangeId, Manifest};

fn run_git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn make_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    run_git(dir.path(), &["init", "-b", "main"]);
    run_git(dir.path(), &["config", "user.name", "test-user"]);
    run_git(dir.path(), &["config", "user.email", "test@example.com"]);
    fs::write(dir.path().join("base.txt"), "base\n").unwrap();
    run_git(dir.path(), &["add", "-A"]);
    run_git(dir.path(), &["commit", "-m", "initial"]);
    dir
}

/// Commit `content` to `file` on a throwaway branch off main, return the
/// sha, and go back to main.
fn commit_change(dir: &Path, branch: &str, file: &str, content: &str, message: &str) -> String {
    run_git(dir, &["checkout", "-b", branch, "main"]);
    fs::write(dir.join(file), content).unwrap();
    run_git(dir, &["add", "-A"]);
    run_git(dir, &["commit", "-m", message]);
    let sha = run_git(dir, &["rev-parse", "HEAD"]).trim().to_string();
    run_git(dir, &["checkout", "main"]);
    sha
}

fn ready_change(number: &str, sha1: &str, message: &str) -> ChangeData {
    ChangeData {
        change_id: None,
        project: "platform/widget".to_string(),
        internal: false,
        gerrit_number: number.to_string(),
        patch_number: 1,
        sha1: sha1.to_string(),
        url: String::new(),
        ref_spec: String::new(),
        tracking_branch: "main".to_string(),
        commit_message: message.to_string(),
        approval_timestamp: 0,
    }
}

fn widget_manifest() -> Manifest {
    Manifest::parse(
        r#"<manifest>
             <default revision="refs/heads/main"/>
             <project name="platform/widget"/>
           </manifest>"#,
    )
    .unwrap()
}

fn master_config() -> PoolConfig {
    PoolConfig::new(
        Overlays::Both,
        "/tmp/build-root",
        42,
        "amd64-generic-paladin",
        true,
        false,
    )
    .unwrap()
}

fn acquire(review: &FakeReviewTool) -> ValidationPool {
    let tree = FakeTreeStatus::new(TreeState::Open);
    ValidationPool::acquire_pool(
        master_config(),
        review,
        &tree,
        &widget_manifest(),
        Duration::from_secs(1),
    )
    .unwrap()
}

#[test]
fn cq_depend_reorders_application() {
    let dir = make_repo();
    let repo = paladin_core::GitRepo::new(dir.path());
    let sha1 = commit_change(dir.path(), "work-1", "one.txt", "one\n", "one");
    let msg2 = "two\n\nCQ-DEPEND=1\n";
    let sha2 = commit_change(dir.path(), "work-2", "two.txt", "two\n", msg2);

    let review = FakeReviewTool::new();
    // Ready order is [2, 1]; the dependency must flip it.
    review.add_ready_change(ready_change("2", &sha2, msg2));
    review.add_ready_change(ready_change("1", &sha1, "one\n"));

    let mut pool = acquire(&review);
    let applied_any = pool
        .apply_pool_into_repo(&repo, &review, "main")
        .unwrap();

    assert!(applied_any);
    let order: Vec<&str> = pool.applied().iter().map(|c| c.gerrit_number()).collect();
    assert_eq!(order, vec!["1", "2"]);
    assert!(dir.path().join("one.txt").exists());
    assert!(dir.path().join("two.txt").exists());
}

#[test]
fn ancestry_dependency_is_applied_first() {
    let dir = make_repo();
    let repo = paladin_core::GitRepo::new(dir.path());
    let parent_id = "I47ea30385af60ae4cc2acc5d1a283a46423bc6e1";

    // One branch, two stacked commits; the child depends on the parent
    // through git ancestry alone.
    run_git(dir.path(), &["checkout", "-b", "stacked", "main"]);
    fs::write(dir.path().join("parent.txt"), "parent\n").unwrap();
    run_git(dir.path(), &["add", "-A"]);
    run_git(
        dir.path(),
        &["commit", "-m", &format!("parent\n\nChange-Id: {parent_id}\n")],
    );
    let parent_sha = run_git(dir.path(), &["rev-parse", "HEAD"]).trim().to_string();
    fs::write(dir.path().join("child.txt"), "child\n").unwrap();
    run_git(dir.path(), &["add", "-A"]);
    run_git(dir.path(), &["commit", "-m", "child"]);
    let child_sha = run_git(dir.path(), &["rev-parse", "HEAD"]).trim().to_string();
    run_git(dir.path(), &["checkout", "main"]);

    let review = FakeReviewTool::new();
    let mut parent = ready_change("1", &parent_sha, "parent\n");
    parent.change_id = ChangeId::parse(parent_id);
    review.add_ready_change(ready_change("2", &child_sha, "child\n"));
    review.add_ready_change(parent);

    let mut pool = acquire(&review);
    pool.apply_pool_into_repo(&repo, &review, "main").unwrap();

    let order: Vec<&str> = pool.applied().iter().map(|c| c.gerrit_number()).collect();
    assert_eq!(order, vec!["1", "2"]);
}

#[test]
fn one_bad_change_does_not_sink_the_pool() {
    let dir = make_repo();
    let repo = paladin_core::GitRepo::new(dir.path());

    // A stale change off the original main, conflicting with a later
    // mainline edit.
    let bad_sha = commit_change(dir.path(), "stale", "base.txt", "stale\n", "stale");
    fs::write(dir.path().join("base.txt"), "advanced\n").unwrap();
    run_git(dir.path(), &["add", "-A"]);
    run_git(dir.path(), &["commit", "-m", "mainline advance"]);
    // Two healthy changes off the advanced main.
    let good1 = commit_change(dir.path(), "good-1", "g1.txt", "g1\n", "g1");
    let good2 = commit_change(dir.path(), "good-2", "g2.txt", "g2\n", "g2");

    let review = FakeReviewTool::new();
    review.add_ready_change(ready_change("1", &good1, "g1\n"));
    review.add_ready_change(ready_change("2", &bad_sha, "stale\n"));
    review.add_ready_change(ready_change("3", &good2, "g2\n"));

    let mut pool = acquire(&review);
    pool.apply_pool_into_repo(&repo, &review, "main").unwrap();

    let order: Vec<&str> = pool.applied().iter().map(|c| c.gerrit_number()).collect();
    assert_eq!(order, vec!["1", "3"]);
    // The stale change was told to rebase and lost its ready marker.
    assert!(review
        .comments()
        .iter()
        .any(|(n, msg, _)| n == "2" && msg.contains("rebase")));
    assert!(review.removed_ready().iter().any(|(n, _)| n == "2"));
    // The healthy changes were told they were picked up.
    assert!(review
        .comments()
        .iter()
        .any(|(n, msg, _)| n == "1" && msg.contains("picked up")));
}

#[test]
fn inflight_conflict_is_held_not_rejected() {
    let dir = make_repo();
    let repo = paladin_core::GitRepo::new(dir.path());
    // Two independent changes editing the same file: whichever applies
    // second conflicts with the first, but would apply cleanly alone.
    let first = commit_change(dir.path(), "a", "shared.txt", "first\n", "first");
    let second = commit_change(dir.path(), "b", "shared.txt", "second\n", "second");

    let review = FakeReviewTool::new();
    review.add_ready_change(ready_change("1", &first, "first\n"));
    review.add_ready_change(ready_change("2", &second, "second\n"));

    let mut pool = acquire(&review);
    pool.apply_pool_into_repo(&repo, &review, "main").unwrap();

    assert_eq!(pool.applied().len(), 1);
    assert_eq!(pool.held_changes().len(), 1);
    assert_eq!(pool.held_changes()[0].0.gerrit_number(), "2");
    // Held changes keep their commit-ready marker.
    assert!(review.removed_ready().iter().all(|(n, _)| n != "2"));
}

#[test]
fn apply_then_submit_in_application_order() {
    let dir = make_repo();
    let repo = paladin_core::GitRepo::new(dir.path());
    let sha1 = commit_change(dir.path(), "w1", "one.txt", "one\n", "one");
    let msg2 = "two\n\nCQ-DEPEND=1\n";
    let sha2 = commit_change(dir.path(), "w2", "two.txt", "two\n", msg2);

    let review = FakeReviewTool::new();
    review.add_ready_change(ready_change("2", &sha2, msg2));
    review.add_ready_change(ready_change("1", &sha1, "one\n"));

    let mut pool = acquire(&review);
    pool.apply_pool_into_repo(&repo, &review, "main").unwrap();
    let tree = FakeTreeStatus::new(TreeState::Open);
    pool.submit_pool(&review, &tree).unwrap();

    let submitted: Vec<String> = review.submitted().into_iter().map(|s| s.0).collect();
    assert_eq!(submitted, vec!["1", "2"]);
}

#[test]
fn rerunning_apply_is_idempotent() {
    let dir = make_repo();
    let repo = paladin_core::GitRepo::new(dir.path());
    let sha = commit_change(dir.path(), "w", "one.txt", "one\n", "one");

    let review = FakeReviewTool::new();
    review.add_ready_change(ready_change("1", &sha, "one\n"));

    let mut pool = acquire(&review);
    pool.apply_pool_into_repo(&repo, &review, "main").unwrap();
    let head_first = repo.head_sha().unwrap();

    // Same pool replayed into the same checkout, as after a crash.
    let review2 = FakeReviewTool::new();
    review2.add_ready_change(ready_change("1", &sha, "one\n"));
    let mut pool2 = acquire(&review2);
    pool2.apply_pool_into_repo(&repo, &review2, "main").unwrap();
    let head_second = repo.head_sha().unwrap();

    assert_eq!(head_first, head_second);
    assert_eq!(pool2.applied().len(), 1);
}

#[test]
fn change_reachable_only_through_its_ref_is_applied() {
    let dir = make_repo();
    let repo = paladin_core::GitRepo::new(dir.path());
    // The change lives in a side repository; the pool has to fetch its ref
    // before it can inspect or apply it.
    let side = tempfile::tempdir().unwrap();
    run_git(side.path(), &["clone", dir.path().to_str().unwrap(), "."]);
    run_git(side.path(), &["config", "user.name", "side"]);
    run_git(side.path(), &["config", "user.email", "side@example.com"]);
    let sha = commit_change(side.path(), "work", "fetched.txt", "fetched\n", "fetched");

    let mut data = ready_change("1", &sha, "fetched\n");
    data.url = side.path().to_str().unwrap().to_string();
    data.ref_spec = "refs/heads/work".to_string();
    let review = FakeReviewTool::new();
    review.add_ready_change(data);

    let mut pool = acquire(&review);
    assert!(pool.apply_pool_into_repo(&repo, &review, "main").unwrap());
    assert_eq!(pool.applied().len(), 1);
    assert_eq!(
        fs::read_to_string(dir.path().join("fetched.txt")).unwrap(),
        "fetched\n"
    );
}

#[test]
fn missing_dependency_blocks_only_the_declaring_change() {
    let dir = make_repo();
    let repo = paladin_core::GitRepo::new(dir.path());
    let good = commit_change(dir.path(), "g", "g.txt", "g\n", "g");
    let msg = "needy\n\nCQ-DEPEND=999\n";
    let needy = commit_change(dir.path(), "n", "n.txt", "n\n", msg);

    let review = FakeReviewTool::new();
    review.add_ready_change(ready_change("1", &needy, msg));
    review.add_ready_change(ready_change("2", &good, "g\n"));

    let mut pool = acquire(&review);
    pool.apply_pool_into_repo(&repo, &review, "main").unwrap();

    let order: Vec<&str> = pool.applied().iter().map(|c| c.gerrit_number()).collect();
    assert_eq!(order, vec!["2"]);
    assert!(review
        .comments()
        .iter()
        .any(|(n, msg, _)| n == "1" && msg.contains("not marked ready")));
}
