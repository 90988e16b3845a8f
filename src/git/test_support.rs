//! Scratch repositories for tests that drive real `git`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Run git in `dir` with a fixed identity; panics on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args(["-c", "user.name=Test User", "-c", "user.email=test@test.com"])
        .args(["-c", "commit.gpgsign=false"])
        .args(args)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn rev_parse(repo: &Path, rev: &str) -> String {
    git(repo, &["rev-parse", rev])
}

/// Write `file`, stage it and commit on the current branch.
pub fn commit_file(repo: &Path, file: &str, contents: &str, message: &str) -> String {
    fs::write(repo.join(file), contents).unwrap();
    git(repo, &["add", file]);
    git(repo, &["commit", "-m", message]);
    rev_parse(repo, "HEAD")
}

/// Create `<root>/remotes/svc`, an ordinary repository standing in for the
/// ADO remote:
///
/// ```text
/// master:     README.md, shared.txt
/// feature/x:  master + feature.txt
/// ```
pub fn init_remote(root: &Path) -> PathBuf {
    let repo = root.join("remotes").join("svc");
    fs::create_dir_all(&repo).unwrap();
    git(&repo, &["init", "--quiet"]);
    git(&repo, &["symbolic-ref", "HEAD", "refs/heads/master"]);
    commit_file(&repo, "README.md", "# svc\n", "Initial commit");
    commit_file(&repo, "shared.txt", "line one\nline two\n", "Add shared file");

    git(&repo, &["checkout", "--quiet", "-b", "feature/x"]);
    commit_file(&repo, "feature.txt", "feature work\n", "Add feature");
    git(&repo, &["checkout", "--quiet", "master"]);
    repo
}

/// Directory to use as `workspace.remote_base` for remotes made by init_remote.
pub fn remote_base(root: &Path) -> String {
    root.join("remotes").to_string_lossy().into_owned()
}

/// Worktree paths registered in a repository, from `git worktree list --porcelain`.
pub fn registered_worktrees(repo: &Path) -> Vec<PathBuf> {
    git(repo, &["worktree", "list", "--porcelain"])
        .lines()
        .filter_map(|line| line.strip_prefix("worktree "))
        .map(PathBuf::from)
        .collect()
}
