//! Shared helpers for ado-pr-stage integration tests.
//!
//! Every `TestEnv` owns a temporary directory that doubles as the working
//! directory and the sandbox root, so tests never touch the real workspace
//! or pick up the developer's Azure DevOps environment.

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

const ENV_OVERRIDES: &[&str] = &[
    "ADO_ORGANIZATION",
    "ADO_PROJECT",
    "ADO_DEFAULT_REPO",
    "ADO_BACKEND",
    "ADO_PR_ROOT",
    "AZURE_DEVOPS_EXT_PAT",
];

pub struct TestEnv {
    pub dir: TempDir,
    path_prefix: Option<PathBuf>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            path_prefix: None,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Command for the binary, run from the sandbox with a scrubbed environment.
    pub fn stage(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_ado-pr-stage"));
        cmd.current_dir(self.path());
        for key in ENV_OVERRIDES {
            cmd.env_remove(key);
        }
        cmd.env("NO_COLOR", "1");
        if let Some(prefix) = &self.path_prefix {
            let inherited = std::env::var("PATH").unwrap_or_default();
            cmd.env("PATH", format!("{}:{}", prefix.display(), inherited));
        }
        cmd
    }

    pub fn write_config(&self, contents: &str) {
        fs::write(self.path().join(".ado-pr-stage.toml"), contents).unwrap();
    }

    /// Install an executable `az` shim with the given shell body ahead of PATH.
    #[cfg(unix)]
    pub fn install_fake_az(&mut self, body: &str) {
        use std::os::unix::fs::PermissionsExt;

        let bin = self.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let script = bin.join("az");
        fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        self.path_prefix = Some(bin);
    }

    /// Create `remotes/svc` with `master` and a `feature/x` branch adding
    /// feature.txt. Returns the directory to use as `workspace.remote_base`.
    pub fn init_remote(&self) -> PathBuf {
        let remotes = self.path().join("remotes");
        let repo = remotes.join("svc");
        fs::create_dir_all(&repo).unwrap();
        git(&repo, &["init", "--quiet"]);
        git(&repo, &["symbolic-ref", "HEAD", "refs/heads/master"]);
        commit_file(&repo, "README.md", "# svc\n", "Initial commit");
        git(&repo, &["checkout", "--quiet", "-b", "feature/x"]);
        commit_file(&repo, "feature.txt", "feature work\n", "Add feature");
        git(&repo, &["checkout", "--quiet", "master"]);
        remotes
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

pub fn git(dir: &Path, args: &[&str]) {
    let status = std::process::Command::new("git")
        .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
        .args(["-c", "commit.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .status()
        .unwrap();
    assert!(status.success(), "git {:?} failed in {}", args, dir.display());
}

fn commit_file(repo: &Path, name: &str, contents: &str, message: &str) {
    fs::write(repo.join(name), contents).unwrap();
    git(repo, &["add", name]);
    git(repo, &["commit", "--quiet", "-m", message]);
}
