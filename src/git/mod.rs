//! Version control operations over the `git` CLI.
//!
//! Only the handful of operations the staging workflow needs: bare clone,
//! fetch, forced ref update, worktree add/remove/prune, merge and diff.

pub mod mirror;
pub mod worktree;

#[cfg(test)]
pub(crate) mod test_support;

use std::ffi::OsStr;
use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::exec::{self, CommandOutput};

/// Identity used for the throwaway merge commit inside a review worktree.
const MERGE_IDENTITY: [&str; 6] = [
    "-c",
    "user.name=ado-pr-stage",
    "-c",
    "user.email=ado-pr-stage@localhost",
    "-c",
    "commit.gpgsign=false",
];

#[derive(Debug, Error)]
pub enum GitError {
    #[error("Failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Failed to clone {url}: {reason}")]
    CloneFailed { url: String, reason: String },

    #[error("Branch '{branch}' not found ({reference} does not exist; was it deleted or renamed?)")]
    BranchNotFound { branch: String, reference: String },

    #[error("Failed to create worktree at {path}: {reason}")]
    WorktreeFailed { path: String, reason: String },

    #[error("Merging {target} into {branch} produced conflicts")]
    MergeConflict { branch: String, target: String },

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of merging the integration branch into a review worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Clean,
    /// The merge stopped; files may hold conflict markers.
    Conflicted { message: String },
}

impl MergeOutcome {
    pub fn is_conflicted(&self) -> bool {
        matches!(self, MergeOutcome::Conflicted { .. })
    }
}

/// Remote-tracking ref for a branch of `origin`.
pub fn remote_ref(branch: &str) -> String {
    format!("refs/remotes/origin/{}", branch)
}

/// The version control capability the workflow depends on.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// `git clone --bare <url> <dest>`.
    async fn clone_bare(&self, url: &str, dest: &Path) -> Result<(), GitError>;

    async fn set_config(&self, repo: &Path, key: &str, value: &str) -> Result<(), GitError>;

    /// Fetch from `remote`, pruning deleted branches.
    async fn fetch(&self, repo: &Path, remote: &str) -> Result<(), GitError>;

    /// Point `name` at `target` unconditionally.
    async fn update_ref(&self, repo: &Path, name: &str, target: &str) -> Result<(), GitError>;

    /// Commit id `name` resolves to, or None when it does not exist.
    async fn resolve_ref(&self, repo: &Path, name: &str) -> Result<Option<String>, GitError>;

    /// Add a detached worktree at `path` checked out at `commitish`.
    async fn add_worktree(&self, repo: &Path, path: &Path, commitish: &str) -> Result<(), GitError>;

    /// Forcibly deregister and delete the worktree at `path`.
    async fn remove_worktree(&self, repo: &Path, path: &Path) -> Result<(), GitError>;

    /// Drop registry entries whose directories are gone.
    async fn prune_worktrees(&self, repo: &Path) -> Result<(), GitError>;

    /// Merge `commitish` into the worktree's HEAD without an editor.
    async fn merge(&self, worktree: &Path, commitish: &str) -> Result<MergeOutcome, GitError>;

    /// `git diff <base>` of the working tree, byte for byte.
    async fn diff(&self, worktree: &Path, base: &str) -> Result<Vec<u8>, GitError>;
}

/// VersionControl backed by the `git` executable.
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
        }
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    async fn run<I, S>(&self, cwd: Option<&Path>, args: I) -> Result<CommandOutput, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<S> = args.into_iter().collect();
        exec::run(&self.program, &args, cwd)
            .await
            .map_err(|source| GitError::Spawn {
                command: exec::display(&self.program, &args),
                source,
            })
    }

    /// Run and require a zero exit status.
    async fn run_ok<I, S>(&self, cwd: Option<&Path>, args: I) -> Result<CommandOutput, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<S> = args.into_iter().collect();
        let output = self.run(cwd, &args).await?;
        if !output.success {
            return Err(GitError::CommandFailed {
                command: exec::display(&self.program, &args),
                stderr: output.message(),
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl VersionControl for GitCli {
    #[instrument(skip(self))]
    async fn clone_bare(&self, url: &str, dest: &Path) -> Result<(), GitError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let clone_failed = |reason: String| GitError::CloneFailed {
            url: url.to_string(),
            reason,
        };
        let output = self
            .run(None, [OsStr::new("clone"), OsStr::new("--bare"), OsStr::new(url), dest.as_os_str()])
            .await
            .map_err(|e| clone_failed(e.to_string()))?;
        if !output.success {
            return Err(clone_failed(output.message()));
        }
        Ok(())
    }

    async fn set_config(&self, repo: &Path, key: &str, value: &str) -> Result<(), GitError> {
        self.run_ok(Some(repo), ["config", key, value]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch(&self, repo: &Path, remote: &str) -> Result<(), GitError> {
        self.run_ok(Some(repo), ["fetch", "--prune", remote]).await?;
        Ok(())
    }

    async fn update_ref(&self, repo: &Path, name: &str, target: &str) -> Result<(), GitError> {
        self.run_ok(Some(repo), ["update-ref", name, target]).await?;
        Ok(())
    }

    async fn resolve_ref(&self, repo: &Path, name: &str) -> Result<Option<String>, GitError> {
        let peeled = format!("{}^{{commit}}", name);
        let output = self
            .run(Some(repo), ["rev-parse", "--verify", "--quiet", peeled.as_str()])
            .await?;
        if !output.success {
            debug!(reference = name, "ref does not resolve");
            return Ok(None);
        }
        Ok(Some(output.stdout_text().trim().to_string()))
    }

    #[instrument(skip(self))]
    async fn add_worktree(&self, repo: &Path, path: &Path, commitish: &str) -> Result<(), GitError> {
        let output = self
            .run(
                Some(repo),
                [
                    OsStr::new("worktree"),
                    OsStr::new("add"),
                    OsStr::new("--detach"),
                    path.as_os_str(),
                    OsStr::new(commitish),
                ],
            )
            .await?;
        if !output.success {
            return Err(GitError::WorktreeFailed {
                path: path.display().to_string(),
                reason: output.message(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_worktree(&self, repo: &Path, path: &Path) -> Result<(), GitError> {
        self.run_ok(
            Some(repo),
            [
                OsStr::new("worktree"),
                OsStr::new("remove"),
                OsStr::new("--force"),
                path.as_os_str(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn prune_worktrees(&self, repo: &Path) -> Result<(), GitError> {
        self.run_ok(Some(repo), ["worktree", "prune"]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn merge(&self, worktree: &Path, commitish: &str) -> Result<MergeOutcome, GitError> {
        let mut args: Vec<&str> = MERGE_IDENTITY.to_vec();
        args.extend(["merge", "--no-edit", commitish]);
        let output = self.run(Some(worktree), args).await?;
        if output.success {
            return Ok(MergeOutcome::Clean);
        }
        Ok(MergeOutcome::Conflicted {
            message: output.message(),
        })
    }

    async fn diff(&self, worktree: &Path, base: &str) -> Result<Vec<u8>, GitError> {
        let output = self
            .run_ok(Some(worktree), ["diff", "--no-color", "--no-ext-diff", base])
            .await?;
        Ok(output.stdout)
    }
}
