//! Review worktree lifecycle: recreate, merge the integration branch, diff.

use std::path::Path;

use tracing::{debug, info, instrument, warn};

use super::{remote_ref, GitError, MergeOutcome, VersionControl};
use crate::workspace;

/// Everything needed to (re)build one PR's worktree and diff.
#[derive(Debug, Clone, Copy)]
pub struct WorktreeRequest<'a> {
    pub bare: &'a Path,
    pub worktree: &'a Path,
    pub diff_path: &'a Path,
    /// PR source branch, without `refs/heads/`.
    pub branch: &'a str,
    /// Integration branch merged in before diffing.
    pub target_branch: &'a str,
    pub fail_on_conflict: bool,
}

/// What building the worktree produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub merge: MergeOutcome,
    /// Patch bytes exactly as git produced them.
    pub diff: Vec<u8>,
}

/// Recreate the worktree for `req.branch`, merge the integration branch
/// into it and write `git diff <integration>` to `req.diff_path`.
///
/// Stale worktrees are never reused. A merge conflict is logged and the
/// diff is still written, conflict markers included, unless
/// `fail_on_conflict` is set.
#[instrument(skip(vcs, req), fields(branch = req.branch, worktree = %req.worktree.display()))]
pub async fn build_worktree_diff(
    vcs: &dyn VersionControl,
    req: WorktreeRequest<'_>,
) -> Result<BuildOutcome, GitError> {
    if req.worktree.exists() {
        info!("removing stale worktree");
        discard_worktree(vcs, req.bare, req.worktree).await?;
    } else {
        prune_quietly(vcs, req.bare).await;
    }
    // An old diff must not outlive a failed rebuild.
    if req.diff_path.exists() {
        tokio::fs::remove_file(req.diff_path).await?;
    }

    let source = remote_ref(req.branch);
    if vcs.resolve_ref(req.bare, &source).await?.is_none() {
        return Err(GitError::BranchNotFound {
            branch: req.branch.to_string(),
            reference: source,
        });
    }

    vcs.add_worktree(req.bare, req.worktree, &source).await?;
    info!("created worktree");

    let target = remote_ref(req.target_branch);
    let merge = vcs.merge(req.worktree, &target).await?;
    if let MergeOutcome::Conflicted { message } = &merge {
        if req.fail_on_conflict {
            return Err(GitError::MergeConflict {
                branch: req.branch.to_string(),
                target: req.target_branch.to_string(),
            });
        }
        warn!(
            target = req.target_branch,
            detail = %message,
            "merge conflicts; diff will contain conflict markers"
        );
    } else {
        debug!(target = req.target_branch, "merged cleanly");
    }

    let diff = vcs.diff(req.worktree, &target).await?;
    workspace::write_atomic(req.diff_path, &diff)?;
    info!(path = %req.diff_path.display(), bytes = diff.len(), "wrote diff");

    Ok(BuildOutcome { merge, diff })
}

/// Deregister the worktree and delete its directory.
///
/// Deregistration failure falls back to deleting the directory and pruning
/// the registry; only a failure to delete the directory is an error.
#[instrument(skip(vcs))]
pub async fn discard_worktree(
    vcs: &dyn VersionControl,
    bare: &Path,
    worktree: &Path,
) -> Result<(), GitError> {
    if bare.exists() {
        if let Err(e) = vcs.remove_worktree(bare, worktree).await {
            warn!(error = %e, "worktree deregistration failed, removing directory directly");
        }
    } else {
        warn!("bare mirror missing, removing worktree directory directly");
    }

    if worktree.exists() {
        tokio::fs::remove_dir_all(worktree).await?;
    }
    prune_quietly(vcs, bare).await;
    Ok(())
}

async fn prune_quietly(vcs: &dyn VersionControl, bare: &Path) {
    if !bare.exists() {
        return;
    }
    if let Err(e) = vcs.prune_worktrees(bare).await {
        warn!(error = %e, "git worktree prune failed");
    }
}
