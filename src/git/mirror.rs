use std::path::Path;

use tracing::{info, instrument};

use super::{remote_ref, GitError, VersionControl};

const FETCH_REFSPEC: &str = "+refs/heads/*:refs/remotes/origin/*";

/// Ensure a bare mirror of `remote_url` exists at `bare` and force its local
/// `target_branch` to the remote's. Returns the commit id it now points at.
///
/// The mirror's local branch is a cache of upstream, never a source of
/// truth: whatever history it had is discarded. Clone failures are not
/// retried.
#[instrument(skip(vcs))]
pub async fn ensure_mirror(
    vcs: &dyn VersionControl,
    bare: &Path,
    remote_url: &str,
    target_branch: &str,
) -> Result<String, GitError> {
    if bare.exists() {
        info!("updating existing bare mirror");
    } else {
        info!(url = remote_url, "cloning bare mirror");
        vcs.clone_bare(remote_url, bare).await?;
    }

    // A bare clone maps remote heads straight onto local heads; route them
    // to refs/remotes/origin/ so the local branch can be reset from them.
    vcs.set_config(bare, "remote.origin.fetch", FETCH_REFSPEC).await?;
    vcs.fetch(bare, "origin").await?;

    let upstream = remote_ref(target_branch);
    let commit = vcs
        .resolve_ref(bare, &upstream)
        .await?
        .ok_or_else(|| GitError::BranchNotFound {
            branch: target_branch.to_string(),
            reference: upstream.clone(),
        })?;

    let local = format!("refs/heads/{}", target_branch);
    vcs.update_ref(bare, &local, &commit).await?;
    info!(branch = target_branch, commit = %commit, "reset local branch to upstream");
    Ok(commit)
}
