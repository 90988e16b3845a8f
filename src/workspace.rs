//! On-disk layout of the review sandbox.
//!
//! ```text
//! <root>/bare-repos/<repo>/                  bare mirror
//! <root>/pr-data/<repo>-<id>/metadata.md     PR summary
//! <root>/pr-data/<repo>-<id>/diff.patch      merged diff against master
//! <root>/pr-data/<repo>-<id>/worktree/       transient checkout
//! <root>/locks/<repo>.lock                   advisory lock
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

const BARE_REPOS: &str = "bare-repos";
const PR_DATA: &str = "pr-data";
const LOCKS: &str = "locks";
pub const METADATA_FILE: &str = "metadata.md";
pub const DIFF_FILE: &str = "diff.patch";
pub const WORKTREE_DIR: &str = "worktree";

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("Invalid repository name '{0}'")]
    InvalidRepository(String),

    #[error("Repository {0} is busy: another fetch or cleanup holds its lock")]
    Busy(String),

    #[error("Workspace I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reject names that would escape the sandbox or collide with path syntax.
pub fn validate_repo_name(repo: &str) -> Result<(), LayoutError> {
    let invalid = repo.trim().is_empty()
        || repo == "."
        || repo == ".."
        || repo.contains('/')
        || repo.contains('\\')
        || repo.chars().any(char::is_control);
    if invalid {
        return Err(LayoutError::InvalidRepository(repo.to_string()));
    }
    Ok(())
}

/// Path conventions rooted at the sandbox directory.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Relative roots are anchored to the current directory, since git runs
    /// worktree commands from inside the bare mirror.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self { root }
    }

    pub fn bare_repo(&self, repo: &str) -> PathBuf {
        self.root.join(BARE_REPOS).join(repo)
    }

    pub fn pr_data_root(&self) -> PathBuf {
        self.root.join(PR_DATA)
    }

    pub fn pr_dir(&self, repo: &str, pr_id: u64) -> PathBuf {
        self.pr_data_root().join(format!("{}-{}", repo, pr_id))
    }

    pub fn metadata_path(&self, repo: &str, pr_id: u64) -> PathBuf {
        self.pr_dir(repo, pr_id).join(METADATA_FILE)
    }

    pub fn diff_path(&self, repo: &str, pr_id: u64) -> PathBuf {
        self.pr_dir(repo, pr_id).join(DIFF_FILE)
    }

    pub fn worktree_path(&self, repo: &str, pr_id: u64) -> PathBuf {
        self.pr_dir(repo, pr_id).join(WORKTREE_DIR)
    }

    /// Take the per-repository lock, failing immediately if it is held.
    pub fn lock_repo(&self, repo: &str) -> Result<RepoLock, LayoutError> {
        validate_repo_name(repo)?;
        let dir = self.root.join(LOCKS);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.lock", repo));

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| LayoutError::Busy(repo.to_string()))?;

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        debug!(path = %path.display(), "acquired repository lock");
        Ok(RepoLock { file, path })
    }

    /// Enumerate staged work items under pr-data/, sorted by directory name.
    pub fn list_work_items(&self) -> Result<Vec<WorkItem>, LayoutError> {
        let root = self.pr_data_root();
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut items = Vec::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((repo, pr_id)) = split_work_item_name(&name) else {
                debug!(name = %name, "skipping unrecognised pr-data entry");
                continue;
            };
            let dir = entry.path();
            items.push(WorkItem {
                repo,
                pr_id,
                has_metadata: dir.join(METADATA_FILE).is_file(),
                has_diff: dir.join(DIFF_FILE).is_file(),
                has_worktree: dir.join(WORKTREE_DIR).is_dir(),
            });
        }
        items.sort_by(|a, b| a.repo.cmp(&b.repo).then(a.pr_id.cmp(&b.pr_id)));
        Ok(items)
    }
}

/// `svc-api-42` -> (`svc-api`, 42). Repository names may contain dashes.
fn split_work_item_name(name: &str) -> Option<(String, u64)> {
    let (repo, id) = name.rsplit_once('-')?;
    let pr_id = id.parse::<u64>().ok()?;
    (!repo.is_empty()).then(|| (repo.to_string(), pr_id))
}

/// A staged PR found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub repo: String,
    pub pr_id: u64,
    pub has_metadata: bool,
    pub has_diff: bool,
    pub has_worktree: bool,
}

/// Exclusive advisory lock on one repository; released on drop.
#[derive(Debug)]
pub struct RepoLock {
    file: File,
    path: PathBuf,
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), error = %e, "failed to release repository lock");
        }
    }
}

/// Replace `path` with `contents` via a temp file in the same directory and
/// a rename, so the target is either the old or the complete new file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
