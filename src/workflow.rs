use std::path::PathBuf;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::{Config, ConfigError};
use crate::git::worktree::{self, WorktreeRequest};
use crate::git::{mirror, GitError, MergeOutcome, VersionControl};
use crate::pr::diff::{self, DiffSummary};
use crate::pr::{self, PrError, PrMetadata, PrMetadataProvider, PrRef};
use crate::workspace::{self, Layout, LayoutError, WorkItem};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pr(#[from] PrError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("No repository given and no default configured (pass <REPO> or set azure.default_repo)")]
    MissingRepository,

    #[error("Repository '{given}' does not match '{from_url}' from the PR URL")]
    RepositoryMismatch { given: String, from_url: String },

    #[error("Failed to remove {path}: {source}")]
    Cleanup {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// The (repository, PR) pair a command operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub repo: String,
    pub pr: PrRef,
}

impl Target {
    pub fn pr_id(&self) -> u64 {
        self.pr.pr_id
    }

    /// Organization/project named in the PR URL win over configured defaults.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(org) = &self.pr.organization {
            config.azure.organization = Some(org.clone());
        }
        if let Some(project) = &self.pr.project {
            config.azure.project = Some(project.clone());
        }
    }
}

/// Resolve `<REPO> <PR>` or `<PR>` command arguments.
///
/// The PR reference is parsed before anything touches the network, so a
/// malformed or non-ADO reference fails here.
pub fn resolve_target(
    first: &str,
    second: Option<&str>,
    config: &Config,
) -> Result<Target, WorkflowError> {
    let (repo, pr) = match second {
        Some(reference) => {
            let pr = pr::parse_pr_ref(reference)?;
            if let Some(from_url) = &pr.repository {
                if from_url != first {
                    return Err(WorkflowError::RepositoryMismatch {
                        given: first.to_string(),
                        from_url: from_url.clone(),
                    });
                }
            }
            (first.to_string(), pr)
        }
        None => {
            let pr = pr::parse_pr_ref(first)?;
            let repo = pr
                .repository
                .clone()
                .or_else(|| config.azure.default_repo.clone())
                .ok_or(WorkflowError::MissingRepository)?;
            (repo, pr)
        }
    };

    workspace::validate_repo_name(&repo)?;
    Ok(Target { repo, pr })
}

/// What a successful fetch left on disk.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub metadata: PrMetadata,
    pub merge: MergeOutcome,
    pub summary: DiffSummary,
    pub target_branch: String,
    pub mirror_commit: String,
    pub metadata_path: PathBuf,
    pub diff_path: PathBuf,
    pub worktree_path: PathBuf,
}

/// Stage one PR: auth gate, defaults, metadata, mirror refresh, merged
/// worktree and diff. Each step runs once and in order; the first fatal
/// error stops the workflow.
#[instrument(skip_all, fields(repo = %target.repo, pr = target.pr_id()))]
pub async fn fetch(
    config: &Config,
    provider: &dyn PrMetadataProvider,
    vcs: &dyn VersionControl,
    target: &Target,
) -> Result<FetchOutcome, WorkflowError> {
    let repo = target.repo.as_str();
    let pr_id = target.pr_id();
    let layout = Layout::new(&config.workspace.root);
    let target_branch = config.workspace.target_branch.as_str();

    info!("checking authentication");
    provider.ensure_authenticated().await?;
    provider.configure_defaults().await?;

    let _lock = layout.lock_repo(repo)?;

    info!("fetching PR metadata");
    let metadata = pr::fetch_metadata(provider, &layout, repo, pr_id).await?;

    info!("refreshing bare mirror");
    let bare = layout.bare_repo(repo);
    let remote_url = config.remote_url(repo)?;
    let mirror_commit = mirror::ensure_mirror(vcs, &bare, &remote_url, target_branch).await?;

    info!(branch = %metadata.source_branch, "building worktree and diff");
    let worktree_path = layout.worktree_path(repo, pr_id);
    let diff_path = layout.diff_path(repo, pr_id);
    let built = worktree::build_worktree_diff(
        vcs,
        WorktreeRequest {
            bare: &bare,
            worktree: &worktree_path,
            diff_path: &diff_path,
            branch: &metadata.source_branch,
            target_branch,
            fail_on_conflict: config.workspace.fail_on_conflict,
        },
    )
    .await?;

    let summary = diff::summarize(&String::from_utf8_lossy(&built.diff));
    info!(
        files = summary.files.len(),
        additions = summary.additions,
        deletions = summary.deletions,
        "PR staged"
    );

    Ok(FetchOutcome {
        metadata_path: layout.metadata_path(repo, pr_id),
        metadata,
        merge: built.merge,
        summary,
        target_branch: target_branch.to_string(),
        mirror_commit,
        diff_path,
        worktree_path,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// No data directory existed; nothing was touched.
    NothingToDo { dir: PathBuf },
    Removed { dir: PathBuf },
}

/// Remove a PR's worktree registration and data directory. Idempotent.
#[instrument(skip_all, fields(repo = %target.repo, pr = target.pr_id()))]
pub async fn cleanup(
    config: &Config,
    vcs: &dyn VersionControl,
    target: &Target,
) -> Result<CleanupOutcome, WorkflowError> {
    let repo = target.repo.as_str();
    let pr_id = target.pr_id();
    let layout = Layout::new(&config.workspace.root);
    let dir = layout.pr_dir(repo, pr_id);

    if !dir.exists() {
        info!(dir = %dir.display(), "nothing to clean up");
        return Ok(CleanupOutcome::NothingToDo { dir });
    }

    let _lock = layout.lock_repo(repo)?;

    // A registration can outlive its directory, so the mirror is consulted
    // even when the worktree is already gone.
    let worktree_path = layout.worktree_path(repo, pr_id);
    let bare = layout.bare_repo(repo);
    if worktree_path.exists() || bare.exists() {
        if let Err(e) = worktree::discard_worktree(vcs, &bare, &worktree_path).await {
            // The data directory removal below retries the same path.
            warn!(error = %e, "failed to discard worktree");
        }
    }

    tokio::fs::remove_dir_all(&dir)
        .await
        .map_err(|source| WorkflowError::Cleanup {
            path: dir.display().to_string(),
            source,
        })?;
    info!(dir = %dir.display(), "removed PR data");
    Ok(CleanupOutcome::Removed { dir })
}

/// Staged work items under the configured root.
pub fn list(config: &Config) -> Result<Vec<WorkItem>, WorkflowError> {
    Ok(Layout::new(&config.workspace.root).list_work_items()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::test_support::*;
    use crate::git::GitCli;
    use crate::pr::types::{IdentityRef, RawPullRequest};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Canned provider standing in for az / REST.
    struct FakeProvider {
        authenticated: bool,
        branch: String,
        fetches: AtomicUsize,
    }

    impl FakeProvider {
        fn new(branch: &str) -> Self {
            Self {
                authenticated: true,
                branch: branch.to_string(),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PrMetadataProvider for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }

        async fn ensure_authenticated(&self) -> Result<(), PrError> {
            if self.authenticated {
                Ok(())
            } else {
                Err(PrError::NotAuthenticated("logged out".to_string()))
            }
        }

        async fn configure_defaults(&self) -> Result<(), PrError> {
            Ok(())
        }

        async fn fetch_pull_request(&self, _repo: &str, _pr_id: u64) -> Result<RawPullRequest, PrError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(RawPullRequest {
                source_ref_name: Some(format!("refs/heads/{}", self.branch)),
                created_by: Some(IdentityRef {
                    display_name: Some("Alice".to_string()),
                }),
                description: Some("Fixes bug".to_string()),
                creation_date: Some("2024-03-01T10:00:00Z".to_string()),
                title: Some("Fix login".to_string()),
            })
        }
    }

    fn test_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.workspace.root = dir.join("sandbox");
        config.workspace.remote_base = Some(remote_base(dir));
        config
    }

    fn target(repo: &str, pr_id: u64) -> Target {
        Target {
            repo: repo.to_string(),
            pr: PrRef::from_id(pr_id),
        }
    }

    fn registrations(config: &Config) -> usize {
        let bare = Layout::new(&config.workspace.root).bare_repo("svc");
        registered_worktrees(&bare)
            .iter()
            .filter(|p| p.ends_with("pr-data/svc-42/worktree"))
            .count()
    }

    #[test]
    fn test_resolve_repo_and_id() {
        let config = Config::default();
        let t = resolve_target("svc", Some("42"), &config).unwrap();
        assert_eq!(t, target("svc", 42));
    }

    #[test]
    fn test_resolve_id_uses_default_repo() {
        let mut config = Config::default();
        assert!(matches!(
            resolve_target("42", None, &config),
            Err(WorkflowError::MissingRepository)
        ));
        config.azure.default_repo = Some("svc".to_string());
        assert_eq!(resolve_target("42", None, &config).unwrap().repo, "svc");
    }

    #[test]
    fn test_resolve_url_supplies_repo_and_overrides() {
        let mut config = Config::default();
        config.azure.default_repo = Some("other".to_string());
        config.azure.organization = Some("configured".to_string());

        let url = "https://dev.azure.com/contoso/Platform/_git/svc/pullrequest/42";
        let t = resolve_target(url, None, &config).unwrap();
        assert_eq!(t.repo, "svc");
        assert_eq!(t.pr_id(), 42);

        t.apply_to(&mut config);
        assert_eq!(config.organization().unwrap(), "contoso");
        assert_eq!(config.project().unwrap(), "Platform");

        assert!(resolve_target("svc", Some(url), &config).is_ok());
        assert!(matches!(
            resolve_target("web", Some(url), &config),
            Err(WorkflowError::RepositoryMismatch { .. })
        ));
    }

    #[test]
    fn test_resolve_rejects_bad_input() {
        let config = Config::default();
        assert!(matches!(
            resolve_target("svc", Some("https://github.com/o/r/pull/1"), &config),
            Err(WorkflowError::Pr(PrError::NotAdo(_)))
        ));
        assert!(matches!(
            resolve_target("../svc", Some("1"), &config),
            Err(WorkflowError::Layout(LayoutError::InvalidRepository(_)))
        ));
    }

    #[tokio::test]
    async fn test_fetch_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let remote = init_remote(dir.path());
        let config = test_config(dir.path());
        let provider = FakeProvider::new("feature/x");

        let outcome = fetch(&config, &provider, &GitCli::new(), &target("svc", 42))
            .await
            .unwrap();

        assert_eq!(provider.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.mirror_commit, rev_parse(&remote, "master"));
        assert_eq!(outcome.merge, MergeOutcome::Clean);
        assert_eq!(outcome.summary.files, vec!["feature.txt"]);

        let md = std::fs::read_to_string(&outcome.metadata_path).unwrap();
        assert!(md.contains("Source Branch: feature/x"));
        assert!(md.contains("Author: Alice"));
        assert!(md.contains("## Description\nFixes bug"));
        assert!(outcome.diff_path.is_file());
        assert!(outcome.worktree_path.join("feature.txt").exists());
        assert_eq!(registrations(&config), 1);
    }

    #[tokio::test]
    async fn test_refetch_replaces_state() {
        let dir = tempfile::tempdir().unwrap();
        let remote = init_remote(dir.path());
        let config = test_config(dir.path());
        let provider = FakeProvider::new("feature/x");
        let git_cli = GitCli::new();

        fetch(&config, &provider, &git_cli, &target("svc", 42)).await.unwrap();

        git(&remote, &["checkout", "--quiet", "feature/x"]);
        commit_file(&remote, "second.txt", "more\n", "More feature work");
        git(&remote, &["checkout", "--quiet", "master"]);

        let outcome = fetch(&config, &provider, &git_cli, &target("svc", 42)).await.unwrap();
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(registrations(&config), 1);
        let diff = std::fs::read_to_string(&outcome.diff_path).unwrap();
        assert!(diff.contains("second.txt"));
    }

    #[tokio::test]
    async fn test_fetch_missing_branch_leaves_no_worktree_or_diff() {
        let dir = tempfile::tempdir().unwrap();
        init_remote(dir.path());
        let config = test_config(dir.path());
        let provider = FakeProvider::new("feature/deleted");

        let err = fetch(&config, &provider, &GitCli::new(), &target("svc", 42))
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Git(GitError::BranchNotFound { .. })));
        let layout = Layout::new(&config.workspace.root);
        assert!(!layout.worktree_path("svc", 42).exists());
        assert!(!layout.diff_path("svc", 42).exists());
    }

    #[tokio::test]
    async fn test_fetch_stops_at_auth_gate() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut provider = FakeProvider::new("feature/x");
        provider.authenticated = false;

        let err = fetch(&config, &provider, &GitCli::new(), &target("svc", 42))
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Pr(PrError::NotAuthenticated(_))));
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 0);
        assert!(!config.workspace.root.exists());
    }

    #[tokio::test]
    async fn test_fetch_refuses_locked_repository() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let provider = FakeProvider::new("feature/x");
        let _held = Layout::new(&config.workspace.root).lock_repo("svc").unwrap();

        let err = fetch(&config, &provider, &GitCli::new(), &target("svc", 42))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Layout(LayoutError::Busy(_))));
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cleanup_after_fetch() {
        let dir = tempfile::tempdir().unwrap();
        init_remote(dir.path());
        let config = test_config(dir.path());
        let git_cli = GitCli::new();
        fetch(&config, &FakeProvider::new("feature/x"), &git_cli, &target("svc", 42))
            .await
            .unwrap();

        let outcome = cleanup(&config, &git_cli, &target("svc", 42)).await.unwrap();

        let layout = Layout::new(&config.workspace.root);
        assert_eq!(
            outcome,
            CleanupOutcome::Removed {
                dir: layout.pr_dir("svc", 42)
            }
        );
        assert!(!layout.pr_dir("svc", 42).exists());
        assert_eq!(registrations(&config), 0);
        // the mirror survives cleanup
        assert!(layout.bare_repo("svc").exists());
    }

    #[tokio::test]
    async fn test_cleanup_prunes_registration_of_deleted_worktree() {
        let dir = tempfile::tempdir().unwrap();
        init_remote(dir.path());
        let config = test_config(dir.path());
        let git_cli = GitCli::new();
        fetch(&config, &FakeProvider::new("feature/x"), &git_cli, &target("svc", 42))
            .await
            .unwrap();
        let layout = Layout::new(&config.workspace.root);
        std::fs::remove_dir_all(layout.worktree_path("svc", 42)).unwrap();
        assert_eq!(registrations(&config), 1);

        let outcome = cleanup(&config, &git_cli, &target("svc", 42)).await.unwrap();

        assert!(matches!(outcome, CleanupOutcome::Removed { .. }));
        assert!(!layout.pr_dir("svc", 42).exists());
        assert_eq!(registrations(&config), 0);
    }

    #[tokio::test]
    async fn test_cleanup_without_data_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::create_dir_all(&config.workspace.root).unwrap();

        let outcome = cleanup(&config, &GitCli::new(), &target("svc", 42)).await.unwrap();

        assert!(matches!(outcome, CleanupOutcome::NothingToDo { .. }));
        let entries = std::fs::read_dir(&config.workspace.root).unwrap().count();
        assert_eq!(entries, 0);
    }

    #[tokio::test]
    async fn test_list_after_fetch() {
        let dir = tempfile::tempdir().unwrap();
        init_remote(dir.path());
        let config = test_config(dir.path());
        fetch(&config, &FakeProvider::new("feature/x"), &GitCli::new(), &target("svc", 42))
            .await
            .unwrap();

        let items = list(&config).unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].has_metadata && items[0].has_diff && items[0].has_worktree);
    }
}
