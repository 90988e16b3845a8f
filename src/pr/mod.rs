pub mod diff;
pub mod metadata;
pub mod provider;
pub mod types;

pub use provider::PrMetadataProvider;
pub use types::{PrMetadata, PrRef};

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::workspace::Layout;

#[derive(Debug, Error)]
pub enum PrError {
    #[error("Invalid PR reference '{0}': expected a PR id or an Azure DevOps pull request URL")]
    InvalidReference(String),

    #[error("'{0}' is not an ADO PR URL")]
    NotAdo(String),

    #[error("Not authenticated with Azure DevOps: {0}")]
    NotAuthenticated(String),

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Failed to fetch PR {pr_id} from repository {repo}: {reason}")]
    FetchFailed {
        pr_id: u64,
        repo: String,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Failed to write PR metadata: {0}")]
    Write(#[from] std::io::Error),
}

/// Parse a PR reference: either a bare id (`42`) or an ADO web URL such as
/// `https://dev.azure.com/{org}/{project}/_git/{repo}/pullrequest/{id}`.
///
/// URLs of any other shape (GitHub, GitLab, ...) are rejected with
/// PrError::NotAdo; anything that is neither an id nor a URL is
/// PrError::InvalidReference.
pub fn parse_pr_ref(input: &str) -> Result<PrRef, PrError> {
    let input = input.trim();
    let invalid = || PrError::InvalidReference(input.to_string());

    if !input.is_empty() && input.bytes().all(|b| b.is_ascii_digit()) {
        let pr_id = input.parse::<u64>().map_err(|_| invalid())?;
        if pr_id == 0 {
            return Err(invalid());
        }
        return Ok(PrRef::from_id(pr_id));
    }

    let parsed = reqwest::Url::parse(input).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid());
    }
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();

    let segments: Vec<String> = parsed
        .path_segments()
        .map(|segments| {
            segments
                .filter(|segment| !segment.is_empty())
                .map(|segment| {
                    urlencoding::decode(segment)
                        .map(|decoded| decoded.into_owned())
                        .unwrap_or_else(|_| segment.to_string())
                })
                .collect()
        })
        .unwrap_or_default();

    let not_ado = || PrError::NotAdo(input.to_string());
    let git_idx = segments.iter().position(|s| s == "_git").ok_or_else(not_ado)?;
    let pr_idx = segments
        .iter()
        .position(|s| s.eq_ignore_ascii_case("pullrequest"))
        .ok_or_else(not_ado)?;
    if pr_idx != git_idx + 2 {
        return Err(not_ado());
    }

    let repository = segments[git_idx + 1].clone();
    let pr_id = segments
        .get(pr_idx + 1)
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(invalid)?;

    // A repository named after its project drops the project segment.
    let project = match git_idx {
        0 => None,
        i => Some(segments[i - 1].clone()),
    };
    let (organization, project) = if host == "dev.azure.com" {
        let organization = segments.first().filter(|_| git_idx >= 1).cloned();
        let project = project.filter(|_| git_idx >= 2).or_else(|| Some(repository.clone()));
        (organization, project)
    } else if let Some(org) = host.strip_suffix(".visualstudio.com") {
        let project = project.or_else(|| Some(repository.clone()));
        (Some(org.to_string()), project)
    } else {
        // On-prem server: collection layout varies, keep configured defaults.
        (None, None)
    };

    Ok(PrRef {
        pr_id,
        repository: Some(repository),
        organization,
        project,
    })
}

/// Fetch PR metadata with a single provider call and write metadata.md.
///
/// No retries: a missing PR is not a transient condition.
#[instrument(skip(provider, layout), fields(provider = provider.name()))]
pub async fn fetch_metadata(
    provider: &dyn PrMetadataProvider,
    layout: &Layout,
    repo: &str,
    pr_id: u64,
) -> Result<PrMetadata, PrError> {
    debug!("requesting PR details");
    let raw = provider.fetch_pull_request(repo, pr_id).await?;
    let metadata = PrMetadata::from_raw(repo, pr_id, raw);

    let path = layout.metadata_path(repo, pr_id);
    metadata::write(&metadata, &path)?;
    info!(path = %path.display(), branch = %metadata.source_branch, "wrote PR metadata");
    Ok(metadata)
}
