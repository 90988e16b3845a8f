use serde::Deserialize;

pub const UNKNOWN: &str = "unknown";
pub const NO_TITLE: &str = "No title";
pub const NO_DESCRIPTION: &str = "No description";

/// A parsed PR reference: a bare id, or the pieces of an ADO web URL.
/// Extracted by parse_pr_ref() in pr/mod.rs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrRef {
    pub pr_id: u64,
    /// Repository named in the URL (`_git/<repo>`), if any.
    pub repository: Option<String>,
    pub organization: Option<String>,
    pub project: Option<String>,
}

impl PrRef {
    pub fn from_id(pr_id: u64) -> Self {
        Self {
            pr_id,
            repository: None,
            organization: None,
            project: None,
        }
    }
}

/// Pull request JSON as returned by both `az repos pr show` and the
/// `pullrequests/{id}` REST endpoint. Every field may be missing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPullRequest {
    pub source_ref_name: Option<String>,
    pub created_by: Option<IdentityRef>,
    pub description: Option<String>,
    pub creation_date: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRef {
    pub display_name: Option<String>,
}

/// Metadata about a pull request with placeholders substituted, so no
/// field is ever blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrMetadata {
    pub pr_id: u64,
    pub repository: String,
    /// Source branch without the `refs/heads/` prefix.
    pub source_branch: String,
    pub author: String,
    pub created: String,
    pub title: String,
    pub description: String,
}

impl PrMetadata {
    pub fn from_raw(repository: &str, pr_id: u64, raw: RawPullRequest) -> Self {
        let source_branch = raw
            .source_ref_name
            .as_deref()
            .map(|name| name.strip_prefix("refs/heads/").unwrap_or(name).to_string());
        let author = raw.created_by.and_then(|identity| identity.display_name);

        Self {
            pr_id,
            repository: repository.to_string(),
            source_branch: or_placeholder(source_branch, UNKNOWN),
            author: or_placeholder(author, UNKNOWN),
            created: or_placeholder(raw.creation_date, UNKNOWN),
            title: or_placeholder(raw.title, NO_TITLE),
            description: or_placeholder(raw.description, NO_DESCRIPTION),
        }
    }
}

fn or_placeholder(value: Option<String>, placeholder: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => placeholder.to_string(),
    }
}
