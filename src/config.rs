use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default config file looked up in the current directory.
pub const CONFIG_FILE: &str = ".ado-pr-stage.toml";

const DEFAULT_API_BASE: &str = "https://dev.azure.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Azure DevOps {0} is not configured (set it in .ado-pr-stage.toml or the environment)")]
    Missing(&'static str),

    #[error("Unknown backend '{0}' (expected \"cli\" or \"rest\")")]
    UnknownBackend(String),
}

/// Top-level configuration loaded from .ado-pr-stage.toml.
///
/// All fields are optional; organization and project are only demanded
/// once a workflow actually needs them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub azure: AzureConfig,

    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

/// Which implementation talks to Azure DevOps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Shell out to `az repos` / `az devops`.
    #[default]
    Cli,
    /// Call the REST API with a personal access token.
    Rest,
}

impl std::str::FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cli" | "az" => Ok(Backend::Cli),
            "rest" => Ok(Backend::Rest),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AzureConfig {
    /// Organization name (`contoso`) or full URL (`https://dev.azure.com/contoso`).
    pub organization: Option<String>,
    pub project: Option<String>,
    /// Repository used when only a PR id is given.
    pub default_repo: Option<String>,
    #[serde(default)]
    pub backend: Backend,
    /// Personal access token for the REST backend. Falls back to AZURE_DEVOPS_EXT_PAT.
    pub token: Option<String>,
    /// Service root, overridable for on-prem servers.
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Sandbox directory holding bare-repos/, pr-data/ and locks/.
    pub root: PathBuf,
    /// Clone from `<remote_base>/<repo>` instead of the computed HTTPS URL.
    pub remote_base: Option<String>,
    /// Integration branch merged into every PR branch before diffing.
    pub target_branch: String,
    /// Fail the fetch instead of emitting a conflicted diff.
    pub fail_on_conflict: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            remote_base: None,
            target_branch: "master".to_string(),
            fail_on_conflict: false,
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from .ado-pr-stage.toml in the
    /// current directory. A missing default file yields the default config;
    /// an explicitly named file must exist. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => {
                let default_path = Path::new(CONFIG_FILE);
                if default_path.exists() {
                    Self::load_from(default_path)?
                } else {
                    Config::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from a specific path (useful for testing).
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Overlay environment variables. Non-empty values win over the file.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(org) = lookup("ADO_ORGANIZATION") {
            self.azure.organization = Some(org);
        }
        if let Some(project) = lookup("ADO_PROJECT") {
            self.azure.project = Some(project);
        }
        if let Some(repo) = lookup("ADO_DEFAULT_REPO") {
            self.azure.default_repo = Some(repo);
        }
        if let Some(backend) = lookup("ADO_BACKEND") {
            self.azure.backend = backend.parse()?;
        }
        if self.azure.token.is_none() {
            self.azure.token = lookup("AZURE_DEVOPS_EXT_PAT");
        }
        if let Some(root) = lookup("ADO_PR_ROOT") {
            self.workspace.root = PathBuf::from(root);
        }
        Ok(())
    }

    pub fn organization(&self) -> Result<&str, ConfigError> {
        self.azure
            .organization
            .as_deref()
            .ok_or(ConfigError::Missing("organization"))
    }

    pub fn project(&self) -> Result<&str, ConfigError> {
        self.azure
            .project
            .as_deref()
            .ok_or(ConfigError::Missing("project"))
    }

    /// Organization URL, e.g. `https://dev.azure.com/contoso`.
    pub fn organization_url(&self) -> Result<String, ConfigError> {
        let org = self.organization()?;
        if org.starts_with("https://") || org.starts_with("http://") {
            return Ok(org.trim_end_matches('/').to_string());
        }
        let base = self
            .azure
            .api_base
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/');
        Ok(format!("{}/{}", base, org))
    }

    /// Clone URL for a repository in the configured organization/project.
    pub fn remote_url(&self, repo: &str) -> Result<String, ConfigError> {
        if let Some(base) = &self.workspace.remote_base {
            return Ok(format!("{}/{}", base.trim_end_matches('/'), repo));
        }
        Ok(format!(
            "{}/{}/_git/{}",
            self.organization_url()?,
            self.project()?,
            repo
        ))
    }
}
