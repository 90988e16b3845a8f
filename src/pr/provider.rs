use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info, instrument};

use super::types::RawPullRequest;
use super::PrError;
use crate::config::{Backend, Config};
use crate::exec;

const API_VERSION: &str = "7.1";

/// Source of pull request metadata plus the session checks that gate it.
#[async_trait]
pub trait PrMetadataProvider: Send + Sync {
    /// Short name used in logs ("az-cli", "rest").
    fn name(&self) -> &str;

    /// Fail fast when there is no usable session.
    async fn ensure_authenticated(&self) -> Result<(), PrError>;

    /// Make organization/project the defaults for later calls.
    async fn configure_defaults(&self) -> Result<(), PrError>;

    /// Read one pull request. Called exactly once per fetch.
    async fn fetch_pull_request(&self, repo: &str, pr_id: u64) -> Result<RawPullRequest, PrError>;
}

/// Build the provider selected by `azure.backend`.
pub fn from_config(config: &Config) -> Result<Box<dyn PrMetadataProvider>, PrError> {
    let organization_url = config.organization_url()?;
    let project = config.project()?.to_string();
    let provider: Box<dyn PrMetadataProvider> = match config.azure.backend {
        Backend::Cli => Box::new(AzCliProvider::new(organization_url, project)),
        Backend::Rest => Box::new(RestProvider::new(
            organization_url,
            project,
            config.azure.token.clone(),
        )),
    };
    Ok(provider)
}

/// Talks to Azure DevOps through the `az` CLI and its devops extension.
pub struct AzCliProvider {
    program: String,
    organization_url: String,
    project: String,
}

impl AzCliProvider {
    pub fn new(organization_url: String, project: String) -> Self {
        Self::with_program("az", organization_url, project)
    }

    /// Use a different executable in place of `az`.
    pub fn with_program(program: &str, organization_url: String, project: String) -> Self {
        Self {
            program: program.to_string(),
            organization_url,
            project,
        }
    }
}

#[async_trait]
impl PrMetadataProvider for AzCliProvider {
    fn name(&self) -> &str {
        "az-cli"
    }

    #[instrument(skip(self))]
    async fn ensure_authenticated(&self) -> Result<(), PrError> {
        let output = exec::run(&self.program, ["account", "show", "--output", "none"], None)
            .await
            .map_err(|e| PrError::NotAuthenticated(format!("cannot run {}: {}", self.program, e)))?;
        if !output.success {
            return Err(PrError::NotAuthenticated(
                "no active az session, run `az login`".to_string(),
            ));
        }
        debug!("az session is active");
        Ok(())
    }

    #[instrument(skip(self), fields(org = %self.organization_url, project = %self.project))]
    async fn configure_defaults(&self) -> Result<(), PrError> {
        let organization = format!("organization={}", self.organization_url);
        let project = format!("project={}", self.project);
        let args = [
            "devops",
            "configure",
            "--defaults",
            organization.as_str(),
            project.as_str(),
        ];
        let command = exec::display(&self.program, args);

        let output = exec::run(&self.program, args, None)
            .await
            .map_err(|e| PrError::CommandFailed {
                command: command.clone(),
                stderr: e.to_string(),
            })?;
        if !output.success {
            return Err(PrError::CommandFailed {
                command,
                stderr: output.message(),
            });
        }
        info!("configured az devops defaults");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch_pull_request(&self, repo: &str, pr_id: u64) -> Result<RawPullRequest, PrError> {
        let fetch_failed = |reason: String| PrError::FetchFailed {
            pr_id,
            repo: repo.to_string(),
            reason,
        };

        let id = pr_id.to_string();
        let args = [
            "repos",
            "pr",
            "show",
            "--id",
            id.as_str(),
            "--organization",
            self.organization_url.as_str(),
            "--output",
            "json",
        ];
        let output = exec::run(&self.program, args, None)
            .await
            .map_err(|e| fetch_failed(e.to_string()))?;
        if !output.success {
            return Err(fetch_failed(output.message()));
        }

        let raw = serde_json::from_slice(&output.stdout)
            .map_err(|e| fetch_failed(format!("unexpected az output: {}", e)))?;
        debug!(bytes = output.stdout.len(), "received PR details");
        Ok(raw)
    }
}

/// Talks to the Azure DevOps REST API directly with a personal access token.
pub struct RestProvider {
    client: reqwest::Client,
    organization_url: String,
    project: String,
    token: Option<String>,
}

impl RestProvider {
    pub fn new(organization_url: String, project: String, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            organization_url: organization_url.trim_end_matches('/').to_string(),
            project,
            token,
        }
    }

    fn token(&self) -> Result<&str, PrError> {
        self.token.as_deref().ok_or_else(|| {
            PrError::NotAuthenticated(
                "no personal access token, set AZURE_DEVOPS_EXT_PAT or azure.token".to_string(),
            )
        })
    }

    fn get(&self, url: &str, token: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("User-Agent", "ado-pr-stage")
            .header("Accept", "application/json")
            .basic_auth("", Some(token))
    }
}

#[async_trait]
impl PrMetadataProvider for RestProvider {
    fn name(&self) -> &str {
        "rest"
    }

    #[instrument(skip(self), fields(org = %self.organization_url))]
    async fn ensure_authenticated(&self) -> Result<(), PrError> {
        let token = self.token()?;
        let url = format!("{}/_apis/connectionData", self.organization_url);
        let response = self
            .get(&url, token)
            .send()
            .await
            .map_err(|e| PrError::NotAuthenticated(e.to_string()))?;

        // A rejected PAT gets a 203 sign-in page rather than a 401.
        let status = response.status();
        if !status.is_success() || status == StatusCode::NON_AUTHORITATIVE_INFORMATION {
            return Err(PrError::NotAuthenticated(format!(
                "token rejected by {} ({})",
                self.organization_url, status
            )));
        }
        debug!("personal access token accepted");
        Ok(())
    }

    async fn configure_defaults(&self) -> Result<(), PrError> {
        debug!("REST requests carry organization and project in the URL");
        Ok(())
    }

    #[instrument(skip(self), fields(project = %self.project))]
    async fn fetch_pull_request(&self, repo: &str, pr_id: u64) -> Result<RawPullRequest, PrError> {
        let fetch_failed = |reason: String| PrError::FetchFailed {
            pr_id,
            repo: repo.to_string(),
            reason,
        };

        let token = self.token()?;
        let url = format!(
            "{}/{}/_apis/git/repositories/{}/pullrequests/{}?api-version={}",
            self.organization_url, self.project, repo, pr_id, API_VERSION
        );

        let response = self
            .get(&url, token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| fetch_failed(e.to_string()))?;
        let raw = response
            .json::<RawPullRequest>()
            .await
            .map_err(|e| fetch_failed(e.to_string()))?;
        debug!("received PR details");
        Ok(raw)
    }
}
