mod config;
mod exec;
mod git;
mod pr;
mod report;
mod workflow;
mod workspace;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use git::GitCli;
use workflow::WorkflowError;

/// ado-pr-stage: stages Azure DevOps Pull Requests for review. PR metadata,
/// a bare mirror of the repository, a worktree of the PR branch merged with
/// master, and the resulting diff.
#[derive(Parser, Debug)]
#[command(name = "ado-pr-stage", version, about)]
struct Cli {
    /// Config file (defaults to .ado-pr-stage.toml in the current directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Sandbox root holding bare-repos/ and pr-data/ (overrides workspace.root)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch PR metadata, refresh the bare mirror and write the merged diff
    Fetch(TargetArgs),
    /// Remove a PR's worktree and data directory
    Cleanup(TargetArgs),
    /// List staged pull requests
    List,
}

/// `<REPO> <PR>`, or just `<PR>` when the repository comes from a PR URL
/// or azure.default_repo.
#[derive(Args, Debug)]
struct TargetArgs {
    /// Repository name (or the PR reference when no repository is given)
    #[arg(value_name = "REPO|PR")]
    repo_or_pr: String,

    /// PR id or Azure DevOps pull request URL
    #[arg(value_name = "PR")]
    pr: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), WorkflowError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(root) = cli.root {
        config.workspace.root = root;
    }
    debug!(root = %config.workspace.root.display(), backend = ?config.azure.backend, "loaded configuration");

    match cli.command {
        Command::Fetch(args) => {
            let target = workflow::resolve_target(&args.repo_or_pr, args.pr.as_deref(), &config)?;
            target.apply_to(&mut config);
            info!(repo = %target.repo, pr = target.pr_id(), "staging pull request");

            let provider = pr::provider::from_config(&config)?;
            let outcome = workflow::fetch(&config, provider.as_ref(), &GitCli::new(), &target).await?;
            print!("{}", report::fetch_summary(&outcome));
        }
        Command::Cleanup(args) => {
            let target = workflow::resolve_target(&args.repo_or_pr, args.pr.as_deref(), &config)?;
            let outcome = workflow::cleanup(&config, &GitCli::new(), &target).await?;
            print!("{}", report::cleanup_summary(&outcome));
        }
        Command::List => {
            let items = workflow::list(&config)?;
            print!("{}", report::work_item_table(&items));
        }
    }
    Ok(())
}
