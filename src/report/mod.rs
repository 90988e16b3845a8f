use colored::Colorize;

use crate::workflow::{CleanupOutcome, FetchOutcome};
use crate::workspace::WorkItem;

/// Terminal summary of a staged PR.
///
/// PR #42: "Fix login"
/// Repository: svc | Branch: feature/x | Author: Alice
/// Merged with master @ 1a2b3c4d | Files changed: 3 | +20 -4
///
///   metadata  pr-data/svc-42/metadata.md
///   diff      pr-data/svc-42/diff.patch
///   worktree  pr-data/svc-42/worktree
pub fn fetch_summary(outcome: &FetchOutcome) -> String {
    let meta = &outcome.metadata;
    let summary = &outcome.summary;
    let short_commit: String = outcome.mirror_commit.chars().take(8).collect();

    let mut out = String::new();
    out.push_str(&format!(
        "{} \"{}\"\n",
        format!("PR #{}:", meta.pr_id).bold(),
        meta.title
    ));
    out.push_str(&format!(
        "Repository: {} | Branch: {} | Author: {}\n",
        meta.repository, meta.source_branch, meta.author
    ));
    out.push_str(&format!(
        "Merged with {} @ {} | Files changed: {} | {} {}\n\n",
        outcome.target_branch,
        short_commit,
        summary.files.len(),
        format!("+{}", summary.additions).green(),
        format!("-{}", summary.deletions).red(),
    ));
    out.push_str(&format!("  metadata  {}\n", outcome.metadata_path.display()));
    out.push_str(&format!("  diff      {}\n", outcome.diff_path.display()));
    out.push_str(&format!("  worktree  {}\n", outcome.worktree_path.display()));

    if outcome.merge.is_conflicted() || summary.has_conflicts() {
        out.push('\n');
        out.push_str(&format!(
            "{} merging {} left {} conflict block(s); the diff includes unresolved conflict markers\n",
            "warning:".yellow().bold(),
            outcome.target_branch,
            summary.conflict_markers
        ));
    }
    out
}

pub fn cleanup_summary(outcome: &CleanupOutcome) -> String {
    match outcome {
        CleanupOutcome::NothingToDo { dir } => {
            format!("Nothing to clean up ({} does not exist)\n", dir.display())
        }
        CleanupOutcome::Removed { dir } => {
            format!("{} {}\n", "Removed".green().bold(), dir.display())
        }
    }
}

pub fn work_item_table(items: &[WorkItem]) -> String {
    if items.is_empty() {
        return "No staged pull requests.\n".to_string();
    }

    let width = items
        .iter()
        .map(|item| item.repo.len())
        .max()
        .unwrap_or(0)
        .max("REPO".len());
    let mut out = format!("{:<width$}  {:>6}  {}\n", "REPO", "PR", "ARTIFACTS", width = width);
    for item in items {
        let mut artifacts = Vec::new();
        if item.has_metadata {
            artifacts.push("metadata");
        }
        if item.has_diff {
            artifacts.push("diff");
        }
        if item.has_worktree {
            artifacts.push("worktree");
        }
        let artifacts = if artifacts.is_empty() {
            "(empty)".dimmed().to_string()
        } else {
            artifacts.join(", ")
        };
        out.push_str(&format!(
            "{:<width$}  {:>6}  {}\n",
            item.repo,
            item.pr_id,
            artifacts,
            width = width
        ));
    }
    out
}
