use std::path::Path;

use super::types::PrMetadata;
use crate::workspace;

const TITLE_HEADING: &str = "## Title";
const DESCRIPTION_HEADING: &str = "## Description";

/// Render metadata.md. The layout is read by downstream review prompts,
/// so field labels and headings must stay exactly as written here.
///
/// Header fields are the `Label: value` lines above `## Title`; text below
/// it is free-form and may repeat a label. The title is folded onto one line
/// and description lines that would read as one of the two section headings
/// are backslash-escaped, so each heading occurs once.
pub fn render(meta: &PrMetadata) -> String {
    let mut md = String::new();
    md.push_str(&format!("# PR #{}\n\n", meta.pr_id));
    md.push_str(&format!("Repository: {}\n", meta.repository));
    md.push_str(&format!("PR ID: {}\n", meta.pr_id));
    md.push_str(&format!("Source Branch: {}\n", meta.source_branch));
    md.push_str(&format!("Author: {}\n", meta.author));
    md.push_str(&format!("Created: {}\n\n", meta.created));
    md.push_str(&format!("{}\n{}\n\n", TITLE_HEADING, single_line(&meta.title)));
    md.push_str(&format!(
        "{}\n{}\n",
        DESCRIPTION_HEADING,
        escape_headings(&meta.description)
    ));
    md
}

fn single_line(text: &str) -> String {
    text.split(['\r', '\n'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape_headings(text: &str) -> String {
    text.lines()
        .map(|line| {
            let trimmed = line.trim_start();
            if trimmed.starts_with(TITLE_HEADING) || trimmed.starts_with(DESCRIPTION_HEADING) {
                format!("\\{}", trimmed)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Write metadata.md in one step; readers never observe a partial file.
pub fn write(meta: &PrMetadata, path: &Path) -> std::io::Result<()> {
    workspace::write_atomic(path, render(meta).as_bytes())
}
