/// Line statistics for a staged diff.patch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// Paths touched, in patch order (`b/` side, `a/` for deletions).
    pub files: Vec<String>,
    pub additions: usize,
    pub deletions: usize,
    /// Unresolved conflict blocks (`<<<<<<<` lines) carried into the patch.
    pub conflict_markers: usize,
}

impl DiffSummary {
    pub fn has_conflicts(&self) -> bool {
        self.conflict_markers > 0
    }
}

/// Summarise a unified diff as produced by `git diff`.
///
/// Each file section starts with `diff --git a/{path} b/{path}`; the
/// `---`/`+++` header lines are not counted as changes. Lines outside a
/// file section are ignored.
pub fn summarize(raw_diff: &str) -> DiffSummary {
    let mut summary = DiffSummary::default();
    let mut in_file = false;
    let mut in_header = false;

    for line in raw_diff.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            summary.files.push(header_path(rest));
            in_file = true;
            in_header = true;
            continue;
        }
        if line.starts_with("diff --cc ") || line.starts_with("diff --combined ") {
            // combined diff of an unmerged path
            let path = line.split_whitespace().nth(2).unwrap_or_default();
            summary.files.push(path.to_string());
            in_file = true;
            in_header = true;
            continue;
        }
        if !in_file {
            continue;
        }
        if line.starts_with("@@") {
            in_header = false;
            continue;
        }
        if in_header {
            continue;
        }

        if let Some(added) = line.strip_prefix('+') {
            summary.additions += 1;
            if added.starts_with("<<<<<<<") {
                summary.conflict_markers += 1;
            }
        } else if line.starts_with('-') {
            summary.deletions += 1;
        }
    }
    summary
}

fn header_path(rest: &str) -> String {
    let mut parts = rest.split_whitespace();
    let a_path = parts.next().unwrap_or_default();
    let b_path = parts.next().unwrap_or(a_path);
    b_path
        .strip_prefix("b/")
        .or_else(|| a_path.strip_prefix("a/"))
        .unwrap_or(b_path)
        .to_string()
}
