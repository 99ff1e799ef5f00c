use std::path::Path;
use std::process::Command;

use chrono::Utc;
use thrum_types::{FileChange, WorkContext};

fn git_output(cwd: &Path, args: &[&str]) -> Option<String> {
    let out = Command::new("git").current_dir(cwd).args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

/// Snapshot the git state of a worktree for a work_context.update event.
/// Every probe is best-effort: a broken or missing repo yields an empty
/// but well-formed context rather than an error.
pub fn capture_work_context(
    worktree: &Path,
    intent: Option<String>,
    task_id: Option<String>,
) -> WorkContext {
    let branch = git_output(worktree, &["branch", "--show-current"]).unwrap_or_default();

    let unmerged_commits = git_output(worktree, &["rev-list", "--count", "@{upstream}..HEAD"])
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    let changes = git_output(worktree, &["status", "--porcelain"])
        .map(|out| {
            out.lines()
                .filter(|l| l.len() > 3)
                .map(|l| FileChange {
                    status: l[..2].trim().to_string(),
                    path: l[3..].to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    WorkContext {
        branch,
        worktree: worktree.display().to_string(),
        intent,
        task_id,
        unmerged_commits,
        changes,
        git_updated_at: Utc::now(),
    }
}
