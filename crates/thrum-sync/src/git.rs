use std::path::{Path, PathBuf};
use std::process::Command;

use crate::{Error, Result};

/// Run a git command in `cwd`, returning trimmed stdout.
///
/// Commits made by the sync engine carry a fixed identity and never sign,
/// so cycles work on machines with no git configuration at all.
pub(crate) fn git(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .current_dir(cwd)
        .args([
            "-c",
            "user.name=thrum",
            "-c",
            "user.email=thrum@localhost",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .output()?;

    if !output.status.success() {
        return Err(Error::Git {
            command: args.join(" "),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Like [`git`] but failure is expected flow control (probes, merges).
pub(crate) fn git_ok(cwd: &Path, args: &[&str]) -> bool {
    git(cwd, args).is_ok()
}

pub(crate) fn git_lines(cwd: &Path, args: &[&str]) -> Result<Vec<String>> {
    Ok(git(cwd, args)?
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect())
}

/// Resolve the repository's common git dir (shared across worktrees).
pub fn git_common_dir(repo_root: &Path) -> Result<PathBuf> {
    if !git_ok(repo_root, &["rev-parse", "--is-inside-work-tree"]) {
        return Err(Error::NotARepo(repo_root.display().to_string()));
    }
    let common = git(repo_root, &["rev-parse", "--git-common-dir"])?;
    let common_path = PathBuf::from(&common);
    Ok(if common_path.is_absolute() {
        common_path
    } else {
        repo_root.join(common_path)
    })
}

/// Ensure the hidden sync worktree exists and is checked out on `branch`,
/// returning its path (`<git-common-dir>/thrum-sync/<branch>/`).
///
/// The branch is created as an orphan rooted at an empty tree, so sync
/// history never touches the repository's own history.
pub fn ensure_sync_worktree(repo_root: &Path, branch: &str) -> Result<PathBuf> {
    let common = git_common_dir(repo_root)?;
    let worktree = common.join("thrum-sync").join(branch);

    if worktree.join(".git").exists() {
        return Ok(worktree);
    }

    let branch_ref = format!("refs/heads/{}", branch);
    if !git_ok(repo_root, &["rev-parse", "--verify", "--quiet", &branch_ref]) {
        // Orphan root: empty tree -> parentless commit -> branch.
        let empty_tree = git(repo_root, &["hash-object", "-t", "tree", "/dev/null"])?;
        let root_commit = git(
            repo_root,
            &["commit-tree", &empty_tree, "-m", "thrum sync root"],
        )?;
        git(repo_root, &["branch", branch, &root_commit])?;
    }

    // A stale registration from a deleted directory blocks worktree add.
    let _ = git(repo_root, &["worktree", "prune"]);
    git(
        repo_root,
        &[
            "worktree",
            "add",
            worktree.to_string_lossy().as_ref(),
            branch,
        ],
    )?;

    Ok(worktree)
}
