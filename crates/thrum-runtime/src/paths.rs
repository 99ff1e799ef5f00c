use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thrum_types::{Error, Result};

/// Local state layout under the repository root.
///
/// A `.thrum/redirect` file containing an absolute path moves the whole
/// state directory there (shared state across worktrees): the target is
/// the directory that *contains* `.thrum/`.
#[derive(Debug, Clone)]
pub struct ThrumPaths {
    repo_root: PathBuf,
    thrum_dir: PathBuf,
}

impl ThrumPaths {
    pub fn resolve(repo_root: impl Into<PathBuf>) -> Result<Self> {
        let repo_root = repo_root.into();
        let local = repo_root.join(".thrum");

        let thrum_dir = match fs::read_to_string(local.join("redirect")) {
            Ok(contents) => {
                let target = PathBuf::from(contents.trim());
                if !target.is_absolute() {
                    return Err(Error::Validation(format!(
                        ".thrum/redirect must contain an absolute path, got {}",
                        target.display()
                    )));
                }
                target.join(".thrum")
            }
            Err(_) => local,
        };

        Ok(Self {
            repo_root,
            thrum_dir,
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn thrum_dir(&self) -> &Path {
        &self.thrum_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.thrum_dir.join("config.json")
    }

    pub fn var_dir(&self) -> PathBuf {
        self.thrum_dir.join("var")
    }

    pub fn db_path(&self) -> PathBuf {
        self.var_dir().join("messages.db")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.var_dir().join("thrum.sock")
    }

    pub fn identities_dir(&self) -> PathBuf {
        self.thrum_dir.join("identities")
    }

    pub fn identity_path(&self, agent_id: &str) -> PathBuf {
        self.identities_dir().join(format!("{}.json", agent_id))
    }

    pub fn context_dir(&self) -> PathBuf {
        self.thrum_dir.join("context")
    }

    pub fn context_path(&self, agent_id: &str) -> PathBuf {
        self.context_dir().join(format!("{}.md", agent_id))
    }
}

/// write-temp-then-rename, so identity/context/config files are never
/// observed half-written.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Internal(format!("no parent directory for {}", path.display())))?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let tmp = parent.join(format!(".{}.tmp", file_name));

    let mut file = fs::File::create(&tmp)?;
    file.write_all(contents)?;
    file.sync_data()?;
    drop(file);
    fs::rename(&tmp, path)?;
    Ok(())
}
