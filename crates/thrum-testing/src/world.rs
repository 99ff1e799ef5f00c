use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use tempfile::TempDir;
use thrum_runtime::{Config, Daemon, ThrumPaths};
use thrum_sync::Peer;

/// One temp git repository a daemon can be opened on. The directory is
/// removed when the world drops.
pub struct TestWorld {
    _dir: TempDir,
    root: PathBuf,
}

impl TestWorld {
    pub fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let root = dir.path().to_path_buf();
        git(&root, &["init", "--quiet"])?;
        Ok(Self { _dir: dir, root })
    }

    /// A repository configured to sync with `origin_url`.
    pub fn with_origin(origin_url: &str) -> Result<Self> {
        let world = Self::new()?;
        let paths = ThrumPaths::resolve(&world.root)?;
        let config = Config {
            peers: vec![Peer {
                name: Some("origin".to_string()),
                url: origin_url.to_string(),
            }],
            ..Default::default()
        };
        config.save_to(&paths.config_path())?;
        Ok(world)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn open_daemon(&self) -> Result<Arc<Daemon>> {
        Daemon::open(&self.root).context("opening daemon on test world")
    }
}

/// Two repositories joined through a bare origin: the setup for every
/// cross-peer scenario. Returns (peer1, peer2, origin keep-alive).
pub fn linked_pair() -> Result<(TestWorld, TestWorld, TempDir)> {
    let origin_dir = TempDir::new()?;
    let origin = origin_dir.path().join("origin.git");
    std::fs::create_dir_all(&origin)?;
    git(&origin, &["init", "--bare", "--quiet"])?;

    let url = origin.display().to_string();
    Ok((
        TestWorld::with_origin(&url)?,
        TestWorld::with_origin(&url)?,
        origin_dir,
    ))
}

fn git(cwd: &Path, args: &[&str]) -> Result<()> {
    let status = Command::new("git")
        .current_dir(cwd)
        .args(args)
        .status()
        .with_context(|| format!("running git {:?}", args))?;
    ensure!(status.success(), "git {:?} failed in {}", args, cwd.display());
    Ok(())
}
