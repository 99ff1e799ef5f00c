use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thrum_index::{Database, queries};
use thrum_log::EventLog;
use thrum_types::Event;
use tracing::{info, warn};

use crate::git::{git, git_lines, git_ok};
use crate::merge::union_merge;
use crate::{Error, Result};

/// Called with newly projected events after each merge so the daemon can
/// fan them out to live subscribers.
pub type EventSink = Box<dyn Fn(&[Event]) + Send + Sync + 'static>;

/// One configured peer. `name` is optional; without it the peer id is a
/// short digest of the url, stable across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub url: String,
}

impl Peer {
    pub fn peer_id(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => {
                let digest = Sha256::digest(self.url.as_bytes());
                digest
                    .iter()
                    .take(6)
                    .map(|b| format!("{:02x}", b))
                    .collect()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub branch: String,
    pub interval: Duration,
    pub peers: Vec<Peer>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            branch: "a-sync".to_string(),
            interval: Duration::from_secs(15),
            peers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Ok,
    Degraded,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    Ok,
    Failing,
    Quarantined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerStatus {
    pub peer_id: String,
    pub url: String,
    pub state: PeerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncHealth {
    pub state: SyncState,
    pub peers: Vec<PeerStatus>,
    pub cycles: u64,
}

struct SyncCore {
    worktree: PathBuf,
    branch: String,
    peers: Vec<Peer>,
    log: Arc<EventLog>,
    db: Arc<Mutex<Database>>,
    sink: EventSink,
    health: Mutex<SyncHealth>,
}

/// The sync worker. Owns its git worktree exclusively; everything else in
/// the daemon reads events only through the log and the projection.
pub struct SyncEngine {
    core: Arc<SyncCore>,
    stop: Arc<AtomicBool>,
    interval: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(
        worktree: PathBuf,
        config: SyncConfig,
        log: Arc<EventLog>,
        db: Arc<Mutex<Database>>,
        sink: EventSink,
    ) -> Self {
        let state = if config.peers.is_empty() {
            SyncState::Offline
        } else {
            SyncState::Ok
        };
        let peers = config
            .peers
            .iter()
            .map(|p| PeerStatus {
                peer_id: p.peer_id(),
                url: p.url.clone(),
                state: PeerState::Ok,
                last_error: None,
            })
            .collect();

        Self {
            core: Arc::new(SyncCore {
                worktree,
                branch: config.branch,
                peers: config.peers,
                log,
                db,
                sink,
                health: Mutex::new(SyncHealth {
                    state,
                    peers,
                    cycles: 0,
                }),
            }),
            stop: Arc::new(AtomicBool::new(false)),
            interval: config.interval,
            handle: Mutex::new(None),
        }
    }

    /// Spawn the periodic worker thread.
    pub fn start(&self) -> Result<()> {
        let core = self.core.clone();
        let stop = self.stop.clone();
        let interval = self.interval;

        let handle = std::thread::Builder::new()
            .name("sync-engine".to_string())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    core.cycle();
                    // Sleep in short slices so shutdown stays prompt.
                    let mut remaining = interval;
                    while !stop.load(Ordering::Relaxed) && remaining > Duration::ZERO {
                        let step = remaining.min(Duration::from_millis(200));
                        std::thread::sleep(step);
                        remaining -= step;
                    }
                }
            })?;

        *self.handle.lock().expect("sync handle mutex poisoned") = Some(handle);
        Ok(())
    }

    /// One full fetch/merge/project/push pass, callable directly (tests,
    /// a future `sync.now` RPC).
    pub fn run_cycle(&self) {
        self.core.cycle();
    }

    pub fn health(&self) -> SyncHealth {
        self.core.health.lock().expect("health mutex poisoned").clone()
    }

    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self
            .handle
            .lock()
            .expect("sync handle mutex poisoned")
            .take()
        {
            let _ = handle.join();
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SyncCore {
    fn cycle(&self) {
        if let Err(err) = self.commit_local() {
            warn!(%err, "sync: committing local events failed");
        }

        for peer in &self.peers {
            let peer_id = peer.peer_id();
            if self.peer_state(&peer_id) == Some(PeerState::Quarantined) {
                continue;
            }

            // Push rejections mean the peer advanced under us; re-fetch,
            // re-merge, and try again a bounded number of times.
            let mut outcome = Ok(());
            for _attempt in 0..3 {
                outcome = self.pull_and_merge(peer, &peer_id);
                if outcome.is_err() {
                    break;
                }
                outcome = self.push(peer);
                match &outcome {
                    Ok(()) => break,
                    Err(Error::Git { .. }) => continue,
                    Err(_) => break,
                }
            }

            match outcome {
                Ok(()) => self.mark_peer(&peer_id, PeerState::Ok, None),
                Err(err) => {
                    warn!(peer = %peer_id, %err, "sync: cycle failed for peer");
                    self.mark_peer(&peer_id, PeerState::Failing, Some(err.to_string()));
                }
            }
        }

        let mut health = self.health.lock().expect("health mutex poisoned");
        health.cycles += 1;
        health.state = if self.peers.is_empty() {
            SyncState::Offline
        } else if health.peers.iter().all(|p| p.state == PeerState::Ok) {
            SyncState::Ok
        } else {
            SyncState::Degraded
        };
    }

    /// Stage and commit whatever the event log appended since last cycle.
    fn commit_local(&self) -> Result<()> {
        git(&self.worktree, &["add", "-A"])?;
        if git_ok(&self.worktree, &["diff", "--cached", "--quiet"]) {
            return Ok(());
        }
        git(&self.worktree, &["commit", "-q", "-m", "thrum: local events"])?;
        Ok(())
    }

    fn pull_and_merge(&self, peer: &Peer, peer_id: &str) -> Result<()> {
        let tracking_ref = format!("refs/thrum-sync/{}", peer_id);
        let fetch_spec = format!("+refs/heads/{}:{}", self.branch, tracking_ref);

        if let Err(err) = git(&self.worktree, &["fetch", "--quiet", &peer.url, &fetch_spec]) {
            // A peer that has never pushed the branch is not an error.
            if remote_branch_missing(&self.worktree, &peer.url, &self.branch) {
                return Ok(());
            }
            return Err(err);
        }

        let remote_tip = git(&self.worktree, &["rev-parse", &tracking_ref])?;
        let head = git(&self.worktree, &["rev-parse", "HEAD"])?;
        if remote_tip == head
            || git_ok(
                &self.worktree,
                &["merge-base", "--is-ancestor", &remote_tip, "HEAD"],
            )
        {
            return Ok(());
        }

        // Fast-forward needs a clean tree; appends that landed since
        // commit_local make it dirty, in which case the union path (which
        // folds those lines in atomically) handles it instead.
        let worktree_clean = git_ok(&self.worktree, &["diff", "--quiet"])
            && git_ok(&self.worktree, &["diff", "--cached", "--quiet"]);
        let can_ff = worktree_clean
            && git_ok(
                &self.worktree,
                &["merge-base", "--is-ancestor", "HEAD", &remote_tip],
            );
        let merge_result = if can_ff {
            git(&self.worktree, &["merge", "-q", "--ff-only", &remote_tip]).map(|_| ())
        } else {
            self.union_merge_commit(&remote_tip)
        };

        if let Err(err) = merge_result {
            // Anything that is not a pure union is quarantined; local
            // writes keep flowing and health reflects the damage.
            let _ = git(&self.worktree, &["merge", "--abort"]);
            self.mark_peer(peer_id, PeerState::Quarantined, Some(err.to_string()));
            return Err(err);
        }

        // The merge rewrote shard files behind the writer's back.
        self.log.invalidate_handles_blocking()?;

        self.project_new_events(peer_id)?;
        Ok(())
    }

    /// Line-union every shard against the remote tip and record it as a
    /// proper merge commit so both sides converge on shared history.
    fn union_merge_commit(&self, remote_tip: &str) -> Result<()> {
        git(
            &self.worktree,
            &[
                "merge",
                "-q",
                "-s",
                "ours",
                "--no-commit",
                "--allow-unrelated-histories",
                remote_tip,
            ],
        )?;

        let mut rels: Vec<String> = git_lines(
            &self.worktree,
            &["ls-tree", "-r", "--name-only", remote_tip],
        )?
        .into_iter()
        .filter(|p| p.ends_with(".jsonl"))
        .collect();
        for path in self.log.synced_shard_files() {
            if let Ok(rel) = path.strip_prefix(&self.worktree) {
                let rel = rel.to_string_lossy().to_string();
                if !rels.contains(&rel) {
                    rels.push(rel);
                }
            }
        }

        for rel in rels {
            let remote = git(
                &self.worktree,
                &["show", &format!("{}:{}", remote_tip, rel)],
            )
            .map(|mut body| {
                if !body.is_empty() {
                    body.push('\n');
                }
                body
            })
            .unwrap_or_default();

            // The local side is read on the writer thread, so appends
            // racing this merge end up in the union, not under it.
            let rel_for_log = rel.clone();
            self.log
                .update_shard_blocking(std::path::Path::new(&rel), move |local| {
                    let (merged, skipped) = union_merge(local, &remote);
                    if skipped > 0 {
                        warn!(
                            rel = %rel_for_log,
                            skipped, "sync: dropped unparseable lines during union merge"
                        );
                    }
                    merged.into_bytes()
                })?;
        }

        git(&self.worktree, &["add", "-A"])?;
        git(&self.worktree, &["commit", "-q", "-m", "thrum: union merge"])?;
        Ok(())
    }

    /// Replay the merged shards through the projector; the applied_events
    /// gate reduces this to exactly the newly visible events, which go to
    /// the subscription sink and advance the peer checkpoint.
    fn project_new_events(&self, peer_id: &str) -> Result<()> {
        let report = self.log.read_synced()?;
        let applied = {
            let mut db = self.db.lock().expect("projection mutex poisoned");
            db.apply_batch(&report.events)?
        };
        if applied.is_empty() {
            return Ok(());
        }

        info!(peer = %peer_id, count = applied.len(), "sync: projected events from peer");
        (self.sink)(&applied);

        let last = applied.iter().map(|e| e.id).max().map(|id| id.to_string());
        let db = self.db.lock().expect("projection mutex poisoned");
        queries::checkpoint::upsert(&db, peer_id, last.as_deref())?;
        Ok(())
    }

    fn push(&self, peer: &Peer) -> Result<()> {
        git(
            &self.worktree,
            &[
                "push",
                "--quiet",
                &peer.url,
                &format!("{}:refs/heads/{}", self.branch, self.branch),
            ],
        )?;
        Ok(())
    }

    fn peer_state(&self, peer_id: &str) -> Option<PeerState> {
        self.health
            .lock()
            .expect("health mutex poisoned")
            .peers
            .iter()
            .find(|p| p.peer_id == peer_id)
            .map(|p| p.state)
    }

    fn mark_peer(&self, peer_id: &str, state: PeerState, error: Option<String>) {
        let mut health = self.health.lock().expect("health mutex poisoned");
        if let Some(peer) = health.peers.iter_mut().find(|p| p.peer_id == peer_id) {
            // Quarantine is sticky for the life of the process.
            if peer.state != PeerState::Quarantined {
                peer.state = state;
            }
            peer.last_error = error;
        }
    }
}

/// Probe whether the remote simply has no sync branch yet.
fn remote_branch_missing(worktree: &std::path::Path, url: &str, branch: &str) -> bool {
    match git_lines(worktree, &["ls-remote", url, &format!("refs/heads/{}", branch)]) {
        Ok(lines) => lines.is_empty(),
        Err(_) => false,
    }
}
