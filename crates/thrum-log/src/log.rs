use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::JoinHandle;

use thrum_types::Event;
use tokio::sync::oneshot;
use tracing::warn;
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::shard::Shard;

// NOTE: Durability Discipline
//
// - One writer thread serializes every append; callers hand over an
//   encoded line and await the fsync result
// - Each record is written as a single write_all of "<json>\n", then
//   flushed and fdatasync'd; a crash can lose or truncate only the
//   trailing line
// - Readers use a read-until-newline discipline, so a partial trailing
//   line is invisible to them; open() additionally truncates it so the
//   next append starts on a clean boundary
// - Corrupt interior lines (disk damage, hostile peers) are skipped and
//   counted, never fatal: the log must stay replayable end to end

enum Command {
    Append {
        shard: Shard,
        line: String,
        id: Ulid,
        reply: oneshot::Sender<Result<Ulid>>,
    },
    Swap {
        rel: PathBuf,
        contents: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    Update {
        rel: PathBuf,
        transform: Box<dyn FnOnce(&str) -> Vec<u8> + Send>,
        reply: oneshot::Sender<Result<()>>,
    },
    Invalidate {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Outcome of a bulk read: parsed events plus how many lines were skipped.
#[derive(Debug, Default)]
pub struct ReadReport {
    pub events: Vec<Event>,
    pub corrupt_lines: u64,
}

/// Durable append + ordered tail over the JSONL shards.
pub struct EventLog {
    synced_root: PathBuf,
    local_root: PathBuf,
    tx: Sender<Command>,
    corrupt_lines: Arc<AtomicU64>,
    _handle: JoinHandle<()>,
}

impl EventLog {
    /// Open (creating if needed) the log rooted at `synced_root` for shard
    /// files that travel over sync, and `local_root` for the local-only
    /// shard. Partial trailing lines left by a crash are truncated here.
    pub fn open(synced_root: impl Into<PathBuf>, local_root: impl Into<PathBuf>) -> Result<Self> {
        let synced_root = synced_root.into();
        let local_root = local_root.into();

        fs::create_dir_all(synced_root.join("messages"))?;
        fs::create_dir_all(&local_root)?;

        for path in shard_files_under(&synced_root) {
            truncate_partial_tail(&path)?;
        }
        truncate_partial_tail(&local_root.join(Shard::Local.rel_path()))?;

        let (tx, rx) = channel();
        let worker_synced = synced_root.clone();
        let worker_local = local_root.clone();
        let handle = std::thread::Builder::new()
            .name("event-log-writer".to_string())
            .spawn(move || writer_loop(rx, worker_synced, worker_local))?;

        Ok(Self {
            synced_root,
            local_root,
            tx,
            corrupt_lines: Arc::new(AtomicU64::new(0)),
            _handle: handle,
        })
    }

    pub fn synced_root(&self) -> &Path {
        &self.synced_root
    }

    /// Append one event and wait for it to hit disk.
    pub async fn append(&self, event: &Event) -> Result<Ulid> {
        let rx = self.send_append(event)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Blocking variant for non-async callers (sync worker, tests).
    pub fn append_blocking(&self, event: &Event) -> Result<Ulid> {
        let rx = self.send_append(event)?;
        rx.blocking_recv().map_err(|_| Error::Closed)?
    }

    fn send_append(&self, event: &Event) -> Result<oneshot::Receiver<Result<Ulid>>> {
        let line = serde_json::to_string(event)?;
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Append {
                shard: Shard::for_event(event),
                line,
                id: event.id,
                reply,
            })
            .map_err(|_| Error::Closed)?;
        Ok(rx)
    }

    /// Atomically replace one synced shard file (temp write + rename),
    /// serialized through the writer so it never races an append.
    pub fn swap_shard_blocking(&self, rel: &Path, contents: Vec<u8>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Swap {
                rel: rel.to_path_buf(),
                contents,
                reply,
            })
            .map_err(|_| Error::Closed)?;
        rx.blocking_recv().map_err(|_| Error::Closed)?
    }

    /// Read-transform-replace one synced shard atomically with respect to
    /// concurrent appends: the transform runs on the writer thread, so no
    /// append can land between the read and the rename. This is the sync
    /// engine's merge primitive.
    pub fn update_shard_blocking(
        &self,
        rel: &Path,
        transform: impl FnOnce(&str) -> Vec<u8> + Send + 'static,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Update {
                rel: rel.to_path_buf(),
                transform: Box::new(transform),
                reply,
            })
            .map_err(|_| Error::Closed)?;
        rx.blocking_recv().map_err(|_| Error::Closed)?
    }

    /// Drop every cached file handle. Required after anything outside the
    /// writer (a git checkout during sync) replaces shard files on disk;
    /// the next append reopens them.
    pub fn invalidate_handles_blocking(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Invalidate { reply })
            .map_err(|_| Error::Closed)?;
        rx.blocking_recv().map_err(|_| Error::Closed)?
    }

    /// Lines skipped as corrupt across all reads so far.
    pub fn corrupt_line_count(&self) -> u64 {
        self.corrupt_lines.load(Ordering::Relaxed)
    }

    /// Every event in the log (synced + local), ordered by (ts, id).
    pub fn read_all(&self) -> Result<ReadReport> {
        let mut paths = shard_files_under(&self.synced_root);
        let local = self.local_root.join(Shard::Local.rel_path());
        if local.exists() {
            paths.push(local);
        }
        self.read_paths(&paths)
    }

    /// Only the shards that travel over sync.
    pub fn read_synced(&self) -> Result<ReadReport> {
        self.read_paths(&shard_files_under(&self.synced_root))
    }

    /// Bulk read for recovery: everything ordered after `last_seen`.
    /// An unknown id replays the whole log, which is always safe because
    /// projection is idempotent on event id.
    pub fn read_since(&self, last_seen: Option<Ulid>) -> Result<ReadReport> {
        let mut report = self.read_all()?;
        if let Some(id) = last_seen
            && let Some(position) = report.events.iter().position(|e| e.id == id)
        {
            report.events.drain(..=position);
        }
        Ok(report)
    }

    /// Stream one shard strictly in file order starting at a byte offset;
    /// returns the offset after the last complete line consumed, so the
    /// caller can resume later.
    pub fn tail<F: FnMut(Event)>(
        &self,
        shard: &Shard,
        from_offset: u64,
        mut handler: F,
    ) -> Result<u64> {
        let root = if shard.is_synced() {
            &self.synced_root
        } else {
            &self.local_root
        };
        let path = root.join(shard.rel_path());
        if !path.exists() {
            return Ok(from_offset);
        }

        let mut file = File::open(&path)?;
        file.seek(SeekFrom::Start(from_offset))?;
        let mut reader = BufReader::new(file);
        let mut offset = from_offset;
        let mut line = String::new();

        loop {
            line.clear();
            let n = reader.read_line(&mut line)?;
            if n == 0 || !line.ends_with('\n') {
                break;
            }
            match serde_json::from_str::<Event>(line.trim_end()) {
                Ok(event) => handler(event),
                Err(err) => {
                    self.corrupt_lines.fetch_add(1, Ordering::Relaxed);
                    warn!(path = %path.display(), %err, "skipping corrupt log line");
                }
            }
            offset += n as u64;
        }

        Ok(offset)
    }

    /// Synced shard files currently on disk (for the sync engine).
    pub fn synced_shard_files(&self) -> Vec<PathBuf> {
        shard_files_under(&self.synced_root)
    }

    fn read_paths(&self, paths: &[PathBuf]) -> Result<ReadReport> {
        let mut report = ReadReport::default();
        for path in paths {
            read_file_into(path, &mut report)?;
        }
        self.corrupt_lines
            .fetch_add(report.corrupt_lines, Ordering::Relaxed);
        report.events.sort_by_key(|e| e.order_key());
        Ok(report)
    }
}

fn writer_loop(rx: Receiver<Command>, synced_root: PathBuf, local_root: PathBuf) {
    let mut handles: HashMap<PathBuf, File> = HashMap::new();

    while let Ok(command) = rx.recv() {
        match command {
            Command::Append {
                shard,
                line,
                id,
                reply,
            } => {
                let root = if shard.is_synced() {
                    &synced_root
                } else {
                    &local_root
                };
                let path = root.join(shard.rel_path());
                let result = append_line(&mut handles, &path, &line).map(|_| id);
                let _ = reply.send(result);
            }
            Command::Swap {
                rel,
                contents,
                reply,
            } => {
                let path = synced_root.join(&rel);
                handles.remove(&path);
                let _ = reply.send(swap_file(&path, &contents));
            }
            Command::Update {
                rel,
                transform,
                reply,
            } => {
                let path = synced_root.join(&rel);
                handles.remove(&path);
                let result = (|| {
                    let current = match fs::read_to_string(&path) {
                        Ok(contents) => contents,
                        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
                        Err(err) => return Err(Error::Io(err)),
                    };
                    swap_file(&path, &transform(&current))
                })();
                let _ = reply.send(result);
            }
            Command::Invalidate { reply } => {
                handles.clear();
                let _ = reply.send(Ok(()));
            }
        }
    }
}

fn append_line(handles: &mut HashMap<PathBuf, File>, path: &Path, line: &str) -> Result<()> {
    if !handles.contains_key(path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        handles.insert(path.to_path_buf(), file);
    }
    let file = handles.get_mut(path).expect("handle just inserted");

    let mut record = String::with_capacity(line.len() + 1);
    record.push_str(line);
    record.push('\n');

    if let Err(err) = file
        .write_all(record.as_bytes())
        .and_then(|_| file.flush())
        .and_then(|_| file.sync_data())
    {
        // A failed fsync leaves the handle in an unknown state; drop it so
        // the next append reopens the file.
        handles.remove(path);
        return Err(Error::Io(err));
    }
    Ok(())
}

fn swap_file(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "shard".to_string());
    let tmp = parent.join(format!(".{}.tmp", file_name));

    let mut file = File::create(&tmp)?;
    file.write_all(contents)?;
    file.sync_data()?;
    drop(file);

    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_file_into(path: &Path, report: &mut ReadReport) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(trimmed) {
            Ok(event) => report.events.push(event),
            Err(err) => {
                report.corrupt_lines += 1;
                warn!(path = %path.display(), %err, "skipping corrupt log line");
            }
        }
    }
    Ok(())
}

fn shard_files_under(root: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for entry in walkdir::WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "jsonl") {
            paths.push(path.to_path_buf());
        }
    }
    paths.sort();
    paths
}

/// Truncate a partial trailing line (bytes after the last newline) left by
/// a crash between write and fsync.
fn truncate_partial_tail(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let bytes = fs::read(path)?;
    if bytes.is_empty() || bytes.ends_with(b"\n") {
        return Ok(());
    }
    let keep = bytes
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|pos| pos + 1)
        .unwrap_or(0);
    warn!(
        path = %path.display(),
        dropped = bytes.len() - keep,
        "truncating partial trailing line"
    );
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(keep as u64)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use thrum_types::EventKind;

    fn open_log(dir: &TempDir) -> EventLog {
        EventLog::open(dir.path().join("sync"), dir.path().join("var")).unwrap()
    }

    fn event(kind: EventKind, actor: &str) -> Event {
        Event::new(Ulid::new(), kind, actor, json!({"n": 1}))
    }

    #[test]
    fn test_append_and_read_all_in_order() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir);
        let ids = thrum_types::EventIdGen::new();

        let mut appended = Vec::new();
        for i in 0..5 {
            let actor = if i % 2 == 0 { "alice" } else { "bob" };
            let e = Event::new(ids.next(), EventKind::MessageCreate, actor, json!({"n": i}));
            appended.push(log.append_blocking(&e).unwrap());
        }

        let report = log.read_all().unwrap();
        assert_eq!(report.events.len(), 5);
        assert_eq!(report.corrupt_lines, 0);

        // Monotonic ids + increasing timestamps: read order == append order.
        let read_ids: Vec<Ulid> = report.events.iter().map(|e| e.id).collect();
        assert_eq!(read_ids, appended);
    }

    #[test]
    fn test_shards_land_in_expected_files() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir);

        log.append_blocking(&event(EventKind::AgentRegister, "alice"))
            .unwrap();
        log.append_blocking(&event(EventKind::MessageCreate, "alice"))
            .unwrap();
        log.append_blocking(&event(EventKind::MessageRead, "alice"))
            .unwrap();

        assert!(dir.path().join("sync/events.jsonl").exists());
        assert!(dir.path().join("sync/messages/alice.jsonl").exists());
        assert!(dir.path().join("var/local.jsonl").exists());

        // Local-only kinds must never be visible to the synced read.
        let synced = log.read_synced().unwrap();
        assert!(
            synced
                .events
                .iter()
                .all(|e| e.kind != EventKind::MessageRead)
        );
    }

    #[test]
    fn test_partial_trailing_line_truncated_on_open() {
        let dir = TempDir::new().unwrap();
        {
            let log = open_log(&dir);
            for _ in 0..3 {
                log.append_blocking(&event(EventKind::AgentRegister, "alice"))
                    .unwrap();
            }
        }

        // Simulate a crash mid-append: bytes written, no newline yet.
        let path = dir.path().join("sync/events.jsonl");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"id\":\"partial").unwrap();
        drop(file);

        let log = open_log(&dir);
        let report = log.read_all().unwrap();
        assert_eq!(report.events.len(), 3);
        assert_eq!(report.corrupt_lines, 0);

        // And a fresh append lands cleanly after the repair.
        log.append_blocking(&event(EventKind::AgentRegister, "bob"))
            .unwrap();
        assert_eq!(log.read_all().unwrap().events.len(), 4);
    }

    #[test]
    fn test_corrupt_interior_line_skipped_and_counted() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir);
        log.append_blocking(&event(EventKind::AgentRegister, "alice"))
            .unwrap();
        drop(log);

        let path = dir.path().join("sync/events.jsonl");
        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push_str("not json at all\n");
        fs::write(&path, contents).unwrap();

        let log = open_log(&dir);
        let fresh = event(EventKind::AgentRegister, "bob");
        log.append_blocking(&fresh).unwrap();

        let report = log.read_all().unwrap();
        assert_eq!(report.events.len(), 2);
        assert_eq!(report.corrupt_lines, 1);
        assert_eq!(log.corrupt_line_count(), 1);
    }

    #[test]
    fn test_tail_resumes_from_offset() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir);

        log.append_blocking(&event(EventKind::AgentRegister, "alice"))
            .unwrap();
        let mut seen = Vec::new();
        let offset = log
            .tail(&Shard::Lifecycle, 0, |e| seen.push(e.id))
            .unwrap();
        assert_eq!(seen.len(), 1);

        log.append_blocking(&event(EventKind::AgentRegister, "bob"))
            .unwrap();
        let mut later = Vec::new();
        let next_offset = log
            .tail(&Shard::Lifecycle, offset, |e| later.push(e.actor_id.clone()))
            .unwrap();
        assert_eq!(later, vec!["bob".to_string()]);
        assert!(next_offset > offset);
    }

    #[test]
    fn test_read_since_skips_through_id() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir);

        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(
                log.append_blocking(&event(EventKind::AgentRegister, "alice"))
                    .unwrap(),
            );
        }

        let report = log.read_since(Some(ids[1])).unwrap();
        let got: Vec<Ulid> = report.events.iter().map(|e| e.id).collect();
        assert_eq!(got, ids[2..].to_vec());

        // Unknown id falls back to a full replay.
        let all = log.read_since(Some(Ulid::new())).unwrap();
        assert_eq!(all.events.len(), 4);
    }

    #[test]
    fn test_swap_shard_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir);

        let first = event(EventKind::MessageCreate, "alice");
        log.append_blocking(&first).unwrap();

        let replacement = event(EventKind::MessageCreate, "alice");
        let line = format!("{}\n", serde_json::to_string(&replacement).unwrap());
        log.swap_shard_blocking(
            &Shard::Messages("alice".to_string()).rel_path(),
            line.into_bytes(),
        )
        .unwrap();

        let report = log.read_all().unwrap();
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].id, replacement.id);

        // Appends after a swap reopen the file and append to the new copy.
        log.append_blocking(&event(EventKind::MessageCreate, "alice"))
            .unwrap();
        assert_eq!(log.read_all().unwrap().events.len(), 2);
    }
}
