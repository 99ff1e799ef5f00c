use std::collections::HashSet;

use chrono::{DateTime, Utc};

// NOTE: Why line-level union instead of git's merge machinery
//
// Event ids are globally unique and records are immutable, so any two
// versions of a shard file can only differ by which records they contain.
// The union of unique lines (keyed by event id) ordered by
// (timestamp, id) is therefore always conflict-free and, crucially,
// deterministic: both peers computing the merge independently produce
// byte-identical files, so the branches converge instead of ping-ponging.
//
// Intra-author order is preserved automatically: ids are monotonic per
// author, so the (ts, id) sort keeps each author's records in append
// order.

struct MergeLine {
    ts: DateTime<Utc>,
    id: String,
    line: String,
}

/// Deterministic union of two shard file bodies. Returns the merged body
/// and how many unparseable lines were dropped.
pub fn union_merge(local: &str, remote: &str) -> (String, u64) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut lines: Vec<MergeLine> = Vec::new();
    let mut skipped = 0u64;

    for line in local.lines().chain(remote.lines()) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match parse_key(trimmed) {
            Some((id, ts)) => {
                if seen.insert(id.clone()) {
                    lines.push(MergeLine {
                        ts,
                        id,
                        line: trimmed.to_string(),
                    });
                }
            }
            None => skipped += 1,
        }
    }

    lines.sort_by(|a, b| (a.ts, &a.id).cmp(&(b.ts, &b.id)));

    let mut out = String::new();
    for entry in &lines {
        out.push_str(&entry.line);
        out.push('\n');
    }
    (out, skipped)
}

/// Extract the dedup/sort key without requiring the payload schema, so
/// events from newer peers merge cleanly.
fn parse_key(line: &str) -> Option<(String, DateTime<Utc>)> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let id = value.get("id")?.as_str()?.to_string();
    let ts = value.get("ts")?.as_str()?;
    let ts = DateTime::parse_from_rfc3339(ts).ok()?.with_timezone(&Utc);
    Some((id, ts))
}
