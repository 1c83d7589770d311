//! C4 — the client's durable, age/size-bounded outbox cache.
//!
//! One self-contained JSON file per unsent [`Submission`], filename
//! `<submission-id>_<yyyymmdd_hhmmss>.json`. Writes are atomic
//! (write-to-temp-file, then rename); reads tolerate partial/corrupt files
//! by skipping them rather than failing the whole `list()`.
//!
//! Grounded on the teacher's `mqk-audit::AuditWriter::new` (directory
//! creation, file-handling idiom), generalized from one append-only log
//! file to one independently removable file per entry, since C4 requires
//! `Remove(id)` to be possible without touching unrelated entries.

use chrono::{DateTime, Utc};
use csf_types::Submission;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize submission {0}")]
    Serialize(Uuid, #[source] serde_json::Error),
}

/// Durable outbox cache rooted at a single directory.
pub struct Outbox {
    dir: PathBuf,
}

impl Outbox {
    /// Open (creating if necessary) the outbox directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, OutboxError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| OutboxError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    fn file_name(submission_id: Uuid, scan_timestamp: DateTime<Utc>) -> String {
        format!(
            "{}_{}.json",
            submission_id,
            scan_timestamp.format("%Y%m%d_%H%M%S")
        )
    }

    /// Append a submission. Never overwrites an existing submission id: if
    /// a file for this id already exists (any timestamp suffix), this is a
    /// no-op.
    pub fn store(&self, submission: &Submission) -> Result<(), OutboxError> {
        if self.find_path(submission.submission_id)?.is_some() {
            return Ok(());
        }

        let file_name = Self::file_name(submission.submission_id, submission.scan_timestamp);
        let final_path = self.dir.join(&file_name);
        let tmp_path = self.dir.join(format!("{file_name}.tmp"));

        let body = serde_json::to_vec_pretty(submission)
            .map_err(|e| OutboxError::Serialize(submission.submission_id, e))?;

        fs::write(&tmp_path, &body).map_err(|source| OutboxError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &final_path).map_err(|source| OutboxError::Io {
            path: final_path.clone(),
            source,
        })?;

        tracing::debug!(submission_id = %submission.submission_id, path = %final_path.display(), "outbox: stored submission");
        Ok(())
    }

    /// Every entry currently on disk. Order is arbitrary — callers that
    /// care (e.g. the startup drain) sort by scan timestamp. Unparseable
    /// files (partial writes, corruption) are skipped and logged, never
    /// propagated.
    pub fn list(&self) -> Result<Vec<Submission>, OutboxError> {
        let mut out = Vec::new();
        for entry in self.entries()? {
            if let Some(submission) = self.read_entry(&entry.path) {
                out.push(submission);
            }
        }
        Ok(out)
    }

    /// Idempotent removal: absence is not an error.
    pub fn remove(&self, submission_id: Uuid) -> Result<(), OutboxError> {
        if let Some(path) = self.find_path(submission_id)? {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(OutboxError::Io { path, source }),
            }
        }
        Ok(())
    }

    /// Remove every entry older than `max_age`, then while total size
    /// exceeds `max_size_bytes`, remove entries oldest-first (by
    /// modification time). Idempotent and terminating: running it twice in
    /// a row leaves the same file set as running it once.
    pub fn clean(&self, max_age: Duration, max_size_bytes: u64) -> Result<CleanReport, OutboxError> {
        let mut entries = self.entries()?;
        let now = std::time::SystemTime::now();
        let mut report = CleanReport::default();

        entries.retain(|e| {
            let age = now.duration_since(e.modified).unwrap_or(Duration::ZERO);
            if age > max_age {
                if fs::remove_file(&e.path).is_ok() {
                    report.removed_for_age += 1;
                }
                false
            } else {
                true
            }
        });

        entries.sort_by_key(|e| e.modified);

        let mut total: u64 = entries.iter().map(|e| e.size).sum();
        let mut i = 0;
        while total > max_size_bytes && i < entries.len() {
            let e = &entries[i];
            if fs::remove_file(&e.path).is_ok() {
                total = total.saturating_sub(e.size);
                report.removed_for_size += 1;
            }
            i += 1;
        }

        Ok(report)
    }

    fn find_path(&self, submission_id: Uuid) -> Result<Option<PathBuf>, OutboxError> {
        let prefix = format!("{submission_id}_");
        for entry in self.entries()? {
            if let Some(name) = entry.path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with(&prefix) {
                    return Ok(Some(entry.path));
                }
            }
        }
        Ok(None)
    }

    fn entries(&self) -> Result<Vec<DirEntryInfo>, OutboxError> {
        let read_dir = fs::read_dir(&self.dir).map_err(|source| OutboxError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut out = Vec::new();
        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            let modified = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            out.push(DirEntryInfo {
                path,
                modified,
                size: meta.len(),
            });
        }
        Ok(out)
    }

    fn read_entry(&self, path: &Path) -> Option<Submission> {
        let bytes = fs::read(path).ok()?;
        match serde_json::from_slice::<Submission>(&bytes) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "outbox: skipping unparseable entry");
                None
            }
        }
    }
}

struct DirEntryInfo {
    path: PathBuf,
    modified: std::time::SystemTime,
    size: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub removed_for_age: u64,
    pub removed_for_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use csf_types::SystemInfo;

    fn submission(id: Uuid, ts: DateTime<Utc>) -> Submission {
        Submission::new(
            id,
            "client-1",
            "host-1",
            ts,
            "policy-1",
            "1.0.0",
            vec![],
            vec![],
            SystemInfo::default(),
        )
    }

    #[test]
    fn store_then_list_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = Outbox::new(dir.path()).unwrap();
        let s = submission(Uuid::new_v4(), Utc::now());
        outbox.store(&s).unwrap();

        let listed = outbox.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].submission_id, s.submission_id);
    }

    #[test]
    fn store_never_overwrites_existing_submission_id() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = Outbox::new(dir.path()).unwrap();
        let id = Uuid::new_v4();
        let s1 = submission(id, Utc::now());
        let mut s2 = submission(id, Utc::now());
        s2.hostname = "different-host".to_string();

        outbox.store(&s1).unwrap();
        outbox.store(&s2).unwrap();

        let listed = outbox.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].hostname, "host-1");
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = Outbox::new(dir.path()).unwrap();
        let id = Uuid::new_v4();
        outbox.remove(id).unwrap();
        outbox.remove(id).unwrap();
    }

    #[test]
    fn drain_cycle_leaves_outbox_empty() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = Outbox::new(dir.path()).unwrap();
        let s = submission(Uuid::new_v4(), Utc::now());
        outbox.store(&s).unwrap();
        outbox.remove(s.submission_id).unwrap();

        assert!(outbox.list().unwrap().is_empty());
    }

    #[test]
    fn list_skips_unparseable_entries() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = Outbox::new(dir.path()).unwrap();
        let s = submission(Uuid::new_v4(), Utc::now());
        outbox.store(&s).unwrap();

        fs::write(dir.path().join("garbage_20240101_000000.json"), b"not json").unwrap();

        let listed = outbox.list().unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn clean_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = Outbox::new(dir.path()).unwrap();
        for _ in 0..5 {
            outbox.store(&submission(Uuid::new_v4(), Utc::now())).unwrap();
        }

        let first = outbox.clean(Duration::from_secs(3600), 10_000_000).unwrap();
        let second = outbox.clean(Duration::from_secs(3600), 10_000_000).unwrap();
        assert_eq!(second, CleanReport::default());
        let _ = first;
    }

    #[test]
    fn clean_evicts_oldest_first_once_size_bound_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = Outbox::new(dir.path()).unwrap();
        let mut ids = vec![];
        for _ in 0..5 {
            let id = Uuid::new_v4();
            outbox.store(&submission(id, Utc::now())).unwrap();
            ids.push(id);
            std::thread::sleep(Duration::from_millis(5));
        }

        outbox.clean(Duration::from_secs(3600), 1).unwrap();
        let remaining = outbox.list().unwrap();
        assert!(remaining.len() < 5);
    }
}
