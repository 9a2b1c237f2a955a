//! Durable record of finished stages, keyed by (file, language, stage).
//!
//! The ledger is a single JSON document. Every `record` rewrites it through a
//! temporary file in the same directory followed by a rename, so the file on
//! disk is always either the previous or the new complete document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::UNIX_EPOCH;
use tracing::{debug, info};

use crate::error::{Result, VideoToolError};
use crate::stage::{StageError, StageKind, StageResult, StageStatus};

const LEDGER_VERSION: u32 = 1;

/// Identity of a source file that survives restarts: canonical path, size and
/// modification time. Replacing or editing the file yields a new identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let canonical = path
            .canonicalize()
            .map_err(|_| VideoToolError::FileNotFound(path.display().to_string()))?;
        let metadata = std::fs::metadata(&canonical)?;
        let modified = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Ok(Self(format!("{}:{}:{}", canonical.display(), metadata.len(), modified)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FileId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub file_id: FileId,
    pub language: String,
    pub stage: StageKind,
    pub status: StageStatus,
    pub outputs: Vec<PathBuf>,
    pub error: Option<StageError>,
    pub recorded_at: DateTime<Utc>,
}

type LedgerKey = (FileId, String, StageKind);

impl LedgerEntry {
    pub fn from_result(file_id: &FileId, result: &StageResult) -> Self {
        Self {
            file_id: file_id.clone(),
            language: result.language.clone(),
            stage: result.stage,
            status: result.status,
            outputs: result.artifacts.clone(),
            error: result.error.clone(),
            recorded_at: result.timestamp,
        }
    }

    fn key(&self) -> LedgerKey {
        (self.file_id.clone(), self.language.clone(), self.stage)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerDocument {
    version: u32,
    entries: Vec<LedgerEntry>,
}

#[derive(Debug)]
pub struct JobLedger {
    path: PathBuf,
    entries: Mutex<BTreeMap<LedgerKey, LedgerEntry>>,
}

impl JobLedger {
    /// Load the ledger at `path`. A missing file is an empty ledger; a file
    /// that cannot be parsed is reported rather than discarded.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => {
                let document: LedgerDocument = serde_json::from_str(&content).map_err(|e| {
                    VideoToolError::Config(format!(
                        "Ledger {} is unreadable: {}",
                        path.display(),
                        e
                    ))
                })?;
                if document.version != LEDGER_VERSION {
                    return Err(VideoToolError::Config(format!(
                        "Ledger {} has unsupported version {}",
                        path.display(),
                        document.version
                    )));
                }
                document
                    .entries
                    .into_iter()
                    .map(|entry| (entry.key(), entry))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!("Loaded ledger {} with {} entries", path.display(), entries.len());
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_succeeded(&self, file_id: &FileId, language: &str, stage: StageKind) -> bool {
        self.get(file_id, language, stage)
            .is_some_and(|entry| entry.status == StageStatus::Succeeded)
    }

    pub fn get(&self, file_id: &FileId, language: &str, stage: StageKind) -> Option<LedgerEntry> {
        self.lock()
            .get(&(file_id.clone(), language.to_string(), stage))
            .cloned()
    }

    /// Insert or replace the entry for its key and persist immediately.
    /// Only terminal results belong in the ledger.
    pub fn record(&self, entry: LedgerEntry) -> Result<()> {
        if entry.status == StageStatus::Pending {
            return Err(VideoToolError::Config(format!(
                "refusing to record pending {} stage for {}",
                entry.stage, entry.file_id
            )));
        }

        let mut entries = self.lock();
        let key = entry.key();
        debug!(
            "Recording {} {} [{}] = {}",
            entry.file_id, entry.stage, entry.language, entry.status
        );
        let previous = entries.insert(key.clone(), entry);

        if let Err(e) = Self::write(&self.path, &entries) {
            // Keep memory in step with what is durable.
            match previous {
                Some(previous) => entries.insert(key, previous),
                None => entries.remove(&key),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Rewrite the ledger file from memory.
    pub fn flush(&self) -> Result<()> {
        let entries = self.lock();
        Self::write(&self.path, &entries)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<LedgerKey, LedgerEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(path: &Path, entries: &BTreeMap<LedgerKey, LedgerEntry>) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let document = LedgerDocument {
            version: LEDGER_VERSION,
            entries: entries.values().cloned().collect(),
        };

        let mut file = tempfile::Builder::new()
            .prefix(".videotool-ledger-")
            .suffix(".tmp")
            .tempfile_in(&dir)?;
        serde_json::to_writer_pretty(&mut file, &document)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| VideoToolError::Io(e.error))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use std::sync::Arc;

    fn entry(file: &str, language: &str, stage: StageKind, status: StageStatus) -> LedgerEntry {
        LedgerEntry {
            file_id: FileId::from(file),
            language: language.to_string(),
            stage,
            status,
            outputs: vec![PathBuf::from(format!("{}_{}.srt", file, language))],
            error: None,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_missing_file_is_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JobLedger::load(dir.path().join("ledger.json")).unwrap();
        assert!(ledger.is_empty());
        assert!(!ledger.has_succeeded(&FileId::from("a"), "en", StageKind::Transcribe));
    }

    #[test]
    fn test_record_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let ledger = JobLedger::load(&path).unwrap();
        ledger
            .record(entry("movie", "my", StageKind::Mux, StageStatus::Succeeded))
            .unwrap();
        ledger
            .record(entry("movie", "th", StageKind::Mux, StageStatus::Failed))
            .unwrap();
        drop(ledger);

        let reloaded = JobLedger::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.has_succeeded(&FileId::from("movie"), "my", StageKind::Mux));
        assert!(!reloaded.has_succeeded(&FileId::from("movie"), "th", StageKind::Mux));
    }

    #[test]
    fn test_later_result_replaces_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JobLedger::load(dir.path().join("ledger.json")).unwrap();
        let file = FileId::from("movie");

        let mut failed = entry("movie", "th", StageKind::Translate, StageStatus::Failed);
        failed.error = Some(StageError {
            class: ErrorClass::Permanent,
            message: "quota".into(),
            attempts: 3,
        });
        ledger.record(failed).unwrap();
        assert!(!ledger.has_succeeded(&file, "th", StageKind::Translate));

        ledger
            .record(entry("movie", "th", StageKind::Translate, StageStatus::Succeeded))
            .unwrap();
        assert_eq!(ledger.len(), 1);
        assert!(ledger.has_succeeded(&file, "th", StageKind::Translate));
        assert!(ledger.get(&file, "th", StageKind::Translate).unwrap().error.is_none());
    }

    #[test]
    fn test_flush_restores_removed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = JobLedger::load(&path).unwrap();
        ledger
            .record(entry("movie", "my", StageKind::Caption, StageStatus::Succeeded))
            .unwrap();

        std::fs::remove_file(&path).unwrap();
        ledger.flush().unwrap();

        let reloaded = JobLedger::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.has_succeeded(&FileId::from("movie"), "my", StageKind::Caption));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_records_are_all_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = Arc::new(JobLedger::load(&path).unwrap());
        let languages = ["my", "th", "ja", "ko", "fr", "de", "es", "ru"];

        let mut tasks = tokio::task::JoinSet::new();
        for language in languages {
            for stage in [StageKind::Translate, StageKind::Caption, StageKind::Mux] {
                let ledger = Arc::clone(&ledger);
                tasks.spawn(async move {
                    ledger.record(entry("movie", language, stage, StageStatus::Succeeded))
                });
            }
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        let expected = languages.len() * 3;
        assert_eq!(ledger.len(), expected);
        let reloaded = JobLedger::load(&path).unwrap();
        assert_eq!(reloaded.len(), expected);
        for language in languages {
            assert!(reloaded.has_succeeded(&FileId::from("movie"), language, StageKind::Mux));
        }
    }

    #[test]
    fn test_pending_entries_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JobLedger::load(dir.path().join("ledger.json")).unwrap();
        assert!(ledger
            .record(entry("movie", "en", StageKind::Caption, StageStatus::Pending))
            .is_err());
        assert!(ledger.is_empty());
        assert!(!dir.path().join("ledger.json").exists());
    }

    #[test]
    fn test_corrupt_ledger_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "{\"version\": 1, \"entries\": [").unwrap();
        assert!(matches!(JobLedger::load(&path), Err(VideoToolError::Config(_))));
    }

    #[test]
    fn test_stray_temp_file_does_not_affect_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = JobLedger::load(&path).unwrap();
        ledger
            .record(entry("movie", "en", StageKind::Transcribe, StageStatus::Succeeded))
            .unwrap();

        // What a crash halfway through a rewrite leaves behind.
        std::fs::write(dir.path().join(".videotool-ledger-abc.tmp"), "{\"version\": 1, \"ent").unwrap();

        let reloaded = JobLedger::load(&path).unwrap();
        assert!(reloaded.has_succeeded(&FileId::from("movie"), "en", StageKind::Transcribe));
    }

    #[test]
    fn test_file_id_tracks_modification() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("Avatar.mp4");
        std::fs::write(&video, b"frames").unwrap();

        let first = FileId::from_path(&video).unwrap();
        assert_eq!(first, FileId::from_path(&video).unwrap());

        std::fs::write(&video, b"longer frames").unwrap();
        assert_ne!(first, FileId::from_path(&video).unwrap());

        assert!(FileId::from_path(dir.path().join("missing.mp4")).is_err());
    }
}
