//! Match snapshots on durable storage.
//!
//! The actors only need "give me the last saved state" and "save this
//! state". Saves go through a `StoreWriter`, a single task that runs each
//! write on the blocking pool in submission order, so a match actor never
//! waits on disk.

use crate::transport::{MatchId, SeatId};
use dashmap::DashMap;
use saffold_core::Match;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Bumped whenever `MatchRecord` or `Match` changes shape
pub const SAVE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No saved match {0}")]
    NotFound(MatchId),

    #[error("Match {id} was saved with unsupported version {found}")]
    Version { id: MatchId, found: u32 },

    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt match record: {0}")]
    Json(#[from] serde_json::Error),
}

/// What gets written for each match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub version: u32,
    pub match_id: MatchId,
    /// Seat ids in table order; index is the `PlayerId`
    pub seats: Vec<SeatId>,
    pub state: Match,
}

impl MatchRecord {
    pub fn new(match_id: MatchId, seats: Vec<SeatId>, state: Match) -> Self {
        Self {
            version: SAVE_VERSION,
            match_id,
            seats,
            state,
        }
    }
}

/// Storage for match records
pub trait MatchStore: Send + Sync + 'static {
    fn load(&self, id: MatchId) -> Result<MatchRecord, StoreError>;
    fn save(&self, record: &MatchRecord) -> Result<(), StoreError>;
    /// Every stored match id
    fn list(&self) -> Result<Vec<MatchId>, StoreError>;
}

/// In-memory store, for tests and throwaway servers
#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<MatchId, MatchRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MatchStore for MemoryStore {
    fn load(&self, id: MatchId) -> Result<MatchRecord, StoreError> {
        self.records
            .get(&id)
            .map(|r| r.clone())
            .ok_or(StoreError::NotFound(id))
    }

    fn save(&self, record: &MatchRecord) -> Result<(), StoreError> {
        self.records.insert(record.match_id, record.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<MatchId>, StoreError> {
        Ok(self.records.iter().map(|r| *r.key()).collect())
    }
}

/// One pretty-printed `<match_id>.json` file per match
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open a store, creating the directory if needed
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            info!(dir = %dir.display(), "created games directory");
        }
        Ok(Self { dir })
    }

    fn path_for(&self, id: MatchId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

impl MatchStore for JsonFileStore {
    fn load(&self, id: MatchId) -> Result<MatchRecord, StoreError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(StoreError::NotFound(id));
        }
        let data = fs::read_to_string(path)?;
        let record: MatchRecord = serde_json::from_str(&data)?;
        if record.version != SAVE_VERSION {
            return Err(StoreError::Version {
                id,
                found: record.version,
            });
        }
        Ok(record)
    }

    fn save(&self, record: &MatchRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(record)?;
        // Write then rename so a crash never leaves half a file
        let tmp = self.dir.join(format!("{}.json.tmp", record.match_id));
        fs::write(&tmp, json)?;
        fs::rename(tmp, self.path_for(record.match_id))?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<MatchId>, StoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            match stem.parse() {
                Ok(id) => ids.push(id),
                Err(_) => warn!(file = %path.display(), "ignoring file in games directory"),
            }
        }
        Ok(ids)
    }
}

enum WriteJob {
    Save(MatchRecord),
    Flush(oneshot::Sender<()>),
}

/// Handle to the background writer task
#[derive(Clone)]
pub struct StoreWriter {
    tx: mpsc::UnboundedSender<WriteJob>,
}

impl StoreWriter {
    /// Start the writer task. Must be called inside a Tokio runtime.
    pub fn spawn(store: Arc<dyn MatchStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteJob>();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    WriteJob::Save(record) => {
                        let id = record.match_id;
                        let store = Arc::clone(&store);
                        match tokio::task::spawn_blocking(move || store.save(&record)).await {
                            Ok(Ok(())) => debug!(match_id = %id, "saved match"),
                            Ok(Err(e)) => error!(match_id = %id, "failed to save match: {}", e),
                            Err(e) => error!(match_id = %id, "save task panicked: {}", e),
                        }
                    }
                    WriteJob::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        Self { tx }
    }

    /// Queue a record for saving
    pub fn save(&self, record: MatchRecord) {
        if self.tx.send(WriteJob::Save(record)).is_err() {
            error!("store writer has stopped; snapshot dropped");
        }
    }

    /// Wait until every save queued before this call has finished
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(WriteJob::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn record() -> MatchRecord {
        let mut game = Match::new("persist", vec!["Alice".into(), "Bob".into()]).unwrap();
        game.begin().unwrap();
        MatchRecord::new(Uuid::new_v4(), vec![Uuid::new_v4(), Uuid::new_v4()], game)
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("saffold-test-{}", Uuid::new_v4()))
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        let rec = record();
        store.save(&rec).unwrap();

        assert_eq!(store.load(rec.match_id).unwrap(), rec);
        assert_eq!(store.list().unwrap(), vec![rec.match_id]);
        assert!(matches!(
            store.load(uuid::Uuid::new_v4()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_json_store_round_trip() {
        let dir = temp_dir();
        let store = JsonFileStore::new(&dir).unwrap();
        let rec = record();
        store.save(&rec).unwrap();

        assert!(dir.join(format!("{}.json", rec.match_id)).exists());
        assert_eq!(store.load(rec.match_id).unwrap(), rec);
        assert_eq!(store.list().unwrap(), vec![rec.match_id]);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_json_store_rejects_other_versions() {
        let dir = temp_dir();
        let store = JsonFileStore::new(&dir).unwrap();
        let mut rec = record();
        rec.version = SAVE_VERSION + 1;
        store.save(&rec).unwrap();

        assert!(matches!(
            store.load(rec.match_id),
            Err(StoreError::Version { found, .. }) if found == SAVE_VERSION + 1
        ));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_json_store_skips_stray_files() {
        let dir = temp_dir();
        let store = JsonFileStore::new(&dir).unwrap();
        fs::write(dir.join("notes.txt"), "hello").unwrap();
        fs::write(dir.join("not-a-uuid.json"), "{}").unwrap();

        assert!(store.list().unwrap().is_empty());
        fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_writer_saves_in_order() {
        let store = Arc::new(MemoryStore::new());
        let writer = StoreWriter::spawn(store.clone());

        let first = record();
        let mut second = first.clone();
        second.state.log.push("later".into());

        writer.save(first);
        writer.save(second.clone());
        writer.flush().await;

        assert_eq!(store.load(second.match_id).unwrap(), second);
    }
}
