//! Network database and replay-list persistence.
//!
//! The database is stored as pretty-printed JSON, the replay list in its
//! binary record format. Writes go to a `.tmp` sibling first and are then
//! renamed over the target, so a crash never leaves a torn file behind.

use async_trait::async_trait;
use meshctl_types::{MeshDb, ReplayCodecError, ReplayList};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, trace};

/// File name for the JSON network database.
const DATABASE_FILE: &str = "mesh_db.json";

/// File name for the encoded replay-protection list.
const REPLAY_FILE: &str = "replay_list";

/// Errors from storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Replay list corrupt: {0}")]
    Replay(#[from] ReplayCodecError),
}

/// Where the runner keeps what the client asks to persist.
#[async_trait]
pub trait MeshStorage: Send + Sync {
    /// Load the network database. `Ok(None)` if none was stored yet.
    async fn load_database(&self) -> Result<Option<MeshDb>, StorageError>;

    /// Store the network database.
    async fn save_database(&self, db: &MeshDb) -> Result<(), StorageError>;

    /// Load the replay-protection list. Empty if none was stored yet.
    async fn load_replay(&self) -> Result<ReplayList, StorageError>;

    /// Store encoded replay-protection records.
    async fn save_replay(&self, records: &[u8]) -> Result<(), StorageError>;
}

/// Directory-backed storage.
#[derive(Debug, Clone)]
pub struct FileStorage {
    base_dir: PathBuf,
}

impl FileStorage {
    /// Create a storage instance, creating the directory if needed.
    ///
    /// # Note
    /// This performs blocking I/O (`create_dir_all`). Call at startup.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn database_path(&self) -> PathBuf {
        self.base_dir.join(DATABASE_FILE)
    }

    pub fn replay_path(&self) -> PathBuf {
        self.base_dir.join(REPLAY_FILE)
    }

    /// Read a file, mapping a missing file to `None`.
    async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn atomic_write(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).await?;

        // The database holds every key of the network.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }

        fs::rename(&tmp, path).await?;
        trace!(path = %path.display(), bytes = bytes.len(), "Wrote file");
        Ok(())
    }
}

#[async_trait]
impl MeshStorage for FileStorage {
    async fn load_database(&self) -> Result<Option<MeshDb>, StorageError> {
        let Some(bytes) = Self::read_optional(&self.database_path()).await? else {
            return Ok(None);
        };
        let db: MeshDb = serde_json::from_slice(&bytes)?;
        debug!(network = %db.name, nodes = db.nodes.len(), "Loaded network database");
        Ok(Some(db))
    }

    async fn save_database(&self, db: &MeshDb) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(db)?;
        self.atomic_write(&self.database_path(), &bytes).await
    }

    async fn load_replay(&self) -> Result<ReplayList, StorageError> {
        match Self::read_optional(&self.replay_path()).await? {
            Some(bytes) => Ok(ReplayList::decode(&bytes)?),
            None => Ok(ReplayList::new()),
        }
    }

    async fn save_replay(&self, records: &[u8]) -> Result<(), StorageError> {
        self.atomic_write(&self.replay_path(), records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshctl_test_helpers::test_db;
    use meshctl_types::Address;

    #[tokio::test]
    async fn test_empty_directory_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("mesh")).unwrap();

        assert!(storage.load_database().await.unwrap().is_none());
        assert!(storage.load_replay().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_database_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let db = test_db();

        storage.save_database(&db).await.unwrap();
        let reopened = FileStorage::new(dir.path()).unwrap();
        assert_eq!(reopened.load_database().await.unwrap(), Some(db));
        assert!(!dir.path().join("mesh_db.tmp").exists());
    }

    #[tokio::test]
    async fn test_replay_list_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let mut replay = ReplayList::new();
        replay.update(Address(0x0003), 17, false);

        storage.save_replay(&replay.encode()).await.unwrap();
        let loaded = storage.load_replay().await.unwrap();
        assert_eq!(loaded.get(Address(0x0003)).map(|e| e.seq), Some(17));
    }

    #[tokio::test]
    async fn test_corrupt_files_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        std::fs::write(storage.database_path(), b"{ not json").unwrap();
        std::fs::write(storage.replay_path(), [0x01]).unwrap();

        assert!(matches!(
            storage.load_database().await,
            Err(StorageError::Json(_))
        ));
        assert!(matches!(
            storage.load_replay().await,
            Err(StorageError::Replay(_))
        ));
    }
}
