//! In-memory persistence for simulation.

use meshctl_types::{MeshDb, ReplayCodecError, ReplayList};
use thiserror::Error;

/// Errors loading a stored network.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("No network stored")]
    Empty,

    #[error("Replay list corrupt: {0}")]
    Replay(#[from] ReplayCodecError),
}

/// Stores what the client asks to persist, the way a production runner
/// writes it to disk.
#[derive(Debug, Clone, Default)]
pub struct SimStorage {
    database: Option<MeshDb>,
    replay: Option<Vec<u8>>,
    database_writes: u64,
    replay_writes: u64,
}

impl SimStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_database(&mut self, db: MeshDb) {
        self.database = Some(db);
        self.database_writes += 1;
    }

    pub fn store_replay(&mut self, records: Vec<u8>) {
        self.replay = Some(records);
        self.replay_writes += 1;
    }

    /// Last stored database.
    pub fn database(&self) -> Option<&MeshDb> {
        self.database.as_ref()
    }

    /// Last stored replay list, decoded.
    pub fn replay(&self) -> Result<ReplayList, StorageError> {
        match &self.replay {
            Some(records) => Ok(ReplayList::decode(records)?),
            None => Ok(ReplayList::new()),
        }
    }

    /// Everything needed to open the stored network again.
    pub fn load(&self) -> Result<(MeshDb, ReplayList), StorageError> {
        let db = self.database.clone().ok_or(StorageError::Empty)?;
        Ok((db, self.replay()?))
    }

    pub fn database_writes(&self) -> u64 {
        self.database_writes
    }

    pub fn replay_writes(&self) -> u64 {
        self.replay_writes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshctl_types::Address;

    #[test]
    fn test_load_requires_database() {
        let storage = SimStorage::new();
        assert!(matches!(storage.load(), Err(StorageError::Empty)));
    }

    #[test]
    fn test_replay_decoded_on_load() {
        let mut storage = SimStorage::new();
        let mut replay = ReplayList::new();
        replay.update(Address(0x0002), 40, false);
        storage.store_replay(replay.encode());
        assert_eq!(storage.replay().unwrap().get(Address(0x0002)).map(|e| e.seq), Some(40));

        storage.store_replay(vec![0x01]);
        assert!(matches!(storage.replay(), Err(StorageError::Replay(_))));
        assert_eq!(storage.replay_writes(), 2);
    }
}
