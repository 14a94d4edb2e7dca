use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use crate::persistence::{Storage, WriteBatch};

/// In-memory storage backend.
///
/// Used by tests and by ephemeral states (e.g. a speculative fork that is
/// never persisted). All operations are infallible beyond lock poisoning.
#[derive(Default)]
pub struct MemoryStorage {
    data: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.data.read().expect("Failed to lock storage").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, std::io::Error> {
        Ok(self
            .data
            .read()
            .expect("Failed to lock storage")
            .get(key)
            .cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), std::io::Error> {
        self.data
            .write()
            .expect("Failed to lock storage")
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn del(&self, key: &[u8]) -> Result<(), std::io::Error> {
        self.data.write().expect("Failed to lock storage").remove(key);
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), std::io::Error> {
        // one write lock for the whole batch keeps it atomic for readers
        let mut data = self.data.write().expect("Failed to lock storage");
        for (key, value) in batch {
            data.insert(key, value);
        }
        Ok(())
    }
}

/// Durable storage backend on top of sled.
pub struct SledStorage {
    data: sled::Db,
}

impl SledStorage {
    /// Open (or create) a sled database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let data = sled::open(path.as_ref()).map_err(std::io::Error::other)?;
        tracing::info!("Opened sled store at {}", path.as_ref().display());
        Ok(SledStorage { data })
    }
}

impl Storage for SledStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, std::io::Error> {
        let value = self.data.get(key).map_err(std::io::Error::other)?;
        Ok(value.map(|ivec| ivec.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), std::io::Error> {
        self.data.insert(key, value).map_err(std::io::Error::other)?;
        Ok(())
    }

    fn del(&self, key: &[u8]) -> Result<(), std::io::Error> {
        self.data.remove(key).map_err(std::io::Error::other)?;
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), std::io::Error> {
        let mut sled_batch = sled::Batch::default();
        for (key, value) in batch {
            sled_batch.insert(key, value);
        }
        self.data
            .apply_batch(sled_batch)
            .map_err(std::io::Error::other)?;
        self.data.flush().map_err(std::io::Error::other)?;
        Ok(())
    }
}
