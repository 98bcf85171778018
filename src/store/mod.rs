//! Durable sample records.
//!
//! A thin wrapper over a sled tree mapping sample id to the
//! bincode-serialized [`SampleInfo`]. Every `put` is flushed before it
//! returns, so a record that reached the store survives a crash. The store
//! serializes concurrent writers internally; callers never need their own
//! lock around it.

use std::path::Path;

use thiserror::Error;

use crate::service::sample::SampleInfo;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("sample not found: {0}")]
    NotFound(String),
}

/// Sample-id keyed record store. Cheap to clone; clones share the
/// underlying database.
#[derive(Debug, Clone)]
pub struct SampleStore {
    db: sled::Db,
}

impl SampleStore {
    /// Opens (or creates) the store directory.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(SampleStore { db })
    }

    pub fn has(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.db.contains_key(id.as_bytes())?)
    }

    /// Writes a record and syncs it to disk before returning.
    pub fn put(&self, sample: &SampleInfo) -> Result<(), StoreError> {
        let value = bincode::serialize(sample)?;
        self.db.insert(sample.sample_id.as_bytes(), value)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<SampleInfo, StoreError> {
        match self.db.get(id.as_bytes())? {
            Some(value) => Ok(bincode::deserialize(&value)?),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    /// Lazily decodes every stored record.
    pub fn samples(&self) -> impl Iterator<Item = Result<SampleInfo, StoreError>> + '_ {
        self.db.iter().map(|entry| {
            let (_, value) = entry?;
            Ok(bincode::deserialize(&value)?)
        })
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Forces outstanding writes to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    /// Final flush before the store goes away. sled releases the directory
    /// lock when the last clone of the handle is dropped, so a closed store
    /// is fully durable and ready to hand over as soon as its handles drop.
    pub fn close(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
