use anyhow::{Context, Result};
use rocksdb::DB;
use std::path::Path;
use std::sync::Arc;

use crate::models::{Address, BlockHeight, HeightBlocks};
use crate::runtime::mdb::Mdb;

/// Durable tier: one document per address and one per block height.
///
/// `Ok(None)` is the not-found case; errors are real store failures.
pub trait DurableStore: Send + Sync {
    fn find_address(&self, address: &str) -> Result<Option<Address>>;
    fn upsert_address(&self, address: &Address) -> Result<()>;
    fn find_blocks(&self, height: BlockHeight) -> Result<Option<HeightBlocks>>;
    /// Insert-only. Inserting a height that is already present is a no-op.
    fn insert_blocks(&self, height: BlockHeight, blocks: &HeightBlocks) -> Result<()>;
}

/// RocksDB-backed durable tier. Documents are JSON under two namespaces:
///
/// - `address:{address}` → address document
/// - `blocks:{height_be8}` → blocks at that height
pub struct RocksDurableStore {
    addresses: Mdb,
    blocks: Mdb,
}

impl RocksDurableStore {
    pub const ADDRESS_PREFIX: &'static [u8] = b"address:";
    pub const BLOCKS_PREFIX: &'static [u8] = b"blocks:";

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = Mdb::open_db(path)
            .with_context(|| format!("failed to open durable store at {}", path.display()))?;
        Ok(Self::from_db(db))
    }

    pub fn from_db(db: Arc<DB>) -> Self {
        Self {
            addresses: Mdb::from_db(db.clone(), Self::ADDRESS_PREFIX),
            blocks: Mdb::from_db(db, Self::BLOCKS_PREFIX),
        }
    }

    pub fn block_count(&self) -> Result<usize> {
        Ok(self.blocks.count()?)
    }

    fn height_key(height: BlockHeight) -> [u8; 8] {
        height.to_be_bytes()
    }
}

impl DurableStore for RocksDurableStore {
    fn find_address(&self, address: &str) -> Result<Option<Address>> {
        match self.addresses.get(address.as_bytes())? {
            Some(raw) => {
                let doc = serde_json::from_slice(&raw)
                    .with_context(|| format!("corrupt address document for {address}"))?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    fn upsert_address(&self, address: &Address) -> Result<()> {
        let raw = serde_json::to_vec(address)?;
        self.addresses.put(address.address.as_bytes(), &raw)?;
        Ok(())
    }

    fn find_blocks(&self, height: BlockHeight) -> Result<Option<HeightBlocks>> {
        match self.blocks.get(&Self::height_key(height))? {
            Some(raw) => {
                let doc = serde_json::from_slice(&raw)
                    .with_context(|| format!("corrupt blocks document at height {height}"))?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    fn insert_blocks(&self, height: BlockHeight, blocks: &HeightBlocks) -> Result<()> {
        let key = Self::height_key(height);
        // Racing inserts of the same height carry the same upstream answer;
        // first one wins, the rest are dropped.
        if self.blocks.get(&key)?.is_some() {
            return Ok(());
        }
        // Provenance is per request, never stored.
        let doc = HeightBlocks { source: None, blocks: blocks.blocks.clone() };
        self.blocks.put(&key, &serde_json::to_vec(&doc)?)?;
        Ok(())
    }
}
