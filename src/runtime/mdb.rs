use rocksdb::{
    BlockBasedOptions, Cache, DB, Direction, Error as RocksError, IteratorMode, Options,
    ReadOptions,
};
use std::{path::Path, sync::Arc};

/// ===== Cache / open-time tuning =====
/// Size of the shared LRU block cache (data + index/filter blocks).
pub const ROCKS_BLOCK_CACHE_BYTES: usize = 256 << 20; // 256 MiB

/// Bloom filter bits/key (helps point lookups by height / address).
pub const BLOOM_BITS_PER_KEY: f64 = 10.0;

/// A key namespace inside one shared RocksDB. Every key passed in is relative
/// and gets the namespace prefix prepended.
#[derive(Clone)]
pub struct Mdb {
    db: Arc<DB>,
    prefix: Vec<u8>,
}

impl Mdb {
    pub fn from_db(db: Arc<DB>, prefix: impl AsRef<[u8]>) -> Self {
        Self { db, prefix: prefix.as_ref().to_vec() }
    }

    /// Opens (creating if needed) a RocksDB tuned for point lookups.
    pub fn open_db(path: impl AsRef<Path>) -> Result<Arc<DB>, RocksError> {
        let cache = Cache::new_lru_cache(ROCKS_BLOCK_CACHE_BYTES);

        let mut table = BlockBasedOptions::default();
        table.set_block_cache(&cache);
        // Put index + filter in the cache (hot metadata)
        table.set_cache_index_and_filter_blocks(true);
        table.set_pin_l0_filter_and_index_blocks_in_cache(true);
        table.set_bloom_filter(BLOOM_BITS_PER_KEY, false);

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_block_based_table_factory(&table);

        Ok(Arc::new(DB::open(&opts, path)?))
    }

    #[inline]
    pub fn prefixed(&self, k: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.prefix.len() + k.len());
        out.extend_from_slice(&self.prefix);
        out.extend_from_slice(k);
        out
    }

    pub fn get(&self, k: &[u8]) -> Result<Option<Vec<u8>>, RocksError> {
        self.db.get(self.prefixed(k))
    }

    pub fn put(&self, k: &[u8], v: &[u8]) -> Result<(), RocksError> {
        self.db.put(self.prefixed(k), v)
    }

    /// Count keys in this namespace.
    pub fn count(&self) -> Result<usize, RocksError> {
        let ns = self.prefix.clone();
        let mut ro = ReadOptions::default();
        ro.fill_cache(false);

        let mut n = 0usize;
        for res in self.db.iterator_opt(IteratorMode::From(&ns, Direction::Forward), ro) {
            let (k, _v) = res?;
            if !k.starts_with(&ns) {
                break;
            }
            n += 1;
        }
        Ok(n)
    }
}
