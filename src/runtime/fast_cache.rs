//! Fast tier: full serialized address responses with an expiry.
//!
//! Keys follow `address:{address}`. Redis is the production backend; the LRU
//! backend keeps a single process working without one.

use anyhow::{Context, Result};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

pub fn fast_key(address: &str) -> String {
    format!("address:{address}")
}

/// Blocking key-value store with per-entry time to live.
pub trait FastCache: Send + Sync {
    fn get(&self, address: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, address: &str, bytes: &[u8], ttl: Duration) -> Result<()>;
}

/// Redis backend. `redis` is synchronous, so callers on the async runtime go
/// through `spawn_blocking`.
pub struct RedisFastCache {
    client: redis::Client,
}

impl RedisFastCache {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .with_context(|| format!("invalid redis url {redis_url}"))?;
        Ok(Self { client })
    }

    fn connection(&self) -> Result<redis::Connection> {
        self.client.get_connection().context("redis connect failed")
    }
}

impl FastCache for RedisFastCache {
    fn get(&self, address: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection()?;
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(fast_key(address))
            .query(&mut conn)
            .context("redis GET failed")?;
        Ok(value)
    }

    fn set(&self, address: &str, bytes: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.connection()?;
        let key = fast_key(address);
        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(&key)
            .arg(bytes)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(ttl.as_secs().max(1))
            .ignore()
            .query::<()>(&mut conn)
            .context("redis SET/EXPIRE failed")?;
        Ok(())
    }
}

struct LruEntry {
    expires_at: Instant,
    bytes: Vec<u8>,
}

/// Bounded in-process backend.
pub struct LruFastCache {
    entries: Mutex<LruCache<String, LruEntry>>,
}

impl LruFastCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { entries: Mutex::new(LruCache::new(cap)) }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FastCache for LruFastCache {
    fn get(&self, address: &str) -> Result<Option<Vec<u8>>> {
        let key = fast_key(address);
        let mut entries = self.entries.lock();
        let expired = match entries.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(Some(entry.bytes.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(&key);
        }
        Ok(None)
    }

    fn set(&self, address: &str, bytes: &[u8], ttl: Duration) -> Result<()> {
        let entry = LruEntry { expires_at: Instant::now() + ttl, bytes: bytes.to_vec() };
        self.entries.lock().put(fast_key(address), entry);
        Ok(())
    }
}
