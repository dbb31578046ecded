use anyhow::Result;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::blockfetcher::BlockchainInfoClient;
use crate::core::refresh::AddressService;
use crate::core::resolver::BlockResolver;
use crate::core::worker_pool::WorkerPool;
use crate::runtime::durable::RocksDurableStore;
use crate::runtime::fast_cache::{FastCache, LruFastCache, RedisFastCache};
use crate::utils::fmt_duration;

/// Opens the stores, starts the fetch workers and wires the address service.
///
/// Must run outside an async runtime: the upstream client is blocking.
pub fn build_service(cfg: &AppConfig) -> Result<AddressService> {
    let store = Arc::new(RocksDurableStore::open(&cfg.db_path)?);

    let upstream = Arc::new(BlockchainInfoClient::new(&cfg.upstream_url, cfg.http_timeout)?);

    let fast: Arc<dyn FastCache> = match &cfg.redis_url {
        Some(url) => {
            tracing::info!(ttl = %fmt_duration(cfg.fast_ttl), "fast tier: redis");
            Arc::new(RedisFastCache::new(url)?)
        }
        None => {
            tracing::info!(
                capacity = cfg.fast_cache_capacity,
                ttl = %fmt_duration(cfg.fast_ttl),
                "fast tier: in-process lru"
            );
            Arc::new(LruFastCache::new(cfg.fast_cache_capacity))
        }
    };

    let pool = Arc::new(WorkerPool::new(upstream.clone(), cfg.loader_routines, cfg.queue_capacity)?);
    let resolver = BlockResolver::new(store.clone(), pool, cfg.fetch_timeout);

    Ok(AddressService::new(fast, store, upstream, resolver, cfg.fast_ttl))
}
