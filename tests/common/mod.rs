// Common utilities for integration tests

use addrinfo::core::refresh::AddressService;
use addrinfo::core::resolver::BlockResolver;
use addrinfo::core::worker_pool::WorkerPool;
use addrinfo::runtime::durable::RocksDurableStore;
use addrinfo::runtime::fast_cache::LruFastCache;
use addrinfo::server::{ApiState, router};
use addrinfo::test_utils::{MockUpstream, TempDir, temp_durable_store};
use anyhow::Result;
use axum::Router;
use axum::http::{HeaderMap, Request, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Router over a mock upstream, a temp rocksdb store and an LRU fast tier.
pub struct ApiHarness {
    pub app: Router,
    pub upstream: Arc<MockUpstream>,
    pub store: Arc<RocksDurableStore>,
    pub fast: Arc<LruFastCache>,
    _dir: TempDir,
}

impl ApiHarness {
    pub fn new(upstream: MockUpstream) -> Result<Self> {
        Self::with_ttl(upstream, Duration::from_secs(60))
    }

    pub fn with_ttl(upstream: MockUpstream, fast_ttl: Duration) -> Result<Self> {
        let (store, dir) = temp_durable_store();
        let upstream = Arc::new(upstream);
        let fast = Arc::new(LruFastCache::new(64));
        let pool = Arc::new(WorkerPool::new(upstream.clone(), 4, 100)?);
        let resolver = BlockResolver::new(store.clone(), pool, Some(Duration::from_secs(5)));
        let service =
            AddressService::new(fast.clone(), store.clone(), upstream.clone(), resolver, fast_ttl);
        let app = router(ApiState::new(service));
        Ok(Self { app, upstream, store, fast, _dir: dir })
    }

    pub async fn get(&self, path: &str) -> Result<(StatusCode, HeaderMap, Vec<u8>)> {
        get(&self.app, path).await
    }
}

pub async fn get(app: &Router, path: &str) -> Result<(StatusCode, HeaderMap, Vec<u8>)> {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(path).body(axum::body::Body::empty())?)
        .await?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, headers, body.to_vec()))
}
