use std::sync::Arc;
use std::time::{Duration, Instant};

use time::OffsetDateTime;

use crate::core::blockfetcher::AddressSource;
use crate::core::merge;
use crate::core::resolver::BlockResolver;
use crate::error::{RefreshError, RefreshResult};
use crate::models::{Address, SOURCE_UPSTREAM};
use crate::runtime::background::spawn_detached;
use crate::runtime::durable::DurableStore;
use crate::runtime::fast_cache::FastCache;
use crate::runtime::inflight::InFlightGuard;

/// What one address lookup produced.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// Fast-tier hit. The bytes are returned to the client untouched.
    Cached(Vec<u8>),
    /// Another request is already refreshing this address.
    AlreadyProcessing { started_at: OffsetDateTime },
    /// Newly merged document, tagged with the upstream source.
    Fresh(Address),
}

/// Address lookup with two cache tiers, an in-flight guard and incremental
/// refresh from upstream.
pub struct AddressService {
    fast: Arc<dyn FastCache>,
    store: Arc<dyn DurableStore>,
    upstream: Arc<dyn AddressSource>,
    resolver: BlockResolver,
    inflight: Arc<InFlightGuard>,
    fast_ttl: Duration,
}

impl AddressService {
    pub fn new(
        fast: Arc<dyn FastCache>,
        store: Arc<dyn DurableStore>,
        upstream: Arc<dyn AddressSource>,
        resolver: BlockResolver,
        fast_ttl: Duration,
    ) -> Self {
        Self { fast, store, upstream, resolver, inflight: Arc::new(InFlightGuard::new()), fast_ttl }
    }

    pub fn inflight(&self) -> &InFlightGuard {
        &self.inflight
    }

    pub async fn lookup(&self, address: &str) -> RefreshResult<RefreshOutcome> {
        if let Some(bytes) = self.fast_get(address).await {
            tracing::debug!(address, "fast cache hit");
            return Ok(RefreshOutcome::Cached(bytes));
        }

        let ticket = match self.inflight.try_acquire(address, OffsetDateTime::now_utc()) {
            Ok(ticket) => ticket,
            Err(started_at) => {
                tracing::info!(address, "refresh already running");
                return Ok(RefreshOutcome::AlreadyProcessing { started_at });
            }
        };

        let timer = Instant::now();
        let result = self.refresh(address).await;
        drop(ticket);

        match &result {
            Ok(doc) => tracing::info!(
                address,
                txs = doc.txs_count,
                elapsed_ms = timer.elapsed().as_millis() as u64,
                "address refreshed"
            ),
            Err(e) => tracing::error!(address, error = %e, "address refresh failed"),
        }
        result.map(RefreshOutcome::Fresh)
    }

    /// Fetches everything upstream has past the stored offset, merges blocks
    /// into the new page and appends it to the stored document. Nothing about
    /// the address is persisted unless the whole page merged.
    async fn refresh(&self, address: &str) -> RefreshResult<Address> {
        let stored = self.find_stored(address).await?;
        let offset = stored.as_ref().map_or(0, |doc| doc.txs_count);

        let mut page = self.fetch_page(address, offset).await?;
        let resolved = self.resolver.resolve(&page.txs).await?;
        merge::attach(&mut page.txs, &resolved);

        let mut doc = stored.unwrap_or_else(|| Address {
            address: address.to_string(),
            ..Default::default()
        });
        doc.absorb_page(page);
        doc.source = None;

        self.persist(address, &doc);

        doc.source = Some(SOURCE_UPSTREAM.to_string());
        Ok(doc)
    }

    async fn find_stored(&self, address: &str) -> RefreshResult<Option<Address>> {
        let store = self.store.clone();
        let owned = address.to_string();
        tokio::task::spawn_blocking(move || store.find_address(&owned))
            .await
            .map_err(|e| RefreshError::Store(format!("address lookup task failed: {e}")))?
            .map_err(|e| RefreshError::Store(format!("address lookup for {address} failed: {e:#}")))
    }

    async fn fetch_page(&self, address: &str, offset: u64) -> RefreshResult<Address> {
        let upstream = self.upstream.clone();
        let owned = address.to_string();
        tokio::task::spawn_blocking(move || upstream.fetch_address(&owned, offset))
            .await
            .map_err(|e| RefreshError::Upstream(format!("address fetch task failed: {e}")))?
            .map_err(RefreshError::upstream)
    }

    async fn fast_get(&self, address: &str) -> Option<Vec<u8>> {
        let fast = self.fast.clone();
        let owned = address.to_string();
        match tokio::task::spawn_blocking(move || fast.get(&owned)).await {
            Ok(Ok(hit)) => hit,
            Ok(Err(e)) => {
                tracing::warn!(address, error = %format!("{e:#}"), "fast cache read failed");
                None
            }
            Err(e) => {
                tracing::warn!(address, error = %e, "fast cache task failed");
                None
            }
        }
    }

    fn persist(&self, address: &str, doc: &Address) {
        let bytes = match serde_json::to_vec(doc) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(address, error = %e, "failed to encode address document");
                return;
            }
        };

        let store = self.store.clone();
        let to_store = doc.clone();
        spawn_detached("upsert_address", move || store.upsert_address(&to_store));

        let fast = self.fast.clone();
        let key = address.to_string();
        let ttl = self.fast_ttl;
        spawn_detached("fast_cache_set", move || fast.set(&key, &bytes, ttl));
    }
}
