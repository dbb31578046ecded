use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::core::worker_pool::{FetchRequest, WorkerPool};
use crate::error::{RefreshError, RefreshResult};
use crate::models::{BlockHeight, HeightBlocks, SOURCE_CACHE, SOURCE_UPSTREAM, Transaction};
use crate::runtime::background::spawn_detached;
use crate::runtime::durable::DurableStore;

pub type ResolvedBlocks = HashMap<BlockHeight, HeightBlocks>;

/// Maps every block height referenced by a transaction list to its blocks,
/// reading the durable tier first and fetching only the misses.
pub struct BlockResolver {
    store: Arc<dyn DurableStore>,
    pool: Arc<WorkerPool>,
    fetch_timeout: Option<Duration>,
}

impl BlockResolver {
    /// `fetch_timeout` is one deadline for all worker replies of a single
    /// `resolve` call, counted from when the first reply is awaited. `None`
    /// waits forever.
    pub fn new(
        store: Arc<dyn DurableStore>,
        pool: Arc<WorkerPool>,
        fetch_timeout: Option<Duration>,
    ) -> Self {
        Self { store, pool, fetch_timeout }
    }

    /// Distinct heights referenced by `txs`. Unconfirmed transactions have none.
    pub fn distinct_heights(txs: &[Transaction]) -> BTreeSet<BlockHeight> {
        txs.iter().filter_map(|tx| tx.block_height).collect()
    }

    /// Resolves all heights in `txs`.
    ///
    /// Misses are submitted once each and awaited in submission order. The
    /// first failed fetch ends the call with that error; fetches still running
    /// finish on their own and their results are dropped. Every fetched block
    /// is handed to a detached insert into the durable tier as soon as it
    /// arrives.
    pub async fn resolve(&self, txs: &[Transaction]) -> RefreshResult<ResolvedBlocks> {
        let heights = Self::distinct_heights(txs);
        if heights.is_empty() {
            return Ok(HashMap::new());
        }

        let (mut resolved, misses) = self.find_stored(heights).await?;
        let mut pending: Vec<FetchRequest> = Vec::with_capacity(misses.len());
        for height in misses {
            pending.push(self.pool.submit(height).await?);
        }

        if !pending.is_empty() {
            tracing::info!(
                cached = resolved.len(),
                fetching = pending.len(),
                "load blocks"
            );
        }

        let deadline = self.fetch_timeout.map(|limit| (Instant::now() + limit, limit));
        for req in pending {
            let height = req.height();
            let blocks = Self::await_reply(req, deadline).await.inspect_err(|e| {
                tracing::error!(height, error = %e, "block resolution aborted");
            })?;

            let store = self.store.clone();
            let to_store = blocks.clone();
            spawn_detached("insert_blocks", move || store.insert_blocks(height, &to_store));

            resolved.insert(height, blocks.with_source(SOURCE_UPSTREAM));
        }

        Ok(resolved)
    }

    /// Reads every height from the durable tier on the blocking pool. Hits come
    /// back tagged as cached; misses and read errors come back as heights to
    /// fetch, in ascending order.
    async fn find_stored(
        &self,
        heights: BTreeSet<BlockHeight>,
    ) -> RefreshResult<(ResolvedBlocks, Vec<BlockHeight>)> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            let mut hits: ResolvedBlocks = HashMap::with_capacity(heights.len());
            let mut misses = Vec::new();
            for height in heights {
                match store.find_blocks(height) {
                    Ok(Some(blocks)) => {
                        tracing::debug!(height, "block served from durable store");
                        hits.insert(height, blocks.with_source(SOURCE_CACHE));
                    }
                    Ok(None) => misses.push(height),
                    Err(e) => {
                        tracing::warn!(height, error = %format!("{e:#}"), "durable block lookup failed; fetching");
                        misses.push(height);
                    }
                }
            }
            (hits, misses)
        })
        .await
        .map_err(|e| RefreshError::Store(format!("durable block lookup task failed: {e}")))
    }

    async fn await_reply(
        req: FetchRequest,
        deadline: Option<(Instant, Duration)>,
    ) -> RefreshResult<HeightBlocks> {
        let height = req.height();
        match deadline {
            None => req.outcome().await,
            Some((at, limit)) => match tokio::time::timeout_at(at, req.outcome()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(RefreshError::FetchTimeout {
                    height,
                    waited_ms: limit.as_millis() as u64,
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::durable::RocksDurableStore;
    use crate::test_utils::{
        Gate, GatedStore, MockUpstream, Watchdog, height_blocks, temp_durable_store, tx,
        unconfirmed_tx, wait_until,
    };

    fn resolver_with(
        upstream: Arc<MockUpstream>,
        store: Arc<RocksDurableStore>,
        workers: usize,
        fetch_timeout: Option<Duration>,
    ) -> BlockResolver {
        let pool = Arc::new(WorkerPool::new(upstream, workers, 100).unwrap());
        BlockResolver::new(store, pool, fetch_timeout)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fetches_only_uncached_distinct_heights() {
        let (store, _dir) = temp_durable_store();
        store.insert_blocks(100, &height_blocks(100)).unwrap();
        let upstream =
            Arc::new(MockUpstream::new().with_blocks([height_blocks(100), height_blocks(200)]));
        let resolver = resolver_with(upstream.clone(), store.clone(), 2, None);

        let txs = vec![tx("t1", 100), tx("t2", 100), tx("t3", 200)];
        let resolved = resolver.resolve(&txs).await.unwrap();

        assert_eq!(upstream.block_calls(), 1);
        assert_eq!(upstream.calls_for_height(200), 1);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[&100].source.as_deref(), Some(SOURCE_CACHE));
        assert_eq!(resolved[&200].source.as_deref(), Some(SOURCE_UPSTREAM));
        assert_eq!(resolved[&200].blocks, height_blocks(200).blocks);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn duplicate_heights_are_fetched_once() {
        let (store, _dir) = temp_durable_store();
        let heights = [5u64, 9, 5, 5, 9, 12, 12, 5];
        let upstream = Arc::new(
            MockUpstream::new().with_blocks([height_blocks(5), height_blocks(9), height_blocks(12)]),
        );
        let resolver = resolver_with(upstream.clone(), store, 4, None);

        let txs: Vec<_> =
            heights.iter().enumerate().map(|(i, h)| tx(&format!("t{i}"), *h)).collect();
        let resolved = resolver.resolve(&txs).await.unwrap();

        assert_eq!(resolved.len(), 3);
        assert_eq!(upstream.block_calls(), 3);
        for h in [5, 9, 12] {
            assert_eq!(upstream.calls_for_height(h), 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_and_unconfirmed_lists_resolve_to_nothing() {
        let (store, _dir) = temp_durable_store();
        let upstream = Arc::new(MockUpstream::new());
        let resolver = resolver_with(upstream.clone(), store, 1, None);

        assert!(resolver.resolve(&[]).await.unwrap().is_empty());
        assert!(resolver.resolve(&[unconfirmed_tx("u")]).await.unwrap().is_empty());
        assert_eq!(upstream.block_calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn first_failure_fails_the_whole_resolution() {
        let (store, _dir) = temp_durable_store();
        let upstream = Arc::new(
            MockUpstream::new()
                .with_blocks([height_blocks(1), height_blocks(3)])
                .failing_height(2),
        );
        let resolver = resolver_with(upstream.clone(), store, 3, None);

        let txs = vec![tx("a", 1), tx("b", 2), tx("c", 3)];
        let err = resolver.resolve(&txs).await.unwrap_err();
        assert!(matches!(err, RefreshError::Upstream(ref m) if m.contains("height 2")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fetched_blocks_are_persisted_in_background() {
        let (store, _dir) = temp_durable_store();
        let upstream = Arc::new(MockUpstream::new().with_blocks([height_blocks(200)]));
        let resolver = resolver_with(upstream.clone(), store.clone(), 1, None);

        resolver.resolve(&[tx("a", 200)]).await.unwrap();
        let stored = wait_until(Duration::from_secs(5), || {
            store.find_blocks(200).ok().flatten().is_some()
        })
        .await;
        assert!(stored);

        // Second pass is served from the durable tier.
        let again = resolver.resolve(&[tx("a", 200)]).await.unwrap();
        assert_eq!(again[&200].source.as_deref(), Some(SOURCE_CACHE));
        assert_eq!(upstream.block_calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stalled_fetch_times_out() {
        let (store, _dir) = temp_durable_store();
        let gate = Gate::new();
        let upstream = Arc::new(
            MockUpstream::new().with_blocks([height_blocks(7)]).gate_height(7, gate.clone()),
        );
        let resolver =
            resolver_with(upstream.clone(), store, 1, Some(Duration::from_millis(50)));

        let err = resolver.resolve(&[tx("a", 7)]).await.unwrap_err();
        assert!(matches!(err, RefreshError::FetchTimeout { height: 7, waited_ms: 50 }));

        // Let the parked worker finish so it can exit with the pool.
        gate.open();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fetch_timeout_bounds_the_whole_resolution() {
        let (store, _dir) = temp_durable_store();
        let upstream = Arc::new(
            MockUpstream::new()
                .with_blocks([height_blocks(1), height_blocks(2), height_blocks(3)])
                .with_block_latency(Duration::from_millis(100)),
        );
        // One worker serves the heights back to back. Each reply lands well
        // inside 200ms of the previous one, the last one only after ~300ms.
        let resolver =
            resolver_with(upstream.clone(), store, 1, Some(Duration::from_millis(200)));

        let txs = vec![tx("a", 1), tx("b", 2), tx("c", 3)];
        let err = resolver.resolve(&txs).await.unwrap_err();
        assert!(matches!(err, RefreshError::FetchTimeout { waited_ms: 200, .. }), "{err:?}");
    }

    // Single-threaded runtime: a durable read on the runtime thread would
    // starve the task that opens the gate until the watchdog steps in.
    #[tokio::test]
    async fn durable_reads_leave_the_runtime_thread_free() {
        let (rocks, _dir) = temp_durable_store();
        rocks.insert_blocks(100, &height_blocks(100)).unwrap();
        let store = Arc::new(GatedStore::new(rocks));
        let upstream = Arc::new(MockUpstream::new().with_blocks([height_blocks(200)]));
        let pool = Arc::new(WorkerPool::new(upstream.clone(), 1, 10).unwrap());
        let resolver = Arc::new(BlockResolver::new(store.clone(), pool, None));
        let watchdog = Watchdog::arm(store.gate().clone(), Duration::from_secs(2));

        let task = {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.resolve(&[tx("a", 100), tx("b", 200)]).await })
        };
        let reads = store.clone();
        assert!(wait_until(Duration::from_secs(5), || reads.reads() > 0).await);
        watchdog.disarm();
        store.gate().open();

        let resolved = task.await.unwrap().unwrap();
        assert!(!watchdog.fired(), "durable read blocked the runtime thread");
        assert_eq!(store.reads(), 2);
        assert_eq!(resolved[&100].source.as_deref(), Some(SOURCE_CACHE));
        assert_eq!(resolved[&200].source.as_deref(), Some(SOURCE_UPSTREAM));
        assert_eq!(upstream.block_calls(), 1);
    }
}
