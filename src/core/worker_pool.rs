use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tokio::sync::{mpsc, oneshot};

use crate::core::blockfetcher::BlockSource;
use crate::error::{RefreshError, RefreshResult};
use crate::models::{BlockHeight, HeightBlocks};

/// Default depth of the shared task queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

type FetchOutcome = RefreshResult<HeightBlocks>;

struct FetchTask {
    height: BlockHeight,
    reply: oneshot::Sender<FetchOutcome>,
}

/// Handle for one submitted height. Exactly one outcome is ever delivered.
///
/// The reply slot holds one value, so a worker never blocks delivering it even
/// when this handle has already been dropped.
pub struct FetchRequest {
    height: BlockHeight,
    reply: oneshot::Receiver<FetchOutcome>,
}

impl FetchRequest {
    pub fn height(&self) -> BlockHeight {
        self.height
    }

    /// Waits for the worker's outcome.
    pub async fn outcome(self) -> FetchOutcome {
        match self.reply.await {
            Ok(outcome) => outcome,
            // Worker thread died mid-task.
            Err(_) => Err(RefreshError::PoolClosed),
        }
    }
}

/// Fixed set of long-lived fetch threads draining one bounded queue.
///
/// Workers run until every handle to the pool is dropped. Fetch failures go
/// back to the requester; nothing is retried here.
pub struct WorkerPool {
    tasks: mpsc::Sender<FetchTask>,
}

impl WorkerPool {
    pub fn new(source: Arc<dyn BlockSource>, workers: usize, queue_capacity: usize) -> Result<Self> {
        anyhow::ensure!(workers >= 1, "worker pool needs at least one worker");
        anyhow::ensure!(queue_capacity >= 1, "worker pool queue capacity must be at least 1");

        let (tx, rx) = mpsc::channel::<FetchTask>(queue_capacity);
        let rx = Arc::new(Mutex::new(rx));

        for idx in 0..workers {
            let rx = rx.clone();
            let source = source.clone();
            thread::Builder::new()
                .name(format!("block-fetch-{idx}"))
                .spawn(move || worker_loop(idx, rx, source))
                .with_context(|| format!("failed to spawn block fetch worker {idx}"))?;
        }
        tracing::info!(workers, queue_capacity, "block fetch workers started");

        Ok(Self { tasks: tx })
    }

    /// Enqueues a fetch for `height`. Waits for queue space when the queue is
    /// full.
    pub async fn submit(&self, height: BlockHeight) -> RefreshResult<FetchRequest> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tasks
            .send(FetchTask { height, reply: reply_tx })
            .await
            .map_err(|_| RefreshError::PoolClosed)?;
        Ok(FetchRequest { height, reply: reply_rx })
    }
}

fn worker_loop(idx: usize, rx: Arc<Mutex<mpsc::Receiver<FetchTask>>>, source: Arc<dyn BlockSource>) {
    loop {
        // Only the idle worker holding the lock waits on the queue; it lets go
        // before running the fetch.
        let task = rx.lock().blocking_recv();
        let Some(FetchTask { height, reply }) = task else {
            tracing::debug!(worker = idx, "task queue closed; worker exiting");
            return;
        };

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| source.fetch_blocks(height))) {
            Ok(result) => result.map_err(RefreshError::upstream),
            Err(payload) => Err(RefreshError::Upstream(format!(
                "block fetch for height {height} panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };
        match &outcome {
            Ok(_) => tracing::info!(worker = idx, height, "block fetched"),
            Err(e) => tracing::warn!(worker = idx, height, error = %e, "block fetch failed"),
        }

        if reply.send(outcome).is_err() {
            tracing::debug!(worker = idx, height, "requester gone; discarding fetched block");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}
