/// Shared test fixtures and data
use std::time::Duration;

use crate::models::{Address, Block, BlockHeight, HeightBlocks, Transaction};

/// Seconds between fixture blocks, starting from the genesis timestamp.
const GENESIS_TIME: i64 = 1_231_006_505;
const BLOCK_SPACING: i64 = 600;

pub fn block_hash(height: BlockHeight) -> String {
    format!("{height:064x}")
}

/// Single main-chain block at `height` with a deterministic hash and time.
pub fn height_blocks(height: BlockHeight) -> HeightBlocks {
    HeightBlocks {
        source: None,
        blocks: vec![Block {
            hash: block_hash(height),
            ver: 1,
            time: GENESIS_TIME + height as i64 * BLOCK_SPACING,
            n_tx: 1,
            main_chain: true,
            height,
            ..Default::default()
        }],
    }
}

pub fn tx(hash: &str, height: BlockHeight) -> Transaction {
    Transaction { hash: hash.to_string(), block_height: Some(height), ..Default::default() }
}

pub fn unconfirmed_tx(hash: &str) -> Transaction {
    Transaction { hash: hash.to_string(), block_height: None, ..Default::default() }
}

/// Upstream-shaped address document holding `txs`.
pub fn address_doc(address: &str, txs: Vec<Transaction>) -> Address {
    Address {
        hash160: format!("h160-{address}"),
        address: address.to_string(),
        n_tx: txs.len() as u64,
        total_received: 5_000_000_000,
        total_sent: 0,
        final_balance: 5_000_000_000,
        txs,
        source: None,
        txs_count: 0,
    }
}

/// Polls `cond` until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
