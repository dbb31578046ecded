use anyhow::{Result, anyhow};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::blockfetcher::{AddressSource, BlockSource};
use crate::models::{Address, BlockHeight, HeightBlocks};

/// Latch that holds upstream calls until opened.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.cv.notify_all();
    }

    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cv.wait(&mut open);
        }
    }
}

/// In-memory upstream provider serving both blocks and address pages.
///
/// Counts every call so tests can assert on dedup and fan-out.
#[derive(Default)]
pub struct MockUpstream {
    blocks: Mutex<HashMap<BlockHeight, HeightBlocks>>,
    failing_heights: HashSet<BlockHeight>,
    panicking_heights: HashSet<BlockHeight>,
    gated_heights: HashMap<BlockHeight, Arc<Gate>>,
    block_latency: Option<Duration>,
    addresses: Mutex<HashMap<String, Address>>,
    address_gate: Option<Arc<Gate>>,

    block_calls: AtomicUsize,
    calls_by_height: Mutex<HashMap<BlockHeight, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    address_offsets: Mutex<Vec<u64>>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocks(self, blocks: impl IntoIterator<Item = HeightBlocks>) -> Self {
        {
            let mut map = self.blocks.lock();
            for b in blocks {
                if let Some(height) = b.blocks.first().map(|blk| blk.height) {
                    map.insert(height, b);
                }
            }
        }
        self
    }

    pub fn failing_height(mut self, height: BlockHeight) -> Self {
        self.failing_heights.insert(height);
        self
    }

    pub fn panicking_height(mut self, height: BlockHeight) -> Self {
        self.panicking_heights.insert(height);
        self
    }

    /// Fetches of `height` park until `gate` opens.
    pub fn gate_height(mut self, height: BlockHeight, gate: Arc<Gate>) -> Self {
        self.gated_heights.insert(height, gate);
        self
    }

    pub fn with_block_latency(mut self, latency: Duration) -> Self {
        self.block_latency = Some(latency);
        self
    }

    pub fn with_address(self, address: Address) -> Self {
        self.put_address(address);
        self
    }

    /// Address fetches park until `gate` opens.
    pub fn gate_addresses(mut self, gate: Arc<Gate>) -> Self {
        self.address_gate = Some(gate);
        self
    }

    /// Replaces the full upstream history of an address.
    pub fn put_address(&self, address: Address) {
        self.addresses.lock().insert(address.address.clone(), address);
    }

    pub fn block_calls(&self) -> usize {
        self.block_calls.load(Ordering::SeqCst)
    }

    pub fn calls_for_height(&self, height: BlockHeight) -> usize {
        self.calls_by_height.lock().get(&height).copied().unwrap_or(0)
    }

    pub fn max_concurrent_block_calls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn address_calls(&self) -> usize {
        self.address_offsets.lock().len()
    }

    pub fn address_offsets(&self) -> Vec<u64> {
        self.address_offsets.lock().clone()
    }
}

impl BlockSource for MockUpstream {
    fn fetch_blocks(&self, height: BlockHeight) -> Result<HeightBlocks> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        *self.calls_by_height.lock().entry(height).or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = self.gated_heights.get(&height) {
            gate.wait();
        }
        if let Some(latency) = self.block_latency {
            std::thread::sleep(latency);
        }
        if self.panicking_heights.contains(&height) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            panic!("mock upstream blew up at height {height}");
        }

        let out = if self.failing_heights.contains(&height) {
            Err(anyhow!("upstream refused block at height {height}"))
        } else {
            self.blocks
                .lock()
                .get(&height)
                .cloned()
                .ok_or_else(|| anyhow!("no block at height {height}"))
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        out
    }
}

impl AddressSource for MockUpstream {
    fn fetch_address(&self, address: &str, offset: u64) -> Result<Address> {
        self.address_offsets.lock().push(offset);
        if let Some(gate) = &self.address_gate {
            gate.wait();
        }

        let full = self
            .addresses
            .lock()
            .get(address)
            .cloned()
            .ok_or_else(|| anyhow!("upstream has no address {address}"))?;

        let txs = full.txs.iter().skip(offset as usize).cloned().collect();
        Ok(Address { txs, txs_count: 0, source: None, ..full })
    }
}
