use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::models::{Address, BlockHeight, HeightBlocks};
use crate::runtime::durable::DurableStore;
use crate::test_utils::mock_node::Gate;

/// Durable store whose reads park on a gate. Writes pass straight through.
pub struct GatedStore {
    inner: Arc<dyn DurableStore>,
    gate: Arc<Gate>,
    reads: AtomicUsize,
}

impl GatedStore {
    pub fn new(inner: Arc<dyn DurableStore>) -> Self {
        Self { inner, gate: Gate::new(), reads: AtomicUsize::new(0) }
    }

    pub fn gate(&self) -> &Arc<Gate> {
        &self.gate
    }

    /// Reads that have started, including ones still parked.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.gate.wait();
    }
}

impl DurableStore for GatedStore {
    fn find_address(&self, address: &str) -> Result<Option<Address>> {
        self.enter();
        self.inner.find_address(address)
    }

    fn upsert_address(&self, address: &Address) -> Result<()> {
        self.inner.upsert_address(address)
    }

    fn find_blocks(&self, height: BlockHeight) -> Result<Option<HeightBlocks>> {
        self.enter();
        self.inner.find_blocks(height)
    }

    fn insert_blocks(&self, height: BlockHeight, blocks: &HeightBlocks) -> Result<()> {
        self.inner.insert_blocks(height, blocks)
    }
}

/// Opens a gate from a plain thread after `delay` unless disarmed first.
///
/// A test that expects to open the gate itself asserts `!fired()` afterwards.
pub struct Watchdog {
    disarmed: Arc<AtomicBool>,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    pub fn arm(gate: Arc<Gate>, delay: Duration) -> Self {
        let disarmed = Arc::new(AtomicBool::new(false));
        let fired = Arc::new(AtomicBool::new(false));
        {
            let disarmed = disarmed.clone();
            let fired = fired.clone();
            thread::spawn(move || {
                thread::sleep(delay);
                if !disarmed.load(Ordering::SeqCst) {
                    fired.store(true, Ordering::SeqCst);
                    gate.open();
                }
            });
        }
        Self { disarmed, fired }
    }

    pub fn disarm(&self) {
        self.disarmed.store(true, Ordering::SeqCst);
    }

    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}
