// Test utilities shared by unit and integration tests

pub use tempfile::TempDir;

pub mod fixtures;
pub mod gated_store;
pub mod mock_node;

use std::sync::Arc;

use crate::runtime::durable::RocksDurableStore;

pub use fixtures::{address_doc, block_hash, height_blocks, tx, unconfirmed_tx, wait_until};
pub use gated_store::{GatedStore, Watchdog};
pub use mock_node::{Gate, MockUpstream};

/// Durable store in a fresh temp dir. Keep the `TempDir` alive for the test.
pub fn temp_durable_store() -> (Arc<RocksDurableStore>, TempDir) {
    let dir = match TempDir::new() {
        Ok(d) => d,
        Err(e) => panic!("failed to create temp dir: {e}"),
    };
    let store = match RocksDurableStore::open(dir.path()) {
        Ok(s) => s,
        Err(e) => panic!("failed to open durable store: {e:#}"),
    };
    (Arc::new(store), dir)
}
