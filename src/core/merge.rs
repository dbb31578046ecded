use crate::core::resolver::ResolvedBlocks;
use crate::models::Transaction;

/// Attaches the public block projection to each transaction by height.
///
/// `resolved` is expected to cover every height present in `txs`; a gap is a
/// bug upstream of this call and leaves that transaction's blocks empty.
pub fn attach(txs: &mut [Transaction], resolved: &ResolvedBlocks) {
    for tx in txs.iter_mut() {
        let Some(height) = tx.block_height else {
            tx.blocks.clear();
            continue;
        };
        match resolved.get(&height) {
            Some(blocks) => tx.blocks = blocks.resp_blocks(),
            None => {
                tracing::error!(tx = %tx.hash, height, "no resolved block for transaction height");
                tx.blocks.clear();
            }
        }
    }
}
