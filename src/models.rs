use serde::{Deserialize, Serialize};

/// Height of a block in the chain; the dedup and cache key for block lookups.
pub type BlockHeight = u64;

/// Provenance tag for blocks served from the durable tier.
pub const SOURCE_CACHE: &str = "cache";
/// Provenance tag for anything fetched from the upstream provider.
pub const SOURCE_UPSTREAM: &str = "blockchain.info";

/// Address document as returned by `/rawaddr/{address}` and as stored in the
/// durable tier.
///
/// `txs` is kept in upstream order and only ever grows; `txs_count` is the
/// number of transactions already merged and doubles as the upstream paging
/// offset for the next incremental refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub hash160: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub n_tx: u64,
    #[serde(default)]
    pub total_received: i64,
    #[serde(default)]
    pub total_sent: i64,
    #[serde(default)]
    pub final_balance: i64,
    #[serde(default)]
    pub txs: Vec<Transaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub txs_count: u64,
}

impl Address {
    /// Folds a freshly fetched upstream page into this (stored) document.
    ///
    /// Summary fields follow the page; transactions are appended and
    /// `txs_count` advances by the number of appended transactions. `address`
    /// is the storage key and is left alone.
    pub fn absorb_page(&mut self, page: Address) {
        let Address {
            hash160,
            n_tx,
            total_received,
            total_sent,
            final_balance,
            txs,
            ..
        } = page;

        if !hash160.is_empty() {
            self.hash160 = hash160;
        }
        self.n_tx = n_tx;
        self.total_received = total_received;
        self.total_sent = total_sent;
        self.final_balance = final_balance;
        self.txs_count = self.txs_count.saturating_add(txs.len() as u64);
        self.txs.extend(txs);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrevOut {
    #[serde(default)]
    pub spent: bool,
    #[serde(default)]
    pub tx_index: u64,
    #[serde(default, rename = "type")]
    pub kind: i64,
    #[serde(default)]
    pub addr: String,
    #[serde(default)]
    pub value: i64,
    #[serde(default)]
    pub n: u64,
    #[serde(default)]
    pub script: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxInput {
    #[serde(default)]
    pub sequence: i64,
    #[serde(default)]
    pub witness: String,
    #[serde(default)]
    pub prev_out: Option<PrevOut>,
    #[serde(default)]
    pub script: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxOutput {
    #[serde(default)]
    pub spent: bool,
    #[serde(default)]
    pub tx_index: u64,
    #[serde(default, rename = "type")]
    pub kind: i64,
    #[serde(default)]
    pub addr: String,
    #[serde(default)]
    pub value: i64,
    #[serde(default)]
    pub n: u64,
    #[serde(default)]
    pub script: String,
}

/// Upstream transaction plus the block projection attached by the merger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub ver: i64,
    #[serde(default)]
    pub inputs: Vec<TxInput>,
    #[serde(default)]
    pub weight: u64,
    /// Absent for unconfirmed transactions.
    #[serde(default)]
    pub block_height: Option<BlockHeight>,
    #[serde(default)]
    pub relayed_by: String,
    #[serde(default)]
    pub out: Vec<TxOutput>,
    #[serde(default)]
    pub lock_time: u64,
    #[serde(default)]
    pub result: i64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub tx_index: u64,
    #[serde(default)]
    pub vin_sz: u64,
    #[serde(default)]
    pub vout_sz: u64,
    #[serde(default)]
    pub blocks: Vec<RespBlock>,
}

/// Block header fields kept from `/block-height/{height}`. The upstream
/// transaction list is ignored on decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub hash: String,
    #[serde(default)]
    pub ver: i64,
    #[serde(default)]
    pub prev_block: String,
    #[serde(default)]
    pub mrkl_root: String,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub bits: u64,
    #[serde(default)]
    pub fee: i64,
    #[serde(default)]
    pub nonce: u64,
    #[serde(default)]
    pub n_tx: u64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub block_index: u64,
    #[serde(default)]
    pub main_chain: bool,
    pub height: BlockHeight,
    #[serde(default)]
    pub received_time: i64,
    #[serde(default)]
    pub relayed_by: String,
}

impl Block {
    pub fn resp(&self) -> RespBlock {
        RespBlock { hash: self.hash.clone(), height: self.height, time: self.time }
    }
}

/// Everything upstream knows at one height (normally a single main-chain
/// block). This is the unit the resolver dedups, fetches and stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeightBlocks {
    /// Where this document came from on the current request. Observability only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

impl HeightBlocks {
    /// Public projection attached to transactions.
    pub fn resp_blocks(&self) -> Vec<RespBlock> {
        self.blocks.iter().map(Block::resp).collect()
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }
}

/// Outward-facing block projection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespBlock {
    pub hash: String,
    pub height: BlockHeight,
    pub time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAWADDR: &str = r#"{
        "hash160": "62e907b15cbf27d5425399ebf6f0fb50ebb88f18",
        "address": "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa",
        "n_tx": 2,
        "total_received": 5000000000,
        "total_sent": 0,
        "final_balance": 5000000000,
        "txs": [
            {
                "hash": "aa",
                "ver": 1,
                "inputs": [{"sequence": 4294967295, "witness": "", "script": "04ff", "prev_out": {"spent": true, "tx_index": 0, "type": 0, "addr": "1x", "value": 10, "n": 0, "script": "76a9"}}],
                "weight": 800,
                "block_height": 100,
                "relayed_by": "0.0.0.0",
                "out": [{"spent": false, "tx_index": 1, "type": 0, "addr": "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", "value": 10, "n": 0, "script": "41"}],
                "lock_time": 0,
                "result": 10,
                "size": 200,
                "time": 1231006505,
                "tx_index": 1,
                "vin_sz": 1,
                "vout_sz": 1
            },
            {
                "hash": "bb",
                "block_height": null,
                "time": 1231006600
            }
        ]
    }"#;

    const BLOCK_HEIGHT: &str = r#"{
        "blocks": [{
            "hash": "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
            "ver": 1,
            "prev_block": "0000000000000000000000000000000000000000000000000000000000000000",
            "mrkl_root": "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
            "time": 1231006505,
            "bits": 486604799,
            "fee": 0,
            "nonce": 2083236893,
            "n_tx": 1,
            "size": 285,
            "block_index": 0,
            "main_chain": true,
            "height": 0,
            "received_time": 1231006505,
            "relayed_by": "0.0.0.0",
            "tx": [{"hash": "4a5e1e"}]
        }]
    }"#;

    #[test]
    fn decodes_rawaddr_document() {
        let addr: Address = serde_json::from_str(RAWADDR).unwrap();
        assert_eq!(addr.address, "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa");
        assert_eq!(addr.n_tx, 2);
        assert_eq!(addr.txs.len(), 2);
        assert_eq!(addr.txs[0].block_height, Some(100));
        assert_eq!(addr.txs[0].inputs[0].prev_out.as_ref().unwrap().value, 10);
        assert_eq!(addr.txs[1].block_height, None);
        assert!(addr.txs[0].blocks.is_empty());
        assert_eq!(addr.txs_count, 0);
        assert_eq!(addr.source, None);
    }

    #[test]
    fn decodes_block_height_document_without_tx_list() {
        let blocks: HeightBlocks = serde_json::from_str(BLOCK_HEIGHT).unwrap();
        assert_eq!(blocks.blocks.len(), 1);
        assert_eq!(blocks.blocks[0].height, 0);
        assert!(blocks.blocks[0].main_chain);

        let resp = blocks.resp_blocks();
        assert_eq!(
            resp,
            vec![RespBlock {
                hash: "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f".into(),
                height: 0,
                time: 1231006505,
            }]
        );
    }

    #[test]
    fn resp_block_hides_internal_fields() {
        let blocks: HeightBlocks = serde_json::from_str(BLOCK_HEIGHT).unwrap();
        let json = serde_json::to_value(blocks.resp_blocks()).unwrap();
        let obj = json[0].as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, vec!["hash", "height", "time"]);
    }

    #[test]
    fn source_is_omitted_when_unset() {
        let addr = Address { address: "1abc".into(), ..Default::default() };
        let json = serde_json::to_value(&addr).unwrap();
        assert!(json.get("source").is_none());

        let tagged = Address { source: Some(SOURCE_UPSTREAM.into()), ..addr };
        let json = serde_json::to_value(&tagged).unwrap();
        assert_eq!(json["source"], "blockchain.info");
    }

    #[test]
    fn absorb_page_appends_and_advances_offset() {
        let mut stored = Address {
            address: "1abc".into(),
            n_tx: 1,
            txs: vec![Transaction { hash: "old".into(), ..Default::default() }],
            txs_count: 1,
            ..Default::default()
        };
        let page = Address {
            address: "1abc".into(),
            n_tx: 3,
            final_balance: 42,
            txs: vec![
                Transaction { hash: "new1".into(), ..Default::default() },
                Transaction { hash: "new2".into(), ..Default::default() },
            ],
            ..Default::default()
        };

        stored.absorb_page(page);

        assert_eq!(stored.n_tx, 3);
        assert_eq!(stored.final_balance, 42);
        assert_eq!(stored.txs_count, 3);
        let hashes: Vec<&str> = stored.txs.iter().map(|t| t.hash.as_str()).collect();
        assert_eq!(hashes, vec!["old", "new1", "new2"]);
    }
}
