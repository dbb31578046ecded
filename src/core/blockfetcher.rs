// blockfetcher.rs
use anyhow::{Context, Result};
use reqwest::Url;
use reqwest::blocking::Client as HttpClient;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::models::{Address, BlockHeight, HeightBlocks};

/// === Tuning ==================================================================
/// Only transactions with at least this many confirmations are listed.
pub const ADDRESS_CONFIRMATIONS: u32 = 6;
/// Page size asked of `/rawaddr`; large enough to take the whole tail at once.
pub const ADDRESS_PAGE_LIMIT: u32 = 100_000;
/// ============================================================================

/// Source of block metadata for a given height. One blocking call per height;
/// implementations hold no per-request state.
pub trait BlockSource: Send + Sync {
    fn fetch_blocks(&self, height: BlockHeight) -> Result<HeightBlocks>;
}

/// Source of address pages. `offset` skips transactions already merged.
pub trait AddressSource: Send + Sync {
    fn fetch_address(&self, address: &str, offset: u64) -> Result<Address>;
}

/// Blocking client for the blockchain.info style JSON API.
pub struct BlockchainInfoClient {
    base: Url,
    http: HttpClient,
}

impl BlockchainInfoClient {
    /// `timeout` of `None` leaves upstream calls unbounded.
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self> {
        let base = Url::parse(base_url.trim_end_matches('/'))
            .with_context(|| format!("invalid upstream url {base_url}"))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("upstream url {base_url} cannot carry a path");
        }
        let mut builder = HttpClient::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let http = builder.build().context("failed to build upstream http client")?;
        Ok(Self { base, http })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str().trim_end_matches('/')
    }

    /// Base URL plus `segments`, each pushed as one escaped path segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub fn block_height_url(&self, height: BlockHeight) -> Url {
        let mut url = self.endpoint(&["block-height", &height.to_string()]);
        url.query_pairs_mut().append_pair("format", "json");
        url
    }

    pub fn rawaddr_url(&self, address: &str, offset: u64) -> Url {
        let mut url = self.endpoint(&["rawaddr", address]);
        url.query_pairs_mut()
            .append_pair("confirmations", &ADDRESS_CONFIRMATIONS.to_string())
            .append_pair("limit", &ADDRESS_PAGE_LIMIT.to_string())
            .append_pair("offset", &offset.to_string());
        url
    }

    fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let resp = self
            .http
            .get(url.clone())
            .send()
            .with_context(|| format!("upstream GET {url} failed"))?
            .error_for_status()
            .with_context(|| format!("upstream GET {url} returned error status"))?;

        let body = resp.text().context("upstream response body read failed")?;
        serde_json::from_str(&body).with_context(|| format!("upstream GET {url}: json decode failed"))
    }
}

impl BlockSource for BlockchainInfoClient {
    fn fetch_blocks(&self, height: BlockHeight) -> Result<HeightBlocks> {
        tracing::info!(height, "getting block from api");
        let blocks: HeightBlocks = self.get_json(self.block_height_url(height))?;
        tracing::debug!(height, count = blocks.blocks.len(), "block fetched");
        Ok(blocks)
    }
}

impl AddressSource for BlockchainInfoClient {
    fn fetch_address(&self, address: &str, offset: u64) -> Result<Address> {
        tracing::info!(address, offset, "getting address from api");
        self.get_json(self.rawaddr_url(address, offset))
    }
}
