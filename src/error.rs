use thiserror::Error;

use crate::models::BlockHeight;

/// Fatal errors of one address refresh. The display text is what the HTTP
/// layer returns in `{"err": ...}`.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// Network failure, error status or undecodable JSON from the provider.
    #[error("{0}")]
    Upstream(String),

    #[error("block fetch for height {height} timed out after {waited_ms} ms")]
    FetchTimeout { height: BlockHeight, waited_ms: u64 },

    #[error("block fetch workers are gone")]
    PoolClosed,

    /// A read the refresh cannot proceed without failed.
    #[error("store error: {0}")]
    Store(String),
}

impl RefreshError {
    pub fn upstream(err: anyhow::Error) -> Self {
        Self::Upstream(format!("{err:#}"))
    }
}

pub type RefreshResult<T> = std::result::Result<T, RefreshError>;
