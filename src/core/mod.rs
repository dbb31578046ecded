pub mod blockfetcher;
pub mod merge;
pub mod refresh;
pub mod resolver;
pub mod worker_pool;
