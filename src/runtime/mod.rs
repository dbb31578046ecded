pub mod background;
pub mod durable;
pub mod fast_cache;
pub mod inflight;
pub mod mdb;
