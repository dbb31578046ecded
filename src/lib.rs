pub mod app;
pub mod config;
pub mod core;
pub mod error;
pub mod models;
pub mod runtime;
pub mod server;
pub mod utils;

// Test utilities available for testing
// Always compiled to support both unit tests and integration tests
pub mod test_utils;
