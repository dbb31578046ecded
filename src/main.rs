use addrinfo::app::build_service;
use addrinfo::config::{get_config, init_config};
use addrinfo::server::{self, ApiState};
use anyhow::{Context, Result};
use tokio::runtime::Builder as TokioBuilder;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    init_tracing();
    init_config()?;
    let cfg = get_config()?;

    // Stores, the blocking upstream client and the fetch threads are built
    // before the runtime exists.
    let service = build_service(cfg)?;
    let state = ApiState::new(service);
    let addr = cfg.listen_addr();

    let rt = TokioBuilder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    rt.block_on(server::run(addr, state))
}
