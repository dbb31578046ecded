use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use std::{fs, path::Path, sync::OnceLock};

use crate::core::worker_pool::DEFAULT_QUEUE_CAPACITY;
use crate::utils::millis_opt;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

fn default_port() -> u16 {
    8080
}

fn default_upstream_url() -> String {
    "https://blockchain.info".to_string()
}

fn default_loader_routines() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_db_path() -> String {
    "./db".to_string()
}

fn default_redis_expire_sec() -> u64 {
    600
}

fn default_fast_cache_capacity() -> usize {
    1024
}

fn default_fetch_timeout_ms() -> u64 {
    30_000
}

fn default_http_timeout_ms() -> u64 {
    20_000
}

fn normalize_optional_string(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    #[serde(default = "default_loader_routines")]
    pub loader_routines: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_redis_expire_sec")]
    pub redis_expire_sec: u64,
    #[serde(default = "default_fast_cache_capacity")]
    pub fast_cache_capacity: usize,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub upstream_url: String,
    pub loader_routines: usize,
    pub queue_capacity: usize,
    pub db_path: String,
    /// `None` selects the in-process LRU fast tier.
    pub redis_url: Option<String>,
    pub fast_ttl: Duration,
    pub fast_cache_capacity: usize,
    pub fetch_timeout: Option<Duration>,
    pub http_timeout: Option<Duration>,
}

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    /// Path to JSON config file.
    #[arg(long, env = "APP_CONFIG", default_value = "./config.json")]
    pub config_path: String,
}

pub fn load_config_file(path: &str) -> Result<ConfigFile> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {path}"))?;
    serde_json::from_str(&raw).context("failed to parse config JSON")
}

impl AppConfig {
    pub fn from_file(file: ConfigFile) -> Result<Self> {
        if file.loader_routines == 0 {
            anyhow::bail!("loader_routines must be greater than 0");
        }
        if file.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be greater than 0");
        }
        if file.redis_expire_sec == 0 {
            anyhow::bail!("redis_expire_sec must be greater than 0");
        }
        let upstream_url = file.upstream_url.trim().trim_end_matches('/').to_string();
        if upstream_url.is_empty() {
            anyhow::bail!("upstream_url must be provided");
        }

        Ok(Self {
            port: file.port,
            upstream_url,
            loader_routines: file.loader_routines,
            queue_capacity: file.queue_capacity,
            db_path: file.db_path,
            redis_url: normalize_optional_string(file.redis_url),
            fast_ttl: Duration::from_secs(file.redis_expire_sec),
            fast_cache_capacity: file.fast_cache_capacity,
            fetch_timeout: millis_opt(file.fetch_timeout_ms),
            http_timeout: millis_opt(file.http_timeout_ms),
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}

pub fn init_config_from(cfg: AppConfig) -> Result<()> {
    let db_root = Path::new(&cfg.db_path);
    if !db_root.exists() {
        fs::create_dir_all(db_root).map_err(|e| {
            anyhow::anyhow!("Failed to create db_path {}: {e}", cfg.db_path)
        })?;
    } else if !db_root.is_dir() {
        anyhow::bail!("db_path is not a directory: {}", cfg.db_path);
    }

    CONFIG
        .set(cfg)
        .map_err(|_| anyhow::anyhow!("config already initialized"))?;
    Ok(())
}

pub fn init_config() -> Result<()> {
    let cli = CliArgs::parse();
    let file = load_config_file(&cli.config_path)?;
    let cfg = AppConfig::from_file(file)?;
    init_config_from(cfg)
}

pub fn get_config() -> Result<&'static AppConfig> {
    CONFIG
        .get()
        .ok_or_else(|| anyhow::anyhow!("init_config() must be called once at startup"))
}
