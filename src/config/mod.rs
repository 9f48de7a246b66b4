//! Configuration module for the shelter backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::upstream::{DEFAULT_TIMEOUT, DEFAULT_UPSTREAM_URL};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to the SQLite file backing the document store
    pub db_path: PathBuf,
    /// Directory for device-local favorites
    pub storage_dir: PathBuf,
    /// Open-data endpoint returning the animal array
    pub upstream_url: String,
    pub upstream_timeout: Duration,
    /// How long a cached dataset stays fresh
    pub cache_ttl: Duration,
    /// Cache key of the animal dataset
    pub dataset_key: String,
    /// Period of the background cache sweep; `None` disables it
    pub sweep_interval: Option<Duration>,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let api_psk = env::var("SHELTER_API_PSK").ok().filter(|k| !k.is_empty());

        let db_path = env::var("SHELTER_DB_PATH")
            .unwrap_or_else(|_| "./data/shelter.sqlite".to_string())
            .into();

        let storage_dir = env::var("SHELTER_STORAGE_DIR")
            .unwrap_or_else(|_| "./data/local".to_string())
            .into();

        let upstream_url =
            env::var("SHELTER_UPSTREAM_URL").unwrap_or_else(|_| DEFAULT_UPSTREAM_URL.to_string());

        let upstream_timeout = parse_var::<u64>("SHELTER_UPSTREAM_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        let cache_ttl_hours = parse_var::<u64>("SHELTER_CACHE_TTL_HOURS")?.unwrap_or(24);
        let cache_ttl = cache_ttl_hours
            .checked_mul(60 * 60)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("SHELTER_CACHE_TTL_HOURS {} is too large", cache_ttl_hours))?;

        let dataset_key =
            env::var("SHELTER_DATASET_KEY").unwrap_or_else(|_| "animals_v1".to_string());
        if dataset_key.is_empty() || dataset_key.contains('/') {
            return Err(format!("Invalid SHELTER_DATASET_KEY {:?}", dataset_key));
        }

        let sweep_interval = parse_var::<u64>("SHELTER_SWEEP_INTERVAL_MINS")?
            .filter(|mins| *mins > 0)
            .map(|mins| {
                mins.checked_mul(60)
                    .map(Duration::from_secs)
                    .ok_or_else(|| format!("SHELTER_SWEEP_INTERVAL_MINS {} is too large", mins))
            })
            .transpose()?;

        let bind_addr = parse_var::<SocketAddr>("SHELTER_BIND_ADDR")?
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8080)));

        let log_level = env::var("SHELTER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            api_psk,
            db_path,
            storage_dir,
            upstream_url,
            upstream_timeout,
            cache_ttl,
            dataset_key,
            sweep_interval,
            bind_addr,
            log_level,
        })
    }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>, String> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format!("Invalid {} value {:?}", name, raw)),
        Err(_) => Ok(None),
    }
}
