// repack-common/src/config.rs
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use super::error::{RepackError, Result};

// Fallback root if REPACK_ROOT is not set and no home directory is available.
const DEFAULT_FALLBACK_ROOT: &str = "/var/lib/repack";

const DEFAULT_MARKETPLACE_API_BASE: &str = "https://marketplace.dify.ai/api/v1";
const DEFAULT_MARKETPLACE_WEB_BASE: &str = "https://marketplace.dify.ai";
const DEFAULT_TOOL_COMMAND: &str = "plugin-repackager";
const DEFAULT_PACKAGE_SUFFIX: &str = "offline";
const DEFAULT_PLATFORM: &str = "manylinux2014_x86_64";

const DEFAULT_API_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SCRAPE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SCRAPE_ATTEMPTS: u32 = 3;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 300;
const DEFAULT_FETCH_ATTEMPTS: u32 = 3;
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_RESET_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
const DEFAULT_HEARTBEAT_SECS: u64 = 30;
const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub root: PathBuf,
    pub marketplace_api_base: String,
    pub marketplace_web_base: String,
    pub tool_command: String,
    pub default_platform: String,
    pub default_suffix: String,
    pub api_timeout: Duration,
    pub scrape_timeout: Duration,
    pub scrape_attempts: u32,
    pub fetch_timeout: Duration,
    pub fetch_attempts: u32,
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub cache_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub max_download_bytes: u64,
    pub worker_count: Option<usize>,
}

impl Config {
    pub fn load() -> Result<Self> {
        debug!("Loading repack configuration");

        let root = match env::var("REPACK_ROOT").ok().filter(|s| !s.is_empty()) {
            Some(s) => PathBuf::from(s),
            None => dirs::data_dir()
                .map(|d| d.join("repack"))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FALLBACK_ROOT)),
        };
        debug!("Effective REPACK_ROOT set to: {}", root.display());

        let marketplace_api_base = env_or("REPACK_MARKETPLACE_API", DEFAULT_MARKETPLACE_API_BASE);
        let marketplace_web_base = env_or("REPACK_MARKETPLACE_WEB", DEFAULT_MARKETPLACE_WEB_BASE);
        let tool_command = env_or("REPACK_TOOL", DEFAULT_TOOL_COMMAND);
        let default_platform = env_or("REPACK_PLATFORM", DEFAULT_PLATFORM);
        let default_suffix = env_or("REPACK_SUFFIX", DEFAULT_PACKAGE_SUFFIX);

        let config = Self {
            root,
            marketplace_api_base,
            marketplace_web_base,
            tool_command,
            default_platform,
            default_suffix,
            api_timeout: Duration::from_secs(env_parse(
                "REPACK_API_TIMEOUT_SECS",
                DEFAULT_API_TIMEOUT_SECS,
            )?),
            scrape_timeout: Duration::from_secs(env_parse(
                "REPACK_SCRAPE_TIMEOUT_SECS",
                DEFAULT_SCRAPE_TIMEOUT_SECS,
            )?),
            scrape_attempts: env_parse("REPACK_SCRAPE_ATTEMPTS", DEFAULT_SCRAPE_ATTEMPTS)?,
            fetch_timeout: Duration::from_secs(env_parse(
                "REPACK_FETCH_TIMEOUT_SECS",
                DEFAULT_FETCH_TIMEOUT_SECS,
            )?),
            fetch_attempts: env_parse("REPACK_FETCH_ATTEMPTS", DEFAULT_FETCH_ATTEMPTS)?,
            failure_threshold: env_parse("REPACK_FAILURE_THRESHOLD", DEFAULT_FAILURE_THRESHOLD)?,
            reset_timeout: Duration::from_secs(env_parse(
                "REPACK_RESET_TIMEOUT_SECS",
                DEFAULT_RESET_TIMEOUT_SECS,
            )?),
            cache_ttl: Duration::from_secs(env_parse(
                "REPACK_CACHE_TTL_SECS",
                DEFAULT_CACHE_TTL_SECS,
            )?),
            heartbeat_interval: Duration::from_secs(env_parse(
                "REPACK_HEARTBEAT_SECS",
                DEFAULT_HEARTBEAT_SECS,
            )?),
            max_download_bytes: env_parse(
                "REPACK_MAX_DOWNLOAD_BYTES",
                DEFAULT_MAX_DOWNLOAD_BYTES,
            )?,
            worker_count: env::var("REPACK_WORKERS")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .filter(|n| *n > 0),
        };

        debug!("Configuration loaded successfully.");
        Ok(config)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Transient downloads land here before the tool runs.
    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join("scratch")
    }

    /// Finished artifacts are published here for retrieval.
    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) if !raw.is_empty() => raw.parse::<T>().map_err(|_| {
            RepackError::Config(format!("Could not parse {key}={raw} as a number"))
        }),
        _ => Ok(default),
    }
}
