use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::SnapshotKind;
use crate::error::CivicError;

pub const DEFAULT_CONFIG_FILE: &str = "civic-kb.json";
pub const DEFAULT_DOWNLOAD_BASE_URL: &str = "https://civicdb.org/downloads";
pub const DEFAULT_GRAPHQL_URL: &str = "https://civicdb.org/api/graphql";
pub const DEFAULT_CHAIN_URL: &str =
    "https://hgdownload.soe.ucsc.edu/goldenPath/hg19/liftOver/hg19ToHg38.over.chain.gz";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub download_base_url: Option<String>,
    #[serde(default)]
    pub graphql_url: Option<String>,
    #[serde(default)]
    pub chain_url: Option<String>,
    #[serde(default)]
    pub store_dir: Option<String>,
    #[serde(default)]
    pub chain_file: Option<String>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub snapshot_timeout_secs: Option<u64>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
    #[serde(default)]
    pub log_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub download_base_url: String,
    pub graphql_url: String,
    pub chain_url: String,
    pub store_dir: Utf8PathBuf,
    pub chain_file: Option<Utf8PathBuf>,
    pub workers: usize,
    pub snapshot_timeout: Duration,
    pub request_timeout: Duration,
    pub run_timeout: Option<Duration>,
    pub log_file: Option<Utf8PathBuf>,
}

impl ResolvedConfig {
    pub fn store_path(&self, kind: SnapshotKind) -> Utf8PathBuf {
        self.store_dir.join(kind.default_store_file())
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        ConfigLoader::resolve_config(Config::default())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `civic-kb.json` from the working directory when it
    /// exists. Without either, every setting takes its default.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, CivicError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Self::resolve_config(Config::default()));
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CivicError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| CivicError::ConfigParse(err.to_string()))?;

        Ok(Self::resolve_config(config))
    }

    pub fn resolve_config(config: Config) -> ResolvedConfig {
        ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            download_base_url: config
                .download_base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_DOWNLOAD_BASE_URL.to_string()),
            graphql_url: config
                .graphql_url
                .unwrap_or_else(|| DEFAULT_GRAPHQL_URL.to_string()),
            chain_url: config
                .chain_url
                .unwrap_or_else(|| DEFAULT_CHAIN_URL.to_string()),
            store_dir: config
                .store_dir
                .map(Utf8PathBuf::from)
                .unwrap_or_else(|| Utf8PathBuf::from(".")),
            chain_file: config.chain_file.map(Utf8PathBuf::from),
            workers: config.workers.unwrap_or(1).max(1),
            snapshot_timeout: Duration::from_secs(config.snapshot_timeout_secs.unwrap_or(120)),
            request_timeout: Duration::from_secs(config.request_timeout_secs.unwrap_or(30)),
            run_timeout: config.run_timeout_secs.map(Duration::from_secs),
            log_file: config.log_file.map(Utf8PathBuf::from),
        }
    }
}
