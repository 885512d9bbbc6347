use crate::error::ConfigError;
use alloy_primitives::Address;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_RPC_URL: &str = "https://rpc.ankr.com/eth";
pub const DEFAULT_FROM_BLOCK: u64 = 17081000;
pub const DEFAULT_TO_BLOCK: u64 = 17081327;
pub const DEFAULT_MAX_RETRIES: usize = 5;
/// Public endpoints commonly cap a log query at this many blocks.
pub const DEFAULT_BATCH_SIZE: u64 = 1000;
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(200);

/// First block of the scan window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartBlock {
    Number(u64),
    /// The block the token contract was deployed in.
    Deployment,
}

/// Last block of the scan window (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndBlock {
    Number(u64),
    Latest,
}

impl FromStr for StartBlock {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "deployment" => Ok(StartBlock::Deployment),
            other => other
                .parse()
                .map(StartBlock::Number)
                .map_err(|_| format!("expected a block number or 'deployment', got {other:?}")),
        }
    }
}

impl FromStr for EndBlock {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "latest" => Ok(EndBlock::Latest),
            other => other
                .parse()
                .map(EndBlock::Number)
                .map_err(|_| format!("expected a block number or 'latest', got {other:?}")),
        }
    }
}

/// Inclusive block interval handed to the log source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    /// Consecutive inclusive windows of at most `size` blocks covering the
    /// range, in ascending order.
    pub fn batches(self, size: u64) -> impl Iterator<Item = BlockRange> {
        let size = size.max(1);
        let mut next = (self.from <= self.to).then_some(self.from);
        std::iter::from_fn(move || {
            let from = next?;
            let to = from.saturating_add(size - 1).min(self.to);
            next = if to < self.to { Some(to + 1) } else { None };
            Some(BlockRange { from, to })
        })
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.from, self.to)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub json_rpc_urls: Vec<String>,
    pub token_list_path: PathBuf,
    pub abi_path: PathBuf,
    pub from_block: StartBlock,
    pub to_block: EndBlock,
    pub decimals: Option<u8>,
    pub max_retries: usize,
    pub dedupe_logs: bool,
    pub continue_on_error: bool,
    pub concurrency: usize,
    /// Widest block window sent in one log query.
    pub batch_size: u64,
    /// Minimum spacing between consecutive log queries of one token.
    pub batch_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            json_rpc_urls: vec![DEFAULT_RPC_URL.to_string()],
            token_list_path: PathBuf::from("tokens.json"),
            abi_path: PathBuf::from("Token.json"),
            from_block: StartBlock::Number(DEFAULT_FROM_BLOCK),
            to_block: EndBlock::Number(DEFAULT_TO_BLOCK),
            decimals: None,
            max_retries: DEFAULT_MAX_RETRIES,
            dedupe_logs: false,
            continue_on_error: false,
            concurrency: 1,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key/value source, falling back to defaults
    /// for missing keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(urls) = lookup("JSON_RPC_URLS").or_else(|| lookup("JSON_RPC_URL")) {
            config.json_rpc_urls = split_urls(&urls);
        }
        if let Some(path) = lookup("TOKEN_LIST_PATH") {
            config.token_list_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("ABI_PATH") {
            config.abi_path = PathBuf::from(path);
        }
        if let Some(value) = lookup("FROM_BLOCK") {
            config.from_block = parse_setting("FROM_BLOCK", &value)?;
        }
        if let Some(value) = lookup("TO_BLOCK") {
            config.to_block = parse_setting("TO_BLOCK", &value)?;
        }
        if let Some(value) = lookup("TOKEN_DECIMALS") {
            config.decimals = Some(parse_setting("TOKEN_DECIMALS", &value)?);
        }
        if let Some(value) = lookup("RPC_MAX_RETRIES") {
            config.max_retries = parse_setting("RPC_MAX_RETRIES", &value)?;
        }
        if let Some(value) = lookup("DEDUPE_LOGS") {
            config.dedupe_logs = parse_flag("DEDUPE_LOGS", &value)?;
        }
        if let Some(value) = lookup("CONTINUE_ON_ERROR") {
            config.continue_on_error = parse_flag("CONTINUE_ON_ERROR", &value)?;
        }
        if let Some(value) = lookup("SCAN_CONCURRENCY") {
            config.concurrency = parse_setting("SCAN_CONCURRENCY", &value)?;
        }
        if let Some(value) = lookup("LOG_BATCH_SIZE") {
            config.batch_size = parse_setting("LOG_BATCH_SIZE", &value)?;
        }
        if let Some(value) = lookup("LOG_BATCH_DELAY_MS") {
            config.batch_delay =
                Duration::from_millis(parse_setting("LOG_BATCH_DELAY_MS", &value)?);
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.json_rpc_urls.is_empty() {
            return Err(ConfigError::Setting {
                key: "JSON_RPC_URLS",
                reason: "at least one RPC URL must be provided".to_string(),
            });
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Setting {
                key: "SCAN_CONCURRENCY",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Setting {
                key: "LOG_BATCH_SIZE",
                reason: "must be at least 1".to_string(),
            });
        }
        if let (StartBlock::Number(from), EndBlock::Number(to)) = (self.from_block, self.to_block)
        {
            if from > to {
                return Err(ConfigError::Setting {
                    key: "FROM_BLOCK",
                    reason: format!("start block {from} is after end block {to}"),
                });
            }
        }
        Ok(())
    }
}

pub fn split_urls(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_setting<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::Setting {
            key,
            reason: e.to_string(),
        })
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::Setting {
            key,
            reason: format!("expected a boolean, got {other:?}"),
        }),
    }
}

/// Reads the token list: a JSON array of hex contract addresses, checksum
/// casing optional. Order is preserved.
pub fn read_token_list(path: &Path) -> Result<Vec<Address>, ConfigError> {
    let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_token_list(&data).map_err(|e| match e {
        ConfigError::Json { source, .. } => ConfigError::Json {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}

pub fn parse_token_list(data: &str) -> Result<Vec<Address>, ConfigError> {
    let entries: Vec<String> = serde_json::from_str(data).map_err(|source| ConfigError::Json {
        path: PathBuf::new(),
        source,
    })?;

    entries
        .iter()
        .map(|entry| {
            Address::from_str(entry.trim()).map_err(|_| ConfigError::TokenAddress(entry.clone()))
        })
        .collect()
}
