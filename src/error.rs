use alloy_primitives::{Address, B256};
use std::path::PathBuf;
use thiserror::Error;

/// Startup failures. Raised before any request reaches the node.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid token address {0:?} in token list")]
    TokenAddress(String),

    #[error("contract interface has no Transfer event")]
    MissingTransferEvent,

    #[error("Transfer event layout {found} does not match Transfer(address indexed,address indexed,uint256)")]
    TransferLayout { found: String },

    #[error("invalid setting {key}: {reason}")]
    Setting { key: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload does not fit the Transfer schema. Every amount decoded
    /// after this point would be suspect, so the token scan stops.
    #[error("log {location} does not match the Transfer schema: {reason}")]
    SchemaMismatch {
        location: LogLocation,
        reason: String,
    },
}

/// Where a log came from, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogLocation {
    pub block_number: Option<u64>,
    pub transaction_hash: Option<B256>,
    pub log_index: Option<u64>,
}

impl std::fmt::Display for LogLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.transaction_hash, self.log_index) {
            (Some(tx), Some(index)) => write!(f, "{tx:?}#{index}")?,
            (Some(tx), None) => write!(f, "{tx:?}")?,
            _ => write!(f, "<unknown>")?,
        }
        if let Some(block) = self.block_number {
            write!(f, " (block {block})")?;
        }
        Ok(())
    }
}

/// Per-token failure. The driver decides whether the run continues.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to resolve block range for {token}")]
    Range {
        token: Address,
        source: anyhow::Error,
    },

    #[error("invalid block range {from}..={to} for {token}")]
    EmptyRange { token: Address, from: u64, to: u64 },

    #[error("failed to fetch logs for {token}")]
    Fetch {
        token: Address,
        source: anyhow::Error,
    },

    #[error("failed to decode logs for {token}")]
    Decode {
        token: Address,
        source: DecodeError,
    },
}

impl ScanError {
    pub fn token(&self) -> Address {
        match self {
            ScanError::Range { token, .. }
            | ScanError::EmptyRange { token, .. }
            | ScanError::Fetch { token, .. }
            | ScanError::Decode { token, .. } => *token,
        }
    }

    /// The error followed by each underlying cause, `: ` separated.
    pub fn chain(&self) -> String {
        anyhow::Chain::new(self)
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(": ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::b256;

    #[test]
    fn location_formats_known_fields() {
        let location = LogLocation {
            block_number: Some(17081000),
            transaction_hash: Some(b256!(
                "0x00000000000000000000000000000000000000000000000000000000000000aa"
            )),
            log_index: Some(3),
        };
        assert_eq!(
            location.to_string(),
            "0x00000000000000000000000000000000000000000000000000000000000000aa#3 (block 17081000)"
        );
        assert_eq!(LogLocation::default().to_string(), "<unknown>");
    }

    #[test]
    fn scan_errors_expose_their_cause() {
        let err = ScanError::Fetch {
            token: Address::ZERO,
            source: anyhow::anyhow!("connection refused").context("log query for blocks 1..=2"),
        };
        assert_eq!(
            err.to_string(),
            "failed to fetch logs for 0x0000000000000000000000000000000000000000"
        );
        assert_eq!(
            err.chain(),
            "failed to fetch logs for 0x0000000000000000000000000000000000000000: \
             log query for blocks 1..=2: connection refused"
        );
        assert_eq!(
            format!("{:#}", anyhow::Error::from(err)),
            "failed to fetch logs for 0x0000000000000000000000000000000000000000: \
             log query for blocks 1..=2: connection refused"
        );
    }

    #[test]
    fn config_errors_keep_the_io_cause() {
        let err = ConfigError::Read {
            path: PathBuf::from("tokens.json"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("missing"));
    }
}
