use crate::config::{BlockRange, Config, EndBlock, StartBlock};
use crate::error::{DecodeError, ScanError};
use crate::events::{Decoded, RawLog, SkipReason, TransferDecoder};
use crate::ledger::{Amount, DEFAULT_DECIMALS, Holder, Ledger};
use alloy_primitives::{Address, B256};
use anyhow::{Context, Result};
use futures::{StreamExt, stream};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::pin::pin;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// The filtered log query the replay consumes. One call covers one
/// inclusive window; callers keep windows within what the node accepts.
pub trait LogSource {
    fn fetch_logs(
        &self,
        token: Address,
        range: BlockRange,
    ) -> impl Future<Output = Result<Vec<RawLog>>>;
}

/// Node lookups needed to resolve a scan window and display units.
pub trait ChainInfo {
    fn latest_block(&self) -> impl Future<Output = Result<u64>>;

    fn deployment_block(
        &self,
        token: Address,
        latest_block: u64,
    ) -> impl Future<Output = Result<u64>>;

    /// `symbol()`, if the token implements it.
    fn token_symbol(&self, token: Address) -> impl Future<Output = Option<String>>;

    /// `decimals()`, if the token implements it.
    fn token_decimals(&self, token: Address) -> impl Future<Output = Option<u8>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Drop logs whose `(transaction hash, log index)` was already applied.
    pub dedupe_logs: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub logs_seen: usize,
    pub transfers_applied: usize,
    pub skipped_missing_topics: usize,
    pub skipped_foreign_events: usize,
    pub duplicates_dropped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Replay {
    pub ledger: Ledger,
    pub stats: ReplayStats,
}

/// Replays `logs` into a fresh ledger. Stops at the first log whose payload
/// does not fit the Transfer schema.
pub fn replay<I>(
    decoder: &TransferDecoder,
    logs: I,
    options: ReplayOptions,
) -> Result<Replay, DecodeError>
where
    I: IntoIterator<Item = RawLog>,
{
    let mut ledger = Ledger::new();
    let mut stats = ReplayStats::default();
    let mut delivered: HashSet<(B256, u64)> = HashSet::new();

    for log in logs {
        stats.logs_seen += 1;

        let event = match decoder.decode(&log)? {
            Decoded::Transfer(event) => event,
            Decoded::Skipped(SkipReason::MissingTopics) => {
                stats.skipped_missing_topics += 1;
                continue;
            }
            Decoded::Skipped(SkipReason::ForeignEvent) => {
                stats.skipped_foreign_events += 1;
                continue;
            }
        };

        if options.dedupe_logs {
            if let Some(key) = log.delivery_key() {
                if !delivered.insert(key) {
                    debug!("Dropping redelivered log {}", log.location());
                    stats.duplicates_dropped += 1;
                    continue;
                }
            }
        }

        ledger.apply(&event);
        stats.transfers_applied += 1;
    }

    Ok(Replay { ledger, stats })
}

/// Result of scanning one token.
#[derive(Debug, Clone)]
pub struct TokenReport {
    pub token: Address,
    pub symbol: Option<String>,
    pub decimals: u8,
    pub range: BlockRange,
    pub holders: Vec<Holder>,
    /// Addresses other than the zero address that ended negative.
    pub deficits: BTreeMap<Address, Amount>,
    pub stats: ReplayStats,
}

/// Settings for a single token scan.
#[derive(Debug, Clone, Copy)]
pub struct ScanSettings {
    pub from_block: StartBlock,
    pub to_block: EndBlock,
    pub decimals: Option<u8>,
    pub replay: ReplayOptions,
    pub batch_size: u64,
    pub batch_delay: Duration,
}

impl From<&Config> for ScanSettings {
    fn from(config: &Config) -> Self {
        ScanSettings {
            from_block: config.from_block,
            to_block: config.to_block,
            decimals: config.decimals,
            replay: ReplayOptions {
                dedupe_logs: config.dedupe_logs,
            },
            batch_size: config.batch_size,
            batch_delay: config.batch_delay,
        }
    }
}

pub async fn resolve_range<N: ChainInfo>(
    node: &N,
    token: Address,
    from_block: StartBlock,
    to_block: EndBlock,
) -> Result<BlockRange, ScanError> {
    let range_error = |source| ScanError::Range { token, source };

    let latest = match (from_block, to_block) {
        (StartBlock::Number(_), EndBlock::Number(_)) => None,
        _ => Some(node.latest_block().await.map_err(range_error)?),
    };

    let to = match to_block {
        EndBlock::Number(block) => block,
        EndBlock::Latest => latest.unwrap_or_default(),
    };
    let from = match from_block {
        StartBlock::Number(block) => block,
        StartBlock::Deployment => node
            .deployment_block(token, latest.unwrap_or(to))
            .await
            .map_err(range_error)?,
    };

    if from > to {
        return Err(ScanError::EmptyRange { token, from, to });
    }
    Ok(BlockRange { from, to })
}

/// Collects the logs of `range` one window of `batch_size` blocks at a time,
/// keeping at least `delay` between the start of consecutive queries.
pub async fn fetch_in_batches<S: LogSource>(
    source: &S,
    token: Address,
    range: BlockRange,
    batch_size: u64,
    delay: Duration,
) -> Result<Vec<RawLog>> {
    let mut logs = Vec::new();
    let mut batches = range.batches(batch_size).peekable();

    while let Some(batch) = batches.next() {
        let started = Instant::now();
        let fetched = source
            .fetch_logs(token, batch)
            .await
            .with_context(|| format!("log query for blocks {batch}"))?;
        debug!("Received {} logs for {:?} in blocks {}", fetched.len(), token, batch);
        logs.extend(fetched);

        let elapsed = started.elapsed();
        if batches.peek().is_some() && elapsed < delay {
            sleep(delay - elapsed).await;
        }
    }

    Ok(logs)
}

/// Full pipeline for one token: resolve the window, fetch, replay, report.
/// Owns its ledger; nothing is shared with other scans.
pub async fn scan_token<N>(
    node: &N,
    decoder: &TransferDecoder,
    token: Address,
    settings: ScanSettings,
) -> Result<TokenReport, ScanError>
where
    N: LogSource + ChainInfo,
{
    let start = Instant::now();
    let range = resolve_range(node, token, settings.from_block, settings.to_block).await?;

    let decimals = match settings.decimals {
        Some(decimals) => decimals,
        None => node
            .token_decimals(token)
            .await
            .unwrap_or(DEFAULT_DECIMALS),
    };
    let symbol = node.token_symbol(token).await;

    info!(
        "Fetching logs for {:?} in blocks {} ({} block windows)",
        token, range, settings.batch_size
    );
    let logs = fetch_in_batches(node, token, range, settings.batch_size, settings.batch_delay)
        .await
        .map_err(|source| ScanError::Fetch { token, source })?;
    info!("Received {} logs for {:?}", logs.len(), token);

    let Replay { ledger, stats } = replay(decoder, logs, settings.replay)
        .map_err(|source| ScanError::Decode { token, source })?;

    let net = ledger.net_supply();
    if net != Amount::default() {
        error!("Ledger for {:?} does not balance: net {}", token, net);
    }

    let mut deficits = ledger.deficits();
    deficits.remove(&Address::ZERO);
    if !deficits.is_empty() {
        warn!(
            "{} address(es) of {:?} ended with a negative balance; blocks {} likely miss earlier transfers",
            deficits.len(),
            token,
            range
        );
    }
    if stats.duplicates_dropped > 0 {
        warn!(
            "Dropped {} redelivered log(s) for {:?}",
            stats.duplicates_dropped, token
        );
    }

    let holders = ledger.holders();
    info!(
        "Replayed {} transfers for {:?} into {} holders in {:?}",
        stats.transfers_applied,
        token,
        holders.len(),
        start.elapsed()
    );

    Ok(TokenReport {
        token,
        symbol,
        decimals,
        range,
        holders,
        deficits,
        stats,
    })
}

/// Runs the configured scans, `concurrency` at a time, returning outcomes
/// in token-list order. Without `continue_on_error` nothing after the first
/// failure is reported.
pub struct Scanner<N> {
    node: N,
    decoder: TransferDecoder,
    settings: ScanSettings,
    concurrency: usize,
    continue_on_error: bool,
}

impl<N> Scanner<N>
where
    N: LogSource + ChainInfo + Clone,
{
    pub fn new(node: N, decoder: TransferDecoder, config: &Config) -> Self {
        Scanner {
            node,
            decoder,
            settings: ScanSettings::from(config),
            concurrency: config.concurrency.max(1),
            continue_on_error: config.continue_on_error,
        }
    }

    pub async fn run(&self, tokens: &[Address]) -> Vec<Result<TokenReport, ScanError>> {
        info!(
            "Scanning {} token(s) with concurrency {}",
            tokens.len(),
            self.concurrency
        );

        let scans = stream::iter(tokens.iter().copied())
            .map(|token| {
                let node = self.node.clone();
                let decoder = &self.decoder;
                let settings = self.settings;
                async move { scan_token(&node, decoder, token, settings).await }
            })
            .buffered(self.concurrency);
        let mut scans = pin!(scans);

        let mut outcomes = Vec::with_capacity(tokens.len());
        while let Some(outcome) = scans.next().await {
            let failed = outcome.is_err();
            if let Err(e) = &outcome {
                error!("Scan of {:?} failed: {}", e.token(), e.chain());
            }
            outcomes.push(outcome);
            if failed && !self.continue_on_error {
                warn!("Stopping after first failed token");
                break;
            }
        }
        outcomes
    }
}
