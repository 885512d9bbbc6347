use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use token_holders::abi::read_abi;
use token_holders::config::{Config, EndBlock, StartBlock, read_token_list, split_urls};
use token_holders::events::TransferDecoder;
use token_holders::output::{OutputFormat, format_reports};
use token_holders::rpc::RpcClient;
use token_holders::scanner::Scanner;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "holders")]
#[command(about = "Rebuild ERC20 holder balances from Transfer logs", long_about = None)]
struct Cli {
    /// Comma separated JSON-RPC endpoints
    #[arg(long)]
    rpc_urls: Option<String>,

    /// JSON array of token contract addresses
    #[arg(long)]
    tokens: Option<PathBuf>,

    /// Token contract ABI (bare array or build artifact)
    #[arg(long)]
    abi: Option<PathBuf>,

    /// Block number or "deployment"
    #[arg(long)]
    from_block: Option<StartBlock>,

    /// Block number or "latest"
    #[arg(long)]
    to_block: Option<EndBlock>,

    /// Override the token's decimals
    #[arg(long)]
    decimals: Option<u8>,

    #[arg(long)]
    max_retries: Option<usize>,

    /// Drop logs redelivered with the same transaction hash and log index
    #[arg(long)]
    dedupe: bool,

    /// Keep scanning the remaining tokens after one fails
    #[arg(long)]
    continue_on_error: bool,

    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Widest block window per log query
    #[arg(long)]
    batch_size: Option<u64>,

    /// Minimum milliseconds between log queries of one token
    #[arg(long)]
    batch_delay_ms: Option<u64>,

    #[arg(short, long, default_value = "text")]
    format: String,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(urls) = &self.rpc_urls {
            config.json_rpc_urls = split_urls(urls);
        }
        if let Some(path) = &self.tokens {
            config.token_list_path = path.clone();
        }
        if let Some(path) = &self.abi {
            config.abi_path = path.clone();
        }
        if let Some(from_block) = self.from_block {
            config.from_block = from_block;
        }
        if let Some(to_block) = self.to_block {
            config.to_block = to_block;
        }
        if self.decimals.is_some() {
            config.decimals = self.decimals;
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(delay) = self.batch_delay_ms {
            config.batch_delay = Duration::from_millis(delay);
        }
        config.dedupe_logs |= self.dedupe;
        config.continue_on_error |= self.continue_on_error;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = OutputFormat::from(cli.format.as_str());

    let mut config = Config::from_env()?;
    cli.apply(&mut config);
    config.validate()?;
    info!("Configuration loaded");
    info!(
        "RPC URLs: {} endpoint(s) configured",
        config.json_rpc_urls.len()
    );

    let tokens = read_token_list(&config.token_list_path)?;
    info!("Loaded {} token(s) from {:?}", tokens.len(), config.token_list_path);

    let abi = read_abi(&config.abi_path)?;
    let decoder = TransferDecoder::from_abi(&abi)?;
    info!("Transfer event signature {:?}", decoder.signature());

    let client = RpcClient::new(&config.json_rpc_urls, config.max_retries)
        .context("Failed to create RPC client")?;

    let scanner = Scanner::new(client, decoder, &config);
    let outcomes = scanner.run(&tokens).await;

    let mut reports = Vec::with_capacity(outcomes.len());
    let mut failed = 0usize;
    for outcome in outcomes {
        match outcome {
            Ok(report) => reports.push(report),
            Err(_) => failed += 1,
        }
    }

    println!("{}", format_reports(&reports, format));

    if failed > 0 {
        error!("{} token scan(s) failed", failed);
        anyhow::bail!("{} of {} token scan(s) failed", failed, tokens.len());
    }

    Ok(())
}
