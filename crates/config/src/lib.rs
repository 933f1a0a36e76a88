//! Chainfill configuration
use std::time::Duration;

use alloy_primitives::Address;
use clap::Parser;
use url::Url;

/// Postgres database configuration options
#[derive(Debug, Clone, Parser)]
pub struct DatabaseOpts {
    /// Postgres connection URL
    #[clap(id = "database_url", long = "database-url", env = "DATABASE_URL")]
    pub url: Url,
    /// Maximum number of pooled connections
    #[clap(long = "database-max-connections", env = "DATABASE_MAX_CONNECTIONS", default_value = "10")]
    pub max_connections: u32,
}

/// RPC endpoint configuration options
#[derive(Debug, Clone, Parser)]
pub struct RpcOpts {
    /// Websocket RPC URL of the chain source
    #[clap(id = "rpc_url", long = "rpc-url", env = "RPC_URL")]
    pub url: Url,
}

/// Backfill configuration options
#[derive(Debug, Clone, Parser)]
pub struct BackfillOpts {
    /// Seconds between two gap checks
    #[clap(long, env = "GAP_CHECK_FREQUENCY_SECS", default_value = "60")]
    pub gap_check_frequency_secs: u64,
    /// Maximum number of heights fetched and transformed together
    #[clap(long = "backfill-batch-size", env = "BACKFILL_BATCH_SIZE", default_value = "100")]
    pub batch_size: u64,
    /// Maximum number of concurrent chain requests per batch
    #[clap(long = "backfill-workers", env = "BACKFILL_WORKERS", default_value = "50")]
    pub workers: usize,
    /// Lowest height tracked by the backfill
    #[clap(long, env = "STARTING_BLOCK", default_value = "0")]
    pub starting_block: u64,
    /// Also backfill up to the chain head, not only up to the highest stored header
    #[clap(long, env = "FOLLOW_CHAIN_HEAD")]
    pub follow_chain_head: bool,
    /// Heights below the chain head left to the live pipeline
    #[clap(long, env = "FINALIZATION_BUFFER_BLOCKS", default_value = "0")]
    pub finalization_buffer_blocks: u64,
    /// Do not run the backfill service
    #[clap(long)]
    pub disable_backfill: bool,
}

impl BackfillOpts {
    /// Interval between two gap checks.
    pub const fn gap_check_frequency(&self) -> Duration {
        Duration::from_secs(self.gap_check_frequency_secs)
    }
}

/// Transformer selection options
#[derive(Debug, Clone, Parser)]
pub struct TransformerOpts {
    /// Comma separated names of the transformers to run
    #[clap(
        long,
        env = "TRANSFORMERS",
        value_delimiter = ',',
        default_value = "erc20_transfer,erc20_approval"
    )]
    pub transformers: Vec<String>,
    /// Contract whose events are transformed
    #[clap(long, env = "CONTRACT_ADDRESS")]
    pub contract_address: Address,
    /// First height processed by the transformers
    #[clap(
        id = "transformer_starting_block",
        long = "transformer-starting-block",
        env = "TRANSFORMER_STARTING_BLOCK",
        default_value = "0"
    )]
    pub starting_block: u64,
    /// Last height processed by the transformers, unbounded if unset
    #[clap(id = "transformer_ending_block", long = "transformer-ending-block", env = "TRANSFORMER_ENDING_BLOCK")]
    pub ending_block: Option<u64>,
}

/// CLI options for chainfill
#[derive(Debug, Clone, Parser)]
#[clap(name = "chainfill", version)]
pub struct Opts {
    /// Database configuration
    #[clap(flatten)]
    pub database: DatabaseOpts,

    /// RPC endpoint configuration
    #[clap(flatten)]
    pub rpc: RpcOpts,

    /// Backfill configuration
    #[clap(flatten)]
    pub backfill: BackfillOpts,

    /// Transformer configuration
    #[clap(flatten)]
    pub transformers: TransformerOpts,

    /// Do not follow the chain head
    #[clap(long)]
    pub disable_live: bool,

    /// If set, drop & re-create all tables (local/dev only)
    #[clap(long)]
    pub reset_db: bool,

    /// Do not create tables at startup
    #[clap(long, conflicts_with = "reset_db")]
    pub skip_migrations: bool,

    /// Seconds to wait for in-flight work on shutdown
    #[clap(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value = "30")]
    pub shutdown_timeout_secs: u64,
}

impl Opts {
    /// Time allowed for in-flight work to finish after a shutdown signal.
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
