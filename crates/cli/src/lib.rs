use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub const DEFAULT_CONFIG_PATH: &str = "chainsync.yaml";

#[derive(Parser, Debug)]
#[command(name = "chainsync")]
#[command(about = "chainsync - options chain ingestion, storage and live quotes")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArg {
    /// Path to the configuration file
    #[arg(short, long, env = "CHAINSYNC_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sync chains once for the configured (or given) tickers and exit
    Sync {
        #[command(flatten)]
        config: ConfigArg,

        /// Tickers to sync instead of the configured list
        #[arg(short, long, value_delimiter = ',')]
        tickers: Vec<String>,
    },

    /// Run the sync worker on its interval until Ctrl+C
    Run {
        #[command(flatten)]
        config: ConfigArg,
    },

    /// Subscribe to live quotes and trades and print them
    Stream {
        #[command(flatten)]
        config: ConfigArg,

        /// Underlying symbols to subscribe to
        #[arg(required = true, value_delimiter = ',')]
        symbols: Vec<String>,

        /// Stop after this many seconds (runs until Ctrl+C when omitted)
        #[arg(long)]
        seconds: Option<u64>,
    },

    /// Print the chain for a ticker (synthetic when no live data exists)
    Chain {
        #[command(flatten)]
        config: ConfigArg,

        ticker: String,

        /// Expiration date (YYYY-MM-DD)
        #[arg(short, long)]
        expiry: Option<String>,

        /// Expiry bucket: 0DTE, Daily, Weekly, Monthly, Quarterly, LEAPS
        #[arg(long = "type")]
        expiry_type: Option<String>,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Print the expirations for a ticker
    Expiries {
        #[command(flatten)]
        config: ConfigArg,

        ticker: String,

        /// Expiry bucket: 0DTE, Daily, Weekly, Monthly, Quarterly, LEAPS
        #[arg(long = "type")]
        expiry_type: Option<String>,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Print underlying prices
    Price {
        #[command(flatten)]
        config: ConfigArg,

        #[arg(required = true, value_delimiter = ',')]
        tickers: Vec<String>,
    },

    /// List liquid tickers eligible for sync
    Tickers {
        #[command(flatten)]
        config: ConfigArg,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Validate configuration without touching the network
    Validate {
        #[command(flatten)]
        config: ConfigArg,
    },

    /// Initialize a new configuration file with all defaults
    Init {
        /// Output path for the new configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        output: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Aligned plain-text columns
    Table,
    /// One JSON document
    Json,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_command() {
        let cli = Cli::try_parse_from([
            "chainsync", "chain", "spy", "--expiry", "2025-06-20", "--type", "Weekly", "--format", "json",
        ])
        .unwrap();

        match cli.command {
            Commands::Chain { ticker, expiry, expiry_type, format, config } => {
                assert_eq!(ticker, "spy");
                assert_eq!(expiry.as_deref(), Some("2025-06-20"));
                assert_eq!(expiry_type.as_deref(), Some("Weekly"));
                assert_eq!(format, OutputFormat::Json);
                assert_eq!(config.config, PathBuf::from(DEFAULT_CONFIG_PATH));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_sync_ticker_list_is_comma_separated() {
        let cli = Cli::try_parse_from(["chainsync", "sync", "-c", "x.yaml", "--tickers", "SPY,QQQ"]).unwrap();
        match cli.command {
            Commands::Sync { tickers, config } => {
                assert_eq!(tickers, vec!["SPY", "QQQ"]);
                assert_eq!(config.config, PathBuf::from("x.yaml"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_stream_requires_symbols() {
        assert!(Cli::try_parse_from(["chainsync", "stream"]).is_err());
    }
}
