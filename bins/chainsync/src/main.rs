//! chainsync binary
//!
//! Composition root: loads configuration, wires the provider, store,
//! classifier, sync service and read facade, then dispatches the CLI command.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use cli::{Cli, Commands, OutputFormat};
use config::{
    generate_default_config, load_config, save_config, validate_config, ChainSyncConfig,
    StorageBackend, StorageConfig,
};
use market_data::{MarketTick, OptionsDataProvider, RealtimeSubscriptionManager, ReconnectPolicy, RestProvider, TickHandler};
use observability::{init_logging, init_metrics, LogFormat, SyncMetrics};
use options_chain::{
    first_error, ChainStore, ChainSyncService, DataAccessFacade, ExpiryClassifier, ExpiryType,
    InMemoryChainStore, PersistenceGateway, PostgresChainStore, Sourced, SyncReport, SyncWorker,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Sync { config, tickers } => sync_command(&config.config, tickers).await,
        Commands::Run { config } => run_command(&config.config).await,
        Commands::Stream {
            config,
            symbols,
            seconds,
        } => stream_command(&config.config, symbols, seconds).await,
        Commands::Chain {
            config,
            ticker,
            expiry,
            expiry_type,
            format,
        } => chain_command(&config.config, &ticker, expiry, expiry_type, format).await,
        Commands::Expiries {
            config,
            ticker,
            expiry_type,
            format,
        } => expiries_command(&config.config, &ticker, expiry_type, format).await,
        Commands::Price { config, tickers } => price_command(&config.config, tickers).await,
        Commands::Tickers { config, format } => tickers_command(&config.config, format).await,
        Commands::Validate { config } => {
            init_logging("chainsync", LogFormat::Pretty)?;
            validate_command(&config.config)
        }
        Commands::Init { output } => {
            init_logging("chainsync", LogFormat::Pretty)?;
            init_command(&output)
        }
    }
}

/// Load and validate the config, then bring up logging and metrics.
fn bootstrap(path: &Path) -> Result<ChainSyncConfig> {
    let config = load_config(path)
        .with_context(|| format!("Failed to load configuration from {:?}", path))?;

    init_logging("chainsync", LogFormat::parse_or_default(&config.logging.format))?;
    debug!(?path, "Configuration loaded");

    let report = validate_config(&config);
    for warning in &report.warnings {
        warn!(field = %warning.field, "{}", warning.message);
    }
    if !report.is_valid() {
        for err in &report.errors {
            error!(%err, "Invalid configuration");
        }
        anyhow::bail!(
            "Configuration validation failed, run 'chainsync validate --config {:?}' for details",
            path
        );
    }

    if config.metrics.enabled {
        init_metrics(config.metrics.port)?;
    }

    let status = config.provider.configuration_status();
    if !status.is_live() {
        warn!(%status, "Live fetching is off, reads will serve synthetic data");
    }

    Ok(config)
}

async fn build_store(storage: &StorageConfig) -> Result<Arc<dyn ChainStore>> {
    match storage.backend {
        StorageBackend::Memory => {
            info!("Using in-memory chain store");
            Ok(Arc::new(InMemoryChainStore::new()))
        }
        StorageBackend::Postgres => {
            let url = storage
                .database_url
                .as_deref()
                .context("storage.database_url is required for the postgres backend")?;
            let store = PostgresChainStore::new(url, storage.max_connections).await?;
            store.run_migrations().await?;
            info!("Using PostgreSQL chain store");
            Ok(Arc::new(store))
        }
    }
}

/// Everything the sync and read commands share.
struct App {
    config: ChainSyncConfig,
    sync: Arc<ChainSyncService>,
    facade: DataAccessFacade,
}

impl App {
    async fn build(config: ChainSyncConfig) -> Result<Self> {
        let status = config.provider.configuration_status();
        let metrics = SyncMetrics::new();

        let store = build_store(&config.storage).await?;
        let provider: Arc<dyn OptionsDataProvider> =
            Arc::new(RestProvider::from_config(&config.provider)?);
        let classifier = ExpiryClassifier::from_config(&config.classifier)?;
        if classifier.has_remote() {
            info!("Remote expiry categorizer enabled");
        }

        let gateway = PersistenceGateway::new(store.clone(), config.storage.batch_size)
            .with_metrics(metrics.clone());
        let sync = ChainSyncService::new(provider.clone(), gateway, classifier, status)
            .with_max_concurrent(config.sync.max_concurrent_tickers)
            .with_metrics(metrics.clone());
        let facade = DataAccessFacade::new(store, provider, status)
            .with_price_ttl(config.cache.price_ttl_seconds)
            .with_metrics(metrics);

        Ok(Self {
            config,
            sync: Arc::new(sync),
            facade,
        })
    }

    async fn load(path: &Path) -> Result<Self> {
        Self::build(bootstrap(path)?).await
    }
}

fn print_sync_report(report: &SyncReport) {
    if let Some(reason) = report.skipped {
        println!("{:<8} skipped ({})", report.ticker, reason.as_str());
        return;
    }

    println!(
        "{:<8} fetched={} snapshots={} normalized={} contracts={} expiries={} failed_batches={}",
        report.ticker,
        report.fetched,
        report.snapshots,
        report.normalized,
        report.contracts.rows,
        report.expiries.rows,
        report.failed_batches()
    );
}

async fn sync_command(path: &Path, tickers: Vec<String>) -> Result<()> {
    let app = App::load(path).await?;
    let tickers = if tickers.is_empty() {
        app.config.sync.tickers.clone()
    } else {
        tickers
    };

    info!(count = tickers.len(), "Syncing tickers");
    let results = app.sync.sync_all(&tickers).await;

    for (ticker, result) in &results {
        match result {
            Ok(report) => print_sync_report(report),
            Err(e) => println!("{:<8} [error] {}", ticker, e),
        }
    }

    if let Some(e) = first_error(&results) {
        anyhow::bail!("Sync aborted: {}", e);
    }
    Ok(())
}

async fn run_command(path: &Path) -> Result<()> {
    let app = App::load(path).await?;
    let worker = SyncWorker::from_config(app.sync.clone(), &app.config.sync);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutdown signal received");

    // The worker also exits if the sender is gone.
    let _ = shutdown_tx.send(true);
    handle.await.context("Sync worker task failed")?;

    info!("chainsync stopped");
    Ok(())
}

fn print_tick(tick: &MarketTick) {
    match tick {
        MarketTick::Quote(q) => println!(
            "{} quote {:<8} bid {:.2} x {} ask {:.2} x {}",
            q.timestamp, q.symbol, q.bid_price, q.bid_size, q.ask_price, q.ask_size
        ),
        MarketTick::Trade(t) => println!(
            "{} trade {:<8} {:.2} x {}",
            t.timestamp, t.symbol, t.price, t.size
        ),
    }
}

async fn stream_command(path: &Path, symbols: Vec<String>, seconds: Option<u64>) -> Result<()> {
    let config = bootstrap(path)?;

    let manager = RealtimeSubscriptionManager::from_config(&config.provider, &config.realtime)
        .context("Live quotes need a configured provider API key")?;
    let policy = ReconnectPolicy::from_config(&config.realtime.reconnect);
    let handler: TickHandler = Arc::new(|tick: MarketTick| print_tick(&tick));

    let subscribed = manager.connect_with_retry(&symbols, handler, &policy).await?;
    println!("Subscribed: {}", subscribed.join(", "));

    let deadline = async {
        match seconds {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = deadline => info!("Stream duration elapsed"),
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            info!("Shutdown signal received");
        }
    }

    manager.disconnect().await;
    Ok(())
}

fn parse_expiry_type(value: Option<String>) -> Result<Option<ExpiryType>> {
    value
        .map(|s| s.parse::<ExpiryType>().map_err(anyhow::Error::msg))
        .transpose()
}

fn print_json<T: serde::Serialize>(value: &Sourced<T>) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn chain_command(
    path: &Path,
    ticker: &str,
    expiry: Option<String>,
    expiry_type: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let expiry = expiry
        .map(|s| {
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .with_context(|| format!("Invalid expiry '{}', expected YYYY-MM-DD", s))
        })
        .transpose()?;
    let expiry_type = parse_expiry_type(expiry_type)?;

    let app = App::load(path).await?;
    let chain = app.facade.get_contracts(ticker, expiry, expiry_type).await;

    if format == OutputFormat::Json {
        return print_json(&chain);
    }

    println!("{} chain ({}, {} contracts)", ticker.to_ascii_uppercase(), chain.source.as_str(), chain.data.len());
    println!(
        "{:<24} {:<4} {:>9} {:<10} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>6} {:>7}",
        "CONTRACT", "TYPE", "STRIKE", "EXPIRY", "BID", "ASK", "LAST", "MARK", "VOLUME", "OI", "IV", "DELTA"
    );
    for c in &chain.data {
        println!(
            "{:<24} {:<4} {:>9.2} {:<10} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8} {:>8} {:>6.3} {:>7.3}",
            c.contract_ticker,
            c.contract_type.code(),
            c.strike_price,
            c.expiration_date,
            c.bid,
            c.ask,
            c.last,
            c.mark,
            c.volume,
            c.open_interest,
            c.implied_volatility,
            c.delta
        );
    }
    Ok(())
}

async fn expiries_command(
    path: &Path,
    ticker: &str,
    expiry_type: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let expiry_type = parse_expiry_type(expiry_type)?;

    let app = App::load(path).await?;
    let expiries = app.facade.get_expiries(ticker, expiry_type).await;

    if format == OutputFormat::Json {
        return print_json(&expiries);
    }

    println!("{} expiries ({})", ticker.to_ascii_uppercase(), expiries.source.as_str());
    println!(
        "{:<10} {:<9} {:>5} {:>10} {:>10} {:>10} {:>10}",
        "DATE", "TYPE", "DAYS", "CALL VOL", "PUT VOL", "CALL OI", "PUT OI"
    );
    for e in &expiries.data {
        println!(
            "{:<10} {:<9} {:>5} {:>10} {:>10} {:>10} {:>10}",
            e.expiration_date,
            e.expiry_type.as_str(),
            e.days_to_expiry,
            e.call_volume,
            e.put_volume,
            e.call_open_interest,
            e.put_open_interest
        );
    }
    Ok(())
}

async fn price_command(path: &Path, tickers: Vec<String>) -> Result<()> {
    let app = App::load(path).await?;

    for ticker in &tickers {
        let price = app.facade.get_underlying_price(ticker).await;
        println!(
            "{:<8} {:>10.2}  ({})",
            ticker.to_ascii_uppercase(),
            price.data,
            price.source.as_str()
        );
    }
    Ok(())
}

async fn tickers_command(path: &Path, format: OutputFormat) -> Result<()> {
    let app = App::load(path).await?;
    let tickers = app.facade.get_tickers().await;

    if format == OutputFormat::Json {
        return print_json(&tickers);
    }

    println!("Liquid tickers ({})", tickers.source.as_str());
    println!(
        "{:<8} {:<32} {:<24} {:>10} {:>12} {:>12}",
        "TICKER", "NAME", "SECTOR", "PRICE", "AVG VOL", "AVG OI"
    );
    for t in tickers.data.iter().filter(|t| t.is_active) {
        println!(
            "{:<8} {:<32} {:<24} {:>10.2} {:>12} {:>12}",
            t.ticker, t.name, t.sector, t.current_price, t.avg_volume, t.avg_open_interest
        );
    }
    Ok(())
}

fn validate_command(config_path: &Path) -> Result<()> {
    info!(path = ?config_path, "Validating configuration");

    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(%e, "Failed to load configuration");
            anyhow::bail!(e);
        }
    };

    let report = validate_config(&config);

    println!("\n=== Configuration Validation Report ===\n");

    if !report.defaults_applied.is_empty() {
        println!("Defaults Applied ({}):", report.defaults_applied.len());
        for default in &report.defaults_applied {
            println!("  [info] {} = {}", default.field, default.value);
        }
        println!();
    }

    if !report.warnings.is_empty() {
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  [warn] [{}] {}", warning.field, warning.message);
        }
        println!();
    }

    if !report.errors.is_empty() {
        println!("Errors ({}):", report.errors.len());
        for err in &report.errors {
            println!("  [error] {}", err);
        }
        println!();
        anyhow::bail!("Configuration validation failed");
    }

    println!("[ok] Configuration is valid!");
    println!();
    println!("Provider: {}", config.provider.configuration_status());
    println!("Storage: {}", config.storage.backend);
    println!("Tickers: {}", config.sync.tickers.join(", "));
    println!("Sync interval: {}s", config.sync.interval_seconds);
    println!(
        "Expiry classifier: {}",
        if config.classifier.rpc_url.is_some() { "remote with local fallback" } else { "local" }
    );

    Ok(())
}

fn init_command(output_path: &Path) -> Result<()> {
    info!(?output_path, "Initializing new configuration file");

    let config = generate_default_config();

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
    }

    save_config(&config, output_path)?;

    println!("[ok] Configuration file created successfully!");
    println!();
    println!("Location: {:?}", output_path);
    println!();
    println!("This configuration includes:");
    println!("  - Provider settings reading the API key from $POLYGON_API_KEY");
    println!("  - {} tickers to sync ({})", config.sync.tickers.len(), config.sync.tickers.join(", "));
    println!("  - In-memory storage (switch storage.backend to postgres for persistence)");
    println!();
    println!("Next steps:");
    println!("  1. Export POLYGON_API_KEY or edit provider.api_key");
    println!("  2. Run 'chainsync validate --config {:?}' to check configuration", output_path);
    println!("  3. Run 'chainsync run --config {:?}' to start syncing", output_path);

    Ok(())
}
