//! Graphene Gateway CLI
//!
//! Tracks an account's transfers and serves balance, fee and transfer
//! requests over JSON-RPC.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use graphene_gateway::{
    assets::AssetCache,
    authority::AuthorityResolver,
    config::GatewayConfig,
    connection::NodeConnection,
    keystore::KeyStore,
    node_api::NodeApi,
    output::{create_handlers, dispatch},
    send_pool::SendWorkerPool,
    service::{start_rpc_server, ServiceState},
    tracker::{ActivityTracker, CursorStore, FileCursorStore, TrackerOptions},
    wallet::{TransferRequest, Wallet},
};

#[derive(Parser)]
#[command(name = "graphene-gateway")]
#[command(about = "Account gateway for Graphene-based blockchains")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track transfers and serve JSON-RPC until interrupted
    Run,

    /// Show balances of the operating account
    Balance,

    /// Show the transfer fee in each asset
    Fees {
        /// Asset symbols or ids
        #[arg(required = true)]
        assets: Vec<String>,
    },

    /// Send a transfer
    Transfer {
        /// Recipient name or id
        to: String,
        /// Asset symbol or id
        asset: String,
        /// Decimal amount
        amount: String,
        /// Memo, encrypted with the configured memo key
        #[arg(short, long)]
        memo: Option<String>,
    },

    /// Show the persisted activity cursor
    Cursor,

    /// Validate configuration file
    ValidateConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let config = match GatewayConfig::from_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            if matches!(cli.command, Commands::ValidateConfig) {
                eprintln!("Configuration validation failed: {}", e);
                std::process::exit(1);
            }
            anyhow::bail!("Failed to load config from {:?}: {}", cli.config, e);
        }
    };

    match cli.command {
        Commands::Run => run_gateway(&config).await,
        Commands::Balance => show_balances(&config).await,
        Commands::Fees { assets } => show_fees(&config, &assets).await,
        Commands::Transfer {
            to,
            asset,
            amount,
            memo,
        } => {
            let request = TransferRequest {
                to,
                asset,
                amount,
                memo,
            };
            send_transfer(&config, request).await
        }
        Commands::Cursor => show_cursor(&config),
        Commands::ValidateConfig => {
            println!("Configuration is valid.");
            println!("  Node: {}", config.node_url);
            println!("  Account: {}", config.account);
            println!("  RPC listen: {}", config.rpc_listen);
            println!("  Workers: {}", config.workers);
            println!("  Cursor file: {}", config.cursor_file.display());
            println!("  Memo key: {}", if config.memo_key.is_some() { "set" } else { "not set" });
            println!("  Webhook: {}", config.webhook_url.as_deref().unwrap_or("none"));
            Ok(())
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    Ok(())
}

/// Connect and wait for the handshake.
async fn connect(config: &GatewayConfig) -> Result<NodeApi> {
    tracing::info!("Connecting to {}", config.node_url);
    let connection = NodeConnection::connect_url(&config.node_url, config.connection_options());
    if !connection.wait_until_ready().await {
        anyhow::bail!("Node connection failed: {:?}", connection.state());
    }
    let node = NodeApi::new(connection);
    let chain = node.chain_params()?;
    tracing::info!("Connected to chain {} ({})", chain.chain_id, chain.prefix);
    Ok(node)
}

fn build_wallet(config: &GatewayConfig, node: &NodeApi, assets: Arc<AssetCache>) -> Result<Wallet> {
    let mut keys = KeyStore::new();
    if let Some(key) = config.active_private_key()? {
        keys.insert(key);
    }
    let prefix = node.chain_params()?.prefix;
    let resolver = Arc::new(AuthorityResolver::new(Arc::new(node.clone()), keys, prefix));

    Ok(Wallet::new(
        node.clone(),
        assets,
        resolver,
        config.memo_private_key()?,
        config.account.clone(),
        config.expiration(),
    ))
}

async fn run_gateway(config: &GatewayConfig) -> Result<()> {
    tracing::info!("Starting gateway for {}", config.account);

    let node = connect(config).await?;
    let connection = node.connection().clone();
    let assets = Arc::new(AssetCache::new(node.clone()));
    let wallet = Arc::new(build_wallet(config, &node, assets.clone())?);
    let pool = Arc::new(SendWorkerPool::spawn(wallet.clone(), config.workers));

    let (events, event_queue) = mpsc::channel(256);
    let handlers = create_handlers(config.webhook_url.as_deref())?;
    let dispatcher = tokio::spawn(dispatch(event_queue, handlers));

    let store = Arc::new(FileCursorStore::new(&config.cursor_file));
    let options = TrackerOptions {
        replay_history: config.replay_history,
        ..TrackerOptions::new(config.account.clone())
    };
    let tracker = ActivityTracker::new(
        node.clone(),
        assets,
        config.memo_private_key()?,
        store,
        events,
        options,
    )?;
    let mut tracker = tracker.start();

    let state = Arc::new(ServiceState {
        wallet,
        pool: pool.clone(),
        connection: connection.clone(),
    });

    let outcome = tokio::select! {
        served = start_rpc_server(config.rpc_listen, state) => {
            served.context("RPC server stopped")
        }
        tracked = &mut tracker => match tracked {
            Ok(result) => result.context("Activity tracker stopped"),
            Err(e) => Err(anyhow::anyhow!("Activity tracker panicked: {}", e)),
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            Ok(())
        }
    };

    pool.close().await;
    connection.close().await;
    if !tracker.is_finished() {
        tracker.abort();
    }
    if let Err(e) = dispatcher.await {
        tracing::warn!("Transfer dispatcher ended abnormally: {}", e);
    }
    outcome
}

async fn show_balances(config: &GatewayConfig) -> Result<()> {
    let node = connect(config).await?;
    let assets = Arc::new(AssetCache::new(node.clone()));
    let wallet = build_wallet(config, &node, assets)?;

    let balances = wallet.get_balances().await?;
    if balances.is_empty() {
        println!("{} holds no assets", config.account);
    }
    for balance in balances {
        println!("{:>24} {}", balance.amount, balance.symbol);
    }
    node.connection().close().await;
    Ok(())
}

async fn show_fees(config: &GatewayConfig, symbols: &[String]) -> Result<()> {
    let node = connect(config).await?;
    let assets = Arc::new(AssetCache::new(node.clone()));
    let wallet = build_wallet(config, &node, assets)?;

    for quote in wallet.transfer_fees(symbols).await? {
        println!("{} ({}): {:.2}", quote.symbol, quote.asset_id, quote.fee);
    }
    node.connection().close().await;
    Ok(())
}

async fn send_transfer(config: &GatewayConfig, request: TransferRequest) -> Result<()> {
    let node = connect(config).await?;
    let assets = Arc::new(AssetCache::new(node.clone()));
    let wallet = build_wallet(config, &node, assets)?;

    let receipt = wallet.transfer(&request).await?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    node.connection().close().await;
    Ok(())
}

fn show_cursor(config: &GatewayConfig) -> Result<()> {
    let store = FileCursorStore::new(&config.cursor_file);
    match store.load()? {
        Some(cursor) => println!("{}", cursor.summary()),
        None => println!("No cursor persisted at {}", config.cursor_file.display()),
    }
    Ok(())
}
