//! cpop CLI
//!
//! Operator view over the local event store and the ledger: list events and
//! claims, check a wallet, decode a scanned payload, settle pending claims.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use cpop_core::{ClaimReference, CpopConfig, EventDetails, Network, ProvisioningState};
use cpop_engine::ClaimEngine;
use cpop_ledger::{LedgerGateway, LightCompression, MintPlan, RpcGateway};
use cpop_store::{RecordStore, SqliteStore};
use solana_sdk::native_token::lamports_to_sol;
use solana_sdk::pubkey::Pubkey;

#[derive(Parser)]
#[command(name = "cpop")]
#[command(about = "Compressed proof-of-participation - event tokens and claims")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Record database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// RPC endpoint override
    #[arg(long, global = true)]
    rpc: Option<String>,

    /// Network (devnet, testnet, mainnet, localnet)
    #[arg(short, long, global = true)]
    network: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List events, newest first
    Events {
        /// Only events created by this wallet
        #[arg(long)]
        creator: Option<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one event, its provisioning state and claim link
    Event {
        /// Event id
        id: String,
    },

    /// List claims for an event
    Claims {
        /// Event id
        id: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Has a wallet claimed an event
    Status {
        /// Event id
        event_id: String,

        /// Wallet address
        wallet: String,
    },

    /// Decode a scanned QR payload (URL, JSON or raw event id)
    Scan {
        payload: String,
    },

    /// Settle pending claims of an event against the ledger
    Reconcile {
        /// Event id
        id: String,
    },

    /// Account size and rent for an event mint
    MintSize {
        #[arg(long)]
        title: String,

        #[arg(long)]
        symbol: String,

        #[arg(long, default_value = "")]
        image_url: String,

        #[arg(long, default_value = "0")]
        decimals: u8,

        /// Skip the rent lookup
        #[arg(long)]
        offline: bool,
    },

    /// Configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Events { creator, json } => cmd_events(&config, creator, json),
        Commands::Event { id } => cmd_event(&config, &id),
        Commands::Claims { id, json } => cmd_claims(&config, &id, json),
        Commands::Status { event_id, wallet } => cmd_status(&config, &event_id, &wallet),
        Commands::Scan { payload } => cmd_scan(&config, &payload),
        Commands::Reconcile { id } => cmd_reconcile(&config, &id).await,
        Commands::MintSize {
            title,
            symbol,
            image_url,
            decimals,
            offline,
        } => cmd_mint_size(&config, title, symbol, image_url, decimals, offline).await,
        Commands::Config { command } => cmd_config(&cli.config, &config, command),
    }
}

fn load_config(cli: &Cli) -> Result<CpopConfig> {
    let mut config = CpopConfig::load(cli.config.as_deref()).context("loading config")?;
    if let Some(name) = &cli.network {
        config.network = Network::from_name(name).ok_or_else(|| anyhow!("unknown network '{}'", name))?;
    }
    if let Some(rpc) = &cli.rpc {
        config.rpc_url = Some(rpc.clone());
    }
    if let Some(db) = &cli.db {
        config.database_path = Some(db.clone());
    }
    tracing::debug!(network = config.network.name(), rpc = config.rpc_url(), "effective config");
    Ok(config)
}

fn open_store(config: &CpopConfig) -> Result<Arc<SqliteStore>> {
    let path = config.database_path();
    let store = SqliteStore::open(&path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Arc::new(store))
}

fn parse_pubkey(value: &str) -> Result<Pubkey> {
    Pubkey::from_str(value.trim()).map_err(|_| anyhow!("'{}' is not a valid address", value))
}

fn cmd_events(config: &CpopConfig, creator: Option<String>, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let events = match creator {
        Some(creator) => store.get_events_by_creator(&parse_pubkey(&creator)?)?,
        None => store.get_all_events()?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    println!("\n  EVENTS ({})", events.len());
    println!("  ==========\n");
    for event in &events {
        let confirmed = store.count_confirmed_claims(&event.id)?;
        println!("  {}  {}", event.id, event.details.title);
        println!(
            "    {}  {}  claimed {}/{}",
            event.details.symbol, event.mint_address, confirmed, event.details.attendee_count
        );
    }
    println!();
    Ok(())
}

fn cmd_event(config: &CpopConfig, id: &str) -> Result<()> {
    let store = open_store(config)?;
    let event = store
        .get_event_by_id(id)?
        .ok_or_else(|| anyhow!("event {} not found", id))?;
    let pool = store.get_pool_by_event_id(id)?;
    let state = ProvisioningState::from_records(Some(&event), pool.as_ref());

    println!("\n  EVENT {}", event.id);
    println!("  ======\n");
    println!("  Title:     {}", event.details.title);
    println!("  When:      {} {}", event.details.date, event.details.time);
    println!("  Where:     {}", event.details.location);
    println!("  Symbol:    {}", event.details.symbol);
    println!("  Mint:      {}", event.mint_address);
    println!("  Creator:   {}", event.creator);
    println!("  Tx:        {}", event.transaction_id);
    println!("  Created:   {}", event.created_at.format("%Y-%m-%d %H:%M UTC"));
    println!("  State:     {}", state);

    match &pool {
        Some(pool) => {
            println!("  Pool:      {}", pool.pool_address);
            println!("  Tree:      {}", pool.state_tree_address);
            let url = ClaimReference::new(&event.id)?.url(&config.claim_origin)?;
            println!("  Claim:     {}", url);
        }
        None => println!("  Pool:      not registered (resume at pool registration)"),
    }

    let confirmed = store.count_confirmed_claims(&event.id)?;
    let pending = store.get_pending_claims(&event.id)?.len();
    println!(
        "  Claims:    {} confirmed, {} pending, capacity {}",
        confirmed, pending, event.details.attendee_count
    );
    println!();
    Ok(())
}

fn cmd_claims(config: &CpopConfig, id: &str, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let claims = store.get_claims_by_event_id(id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&claims)?);
        return Ok(());
    }

    println!("\n  CLAIMS FOR {} ({})", id, claims.len());
    println!("  ==========\n");
    for claim in &claims {
        let tx = claim
            .transaction_id
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  [{:9}] {}  {}", claim.status.as_str(), claim.wallet_address, tx);
        if let Some(error) = &claim.error {
            println!("              {}", error);
        }
    }
    println!();
    Ok(())
}

fn cmd_status(config: &CpopConfig, event_id: &str, wallet: &str) -> Result<()> {
    let store = open_store(config)?;
    let wallet = parse_pubkey(wallet)?;
    if store.has_wallet_claimed_event(event_id, &wallet)? {
        println!("  {} has claimed {}", wallet, event_id);
    } else {
        println!("  {} has not claimed {}", wallet, event_id);
    }
    Ok(())
}

fn cmd_scan(config: &CpopConfig, payload: &str) -> Result<()> {
    let reference = ClaimReference::parse(payload)?;
    println!("  Event id:  {}", reference.event_id());
    println!("  Claim URL: {}", reference.url(&config.claim_origin)?);

    let store = open_store(config)?;
    match store.get_event_by_id(reference.event_id())? {
        Some(event) => println!("  Event:     {} ({})", event.details.title, event.details.symbol),
        None => println!("  Event:     not in the local store"),
    }
    Ok(())
}

async fn cmd_reconcile(config: &CpopConfig, id: &str) -> Result<()> {
    let store = open_store(config)?;
    let gateway = Arc::new(RpcGateway::new(config.rpc_url()));
    let compression = Arc::new(LightCompression::from_config(&config.compression)?);
    let engine = ClaimEngine::new(gateway, store, compression, config.clone());

    println!("  Reconciling {} against {}", id, config.rpc_url());
    let report = engine.reconcile_pending(id).await?;
    println!(
        "  Confirmed: {}  Failed: {}  Unresolved: {}",
        report.confirmed, report.failed, report.unresolved
    );
    Ok(())
}

async fn cmd_mint_size(
    config: &CpopConfig,
    title: String,
    symbol: String,
    image_url: String,
    decimals: u8,
    offline: bool,
) -> Result<()> {
    let details = EventDetails {
        title,
        symbol,
        image_url,
        decimals,
        attendee_count: 1,
        ..EventDetails::default()
    };
    if let Err(err) = details.validate(&config.native_symbol, config.max_attendees) {
        println!("  Warning: {}", err);
    }

    // sizes do not depend on the keys, only on them being set
    let plan = MintPlan {
        payer: Pubkey::new_unique(),
        mint: Pubkey::new_unique(),
        authority: Pubkey::new_unique(),
        decimals,
        metadata: details.token_metadata(),
    };
    let rent_space = plan.rent_space()?;

    println!("\n  MINT SIZE");
    println!("  =========\n");
    println!("  Name:      {}", plan.metadata.name);
    println!("  Symbol:    {}", plan.metadata.symbol);
    println!("  Mint:      {} bytes", plan.mint_space()?);
    println!("  Metadata:  {} bytes", plan.metadata_space()?);
    println!("  Rent for:  {} bytes", rent_space);

    if !offline {
        let gateway = RpcGateway::new(config.rpc_url());
        let lamports = gateway.minimum_balance_for_rent_exemption(rent_space).await?;
        println!(
            "  Rent:      {} lamports ({} {})",
            lamports,
            lamports_to_sol(lamports),
            config.native_symbol
        );
    }
    println!();
    Ok(())
}

fn cmd_config(path: &Option<PathBuf>, config: &CpopConfig, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            println!("{}", config.to_json()?);
            println!("\n  RPC:       {}", config.rpc_url());
            println!("  Database:  {}", config.database_path().display());
        }
        ConfigCommands::Init { force } => {
            let path = path
                .clone()
                .or_else(CpopConfig::default_path)
                .ok_or_else(|| anyhow!("no config directory on this system"))?;
            if path.exists() && !force {
                return Err(anyhow!("{} exists (use --force to overwrite)", path.display()));
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, CpopConfig::default().to_json()?)?;
            println!("  Wrote {}", path.display());
        }
    }
    Ok(())
}
