//! Offline management of a stored mesh network.
//!
//! `meshctl init` writes a fresh network database; `show` and `replay` print
//! what the runner persisted.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use meshctl_production::{telemetry, FileStorage, MeshStorage, MeshctlConfig};
use meshctl_types::{Key128, MeshDb};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "meshctl")]
#[command(about = "Mesh provisioning client")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage directory (overrides the config file)
    #[arg(short, long)]
    storage: Option<PathBuf>,

    /// Verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a network database with fresh keys
    Init {
        /// Replace an existing database
        #[arg(long)]
        force: bool,
    },
    /// Print the stored network
    Show {
        /// Print the whole database as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the replay-protection list
    Replay,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => MeshctlConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => MeshctlConfig::default(),
    };
    telemetry::init(&config.logging, cli.verbose);

    let dir = cli.storage.clone().unwrap_or_else(|| config.storage.path.clone());
    let storage = FileStorage::new(&dir)
        .with_context(|| format!("opening storage at {}", dir.display()))?;

    match cli.command {
        Command::Init { force } => init(&config, &storage, force).await,
        Command::Show { json } => show(&storage, json).await,
        Command::Replay => replay(&storage).await,
    }
}

async fn init(config: &MeshctlConfig, storage: &FileStorage, force: bool) -> anyhow::Result<()> {
    if !force && storage.load_database().await?.is_some() {
        bail!(
            "{} already holds a network (use --force to replace it)",
            storage.base_dir().display()
        );
    }
    config.client_config().context("checking [client]")?;
    let network = &config.network;
    let mut rng = rand::thread_rng();
    let db = MeshDb::new(
        &network.name,
        &network.provisioner,
        config.provisioner_uuid()?,
        network.element_count,
        Key128::random(&mut rng),
        Key128::random(&mut rng),
        Key128::random(&mut rng),
    );
    storage.save_database(&db).await?;
    storage.save_replay(&meshctl_types::ReplayList::new().encode()).await?;
    info!(network = %db.name, path = %storage.database_path().display(), "Network created");
    Ok(())
}

async fn show(storage: &FileStorage, json: bool) -> anyhow::Result<()> {
    let Some(db) = storage.load_database().await? else {
        bail!("no network stored in {}", storage.base_dir().display());
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&db)?);
        return Ok(());
    }

    println!("Network:   {} (IV index {})", db.name, db.iv_index);
    for key in &db.net_keys {
        println!("Net key:   {} phase {}", key.index, key.phase);
    }
    for key in &db.app_keys {
        println!("App key:   {} bound to {}", key.index, key.bound_net_key);
    }
    println!("Nodes:");
    for node in &db.nodes {
        let flags = match (node.config_complete, node.blocked) {
            (_, true) => " [blocked]",
            (false, false) => " [unconfigured]",
            (true, false) => "",
        };
        println!(
            "  {:<6} {:<16} {} elements {}{}",
            node.unicast.to_string(),
            node.name,
            node.elements.len(),
            node.uuid,
            flags
        );
    }
    println!("Groups:");
    for group in &db.groups {
        match group.parent {
            Some(parent) => println!("  {:<6} {} (in {})", group.address.to_string(), group.name, parent),
            None => println!("  {:<6} {}", group.address.to_string(), group.name),
        }
    }
    Ok(())
}

async fn replay(storage: &FileStorage) -> anyhow::Result<()> {
    let list = storage.load_replay().await?;
    let iv = list.iv();
    println!(
        "IV index {}{}",
        iv.iv_index,
        if iv.update_in_progress { " (update in progress)" } else { "" }
    );
    for entry in list.entries() {
        println!(
            "  {:<6} seq {:>8}{}",
            entry.address.to_string(),
            entry.seq,
            if entry.previous_iv { " (previous IV)" } else { "" }
        );
    }
    Ok(())
}
