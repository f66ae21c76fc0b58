//! driftlog CLI
//!
//! Thin wrapper around driftlog-core for command-line usage. The CLI
//! runs the engine in local mode (no live transport): events are created
//! and queried offline, and gossip catches peers up when an embedding
//! application wires a real transport.
//!
//! ## Usage
//!
//! ```bash
//! # Show node information
//! driftlog info
//!
//! # Initialize or show the node identity
//! driftlog identity init
//! driftlog identity show
//!
//! # Append an event with a JSON payload
//! driftlog event create '{"t":"note","body":"hello"}'
//!
//! # Inspect the log
//! driftlog event list --origin <node_id> --limit 20
//! driftlog event show <event_id>
//! driftlog event count
//! driftlog watermarks
//!
//! # Projection snapshots
//! driftlog projection list
//! driftlog projection clear
//!
//! # Administrative pruning
//! driftlog admin prune <before_ms>
//! driftlog admin remove-origin <node_id>
//!
//! # Run an in-memory replication demo
//! driftlog simulate --nodes 3 --events 12
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use driftlog_core::projection::EventCountProjection;
use driftlog_core::{
    DriftEngine, EngineConfig, EventId, MemoryNetwork, NodeId, Payload, Storage,
};

/// driftlog - offline-first replicated event logs
#[derive(Parser)]
#[command(name = "driftlog")]
#[command(version = "0.1.0")]
#[command(about = "driftlog - offline-first replicated event logs")]
#[command(
    long_about = "A decentralized, offline-capable replication engine for append-only events, \
                  with deterministic projections over the replicated log."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.driftlog/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show node information
    Info,

    /// Identity management
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },

    /// Event log operations
    Event {
        #[command(subcommand)]
        action: EventAction,
    },

    /// Show the local watermark map (the vector clock)
    Watermarks,

    /// Projection snapshot management
    Projection {
        #[command(subcommand)]
        action: ProjectionAction,
    },

    /// Administrative log maintenance
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },

    /// Run an in-memory multi-node replication demo
    Simulate {
        /// Number of nodes in the simulated cluster
        #[arg(long, default_value_t = 3)]
        nodes: usize,
        /// Events created per node
        #[arg(long, default_value_t = 4)]
        events: usize,
    },
}

#[derive(Subcommand)]
enum IdentityAction {
    /// Create the node identity if it does not exist
    Init,
    /// Show the node identity
    Show,
}

#[derive(Subcommand)]
enum EventAction {
    /// Append an event with a JSON object payload
    Create {
        /// Payload as a JSON object, e.g. '{"t":"note"}'
        payload: String,
    },
    /// List events, newest-known origins first
    List {
        /// Restrict to one origin node
        #[arg(long)]
        origin: Option<String>,
        /// Maximum events to print
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Show one event by id
    Show {
        /// Event ID
        event_id: String,
    },
    /// Show event counts
    Count,
}

#[derive(Subcommand)]
enum ProjectionAction {
    /// List stored projection snapshots
    List,
    /// Drop stored projection snapshots
    Clear,
}

#[derive(Subcommand)]
enum AdminAction {
    /// Remove events created before the given wall-clock milliseconds
    Prune {
        /// Creation-time cutoff (Unix milliseconds)
        before_ms: i64,
    },
    /// Remove one origin's entire log
    RemoveOrigin {
        /// Origin node ID
        node_id: String,
    },
    /// Remove every event and reset watermarks
    Clear,
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Get the default data directory (~/.driftlog/data)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".driftlog")
        .join("data")
}

/// Load the node identity, creating it when `create` is set.
fn load_identity(data_dir: &PathBuf, create: bool) -> Result<NodeId> {
    let path = data_dir.join("identity");
    if path.exists() {
        let raw = std::fs::read_to_string(&path)?;
        return Ok(NodeId::from(raw.trim()));
    }
    if !create {
        anyhow::bail!("No identity at {}; run `driftlog identity init`", path.display());
    }
    std::fs::create_dir_all(data_dir)?;
    let id = NodeId::generate();
    std::fs::write(&path, id.as_str())?;
    Ok(id)
}

/// Open the local engine with a solo in-memory transport endpoint.
fn open_engine(data_dir: &PathBuf, node_id: NodeId) -> Result<DriftEngine> {
    let net = MemoryNetwork::new();
    let transport = Arc::new(net.join(node_id.clone()));
    let engine = DriftEngine::new(node_id, data_dir, EngineConfig::default(), transport)?;
    Ok(engine)
}

fn open_storage(data_dir: &PathBuf) -> Result<Storage> {
    Storage::open(data_dir.join("driftlog.redb"))
        .with_context(|| format!("Opening database under {}", data_dir.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);

    match cli.command {
        Commands::Info => {
            let node_id = load_identity(&data_dir, true)?;
            let storage = open_storage(&data_dir)?;
            let events = storage.events();
            let marks = events.get_latest_timestamps_for_all_nodes()?;

            println!("driftlog v0.1.0");
            println!();
            println!("Node:");
            println!("  ID: {}", node_id);
            println!();
            println!("Data directory: {}", data_dir.display());
            println!("Events: {}", events.get_event_count()?);
            println!("Known origins: {}", marks.len());
            println!();
            println!("Status: Local mode (no transport attached)");
        }

        Commands::Identity { action } => match action {
            IdentityAction::Init => {
                let node_id = load_identity(&data_dir, true)?;
                println!("Identity:");
                println!("  ID: {}", node_id);
            }
            IdentityAction::Show => {
                let node_id = load_identity(&data_dir, false)?;
                println!("Identity:");
                println!("  ID: {}", node_id);
            }
        },

        Commands::Event { action } => match action {
            EventAction::Create { payload } => {
                let value: serde_json::Value = serde_json::from_str(&payload)
                    .with_context(|| format!("Parsing payload '{}'", payload))?;
                let payload: Payload = match value {
                    serde_json::Value::Object(map) => map,
                    _ => anyhow::bail!("Payload must be a JSON object"),
                };

                let node_id = load_identity(&data_dir, true)?;
                let engine = open_engine(&data_dir, node_id)?;
                engine.start().await?;
                let event = engine.create_event(payload)?;
                engine.stop().await?;

                println!("Event created:");
                println!("  ID: {}", event.id);
                println!("  Origin: {}", event.node_id);
                println!("  Timestamp: {}", event.timestamp);
            }
            EventAction::List { origin, limit } => {
                let storage = open_storage(&data_dir)?;
                let events = storage.events();
                let listed = match origin {
                    Some(origin) => {
                        events.get_events_since(&NodeId::from(origin.as_str()), 0, Some(limit))?
                    }
                    None => {
                        let mut all = events.get_all_events()?;
                        all.truncate(limit);
                        all
                    }
                };

                if listed.is_empty() {
                    println!("No events.");
                }
                for event in listed {
                    println!(
                        "{}  {}@{}  {}",
                        event.id,
                        event.node_id,
                        event.timestamp,
                        serde_json::to_string(&event.payload)?
                    );
                }
            }
            EventAction::Show { event_id } => {
                let storage = open_storage(&data_dir)?;
                let events = storage.events();
                match events.get_event(&EventId::from(event_id.as_str()))? {
                    Some(event) => {
                        println!("ID: {}", event.id);
                        println!("Origin: {}", event.node_id);
                        println!("Timestamp: {}", event.timestamp);
                        println!("Created: {} ms", event.creation_timestamp);
                        println!("Payload: {}", serde_json::to_string_pretty(&event.payload)?);
                    }
                    None => println!("Event not found: {}", event_id),
                }
            }
            EventAction::Count => {
                let storage = open_storage(&data_dir)?;
                let events = storage.events();
                println!("Total: {}", events.get_event_count()?);
                for (origin, mark) in events.get_latest_timestamps_for_all_nodes()?.iter() {
                    println!(
                        "  {}: {} events (watermark {})",
                        origin,
                        events.get_event_count_for_node(origin)?,
                        mark
                    );
                }
            }
        },

        Commands::Watermarks => {
            let storage = open_storage(&data_dir)?;
            let marks = storage.events().get_latest_timestamps_for_all_nodes()?;
            if marks.is_empty() {
                println!("No origins known.");
            }
            for (origin, mark) in marks.iter() {
                println!("{}: {}", origin, mark);
            }
        }

        Commands::Projection { action } => match action {
            ProjectionAction::List => {
                let storage = open_storage(&data_dir)?;
                let metas = storage.projections().list_metadata()?;
                if metas.is_empty() {
                    println!("No snapshots.");
                }
                for meta in metas {
                    println!(
                        "{} (v{}): {} events, saved {} ms",
                        meta.projection, meta.version, meta.event_count, meta.saved_at
                    );
                }
            }
            ProjectionAction::Clear => {
                let storage = open_storage(&data_dir)?;
                storage.projections().clear_all()?;
                println!("Snapshots cleared.");
            }
        },

        Commands::Admin { action } => match action {
            AdminAction::Prune { before_ms } => {
                let storage = open_storage(&data_dir)?;
                let removed = storage.events().remove_events_older_than(before_ms)?;
                println!("Removed {} events.", removed);
            }
            AdminAction::RemoveOrigin { node_id } => {
                let storage = open_storage(&data_dir)?;
                let removed = storage
                    .events()
                    .remove_events_for_node(&NodeId::from(node_id.as_str()))?;
                println!("Removed {} events from {}.", removed, node_id);
            }
            AdminAction::Clear => {
                let storage = open_storage(&data_dir)?;
                storage.events().clear()?;
                println!("Log cleared.");
            }
        },

        Commands::Simulate { nodes, events } => {
            simulate(nodes, events).await?;
        }
    }

    Ok(())
}

/// Spin up an in-memory cluster, write events everywhere, and watch the
/// logs converge.
async fn simulate(nodes: usize, events_per_node: usize) -> Result<()> {
    anyhow::ensure!(nodes >= 2, "Simulation needs at least 2 nodes");

    let net = MemoryNetwork::new();
    let config = EngineConfig {
        gossip_interval: Duration::from_millis(100),
        peer_discovery_interval: Duration::from_millis(50),
        ..Default::default()
    };

    println!("Starting {} nodes...", nodes);
    let mut engines = Vec::new();
    let mut dirs = Vec::new();
    for i in 0..nodes {
        let tmp = tempdir_for_sim(i)?;
        let node_id = NodeId::from(format!("node-{}", i).as_str());
        let transport = Arc::new(net.join(node_id.clone()));
        let engine = DriftEngine::new(node_id, &tmp, config.clone(), transport)?;
        engine
            .register_projection(Box::new(EventCountProjection::new()))
            .await;
        engine.start().await?;
        engines.push(engine);
        dirs.push(tmp);
    }

    println!("Creating {} events per node...", events_per_node);
    for (i, engine) in engines.iter().enumerate() {
        for n in 0..events_per_node {
            let mut payload = Payload::new();
            payload.insert("node".to_string(), serde_json::json!(i));
            payload.insert("n".to_string(), serde_json::json!(n));
            engine.create_event(payload)?;
        }
    }

    let target = (nodes * events_per_node) as u64;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let counts: Vec<u64> = engines
            .iter()
            .map(|e| e.event_store().get_event_count().unwrap_or(0))
            .collect();
        println!("  counts: {:?}", counts);
        if counts.iter().all(|&c| c == target) {
            break;
        }
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "Cluster failed to converge within 30s"
        );
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    println!("Converged: every node holds all {} events.", target);
    for engine in &engines {
        engine.stop().await?;
    }

    for dir in dirs {
        let _ = std::fs::remove_dir_all(dir);
    }
    Ok(())
}

/// Scratch directory for one simulated node.
fn tempdir_for_sim(index: usize) -> Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("driftlog-sim-{}-{}", std::process::id(), index));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
