//! lanlink node binary: host, discover, or join local-wireless-style
//! sessions over the LAN.
//!
//! ```text
//! lanlink-node host            # create a session and print joins/leaves
//! lanlink-node scan            # one discovery pass
//! lanlink-node join            # discover a session and join it
//! ```
//!
//! Configuration comes from the platform config file (see
//! `infrastructure::storage::config`), with a few common parameters
//! overridable on the command line. `RUST_LOG` overrides the configured log
//! level.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use lanlink_core::domain::descriptor::{NetworkInfo, SecurityMode};
use lanlink_core::domain::session::{filter_flags, ConnectRequest, ScanFilter};
use lanlink_node::infrastructure::storage::config::{self, NodeConfig};
use lanlink_node::{SessionEngine, SessionState};

#[derive(Parser)]
#[command(name = "lanlink-node", version, about = "LAN session node: host, scan, join")]
struct Cli {
    /// Config file path; defaults to the platform config location.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a session and run until Ctrl-C, printing membership changes.
    Host {
        /// Network name to advertise.
        #[arg(long)]
        name: Option<String>,
        /// Application intent identifier.
        #[arg(long)]
        comm_id: Option<u64>,
        /// Member limit including the host (1-8).
        #[arg(long)]
        max_nodes: Option<u8>,
        /// Shared-key passphrase; enables shared-key security.
        #[arg(long)]
        passphrase: Option<String>,
    },
    /// Run one discovery pass and print the sessions found.
    Scan {
        /// Only list sessions with this intent identifier.
        #[arg(long)]
        comm_id: Option<u64>,
        /// Maximum number of results.
        #[arg(long, default_value_t = 16)]
        count: usize,
    },
    /// Discover a session, join it, and run until Ctrl-C.
    Join {
        /// Only consider sessions with this intent identifier.
        #[arg(long)]
        comm_id: Option<u64>,
        /// Nickname to join with; defaults to the configured one.
        #[arg(long)]
        nickname: Option<String>,
        /// Shared-key passphrase for secured sessions.
        #[arg(long)]
        passphrase: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_node_config(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cfg.node.log_level.clone())),
        )
        .init();

    let engine = SessionEngine::new(cfg.engine_config()?);

    match cli.command {
        Command::Host {
            name,
            comm_id,
            max_nodes,
            passphrase,
        } => run_host(&engine, &cfg, name, comm_id, max_nodes, passphrase).await,
        Command::Scan { comm_id, count } => run_scan(&engine, comm_id, count).await,
        Command::Join {
            comm_id,
            nickname,
            passphrase,
        } => run_join(&engine, &cfg, comm_id, nickname, passphrase).await,
    }
}

fn load_node_config(path: Option<&Path>) -> anyhow::Result<NodeConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("parsing config {}", path.display()))
        }
        None => config::load_config().context("loading platform config"),
    }
}

fn intent_filter(comm_id: Option<u64>) -> ScanFilter {
    match comm_id {
        Some(id) => ScanFilter {
            local_communication_id: id,
            flags: filter_flags::LOCAL_COMMUNICATION_ID,
            ..ScanFilter::default()
        },
        None => ScanFilter::any(),
    }
}

fn print_members(info: &NetworkInfo) {
    println!(
        "members {}/{}:",
        info.node_count, info.node_count_max
    );
    for node in info.active_nodes() {
        println!("  [{}] {} @ {}", node.node_id, node.nickname, node.ipv4);
    }
}

async fn run_host(
    engine: &SessionEngine,
    cfg: &NodeConfig,
    name: Option<String>,
    comm_id: Option<u64>,
    max_nodes: Option<u8>,
    passphrase: Option<String>,
) -> anyhow::Result<()> {
    let mut create = cfg.create_network_config();
    if let Some(name) = name {
        create.network_name = name;
    }
    if let Some(comm_id) = comm_id {
        create.local_communication_id = comm_id;
    }
    if let Some(max_nodes) = max_nodes {
        create.node_count_max = max_nodes;
    }
    if let Some(passphrase) = passphrase {
        create.security_mode = SecurityMode::SharedKey;
        create.security_key = passphrase.into_bytes();
    }

    engine.open_access_point().await?;
    engine.create_network(create).await?;
    engine.notifier().clear();

    let info = engine.get_network_info().await;
    println!(
        "hosting '{}' (session {}), Ctrl-C to stop",
        info.network_name, info.session_id
    );
    print_members(&info);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            _ = engine.notifier().wait() => {
                engine.notifier().clear();
                if engine.get_state().await != SessionState::AccessPointCreated {
                    println!(
                        "session ended: {:?}",
                        engine.get_disconnect_reason().await
                    );
                    break;
                }
                print_members(&engine.get_network_info().await);
            }
        }
    }

    engine.finalize().await;
    Ok(())
}

async fn run_scan(
    engine: &SessionEngine,
    comm_id: Option<u64>,
    count: usize,
) -> anyhow::Result<()> {
    let results = engine.scan(&intent_filter(comm_id), count).await?;
    if results.is_empty() {
        println!("no sessions found");
        return Ok(());
    }
    for info in &results {
        println!(
            "{}  '{}'  {}/{} members  intent {:#x}  host {}:{}",
            info.session_id,
            info.network_name,
            info.node_count,
            info.node_count_max,
            info.local_communication_id,
            info.nodes[0].ipv4,
            info.host_port,
        );
    }
    Ok(())
}

async fn run_join(
    engine: &SessionEngine,
    cfg: &NodeConfig,
    comm_id: Option<u64>,
    nickname: Option<String>,
    passphrase: Option<String>,
) -> anyhow::Result<()> {
    engine.open_station().await?;

    let results = engine.scan(&intent_filter(comm_id), 1).await?;
    let Some(target) = results.into_iter().next() else {
        anyhow::bail!("no matching session found");
    };
    println!(
        "joining '{}' hosted by {}",
        target.network_name, target.nodes[0].nickname
    );

    let request = ConnectRequest {
        security_mode: target.security_mode,
        key: passphrase.map(String::into_bytes).unwrap_or_default(),
        nickname: nickname.unwrap_or_else(|| cfg.node.nickname.clone()),
        local_communication_version: target.local_communication_version,
        option: 0,
    };
    engine.connect(&target, &request).await?;
    engine.notifier().clear();
    print_members(&engine.get_network_info().await);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                engine.disconnect().await?;
                break;
            }
            _ = engine.notifier().wait() => {
                engine.notifier().clear();
                if engine.get_state().await != SessionState::StationConnected {
                    println!(
                        "left session: {:?}",
                        engine.get_disconnect_reason().await
                    );
                    break;
                }
                print_members(&engine.get_network_info().await);
            }
        }
    }

    engine.finalize().await;
    Ok(())
}
