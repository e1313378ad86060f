//! `reefd`, the reef daemon.
//!
//! One binary runs either role of a reef cluster:
//!
//! ```text
//! reefd node                                 # storage node; prints its endpoint id
//! reefd node -d ./node2 --memory             # second, in-memory node
//! reefd gateway -n <id>@host:port -n ...     # HTTP front door over the listed nodes
//! reefd gateway -c reef.toml                 # gateway from a config file
//! reefd plan report.pdf                      # show the committed shard plan
//! ```

mod config;
mod handler;
mod http;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use iroh::protocol::Router;
use iroh::{Endpoint, EndpointAddr, SecretKey};
use reef_engine::Gateway;
use reef_meta::{MemoryPlanStore, MetaStore, PlanStore};
use reef_net::{NodeService, QuicTransport};
use reef_store::{ChunkStore, FileStore, MemoryStore};
use reef_types::FileKey;
use tracing::info;

use config::CliConfig;
use handler::NodeProtocol;
use http::HttpServer;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "reefd", version, about = "reef chunked file storage daemon")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway.
    Gateway {
        /// Override the HTTP listen address (e.g. "127.0.0.1:8080").
        #[arg(short, long)]
        listen_addr: Option<String>,

        /// Override the plan store directory.
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Storage node, `<endpoint_id>` or `<endpoint_id>@<host:port>`.
        ///
        /// Repeat once per node; order defines node indices and replaces the
        /// configured list.
        #[arg(short, long)]
        node: Vec<String>,

        /// Override the number of chunks per file.
        #[arg(long)]
        chunks: Option<usize>,

        /// Cluster secret (must match the nodes').
        #[arg(long, env = "REEF_SECRET")]
        secret: Option<String>,

        /// Keep shard plans in memory only.
        #[arg(short, long)]
        memory: bool,
    },

    /// Run a storage node.
    Node {
        /// Override the chunk directory.
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Cluster secret (must match the gateway's).
        #[arg(long, env = "REEF_SECRET")]
        secret: Option<String>,

        /// Keep chunks in memory and use an ephemeral node key.
        #[arg(short, long)]
        memory: bool,
    },

    /// Print the committed shard plan for a file.
    Plan {
        /// File name as uploaded.
        name: String,

        /// Override the plan store directory.
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    match cli.command {
        Commands::Gateway {
            listen_addr,
            data_dir,
            node,
            chunks,
            secret,
            memory,
        } => {
            // CLI args override config file values.
            if let Some(addr) = listen_addr {
                config.gateway.listen_addr = addr;
            }
            if let Some(dir) = data_dir {
                config.gateway.data_dir = dir;
            }
            if !node.is_empty() {
                config.gateway.nodes = node;
            }
            if let Some(n) = chunks {
                config.gateway.chunks = n;
            }
            if let Some(s) = secret {
                config.cluster.secret = s;
            }
            if memory {
                config.gateway.backend = "memory".to_string();
            }
            cmd_gateway(config).await
        }
        Commands::Node {
            data_dir,
            secret,
            memory,
        } => {
            if let Some(dir) = data_dir {
                config.node.data_dir = dir;
            }
            if let Some(s) = secret {
                config.cluster.secret = s;
            }
            if memory {
                config.node.backend = "memory".to_string();
            }
            cmd_node(config).await
        }
        Commands::Plan { name, data_dir } => {
            if let Some(dir) = data_dir {
                config.gateway.data_dir = dir;
            }
            cmd_plan(&config, &name)
        }
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// ALPN for the configured cluster secret.
fn alpn_for(secret: &str) -> Vec<u8> {
    if secret.is_empty() {
        reef_net::REEF_ALPN.to_vec()
    } else {
        reef_net::cluster_alpn(secret.as_bytes())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(%e, "failed to listen for ctrl-c");
    }
    info!("shutdown requested");
}

// -----------------------------------------------------------------------
// reefd gateway
// -----------------------------------------------------------------------

async fn cmd_gateway(config: CliConfig) -> Result<()> {
    let gateway_config = config.gateway_config()?;
    let timeout = config.node_timeout()?;
    let nodes = config
        .gateway
        .nodes
        .iter()
        .map(|s| parse_node(s).with_context(|| format!("invalid node {s:?}")))
        .collect::<Result<Vec<_>>>()?;

    info!(
        listen_addr = %config.gateway.listen_addr,
        nodes = nodes.len(),
        chunks = gateway_config.chunks,
        max_file_size = gateway_config.max_file_size,
        ?timeout,
        "starting gateway"
    );

    let endpoint = Endpoint::builder()
        .relay_mode(iroh::RelayMode::Default)
        .bind()
        .await
        .context("failed to bind iroh endpoint")?;
    let transport = Arc::new(QuicTransport::with_alpn(
        endpoint.clone(),
        alpn_for(&config.cluster.secret),
        nodes,
        timeout,
    ));

    let plans: Arc<dyn PlanStore> = if config.gateway.backend == "memory" {
        info!("using in-memory plan store");
        Arc::new(MemoryPlanStore::new())
    } else {
        std::fs::create_dir_all(&config.gateway.data_dir)
            .context("failed to create data directory")?;
        let path = config.gateway.data_dir.join("plans");
        info!(path = %path.display(), "using fjall plan store");
        Arc::new(MetaStore::open(&path).context("failed to open plan store")?)
    };

    let gateway = Gateway::new(gateway_config, transport.clone(), plans)
        .context("invalid gateway configuration")?;
    transport.connect_all().await;

    HttpServer::new(Arc::new(gateway))
        .serve_with_shutdown(&config.gateway.listen_addr, shutdown_signal())
        .await
        .context("HTTP server failed")?;

    transport.close().await;
    Ok(())
}

/// Parse a storage node string.
///
/// Formats:
/// - `<endpoint_id>`: hex-encoded public key (iroh relay used for discovery)
/// - `<endpoint_id>@<host:port>`: with an explicit direct address
fn parse_node(s: &str) -> Result<EndpointAddr> {
    let (id_str, addr_str) = match s.split_once('@') {
        Some((id, addr)) => (id, Some(addr)),
        None => (s, None),
    };

    let endpoint_id: iroh::EndpointId = id_str
        .parse()
        .context("invalid endpoint ID (expected hex-encoded public key)")?;

    let mut endpoint_addr = EndpointAddr::new(endpoint_id);
    if let Some(addr) = addr_str {
        let socket_addr: SocketAddr = addr
            .parse()
            .context("invalid socket address (expected host:port)")?;
        endpoint_addr = endpoint_addr.with_ip_addr(socket_addr);
    }
    Ok(endpoint_addr)
}

// -----------------------------------------------------------------------
// reefd node
// -----------------------------------------------------------------------

async fn cmd_node(config: CliConfig) -> Result<()> {
    let memory_mode = config.node.backend == "memory";
    info!(
        data_dir = %config.node.data_dir.display(),
        backend = %config.node.backend,
        "starting storage node"
    );

    if !memory_mode {
        std::fs::create_dir_all(&config.node.data_dir)
            .context("failed to create data directory")?;
    }

    let secret_key = if memory_mode {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        info!("generated ephemeral node key (memory mode)");
        SecretKey::from(bytes)
    } else {
        load_or_create_secret_key(&config.node.data_dir)?
    };

    let store: Arc<dyn ChunkStore> = if memory_mode {
        info!("using in-memory chunk store");
        Arc::new(MemoryStore::new())
    } else {
        let path = config.node.data_dir.join("chunks");
        info!(path = %path.display(), "using file chunk store");
        Arc::new(FileStore::new(&path).context("failed to initialize file store")?)
    };

    let alpn = alpn_for(&config.cluster.secret);
    if !config.cluster.secret.is_empty() {
        info!(
            cluster_id = %&blake3::hash(config.cluster.secret.as_bytes()).to_hex()[..16],
            "cluster identity derived from secret"
        );
    }

    let endpoint = Endpoint::builder()
        .secret_key(secret_key)
        .alpns(vec![alpn.clone()])
        .relay_mode(iroh::RelayMode::Default)
        .bind()
        .await
        .context("failed to bind iroh endpoint")?;

    for addr in endpoint.addr().ip_addrs() {
        info!(%addr, "listening on");
    }

    let protocol = NodeProtocol::new(Arc::new(NodeService::new(store)));
    let router = Router::builder(endpoint.clone())
        .accept(alpn, protocol)
        .spawn();

    info!(
        "add this node to the gateway: --node {}",
        endpoint.id()
    );

    shutdown_signal().await;

    info!("shutting down iroh router");
    router.shutdown().await.context("router shutdown failed")?;
    Ok(())
}

/// Load the node's key from `<data_dir>/node.key`, creating it on first run.
///
/// The key determines the endpoint id the gateway is configured with, so it
/// must survive restarts.
fn load_or_create_secret_key(data_dir: &Path) -> Result<SecretKey> {
    let key_path = data_dir.join("node.key");
    if key_path.exists() {
        let bytes = std::fs::read(&key_path).context("failed to read node.key")?;
        anyhow::ensure!(bytes.len() == 32, "node.key must be exactly 32 bytes");
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        let key = SecretKey::from_bytes(&arr);
        info!(endpoint_id = %key.public().fmt_short(), "loaded existing node key");
        Ok(key)
    } else {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let key = SecretKey::from(bytes);
        std::fs::write(&key_path, key.to_bytes()).context("failed to write node.key")?;
        info!(
            path = %key_path.display(),
            endpoint_id = %key.public().fmt_short(),
            "generated new node key"
        );
        Ok(key)
    }
}

// -----------------------------------------------------------------------
// reefd plan
// -----------------------------------------------------------------------

fn cmd_plan(config: &CliConfig, name: &str) -> Result<()> {
    let key = FileKey::resolve(name).context("invalid file name")?;
    let path = config.gateway.data_dir.join("plans");
    let meta = MetaStore::open(&path).context("failed to open plan store")?;

    let Some(plan) = meta.get_plan(&key)? else {
        anyhow::bail!("no shard plan for {key}");
    };

    println!("key:    {key}");
    println!("size:   {} bytes", plan.original_size);
    println!("chunks: {}", plan.chunk_count());
    for shard in &plan.shards {
        let checksum = shard
            .checksum
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  chunk {:>3}  node {:>3}  {:>10} bytes  {checksum}",
            shard.chunk_index, shard.node_index, shard.size
        );
    }
    Ok(())
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
