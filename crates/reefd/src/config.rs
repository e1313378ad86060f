//! TOML configuration for the reef daemon.
//!
//! Every section is optional; missing values fall back to defaults under
//! `~/.reef`. CLI flags override individual values after loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use reef_engine::GatewayConfig;
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// HTTP front door and orchestrators.
    pub gateway: GatewaySection,
    /// Storage node.
    pub node: NodeSection,
    /// Shared cluster settings.
    pub cluster: ClusterSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[gateway]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    /// Address for the HTTP API.
    pub listen_addr: String,
    /// Directory for the shard plan store.
    pub data_dir: PathBuf,
    /// Number of chunks every file is split into.
    pub chunks: usize,
    /// Largest accepted upload in bytes.
    pub max_file_size: u64,
    /// Storage nodes, `"<endpoint-id>"` or `"<endpoint-id>@host:port"`.
    ///
    /// The order is significant: it defines node indices, which are
    /// recorded in every shard plan.
    pub nodes: Vec<String>,
    /// Connect and per-chunk transfer timeout (e.g. `"10s"`).
    pub node_timeout: String,
    /// Plan store backend: `"file"` (default) or `"memory"`.
    pub backend: String,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            data_dir: reef_home().join("gateway"),
            chunks: 3,
            max_file_size: 10 * 1024 * 1024,
            nodes: Vec::new(),
            node_timeout: "10s".to_string(),
            backend: "file".to_string(),
        }
    }
}

/// `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Directory for chunk files and the node key.
    pub data_dir: PathBuf,
    /// Chunk store backend: `"file"` (default) or `"memory"`.
    pub backend: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            data_dir: reef_home().join("node"),
            backend: "file".to_string(),
        }
    }
}

/// `[cluster]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Shared secret; the gateway and its nodes must agree on it.
    ///
    /// An empty secret selects the default ALPN.
    pub secret: String,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn reef_home() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".reef"))
        .unwrap_or_else(|| PathBuf::from(".reef"))
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read {}", p.display()))?;
                let config: CliConfig = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Effective node timeout.
    pub fn node_timeout(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.gateway.node_timeout)
            .with_context(|| format!("invalid node_timeout {:?}", self.gateway.node_timeout))
    }

    /// Orchestrator settings derived from the `[gateway]` section.
    ///
    /// Node count is checked later, when the gateway is built over its
    /// transport.
    pub fn gateway_config(&self) -> anyhow::Result<GatewayConfig> {
        if self.gateway.chunks == 0 {
            bail!("gateway.chunks must be at least 1");
        }
        Ok(GatewayConfig {
            chunks: self.gateway.chunks,
            max_file_size: self.gateway.max_file_size,
            transfer_timeout: self.node_timeout()?,
        })
    }
}

/// Parse a human-readable duration: `"500ms"`, `"10s"`, `"2m"`, or a bare
/// number of seconds.
fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    let (num, unit) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000)
    } else {
        (s, 1_000)
    };
    let value: u64 = num.trim().parse().context("expected an integer")?;
    if value == 0 {
        bail!("duration must be positive");
    }
    let millis = value
        .checked_mul(unit)
        .with_context(|| format!("duration {s:?} is too large"))?;
    Ok(Duration::from_millis(millis))
}
