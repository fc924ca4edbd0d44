use serde::Deserialize;
use std::path::Path;

const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DockerConfig {
    /// Path to the daemon socket. Unset means `DOCKER_HOST`, else the platform default socket.
    pub socket: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Max concurrent per-container stats reads; 0 = one task per container, unbounded.
    #[serde(default)]
    pub max_concurrency: usize,
    /// Per-container stats read timeout.
    #[serde(default = "default_stats_timeout_ms")]
    pub stats_timeout_ms: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 0,
            stats_timeout_ms: default_stats_timeout_ms(),
        }
    }
}

fn default_stats_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    /// Optional prefix for every exported metric name (`<namespace>_mem_usage`).
    #[serde(default)]
    pub namespace: String,
    /// Drop series for containers that disappeared since the previous scan.
    #[serde(default)]
    pub evict_stale: bool,
}

impl AppConfig {
    /// Load from `$CONFIG_FILE` (or `config.toml`), then apply `HTTP_ADDR` / `HTTP_PORT`.
    /// A missing default file yields the built-in defaults; a missing explicit file is an error.
    pub fn load() -> anyhow::Result<Self> {
        let explicit = std::env::var("CONFIG_FILE").ok();
        let path = explicit.as_deref().unwrap_or(DEFAULT_CONFIG_FILE);
        let mut config = match std::fs::read_to_string(path) {
            Ok(s) => Self::parse(&s)?,
            Err(e) if explicit.is_none() && e.kind() == std::io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(e) => return Err(anyhow::anyhow!("config file {}: {}", path, e)),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a config file without env overrides.
    pub fn load_from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config = Self::parse(s)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Overrides listen address and port from `HTTP_ADDR` / `HTTP_PORT` as resolved by `lookup`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<()> {
        if let Some(host) = lookup("HTTP_ADDR") {
            self.server.host = host;
        }
        if let Some(port) = lookup("HTTP_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("HTTP_PORT must be a port number, got {:?}: {}", port, e))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(!self.server.host.is_empty(), "server.host must be non-empty");
        anyhow::ensure!(
            self.docker.socket.as_deref().is_none_or(|s| !s.is_empty()),
            "docker.socket must be non-empty when set"
        );
        anyhow::ensure!(
            self.collector.stats_timeout_ms > 0,
            "collector.stats_timeout_ms must be > 0, got {}",
            self.collector.stats_timeout_ms
        );
        anyhow::ensure!(
            is_valid_namespace(&self.metrics.namespace),
            "metrics.namespace must match [a-zA-Z_][a-zA-Z0-9_]*, got {:?}",
            self.metrics.namespace
        );
        Ok(())
    }
}

fn is_valid_namespace(ns: &str) -> bool {
    let mut chars = ns.chars();
    match chars.next() {
        None => true,
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        Some(_) => false,
    }
}
