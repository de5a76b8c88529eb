use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::Path};

use crate::thresholds::ThresholdConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Without a database section readings are kept in memory only.
    #[serde(default)]
    pub database: Option<DbConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// How long a read may wait before the connection re-checks for shutdown.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Largest record accepted before it is dropped as malformed.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    23304
}
fn default_idle_timeout_secs() -> u64 {
    60
}
fn default_max_frame_bytes() -> usize {
    4096
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Create missing tables on startup.
    #[serde(default = "default_ensure_schema")]
    pub ensure_schema: bool,
}

fn default_max_connections() -> u32 {
    10
}
fn default_ensure_schema() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Readings that may wait for the pipeline before connections block.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

fn default_queue_size() -> usize {
    1024
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: None,
            pipeline: PipelineConfig::default(),
            thresholds: ThresholdConfig::default(),
        }
    }
}

impl Config {
    /// Load YAML from disk, substitute $(VAR)/${VAR} with env vars, then parse.
    /// A `DATABASE_URL` env var overrides (or supplies) `database.url`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, anyhow::Error> {
        let expanded = expand_env_placeholders(raw)?;
        // An empty document deserializes to unit, not to a map.
        let mut cfg: Self = if expanded.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&expanded)?
        };

        if let Ok(url) = std::env::var("DATABASE_URL") {
            match cfg.database.as_mut() {
                Some(db) => db.url = url,
                None => {
                    cfg.database = Some(DbConfig {
                        url,
                        max_connections: default_max_connections(),
                        ensure_schema: default_ensure_schema(),
                    })
                }
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        anyhow::ensure!(!self.server.host.is_empty(), "server.host cannot be empty");
        anyhow::ensure!(
            self.server.idle_timeout_secs > 0,
            "server.idle_timeout_secs must be greater than zero"
        );
        anyhow::ensure!(
            self.server.max_frame_bytes > 0,
            "server.max_frame_bytes must be greater than zero"
        );
        anyhow::ensure!(
            self.pipeline.queue_size > 0,
            "pipeline.queue_size must be greater than zero"
        );
        if let Some(db) = &self.database {
            anyhow::ensure!(!db.url.is_empty(), "database.url cannot be empty");
        }
        self.thresholds.validate()?;
        Ok(())
    }
}

/// Expand $(VAR) and ${VAR} placeholders using environment variables.
/// "$$" becomes a literal "$"; any other '$' is kept as-is.
fn expand_env_placeholders(input: &str) -> Result<String, anyhow::Error> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let close = match chars.peek() {
            Some('$') => {
                chars.next();
                out.push('$');
                continue;
            }
            Some('(') => ')',
            Some('{') => '}',
            _ => {
                out.push('$');
                continue;
            }
        };
        chars.next();

        let mut name = String::new();
        let mut terminated = false;
        for ch in chars.by_ref() {
            if ch == close {
                terminated = true;
                break;
            }
            name.push(ch);
        }
        anyhow::ensure!(
            terminated,
            "unterminated env placeholder: missing '{}'",
            close
        );
        let value = std::env::var(&name)
            .with_context(|| format!("missing environment variable: {}", name))?;
        out.push_str(&value);
    }

    Ok(out)
}
