//! Config schema types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Reply sent to the sender when the agent backend fails.
pub const DEFAULT_FALLBACK_TEXT: &str = "Sorry, processing failed. Please try again later.";

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub dispatch: DispatchConfig,
    pub agent: AgentConfig,
    pub traces: TracesConfig,
    pub metrics: MetricsConfig,
}

/// Gateway server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    /// Port to listen on. 0 picks a free port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn is_localhost(&self) -> bool {
        matches!(self.bind.as_str(), "127.0.0.1" | "localhost" | "::1")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite connection URL, e.g. `sqlite://switchboard.db?mode=rwc`.
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://switchboard.db?mode=rwc".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Sent to the sender when the agent backend fails.
    pub fallback_text: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            fallback_text: DEFAULT_FALLBACK_TEXT.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Directory for temporary audio uploads. Defaults to the system temp dir.
    pub temp_dir: Option<PathBuf>,
    /// Upper bound on every tenant's agent timeout, in seconds. 0 = no cap.
    pub max_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracesConfig {
    /// Terminal traces older than this are pruned. 0 disables pruning.
    pub retention_days: u32,
    pub prune_interval_secs: u64,
    /// A trace still open after this many seconds is treated as abandoned by
    /// a crashed dispatch: its redelivery is processed again and the sweep
    /// closes it `failed`. 0 disables recovery.
    pub stale_after_secs: u64,
}

impl Default for TracesConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            prune_interval_secs: 3600,
            stale_after_secs: 900,
        }
    }
}

impl TracesConfig {
    pub fn pruning_enabled(&self) -> bool {
        self.retention_days > 0
    }

    pub fn recovery_enabled(&self) -> bool {
        self.stale_after_secs > 0
    }

    /// Whether the background sweep has anything to do.
    pub fn sweep_enabled(&self) -> bool {
        self.pruning_enabled() || self.recovery_enabled()
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether `/metrics` serves a Prometheus export.
    pub enabled: bool,
}
