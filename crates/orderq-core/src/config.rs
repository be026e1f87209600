use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_SCHEDULER_NAME: &str = "fifo";
pub const DEFAULT_FAULT_CHANNEL_CAPACITY: usize = 64;
pub const DEFAULT_LOG_FILTER: &str = "orderq=info";

/// Top-level config (orderq.toml + ORDERQ_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderqConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Label attached to every log line the worker emits.
    #[serde(default = "default_scheduler_name")]
    pub name: String,
    /// Buffer size of the job-fault report channel.
    /// Faults reported while the buffer is full are logged and dropped.
    #[serde(default = "default_fault_channel_capacity")]
    pub fault_channel_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: default_scheduler_name(),
            fault_channel_capacity: default_fault_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive used when RUST_LOG is not set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_scheduler_name() -> String {
    DEFAULT_SCHEDULER_NAME.to_string()
}
fn default_fault_channel_capacity() -> usize {
    DEFAULT_FAULT_CHANNEL_CAPACITY
}
fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl OrderqConfig {
    /// Load config from a TOML file with ORDERQ_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.orderq/orderq.toml
    ///
    /// A missing file is not an error: defaults fill every field.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        debug!(%path, "loading config");

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::OrderqError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(OrderqConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("ORDERQ_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.orderq/orderq.toml", home)
}
