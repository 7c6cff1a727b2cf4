use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::cli::Cli;

#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct RelayConfig {
    #[serde(default = "default_listen")]
    pub listen_addr: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen(),
        }
    }
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct NotifierConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            endpoint: default_endpoint(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl NotifierConfig {
    pub fn to_client_config(&self) -> notify_client::NotifierConfig {
        notify_client::NotifierConfig {
            endpoint: self.endpoint.clone(),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: default_true(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_listen() -> String {
    format!("127.0.0.1:{}", relay_hub::DEFAULT_PORT)
}

fn default_endpoint() -> String {
    notify_client::DEFAULT_ENDPOINT.to_string()
}

fn default_retry_delay_ms() -> u64 {
    notify_client::DEFAULT_RETRY_DELAY.as_millis() as u64
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load configuration from a YAML file.
///
/// A missing file yields the default configuration. Logging is not set up
/// yet when this runs, so the returned flag tells the caller to warn about
/// it once the subscriber exists.
pub fn load(path: &Path) -> anyhow::Result<(Config, bool)> {
    if !path.exists() {
        return Ok((Config::default(), false));
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

    let config: Config = serde_yml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;

    Ok((config, true))
}

/// Emit the deferred warning for a missing config file.
pub fn warn_if_missing(path: &Path, found: bool) {
    if !found {
        warn!(
            path = %path.display(),
            "configuration file not found; using defaults"
        );
    }
}

impl Config {
    /// Apply command-line overrides on top of file values.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(ref listen) = cli.listen {
            self.relay.listen_addr = listen.clone();
        }
        if let Some(ref endpoint) = cli.notify_endpoint {
            self.notifier.endpoint = endpoint.clone();
        }
        if cli.no_notifier {
            self.notifier.enabled = false;
        }
    }
}
