//! Minimal configuration loading for the kiosk server.
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): things that cannot change at runtime,
//!   such as the state file path, bind address and telemetry endpoint.
//!
//! - **Bootstrap** (`BootstrapConfig`): initial values that seed runtime state
//!   (default cadence, check interval, bus sizing, schedule offset). After
//!   startup the persisted state document is the source of truth.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/kiosk/config.toml` (system)
//! 2. `~/.config/kiosk/config.toml` (user)
//! 3. `./kiosk.toml` or the `--config` path (local override)
//! 4. Environment variables (`KIOSK_*`, `RUST_LOG`, `OTEL_EXPORTER_OTLP_ENDPOINT`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! state_file = "~/.local/share/kiosk/state.json"
//!
//! [bind]
//! host = "0.0.0.0"
//! http_port = 80
//!
//! [telemetry]
//! log_level = "info,kiosk=debug"
//!
//! [display]
//! check_interval_secs = 2
//! log_capacity = 500
//!
//! [schedule]
//! utc_offset_minutes = 60
//! ```

pub mod bootstrap;
pub mod infra;
pub mod loader;

pub use bootstrap::{BootstrapConfig, DisplayConfig, ScheduleConfig};
pub use infra::{BindConfig, InfraConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete kiosk configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KioskConfig {
    /// Infrastructure - cannot change at runtime.
    #[serde(flatten)]
    pub infra: InfraConfig,

    /// Bootstrap - seeds runtime state.
    #[serde(flatten)]
    pub bootstrap: BootstrapConfig,
}

impl KioskConfig {
    /// Load configuration with an explicit override file, then apply env overrides.
    ///
    /// If `config_path` is provided it takes the place of the local
    /// `./kiosk.toml`. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_from_file(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let origin = sources
            .files
            .last()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("<defaults>"));
        let mut config = loader::from_table(merged, &origin)?;

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> String {
        // Build TOML manually for nicer formatting
        let mut output = String::new();

        output.push_str("# Kiosk Configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "state_file = \"{}\"\n",
            self.infra.paths.state_file.display()
        ));

        output.push_str("\n[bind]\n");
        output.push_str(&format!("host = \"{}\"\n", self.infra.bind.host));
        output.push_str(&format!("http_port = {}\n", self.infra.bind.http_port));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "otlp_endpoint = \"{}\"\n",
            self.infra.telemetry.otlp_endpoint
        ));
        output.push_str(&format!(
            "log_level = \"{}\"\n",
            self.infra.telemetry.log_level
        ));

        let display = &self.bootstrap.display;
        output.push_str("\n[display]\n");
        output.push_str(&format!(
            "check_interval_secs = {}\n",
            display.check_interval_secs
        ));
        output.push_str(&format!(
            "default_cadence_secs = {}\n",
            display.default_cadence_secs
        ));
        output.push_str(&format!("log_capacity = {}\n", display.log_capacity));
        output.push_str(&format!(
            "command_ttl_secs = {}\n",
            display.command_ttl_secs
        ));
        output.push_str(&format!(
            "event_channel_capacity = {}\n",
            display.event_channel_capacity
        ));

        let schedule = &self.bootstrap.schedule;
        output.push_str("\n[schedule]\n");
        match schedule.utc_offset_minutes {
            Some(offset) => output.push_str(&format!("utc_offset_minutes = {}\n", offset)),
            None => output.push_str("# utc_offset_minutes = 0  # unset: host local offset\n"),
        }
        output.push_str(&format!(
            "monitor_interval_ms = {}\n",
            schedule.monitor_interval_ms
        ));

        output
    }
}
