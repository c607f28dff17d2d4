//! Bootstrap configuration - seeds runtime state, then runtime owns it.

use serde::{Deserialize, Serialize};

/// Display-client timing and bus sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// How often a polling display re-checks the resolved selection.
    #[serde(default = "DisplayConfig::default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Cadence given to newly created themes (and the protected ones on first start).
    #[serde(default = "DisplayConfig::default_cadence_secs")]
    pub default_cadence_secs: u32,

    /// Log entries retained for replay on (re)connect.
    #[serde(default = "DisplayConfig::default_log_capacity")]
    pub log_capacity: usize,

    /// Lifetime of the legacy poll command slot.
    #[serde(default = "DisplayConfig::default_command_ttl_secs")]
    pub command_ttl_secs: u64,

    /// Per-subscriber queue depth on the push channel.
    #[serde(default = "DisplayConfig::default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl DisplayConfig {
    fn default_check_interval_secs() -> u64 {
        2
    }

    fn default_cadence_secs() -> u32 {
        3600
    }

    fn default_log_capacity() -> usize {
        500
    }

    fn default_command_ttl_secs() -> u64 {
        5
    }

    fn default_event_channel_capacity() -> usize {
        256
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: Self::default_check_interval_secs(),
            default_cadence_secs: Self::default_cadence_secs(),
            log_capacity: Self::default_log_capacity(),
            command_ttl_secs: Self::default_command_ttl_secs(),
            event_channel_capacity: Self::default_event_channel_capacity(),
        }
    }
}

/// Time-of-day schedule settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Offset from UTC used to derive hour-of-day. Unset means the host's
    /// local offset at startup.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,

    /// How often the boundary monitor samples the clock.
    #[serde(default = "ScheduleConfig::default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
}

impl ScheduleConfig {
    fn default_monitor_interval_ms() -> u64 {
        1000
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: None,
            monitor_interval_ms: Self::default_monitor_interval_ms(),
        }
    }
}

/// Bootstrap configuration - seeds runtime, then runtime owns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_defaults() {
        let display = DisplayConfig::default();
        assert_eq!(display.check_interval_secs, 2);
        assert_eq!(display.default_cadence_secs, 3600);
        assert_eq!(display.command_ttl_secs, 5);
        assert_eq!(display.log_capacity, 500);
    }

    #[test]
    fn test_schedule_defaults() {
        let schedule = ScheduleConfig::default();
        assert_eq!(schedule.utc_offset_minutes, None);
        assert_eq!(schedule.monitor_interval_ms, 1000);
    }
}
