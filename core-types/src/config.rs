use std::path::PathBuf;

use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};

/// Application configuration with the knobs the pipeline needs at boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_streams")]
    pub streams: Vec<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

fn default_streams() -> Vec<String> {
    vec!["btc".to_string(), "eth".to_string(), "sol".to_string()]
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("exports")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Seconds past the hour boundary before a cycle fires, so late
    /// in-flight records for the closing hour have landed.
    #[serde(default = "default_schedule_offset_s")]
    pub schedule_offset_s: u64,
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    #[serde(default = "default_export_timeout_ms")]
    pub export_timeout_ms: u64,
    /// Hard deadline for a whole cycle; past this the cycle is stalled
    /// and the frozen segment is left for recovery.
    #[serde(default = "default_cycle_deadline_s")]
    pub cycle_deadline_s: u64,
    #[serde(default = "default_export_attempts")]
    pub export_attempts: usize,
}

fn default_schedule_offset_s() -> u64 {
    60
}

fn default_ack_timeout_ms() -> u64 {
    5_000
}

fn default_drain_timeout_ms() -> u64 {
    30_000
}

fn default_export_timeout_ms() -> u64 {
    120_000
}

fn default_cycle_deadline_s() -> u64 {
    300
}

fn default_export_attempts() -> usize {
    3
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            schedule_offset_s: default_schedule_offset_s(),
            ack_timeout_ms: default_ack_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            export_timeout_ms: default_export_timeout_ms(),
            cycle_deadline_s: default_cycle_deadline_s(),
            export_attempts: default_export_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Transient buffer bound; exceeding it is fatal for the stream.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_append_attempts")]
    pub append_attempts: usize,
}

fn default_buffer_capacity() -> usize {
    100_000
}

fn default_append_attempts() -> usize {
    4
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            append_attempts: default_append_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Compare every exported row against the source segment instead of
    /// only the row count. Always on today; kept as a knob for large
    /// periods.
    #[serde(default = "default_full_verify")]
    pub full_verify: bool,
}

fn default_full_verify() -> bool {
    true
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            full_verify: default_full_verify(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::with_name("tickvault").required(false))
            .add_source(config::Environment::with_prefix("TICKVAULT").separator("__"))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        if config.streams.is_empty() {
            return Err(ConfigError::Message(
                "at least one stream must be configured".to_string(),
            ));
        }
        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            streams: default_streams(),
            data_dir: default_data_dir(),
            export_dir: default_export_dir(),
            rotation: RotationConfig::default(),
            writer: WriterConfig::default(),
            export: ExportConfig::default(),
        }
    }
}
