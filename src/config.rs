//! Configuration: flowgrid.toml (working directory) plus env-var overrides
//! in the form FLOWGRID__SECTION__KEY (double underscore separators).

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

impl AppConfig {
    /// Number of configured slots. Slot i is bound to ports[i].
    pub fn slot_count(&self) -> usize {
        self.sources.ports.len()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    /// Candidate source ports, one per slot, in slot order.
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
}

fn default_ports() -> Vec<u16> {
    vec![5001, 5002, 5003, 5004]
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            ports: default_ports(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Deadline on each socket read of the live stream body. A source that
    /// goes silent surfaces as a failed read instead of parking the worker.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_read_retry_millis")]
    pub read_retry_millis: u64,
}

fn default_queue_capacity() -> usize {
    8
}
fn default_connect_timeout_secs() -> u64 {
    2
}
fn default_read_timeout_secs() -> u64 {
    1
}
fn default_read_retry_millis() -> u64 {
    100
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            read_retry_millis: default_read_retry_millis(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeConfig {
    #[serde(default = "default_cell_width")]
    pub cell_width: u32,
    #[serde(default = "default_cell_height")]
    pub cell_height: u32,
}

fn default_cell_width() -> u32 {
    640
}
fn default_cell_height() -> u32 {
    480
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            cell_width: default_cell_width(),
            cell_height: default_cell_height(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// Pause between detection passes over the merged canvas.
    #[serde(default = "default_pass_interval_millis")]
    pub pass_interval_millis: u64,
}

fn default_confidence_threshold() -> f32 {
    0.5
}
fn default_pass_interval_millis() -> u64 {
    200
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            pass_interval_millis: default_pass_interval_millis(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_retention_minutes")]
    pub retention_minutes: i64,
    #[serde(default = "default_cleanup_interval_minutes")]
    pub cleanup_interval_minutes: i64,
    #[serde(default = "default_bucket_seconds")]
    pub bucket_seconds: i64,
}

fn default_data_dir() -> String {
    "data".to_string()
}
fn default_retention_minutes() -> i64 {
    30
}
fn default_cleanup_interval_minutes() -> i64 {
    5
}
fn default_bucket_seconds() -> i64 {
    60
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            retention_minutes: default_retention_minutes(),
            cleanup_interval_minutes: default_cleanup_interval_minutes(),
            bucket_seconds: default_bucket_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Operator-supplied address hints for the metadata tier.
    #[serde(default)]
    pub known_hosts: Vec<String>,
    /// Override the auto-detected /24 subnet prefix, e.g. "192.168.1".
    #[serde(default)]
    pub subnet: Option<String>,
    #[serde(default = "default_probe_timeout_millis")]
    pub probe_timeout_millis: u64,
    #[serde(default = "default_metadata_timeout_millis")]
    pub metadata_timeout_millis: u64,
}

fn default_probe_timeout_millis() -> u64 {
    300
}
fn default_metadata_timeout_millis() -> u64 {
    1500
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            known_hosts: Vec::new(),
            subnet: None,
            probe_timeout_millis: default_probe_timeout_millis(),
            metadata_timeout_millis: default_metadata_timeout_millis(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_control_timeout_millis")]
    pub timeout_millis: u64,
}

fn default_control_timeout_millis() -> u64 {
    1500
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            timeout_millis: default_control_timeout_millis(),
        }
    }
}

/// Load configuration from flowgrid.toml + environment variable overrides.
///
/// Search order:
///   1. ./flowgrid.toml (working directory)
///   2. Environment variables: FLOWGRID__SOURCES__PORTS, etc.
pub fn load_config() -> Result<AppConfig, config::ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("flowgrid").required(false))
        .add_source(
            config::Environment::with_prefix("FLOWGRID")
                .separator("__")
                .try_parsing(true),
        );

    let settings = builder.build()?;
    settings.try_deserialize::<AppConfig>()
}

pub fn default_config() -> AppConfig {
    AppConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_four_slots() {
        let cfg = default_config();
        assert_eq!(cfg.slot_count(), 4);
        assert_eq!(cfg.sources.ports, vec![5001, 5002, 5003, 5004]);
    }

    #[test]
    fn defaults_are_sane() {
        let cfg = default_config();
        assert_eq!(cfg.merge.cell_width, 640);
        assert_eq!(cfg.merge.cell_height, 480);
        assert!(cfg.detector.confidence_threshold > 0.0);
        assert_eq!(cfg.storage.retention_minutes, 30);
        assert_eq!(cfg.storage.cleanup_interval_minutes, 5);
        // Reads must time out inside the worker join timeout.
        assert_eq!(cfg.stream.read_timeout_secs, 1);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let toml = r#"
            [sources]
            ports = [6001, 6002]

            [storage]
            data_dir = "/tmp/flowgrid-test"
        "#;
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.sources.ports, vec![6001, 6002]);
        assert_eq!(cfg.storage.data_dir, "/tmp/flowgrid-test");
        // Untouched sections and keys keep their defaults.
        assert_eq!(cfg.storage.retention_minutes, 30);
        assert_eq!(cfg.merge.cell_width, 640);
        assert_eq!(cfg.discovery.probe_timeout_millis, 300);
    }
}
