//! Configuration management for tracklink.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::autopilot::FlightPlan;
use crate::channel::{ChannelPath, DEFAULT_CHANNEL, DEFAULT_CLIENT_NAME};
use crate::decoder::TailPolicy;
use crate::detection::{DetectionRecord, FixedRecord};
use crate::error::{Error, Result};
use crate::reader::ReaderOptions;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default configuration directory name.
const CONFIG_DIR_NAME: &str = "tracklink";

/// Prefix of environment variables that override the file.
const ENV_PREFIX: &str = "TRACKLINK_";

/// Largest read buffer, in records.
pub const MAX_QUEUE_DEPTH: usize = 4096;

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `TRACKLINK_`, sections split on `__`)
/// 2. TOML config file at `~/.config/tracklink/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Detection channel configuration.
    pub pipe: PipeConfig,
    /// Flight sequence configuration.
    pub flight: FlightConfig,
    /// Process lifecycle configuration.
    pub runtime: RuntimeConfig,
}

/// Detection channel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /// Channel path, or a bare name under `/run/mpa/`.
    pub path: String,
    /// Identity announced to the server.
    pub client_name: String,
    /// Read buffer size, in records.
    pub queue_depth: usize,
    /// What to do with a partial record at the end of a buffer.
    pub tail_policy: TailPolicy,
    /// How long to wait for the server to create our data pipe.
    pub connect_timeout_ms: u64,
}

/// Flight sequence configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlightConfig {
    /// Position telemetry rate.
    pub position_rate_hz: f64,
    /// How long to wait for an autopilot to appear.
    pub discovery_timeout_ms: u64,
    /// Delay between health and in-air polls.
    pub poll_interval_ms: u64,
    /// Hover time between takeoff and landing.
    pub hover_secs: u64,
    /// Time spent watching telemetry after landing.
    pub settle_secs: u64,
}

/// Process lifecycle configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interval of the main idle loop.
    pub idle_interval_ms: u64,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_CHANNEL.to_string(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            queue_depth: 10,
            tail_policy: TailPolicy::Drop,
            connect_timeout_ms: 1000,
        }
    }
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            position_rate_hz: 1.0,
            discovery_timeout_ms: 3000,
            poll_interval_ms: 1000,
            hover_secs: 10,
            settle_secs: 3,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            idle_interval_ms: 5000,
        }
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}

#[cfg(target_os = "linux")]
fn validate_client_name(name: &str) -> Result<()> {
    tracklink_linux::modal_pipe::validate_client_name(name)
        .map_err(|e| invalid(format!("pipe.client_name: {e}")))
}

#[cfg(not(target_os = "linux"))]
fn validate_client_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(invalid(format!(
            "pipe.client_name: invalid client name '{name}'"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let pipe = &self.pipe;
        if pipe.path.trim().is_empty() {
            return Err(invalid("pipe.path must not be empty"));
        }
        validate_client_name(&pipe.client_name)?;
        if pipe.queue_depth == 0 || pipe.queue_depth > MAX_QUEUE_DEPTH {
            return Err(invalid(format!(
                "pipe.queue_depth must be between 1 and {MAX_QUEUE_DEPTH}, got {}",
                pipe.queue_depth
            )));
        }
        if pipe.connect_timeout_ms == 0 {
            return Err(invalid("pipe.connect_timeout_ms must be greater than 0"));
        }

        let flight = &self.flight;
        if !(flight.position_rate_hz.is_finite() && flight.position_rate_hz > 0.0) {
            return Err(invalid(format!(
                "flight.position_rate_hz must be a positive number, got {}",
                flight.position_rate_hz
            )));
        }
        if flight.poll_interval_ms == 0 {
            return Err(invalid("flight.poll_interval_ms must be greater than 0"));
        }
        if flight.discovery_timeout_ms == 0 {
            return Err(invalid("flight.discovery_timeout_ms must be greater than 0"));
        }

        if self.runtime.idle_interval_ms == 0 {
            return Err(invalid("runtime.idle_interval_ms must be greater than 0"));
        }

        Ok(())
    }

    /// The resolved detection channel.
    #[must_use]
    pub fn channel(&self) -> ChannelPath {
        ChannelPath::resolve(&self.pipe.path)
    }

    /// Read buffer size in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] if `pipe.queue_depth` records do
    /// not fit in memory.
    pub fn max_queued_bytes(&self) -> Result<usize> {
        self.pipe
            .queue_depth
            .checked_mul(DetectionRecord::SIZE)
            .ok_or_else(|| {
                invalid(format!(
                    "pipe.queue_depth of {} records overflows the read buffer",
                    self.pipe.queue_depth
                ))
            })
    }

    /// Options for [`crate::StreamReader::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] if the read buffer size overflows.
    pub fn reader_options(&self) -> Result<ReaderOptions> {
        Ok(ReaderOptions {
            channel: self.channel(),
            client_name: self.pipe.client_name.clone(),
            max_queued_bytes: self.max_queued_bytes()?,
            tail_policy: self.pipe.tail_policy,
        })
    }

    /// Get the pipe connect timeout as a Duration.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.pipe.connect_timeout_ms)
    }

    /// Get the autopilot discovery timeout as a Duration.
    #[must_use]
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.flight.discovery_timeout_ms)
    }

    /// Get the idle loop interval as a Duration.
    #[must_use]
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.runtime.idle_interval_ms)
    }

    /// The flight sequence timing.
    #[must_use]
    pub fn flight_plan(&self) -> FlightPlan {
        FlightPlan {
            position_rate_hz: self.flight.position_rate_hz,
            poll_interval: Duration::from_millis(self.flight.poll_interval_ms),
            hover: Duration::from_secs(self.flight.hover_secs),
            settle: Duration::from_secs(self.flight.settle_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write_temp_config(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tracklink-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.pipe.path, "/run/mpa/tflite_data");
        assert_eq!(config.pipe.client_name, "voxl-tracking");
        assert_eq!(config.pipe.queue_depth, 10);
        assert_eq!(config.pipe.tail_policy, TailPolicy::Drop);
        assert_eq!(config.runtime.idle_interval_ms, 5000);
    }

    #[test]
    fn test_default_flight_config() {
        let flight = FlightConfig::default();

        assert!((flight.position_rate_hz - 1.0).abs() < f64::EPSILON);
        assert_eq!(flight.discovery_timeout_ms, 3000);
        assert_eq!(flight.hover_secs, 10);
        assert_eq!(flight.settle_secs, 3);
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_queue_depth() {
        let mut config = Config::default();
        config.pipe.queue_depth = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("queue_depth"));
    }

    #[test]
    fn test_validate_client_name() {
        let mut config = Config::default();
        config.pipe.client_name = "a/b".to_string();
        assert!(config.validate().is_err());

        config.pipe.client_name = String::new();
        assert!(config.validate().is_err());

        config.pipe.client_name = "tracker-2".to_string();
        assert!(config.validate().is_ok());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_validate_client_name_matches_pipe_rules() {
        use tracklink_linux::modal_pipe::MAX_CLIENT_NAME_LEN;

        let mut config = Config::default();
        config.pipe.client_name = "x".repeat(MAX_CLIENT_NAME_LEN + 1);
        assert!(config.validate().is_err());

        config.pipe.client_name = "x".repeat(MAX_CLIENT_NAME_LEN);
        assert!(config.validate().is_ok());

        for reserved in ["request", "info", "control", ".", ".."] {
            config.pipe.client_name = reserved.to_string();
            let err = config.validate().unwrap_err().to_string();
            assert!(err.contains("pipe.client_name"), "{reserved}: {err}");
        }
    }

    #[test]
    fn test_validate_empty_path() {
        let mut config = Config::default();
        config.pipe.path = "  ".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("pipe.path"));
    }

    #[test]
    fn test_validate_position_rate() {
        let mut config = Config::default();
        config.flight.position_rate_hz = 0.0;
        assert!(config.validate().is_err());

        config.flight.position_rate_hz = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_intervals() {
        let mut config = Config::default();
        config.flight.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.runtime.idle_interval_ms = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("idle_interval_ms"));
    }

    #[test]
    fn test_validate_queue_depth_limit() {
        let mut config = Config::default();
        config.pipe.queue_depth = MAX_QUEUE_DEPTH;
        assert!(config.validate().is_ok());

        config.pipe.queue_depth = MAX_QUEUE_DEPTH + 1;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("queue_depth"));
    }

    #[test]
    fn test_validate_huge_queue_depth() {
        let mut config = Config::default();
        config.pipe.queue_depth = usize::MAX / DetectionRecord::SIZE + 1;

        assert!(config.validate().is_err());
        assert!(config.max_queued_bytes().is_err());
        assert!(config.reader_options().is_err());
    }

    #[test]
    fn test_max_queued_bytes() {
        let config = Config::default();
        assert_eq!(config.max_queued_bytes().unwrap(), 1720);
    }

    #[test]
    fn test_reader_options() {
        let mut config = Config::default();
        config.pipe.path = "hires_det".to_string();
        config.pipe.tail_policy = TailPolicy::Carry;

        let options = config.reader_options().unwrap();
        assert_eq!(options.channel.as_path(), Path::new("/run/mpa/hires_det/"));
        assert_eq!(options.client_name, "voxl-tracking");
        assert_eq!(options.max_queued_bytes, 1720);
        assert_eq!(options.tail_policy, TailPolicy::Carry);
    }

    #[test]
    fn test_durations() {
        let config = Config::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(1));
        assert_eq!(config.discovery_timeout(), Duration::from_secs(3));
        assert_eq!(config.idle_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_flight_plan_matches_default() {
        assert_eq!(Config::default().flight_plan(), FlightPlan::default());
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("tracklink"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let config = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml"))).unwrap();
        assert_eq!(config.pipe, PipeConfig::default());
        assert_eq!(config.flight, FlightConfig::default());
    }

    #[test]
    fn test_load_toml_file() {
        let path = write_temp_config(
            "valid.toml",
            r#"
[pipe]
path = "tflite_data_2"
queue_depth = 4
tail_policy = "carry"

[flight]
hover_secs = 5
"#,
        );

        let config = Config::load_from(Some(path)).unwrap();
        assert_eq!(config.pipe.path, "tflite_data_2");
        assert_eq!(config.pipe.queue_depth, 4);
        assert_eq!(config.pipe.tail_policy, TailPolicy::Carry);
        assert_eq!(config.pipe.client_name, "voxl-tracking");
        assert_eq!(config.flight.hover_secs, 5);
        assert_eq!(config.flight.settle_secs, 3);
    }

    #[test]
    fn test_load_invalid_file_fails_validation() {
        let path = write_temp_config("invalid.toml", "[pipe]\nqueue_depth = 0\n");

        let err = Config::load_from(Some(path)).unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
    }

    #[test]
    fn test_load_malformed_file() {
        let path = write_temp_config("malformed.toml", "[pipe]\ntail_policy = \"sometimes\"\n");

        let err = Config::load_from(Some(path)).unwrap_err();
        assert!(matches!(err, Error::ConfigLoad(_)));
    }

    #[test]
    fn test_pipe_config_serialize() {
        let json = serde_json::to_string(&PipeConfig::default()).unwrap();
        assert!(json.contains("\"tail_policy\":\"drop\""));
    }

    #[test]
    fn test_pipe_config_deserialize() {
        let json = r#"{"queue_depth": 32, "client_name": "tracker-2"}"#;
        let pipe: PipeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(pipe.queue_depth, 32);
        assert_eq!(pipe.client_name, "tracker-2");
        assert_eq!(pipe.path, DEFAULT_CHANNEL);
    }
}
