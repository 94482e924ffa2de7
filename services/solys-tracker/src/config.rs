//! Configuration types for the tracker service

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use sky_position::SourceKind;

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub calibration: CalibrationParameters,
    #[serde(default)]
    pub source: SourceConfig,
}

/// Device connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: default_password(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    15000
}

fn default_password() -> String {
    "solys".to_string()
}

fn default_timeout() -> u64 {
    10
}

/// Timing parameters shared by the tracking and calibration workers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Seconds between tracking cycles
    #[serde(default = "default_cadence")]
    pub cadence_seconds: f64,
    /// Estimated seconds for the device to reach a commanded position
    #[serde(default = "default_device_delay")]
    pub device_delay: f64,
    /// Safety buffer on top of the device delay
    #[serde(default = "default_device_delay_margin")]
    pub device_delay_margin: f64,
    /// Seconds the external instrument takes per sample
    #[serde(default = "default_instrument_delay")]
    pub instrument_delay: f64,
    /// Seconds between device-clock drift checks
    #[serde(default = "default_clock_check")]
    pub clock_check_seconds: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            cadence_seconds: default_cadence(),
            device_delay: default_device_delay(),
            device_delay_margin: default_device_delay_margin(),
            instrument_delay: default_instrument_delay(),
            clock_check_seconds: default_clock_check(),
        }
    }
}

fn default_cadence() -> f64 {
    15.0
}

fn default_device_delay() -> f64 {
    5.0
}

fn default_device_delay_margin() -> f64 {
    2.0
}

fn default_instrument_delay() -> f64 {
    2.0
}

fn default_clock_check() -> u64 {
    3600
}

/// Offset ranges and countdown budget for calibration sweeps
///
/// Ranges are inclusive of the minimum; each axis yields
/// `floor((max - min) / step) + 1` points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationParameters {
    #[serde(default = "default_azimuth_min")]
    pub azimuth_min: f64,
    #[serde(default = "default_azimuth_max")]
    pub azimuth_max: f64,
    #[serde(default = "default_azimuth_step")]
    pub azimuth_step: f64,
    #[serde(default = "default_zenith_min")]
    pub zenith_min: f64,
    #[serde(default = "default_zenith_max")]
    pub zenith_max: f64,
    #[serde(default = "default_zenith_step")]
    pub zenith_step: f64,
    /// Visible countdown seconds before each measurement
    #[serde(default = "default_countdown")]
    pub countdown: u32,
    /// Settle seconds after each measurement
    #[serde(default = "default_post_wait")]
    pub post_wait: u32,
}

impl Default for CalibrationParameters {
    fn default() -> Self {
        Self {
            azimuth_min: default_azimuth_min(),
            azimuth_max: default_azimuth_max(),
            azimuth_step: default_azimuth_step(),
            zenith_min: default_zenith_min(),
            zenith_max: default_zenith_max(),
            zenith_step: default_zenith_step(),
            countdown: default_countdown(),
            post_wait: default_post_wait(),
        }
    }
}

fn default_azimuth_min() -> f64 {
    -1.0
}

fn default_azimuth_max() -> f64 {
    1.0
}

fn default_azimuth_step() -> f64 {
    0.5
}

fn default_zenith_min() -> f64 {
    -1.0
}

fn default_zenith_max() -> f64 {
    1.0
}

fn default_zenith_step() -> f64 {
    0.5
}

fn default_countdown() -> u32 {
    5
}

fn default_post_wait() -> u32 {
    3
}

/// Position source selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_kind")]
    pub kind: SourceKind,
    /// Reference-data directory, required for table and kernel sources
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Observer altitude in meters, used by the kernel source
    #[serde(default)]
    pub altitude_m: f64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            data_dir: None,
            altitude_m: 0.0,
        }
    }
}

fn default_source_kind() -> SourceKind {
    SourceKind::Analytic
}

/// Load configuration from a JSON file
pub fn load_config(path: &PathBuf) -> std::result::Result<Config, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_config_defaults() {
        let config = DeviceConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 15000);
        assert_eq!(config.password, "solys");
        assert_eq!(config.timeout_seconds, 10);
    }

    #[test]
    fn tracking_config_defaults() {
        let config = TrackingConfig::default();
        assert_eq!(config.cadence_seconds, 15.0);
        assert_eq!(config.device_delay, 5.0);
        assert_eq!(config.device_delay_margin, 2.0);
        assert_eq!(config.instrument_delay, 2.0);
        assert_eq!(config.clock_check_seconds, 3600);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{
            "device": { "host": "10.0.0.5" },
            "tracking": { "cadence_seconds": 30.0 }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.device.host, "10.0.0.5");
        assert_eq!(config.device.port, 15000);
        assert_eq!(config.tracking.cadence_seconds, 30.0);
        assert_eq!(config.tracking.device_delay, 5.0);
        assert_eq!(config.calibration.countdown, 5);
        assert!(matches!(config.source.kind, SourceKind::Analytic));
    }

    #[test]
    fn source_kind_parses_kebab_case() {
        let json = r#"{ "source": { "kind": "kernel-safe" } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(matches!(config.source.kind, SourceKind::KernelSafe));
    }
}
