//! Client library and automation for a two-axis sun/moon tracker
//!
//! The device speaks a line-oriented ASCII protocol over TCP. This crate
//! provides the command session ([`SolysClient`]) with transparent
//! re-authentication and reconnection, and two automation workers built on
//! it: continuous body tracking ([`BodyTracker`]) and calibration offset
//! sweeps ([`CalibrationSweep`]).

pub mod calibration;
pub mod config;
pub mod control;
pub mod error;
pub mod motion;
pub mod response;
pub mod session;
pub mod tracker;
pub mod transport;

pub use calibration::{generate_offsets, CalibrationSweep, SweepPattern};
pub use config::{load_config, CalibrationParameters, Config, DeviceConfig, TrackingConfig};
pub use control::SharedFlag;
pub use error::{Result, SolysError};
pub use response::{classify, describe_error, ParsedResponse, ResponseKind};
pub use session::{SolysClient, SolysFunction, SunIntensity};
pub use tracker::BodyTracker;

use async_trait::async_trait;

/// Callback fired when the device is on target and a measurement should run
///
/// Installed on either worker; the worker awaits it, so a slow instrument
/// naturally stretches the cycle rather than racing it.
#[async_trait]
pub trait MeasurementHook: Send + Sync {
    async fn on_target(&self);
}
