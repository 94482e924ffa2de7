//! Celestial position back-ends for the solys-tracker service
//!
//! Everything the tracker needs from astronomy is a single question: "where
//! is the body, as seen from here, at this instant?" This crate answers it
//! through the [`PositionSource`] trait and a set of interchangeable
//! back-ends:
//!
//! - [`AnalyticSun`] / [`AnalyticMoon`]: closed-form low-precision theory,
//!   no external data needed.
//! - [`EphemerisTable`]: linear interpolation over a pre-computed CSV table.
//! - [`KernelEphemeris`]: higher-order interpolation over fixed-step segment
//!   files produced from a precision ephemeris.
//! - [`WithFallback`]: composes a primary and a backup source, answering
//!   from the backup (and logging the substitution) when the primary fails.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod astro;
mod kernel;
mod moon;
mod sun;
mod table;

pub use kernel::KernelEphemeris;
pub use moon::AnalyticMoon;
pub use sun::AnalyticSun;
pub use table::EphemerisTable;

/// Errors from position back-ends
#[derive(Debug, thiserror::Error)]
pub enum PositionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed ephemeris data in {path}: {detail}")]
    Malformed { path: String, detail: String },

    #[error("No ephemeris data covering {0}")]
    OutOfRange(DateTime<Utc>),

    #[error("Reference data not found: {0}")]
    MissingData(String),

    #[error("Source '{kind}' requires a reference data directory")]
    DataDirRequired { kind: SourceKind },
}

/// Result type alias for position calculations
pub type Result<T> = std::result::Result<T, PositionError>;

/// Celestial body the device can track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Body {
    Sun,
    Moon,
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Sun => write!(f, "sun"),
            Body::Moon => write!(f, "moon"),
        }
    }
}

impl FromStr for Body {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sun" => Ok(Body::Sun),
            "moon" => Ok(Body::Moon),
            other => Err(format!("unknown body '{other}' (expected sun or moon)")),
        }
    }
}

/// Observer location on the Earth's surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    /// Latitude in decimal degrees, north positive
    pub latitude: f64,
    /// Longitude in decimal degrees, east positive
    pub longitude: f64,
    /// Height above sea level in meters
    pub altitude_m: f64,
}

/// Pointing direction in the device's frame
///
/// Zenith is 90 degrees minus altitude; values above 90 mean the body is
/// below the horizon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Horizontal {
    /// Azimuth in degrees from north, eastward, in `[0, 360)`
    pub azimuth: f64,
    /// Zenith angle in degrees
    pub zenith: f64,
}

/// A back-end that maps (location, time) to a pointing direction
///
/// Implementations are stateless with respect to the call: the same inputs
/// always produce the same answer, and calls never mutate the source.
pub trait PositionSource: std::fmt::Debug + Send + Sync {
    /// Compute the body's azimuth and zenith for the given observer and time
    fn position(&self, location: &Location, at: DateTime<Utc>) -> Result<Horizontal>;
}

/// Which back-end family to use for an automation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Closed-form analytic theory, no reference data needed
    Analytic,
    /// Linear interpolation over a pre-computed CSV table
    Table,
    /// Precision ephemeris segments with Lagrange interpolation
    Kernel,
    /// Kernel source with a same-call analytic fallback on failure
    KernelSafe,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceKind::Analytic => "analytic",
            SourceKind::Table => "table",
            SourceKind::Kernel => "kernel",
            SourceKind::KernelSafe => "kernel-safe",
        };
        write!(f, "{s}")
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "analytic" => Ok(SourceKind::Analytic),
            "table" => Ok(SourceKind::Table),
            "kernel" => Ok(SourceKind::Kernel),
            "kernel-safe" => Ok(SourceKind::KernelSafe),
            other => Err(format!(
                "unknown position source '{other}' (expected analytic, table, kernel or kernel-safe)"
            )),
        }
    }
}

/// Wraps a primary source with a backup consulted on failure
///
/// The substitution happens within the same call and is logged; the error
/// from the primary is only surfaced if the backup fails too.
#[derive(Debug)]
pub struct WithFallback {
    primary: Box<dyn PositionSource>,
    backup: Box<dyn PositionSource>,
    label: &'static str,
}

impl WithFallback {
    pub fn new(
        primary: Box<dyn PositionSource>,
        backup: Box<dyn PositionSource>,
        label: &'static str,
    ) -> Self {
        Self {
            primary,
            backup,
            label,
        }
    }
}

impl PositionSource for WithFallback {
    fn position(&self, location: &Location, at: DateTime<Utc>) -> Result<Horizontal> {
        match self.primary.position(location, at) {
            Ok(pos) => Ok(pos),
            Err(e) => {
                tracing::warn!("{} source failed ({}), using fallback", self.label, e);
                self.backup.position(location, at)
            }
        }
    }
}

fn analytic_for(body: Body) -> Box<dyn PositionSource> {
    match body {
        Body::Sun => Box::new(AnalyticSun),
        Body::Moon => Box::new(AnalyticMoon),
    }
}

/// Build a position source for one automation run
///
/// `data_dir` is required for the table and kernel families; `altitude_m` is
/// checked against the kernel segment headers.
pub fn make_source(
    kind: SourceKind,
    body: Body,
    data_dir: Option<&Path>,
    altitude_m: f64,
) -> Result<Arc<dyn PositionSource>> {
    let dir = || data_dir.ok_or(PositionError::DataDirRequired { kind });
    let source: Arc<dyn PositionSource> = match kind {
        SourceKind::Analytic => Arc::from(analytic_for(body)),
        SourceKind::Table => Arc::new(EphemerisTable::load(dir()?, body)?),
        SourceKind::Kernel => Arc::new(KernelEphemeris::new(dir()?, body, altitude_m)),
        SourceKind::KernelSafe => Arc::new(WithFallback::new(
            Box::new(KernelEphemeris::new(dir()?, body, altitude_m)),
            analytic_for(body),
            "kernel",
        )),
    };
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug)]
    struct AlwaysFails;

    impl PositionSource for AlwaysFails {
        fn position(&self, _location: &Location, at: DateTime<Utc>) -> Result<Horizontal> {
            Err(PositionError::OutOfRange(at))
        }
    }

    #[derive(Debug)]
    struct Fixed(Horizontal);

    impl PositionSource for Fixed {
        fn position(&self, _location: &Location, _at: DateTime<Utc>) -> Result<Horizontal> {
            Ok(self.0)
        }
    }

    fn somewhere() -> Location {
        Location {
            latitude: 41.66,
            longitude: -4.71,
            altitude_m: 705.0,
        }
    }

    #[test]
    fn fallback_uses_backup_when_primary_fails() {
        let expected = Horizontal {
            azimuth: 123.0,
            zenith: 45.0,
        };
        let source = WithFallback::new(Box::new(AlwaysFails), Box::new(Fixed(expected)), "test");
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let got = source.position(&somewhere(), at).unwrap();
        assert_eq!(got, expected);
    }

    #[test]
    fn fallback_prefers_primary() {
        let primary = Horizontal {
            azimuth: 10.0,
            zenith: 20.0,
        };
        let backup = Horizontal {
            azimuth: 30.0,
            zenith: 40.0,
        };
        let source = WithFallback::new(Box::new(Fixed(primary)), Box::new(Fixed(backup)), "test");
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(source.position(&somewhere(), at).unwrap(), primary);
    }

    #[test]
    fn source_kind_round_trips_through_str() {
        for kind in [
            SourceKind::Analytic,
            SourceKind::Table,
            SourceKind::Kernel,
            SourceKind::KernelSafe,
        ] {
            assert_eq!(kind.to_string().parse::<SourceKind>().unwrap(), kind);
        }
        assert!("spice".parse::<SourceKind>().is_err());
    }

    #[test]
    fn make_source_requires_data_dir_for_table() {
        let err = make_source(SourceKind::Table, Body::Sun, None, 0.0).unwrap_err();
        assert!(matches!(err, PositionError::DataDirRequired { .. }));
    }

    #[test]
    fn analytic_source_available_for_both_bodies() {
        let at = Utc.with_ymd_and_hms(2024, 6, 21, 12, 0, 0).unwrap();
        for body in [Body::Sun, Body::Moon] {
            let source = make_source(SourceKind::Analytic, body, None, 0.0).unwrap();
            let pos = source.position(&somewhere(), at).unwrap();
            assert!((0.0..360.0).contains(&pos.azimuth));
            assert!((0.0..=180.0).contains(&pos.zenith));
        }
    }
}
