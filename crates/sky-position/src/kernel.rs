//! Precision ephemeris segment back-end
//!
//! Reads yearly segment files exported from a precision ephemeris. Each
//! `<data_dir>/<body>-<year>.eph` holds fixed-step horizontal coordinates:
//! a header line `# <start_unix> <step_seconds> <altitude_m>` followed by
//! one `azimuth,zenith` sample per line. Queries locate the fractional
//! sample index for the requested instant and apply 4-point Lagrange
//! interpolation, which keeps sub-arcsecond fidelity at step sizes well
//! beyond what linear interpolation tolerates.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use tracing::warn;

use crate::{Body, Horizontal, Location, PositionError, PositionSource, Result};

/// How far the observer may sit from the segment's reference altitude
/// before the mismatch is worth flagging.
const ALTITUDE_TOLERANCE_M: f64 = 0.5;

struct Segment {
    start_unix: f64,
    step_seconds: f64,
    altitude_m: f64,
    samples: Vec<(f64, f64)>,
}

/// Lagrange-interpolating source over yearly segment files
///
/// Construction only records the directory; segments are read per query so
/// a long-running tracker picks up files dropped in while it runs.
#[derive(Debug)]
pub struct KernelEphemeris {
    data_dir: PathBuf,
    body: Body,
    altitude_m: f64,
}

impl KernelEphemeris {
    pub fn new(data_dir: &Path, body: Body, altitude_m: f64) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            body,
            altitude_m,
        }
    }

    fn load_segment(&self, year: i32) -> Result<Segment> {
        let path = self.data_dir.join(format!("{}-{year}.eph", self.body));
        if !path.is_file() {
            return Err(PositionError::MissingData(path.display().to_string()));
        }
        let text = std::fs::read_to_string(&path)?;
        let path = path.display().to_string();
        let malformed = |detail: String| PositionError::Malformed {
            path: path.clone(),
            detail,
        };

        let mut lines = text.lines();
        let header = lines
            .next()
            .ok_or_else(|| malformed("empty file".to_string()))?;
        let header = header
            .strip_prefix('#')
            .ok_or_else(|| malformed("header must start with '#'".to_string()))?;
        let fields: Vec<f64> = header
            .split_whitespace()
            .map(str::parse)
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| malformed(format!("header: {e}")))?;
        let [start_unix, step_seconds, altitude_m] = fields[..] else {
            return Err(malformed(
                "header must be '# <start_unix> <step_seconds> <altitude_m>'".to_string(),
            ));
        };
        if step_seconds <= 0.0 {
            return Err(malformed(format!("non-positive step {step_seconds}")));
        }

        let mut samples = Vec::new();
        for (lineno, line) in lines.enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((az, ze)) = line.split_once(',') else {
                return Err(malformed(format!(
                    "line {}: expected 'azimuth,zenith'",
                    lineno + 2
                )));
            };
            let pair = (az.trim().parse(), ze.trim().parse());
            match pair {
                (Ok(az), Ok(ze)) => samples.push((az, ze)),
                _ => {
                    return Err(malformed(format!("line {}: unparseable sample", lineno + 2)));
                }
            }
        }
        if samples.len() < 4 {
            return Err(malformed(format!(
                "need at least 4 samples, found {}",
                samples.len()
            )));
        }

        Ok(Segment {
            start_unix,
            step_seconds,
            altitude_m,
            samples,
        })
    }
}

impl PositionSource for KernelEphemeris {
    fn position(&self, _location: &Location, at: DateTime<Utc>) -> Result<Horizontal> {
        let segment = self.load_segment(at.year())?;
        if (segment.altitude_m - self.altitude_m).abs() > ALTITUDE_TOLERANCE_M {
            warn!(
                body = %self.body,
                segment_altitude_m = segment.altitude_m,
                observer_altitude_m = self.altitude_m,
                "segment reference altitude differs from observer altitude"
            );
        }

        let t = at.timestamp_millis() as f64 / 1000.0;
        let x = (t - segment.start_unix) / segment.step_seconds;
        let last = (segment.samples.len() - 1) as f64;
        if x < 0.0 || x > last {
            return Err(PositionError::OutOfRange(at));
        }

        // Center a 4-sample window on the query, clamped at segment edges.
        let base = (x.floor() as usize)
            .saturating_sub(1)
            .min(segment.samples.len() - 4);
        let azimuth = lagrange4(&segment.samples, base, x, |s| s.0);
        let zenith = lagrange4(&segment.samples, base, x, |s| s.1);
        Ok(Horizontal {
            azimuth: azimuth.rem_euclid(360.0),
            zenith,
        })
    }
}

/// 4-point Lagrange interpolation of `pick(samples[base..base + 4])` at
/// fractional index `x`. Azimuth samples are unwrapped against the first
/// window sample so a wraparound inside the window does not ring.
fn lagrange4(samples: &[(f64, f64)], base: usize, x: f64, pick: fn(&(f64, f64)) -> f64) -> f64 {
    let reference = pick(&samples[base]);
    let mut unwrapped = [0.0f64; 4];
    for (k, value) in unwrapped.iter_mut().enumerate() {
        let mut v = pick(&samples[base + k]);
        while v - reference > 180.0 {
            v -= 360.0;
        }
        while v - reference < -180.0 {
            v += 360.0;
        }
        *value = v;
    }

    let mut acc = 0.0;
    for (j, &yj) in unwrapped.iter().enumerate() {
        let xj = (base + j) as f64;
        let mut weight = 1.0;
        for k in 0..4 {
            if k == j {
                continue;
            }
            let xk = (base + k) as f64;
            weight *= (x - xk) / (xj - xk);
        }
        acc += weight * yj;
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn loc() -> Location {
        Location {
            latitude: 0.0,
            longitude: 0.0,
            altitude_m: 0.0,
        }
    }

    fn write_segment(dir: &Path, body: Body, year: i32, header: &str, samples: &[(f64, f64)]) {
        let mut f = std::fs::File::create(dir.join(format!("{body}-{year}.eph"))).unwrap();
        writeln!(f, "{header}").unwrap();
        for (az, ze) in samples {
            writeln!(f, "{az},{ze}").unwrap();
        }
    }

    #[test]
    fn reproduces_linear_data_exactly() {
        // Lagrange through collinear points is the line itself.
        let dir = tempfile::tempdir().unwrap();
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let samples: Vec<_> = (0..6).map(|i| (100.0 + i as f64, 50.0 - i as f64)).collect();
        write_segment(
            dir.path(),
            Body::Sun,
            2024,
            &format!("# {} 60 0", start.timestamp()),
            &samples,
        );

        let kernel = KernelEphemeris::new(dir.path(), Body::Sun, 0.0);
        let at = start + chrono::Duration::seconds(90);
        let pos = kernel.position(&loc(), at).unwrap();
        assert!((pos.azimuth - 101.5).abs() < 1e-9, "azimuth = {}", pos.azimuth);
        assert!((pos.zenith - 48.5).abs() < 1e-9, "zenith = {}", pos.zenith);
    }

    #[test]
    fn handles_azimuth_wraparound_in_window() {
        let dir = tempfile::tempdir().unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let samples = [(357.0, 30.0), (359.0, 30.0), (1.0, 30.0), (3.0, 30.0)];
        write_segment(
            dir.path(),
            Body::Moon,
            2024,
            &format!("# {} 60 0", start.timestamp()),
            &samples,
        );

        let kernel = KernelEphemeris::new(dir.path(), Body::Moon, 0.0);
        let at = start + chrono::Duration::seconds(90);
        let pos = kernel.position(&loc(), at).unwrap();
        assert!((pos.azimuth - 0.0).abs() < 1e-9, "azimuth = {}", pos.azimuth);
    }

    #[test]
    fn rejects_queries_outside_segment() {
        let dir = tempfile::tempdir().unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let samples = [(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (3.0, 0.0)];
        write_segment(
            dir.path(),
            Body::Sun,
            2024,
            &format!("# {} 60 0", start.timestamp()),
            &samples,
        );

        let kernel = KernelEphemeris::new(dir.path(), Body::Sun, 0.0);
        let late = start + chrono::Duration::seconds(181);
        assert!(matches!(
            kernel.position(&loc(), late),
            Err(PositionError::OutOfRange(_))
        ));
    }

    #[test]
    fn missing_year_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let kernel = KernelEphemeris::new(dir.path(), Body::Sun, 0.0);
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            kernel.position(&loc(), at),
            Err(PositionError::MissingData(_))
        ));
    }

    #[test]
    fn malformed_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(dir.path(), Body::Sun, 2024, "# not numbers", &[(0.0, 0.0); 4]);
        let kernel = KernelEphemeris::new(dir.path(), Body::Sun, 0.0);
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            kernel.position(&loc(), at),
            Err(PositionError::Malformed { .. })
        ));
    }
}
