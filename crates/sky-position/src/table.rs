//! Pre-computed ephemeris table back-end
//!
//! Reads `<data_dir>/<body>.csv` with one `unix_seconds,azimuth,zenith` row
//! per line (ascending timestamps, `#` comments allowed) and answers queries
//! by linear interpolation between the bracketing rows. Azimuth is
//! interpolated along the shorter arc so a 359 -> 1 transition does not
//! sweep through the whole circle.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::{Body, Horizontal, Location, PositionError, PositionSource, Result};

#[derive(Debug, Clone, Copy)]
struct Row {
    unix: f64,
    azimuth: f64,
    zenith: f64,
}

/// Interpolating table source loaded once at construction
#[derive(Debug)]
pub struct EphemerisTable {
    rows: Vec<Row>,
    path: String,
}

impl EphemerisTable {
    /// Load the table for `body` from `data_dir`
    pub fn load(data_dir: &Path, body: Body) -> Result<Self> {
        let path = data_dir.join(format!("{body}.csv"));
        if !path.is_file() {
            return Err(PositionError::MissingData(path.display().to_string()));
        }
        let text = std::fs::read_to_string(&path)?;
        let path = path.display().to_string();

        let mut rows = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split(',').map(str::trim);
            let row = (|| {
                Some(Row {
                    unix: fields.next()?.parse().ok()?,
                    azimuth: fields.next()?.parse().ok()?,
                    zenith: fields.next()?.parse().ok()?,
                })
            })()
            .ok_or_else(|| PositionError::Malformed {
                path: path.clone(),
                detail: format!("line {}: expected 'unix,azimuth,zenith'", lineno + 1),
            })?;
            rows.push(row);
        }

        if rows.len() < 2 {
            return Err(PositionError::Malformed {
                path,
                detail: "table needs at least two rows".to_string(),
            });
        }
        if rows.windows(2).any(|w| w[1].unix <= w[0].unix) {
            return Err(PositionError::Malformed {
                path,
                detail: "timestamps must be strictly ascending".to_string(),
            });
        }

        Ok(Self { rows, path })
    }

    /// Time span covered by the table, as unix seconds
    pub fn coverage(&self) -> (f64, f64) {
        (self.rows[0].unix, self.rows[self.rows.len() - 1].unix)
    }

    /// Path the table was loaded from
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl PositionSource for EphemerisTable {
    fn position(&self, _location: &Location, at: DateTime<Utc>) -> Result<Horizontal> {
        let t = at.timestamp_millis() as f64 / 1000.0;
        let (first, last) = self.coverage();
        if t < first || t > last {
            return Err(PositionError::OutOfRange(at));
        }

        let idx = self.rows.partition_point(|r| r.unix <= t);
        // t is covered, so idx is in 1..len (t == first gives idx == 1).
        let (a, b) = (&self.rows[idx - 1], &self.rows[idx.min(self.rows.len() - 1)]);
        if (b.unix - a.unix).abs() < f64::EPSILON {
            return Ok(Horizontal {
                azimuth: a.azimuth,
                zenith: a.zenith,
            });
        }

        let frac = (t - a.unix) / (b.unix - a.unix);
        let mut daz = b.azimuth - a.azimuth;
        if daz > 180.0 {
            daz -= 360.0;
        } else if daz < -180.0 {
            daz += 360.0;
        }
        Ok(Horizontal {
            azimuth: (a.azimuth + frac * daz).rem_euclid(360.0),
            zenith: a.zenith + frac * (b.zenith - a.zenith),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn write_table(dir: &Path, body: Body, rows: &[(i64, f64, f64)]) {
        let mut f = std::fs::File::create(dir.join(format!("{body}.csv"))).unwrap();
        writeln!(f, "# unix,azimuth,zenith").unwrap();
        for (t, az, ze) in rows {
            writeln!(f, "{t},{az},{ze}").unwrap();
        }
    }

    fn at(unix: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(unix, 0).unwrap()
    }

    fn loc() -> Location {
        Location {
            latitude: 0.0,
            longitude: 0.0,
            altitude_m: 0.0,
        }
    }

    #[test]
    fn interpolates_between_rows() {
        let dir = tempfile::tempdir().unwrap();
        write_table(dir.path(), Body::Sun, &[(1000, 100.0, 40.0), (2000, 110.0, 50.0)]);
        let table = EphemerisTable::load(dir.path(), Body::Sun).unwrap();

        let mid = table.position(&loc(), at(1500)).unwrap();
        assert!((mid.azimuth - 105.0).abs() < 1e-9);
        assert!((mid.zenith - 45.0).abs() < 1e-9);

        let start = table.position(&loc(), at(1000)).unwrap();
        assert!((start.azimuth - 100.0).abs() < 1e-9);
    }

    #[test]
    fn azimuth_wraps_along_shorter_arc() {
        let dir = tempfile::tempdir().unwrap();
        write_table(dir.path(), Body::Moon, &[(0, 358.0, 30.0), (100, 2.0, 30.0)]);
        let table = EphemerisTable::load(dir.path(), Body::Moon).unwrap();
        let mid = table.position(&loc(), at(50)).unwrap();
        assert!((mid.azimuth - 0.0).abs() < 1e-9, "azimuth = {}", mid.azimuth);
    }

    #[test]
    fn rejects_out_of_range_queries() {
        let dir = tempfile::tempdir().unwrap();
        write_table(dir.path(), Body::Sun, &[(1000, 10.0, 10.0), (2000, 20.0, 20.0)]);
        let table = EphemerisTable::load(dir.path(), Body::Sun).unwrap();
        assert!(matches!(
            table.position(&loc(), at(999)),
            Err(PositionError::OutOfRange(_))
        ));
        assert!(matches!(
            table.position(&loc(), at(2001)),
            Err(PositionError::OutOfRange(_))
        ));
    }

    #[test]
    fn rejects_unsorted_tables() {
        let dir = tempfile::tempdir().unwrap();
        write_table(dir.path(), Body::Sun, &[(2000, 10.0, 10.0), (1000, 20.0, 20.0)]);
        assert!(matches!(
            EphemerisTable::load(dir.path(), Body::Sun),
            Err(PositionError::Malformed { .. })
        ));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            EphemerisTable::load(dir.path(), Body::Sun),
            Err(PositionError::MissingData(_))
        ));
    }
}
