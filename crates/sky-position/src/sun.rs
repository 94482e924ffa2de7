//! Analytic solar position
//!
//! The approximate solar coordinates algorithm (USNO low-precision form):
//! mean anomaly and mean longitude give the ecliptic longitude, which is
//! rotated into equatorial and then horizontal coordinates. Accurate to
//! roughly an arcminute over the current century, which is well inside the
//! device's pointing tolerance.

use chrono::{DateTime, Utc};

use crate::astro::{equatorial_to_horizontal, julian_day};
use crate::{Horizontal, Location, PositionSource, Result};

/// Closed-form solar position source, no reference data required
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyticSun;

impl AnalyticSun {
    fn equatorial(jd: f64) -> (f64, f64) {
        let d = jd - 2_451_545.0;

        // Mean anomaly and mean ecliptic longitude.
        let g = (357.529 + 0.985_600_28 * d).rem_euclid(360.0).to_radians();
        let q = (280.459 + 0.985_647_36 * d).rem_euclid(360.0);

        // Equation of center gives the apparent ecliptic longitude.
        let lambda = (q + 1.915 * g.sin() + 0.020 * (2.0 * g).sin())
            .rem_euclid(360.0)
            .to_radians();

        let epsilon = (23.439 - 0.000_000_36 * d).to_radians();

        let ra = (epsilon.cos() * lambda.sin())
            .atan2(lambda.cos())
            .to_degrees()
            .rem_euclid(360.0);
        let dec = (epsilon.sin() * lambda.sin()).asin().to_degrees();
        (ra, dec)
    }
}

impl PositionSource for AnalyticSun {
    fn position(&self, location: &Location, at: DateTime<Utc>) -> Result<Horizontal> {
        let jd = julian_day(at);
        let (ra, dec) = Self::equatorial(jd);
        Ok(equatorial_to_horizontal(ra, dec, location, jd))
    }
}
