//! Analytic lunar position
//!
//! Truncated lunar theory: the principal periodic terms in longitude and
//! latitude on top of the mean elements, good to about a third of a degree.
//! A first-order parallax correction is applied so the result is
//! topocentric, which matters for the Moon (the correction approaches a
//! degree near the horizon).

use chrono::{DateTime, Utc};

use crate::astro::{equatorial_to_horizontal, julian_day};
use crate::{Horizontal, Location, PositionSource, Result};

/// Mean horizontal parallax of the Moon in degrees
const MEAN_PARALLAX_DEG: f64 = 0.9508;

/// Closed-form lunar position source, no reference data required
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyticMoon;

impl AnalyticMoon {
    /// Ecliptic longitude and latitude in degrees
    fn ecliptic(jd: f64) -> (f64, f64) {
        let t = (jd - 2_451_545.0) / 36_525.0;

        // Mean elements (degrees).
        let lp = (218.316 + 481_267.8813 * t).rem_euclid(360.0); // mean longitude
        let mp = (134.963 + 477_198.8676 * t).rem_euclid(360.0); // Moon mean anomaly
        let m = (357.529 + 35_999.0503 * t).rem_euclid(360.0); // Sun mean anomaly
        let d = (297.850 + 445_267.1115 * t).rem_euclid(360.0); // elongation
        let f = (93.272 + 483_202.0175 * t).rem_euclid(360.0); // argument of latitude

        let (mp, m, d, f_r) = (
            mp.to_radians(),
            m.to_radians(),
            d.to_radians(),
            f.to_radians(),
        );

        let lambda = lp
            + 6.289 * mp.sin()
            - 1.274 * (mp - 2.0 * d).sin()
            + 0.658 * (2.0 * d).sin()
            - 0.214 * (2.0 * mp).sin()
            - 0.186 * m.sin()
            - 0.114 * (2.0 * f_r).sin();

        let beta = 5.128 * f_r.sin() + 0.281 * (mp + f_r).sin() - 0.280 * (f_r - mp).sin()
            - 0.173 * (f_r - 2.0 * d).sin();

        (lambda.rem_euclid(360.0), beta)
    }

    fn equatorial(jd: f64) -> (f64, f64) {
        let (lambda, beta) = Self::ecliptic(jd);
        let epsilon = (23.439 - 0.000_000_36 * (jd - 2_451_545.0)).to_radians();
        let (lambda, beta) = (lambda.to_radians(), beta.to_radians());

        let ra = (lambda.sin() * epsilon.cos() - beta.tan() * epsilon.sin())
            .atan2(lambda.cos())
            .to_degrees()
            .rem_euclid(360.0);
        let dec = (beta.sin() * epsilon.cos() + beta.cos() * epsilon.sin() * lambda.sin())
            .asin()
            .to_degrees();
        (ra, dec)
    }
}

impl PositionSource for AnalyticMoon {
    fn position(&self, location: &Location, at: DateTime<Utc>) -> Result<Horizontal> {
        let jd = julian_day(at);
        let (ra, dec) = Self::equatorial(jd);
        let geocentric = equatorial_to_horizontal(ra, dec, location, jd);

        // Topocentric correction: the Moon appears lower by roughly the
        // horizontal parallax times the cosine of its altitude.
        let altitude = 90.0 - geocentric.zenith;
        let parallax = MEAN_PARALLAX_DEG * altitude.to_radians().cos();
        Ok(Horizontal {
            azimuth: geocentric.azimuth,
            zenith: geocentric.zenith + parallax,
        })
    }
}
