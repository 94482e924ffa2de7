//! Shared time-scale and coordinate-frame arithmetic
//!
//! Degrees in, degrees out everywhere; radians never leave a function.

use chrono::{DateTime, Utc};

use crate::{Horizontal, Location};

/// Julian day number for a UTC instant (Unix epoch = JD 2440587.5)
pub(crate) fn julian_day(at: DateTime<Utc>) -> f64 {
    2_440_587.5 + at.timestamp_millis() as f64 / 86_400_000.0
}

/// Greenwich mean sidereal time in degrees, `[0, 360)`
pub(crate) fn gmst_degrees(jd: f64) -> f64 {
    let d = jd - 2_451_545.0;
    let t = d / 36_525.0;
    let gmst =
        280.460_618_37 + 360.985_647_366_29 * d + 0.000_387_933 * t * t - t * t * t / 38_710_000.0;
    gmst.rem_euclid(360.0)
}

/// Convert equatorial coordinates (right ascension / declination, degrees)
/// to the observer's horizontal frame.
pub(crate) fn equatorial_to_horizontal(
    ra_deg: f64,
    dec_deg: f64,
    location: &Location,
    jd: f64,
) -> Horizontal {
    // Local hour angle, east longitudes positive.
    let lha = (gmst_degrees(jd) + location.longitude - ra_deg).rem_euclid(360.0);

    let h = lha.to_radians();
    let dec = dec_deg.to_radians();
    let lat = location.latitude.to_radians();

    let sin_alt = lat.sin() * dec.sin() + lat.cos() * dec.cos() * h.cos();
    let altitude = sin_alt.asin().to_degrees();

    // Measured from south, westward; shifted to the from-north convention.
    let az_south = h
        .sin()
        .atan2(h.cos() * lat.sin() - dec.tan() * lat.cos())
        .to_degrees();
    let azimuth = (az_south + 180.0).rem_euclid(360.0);

    Horizontal {
        azimuth,
        zenith: 90.0 - altitude,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn julian_day_at_j2000() {
        let at = Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).unwrap();
        assert!((julian_day(at) - 2_451_545.0).abs() < 1e-9);
    }

    #[test]
    fn gmst_at_j2000() {
        // Standard value of theta_GMST at the J2000.0 epoch.
        let gmst = gmst_degrees(2_451_545.0);
        assert!((gmst - 280.460_618_37).abs() < 1e-6, "gmst = {gmst}");
    }

    #[test]
    fn body_at_celestial_pole_sits_at_observer_colatitude() {
        let location = Location {
            latitude: 52.0,
            longitude: 13.0,
            altitude_m: 0.0,
        };
        let pos = equatorial_to_horizontal(0.0, 90.0, &location, 2_451_545.0);
        // Polar axis: altitude equals latitude, so zenith is 90 - lat.
        assert!((pos.zenith - 38.0).abs() < 1e-6, "zenith = {}", pos.zenith);
    }

    #[test]
    fn azimuth_always_normalized() {
        let location = Location {
            latitude: -33.0,
            longitude: 151.0,
            altitude_m: 0.0,
        };
        for ra in [0.0, 90.0, 180.0, 270.0, 359.0] {
            for dec in [-60.0, 0.0, 60.0] {
                let pos = equatorial_to_horizontal(ra, dec, &location, 2_460_000.25);
                assert!((0.0..360.0).contains(&pos.azimuth));
            }
        }
    }
}
