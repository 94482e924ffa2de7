//! Pointing helpers shared by the tracking and calibration workers

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use sky_position::{Horizontal, Location, PositionSource};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::session::SolysClient;

/// Arrival is declared when |Δaz| + |Δze| drops to this many degrees.
/// Polling the encoders is the arrival signal; the device's queue-status
/// reporting is not reliable enough to use instead.
const ARRIVAL_TOLERANCE_DEG: f64 = 0.01;

/// Spacing between arrival polls
const ARRIVAL_POLL: Duration = Duration::from_secs(1);

/// Device clock drift that is worth warning about
const MAX_CLOCK_DRIFT_SECONDS: i64 = 2;

/// Poll the encoders until the device has reached (azimuth, zenith)
///
/// A degraded position answer is logged and polling continues; only a
/// session failure aborts the wait.
pub async fn wait_position_reached(
    client: &mut SolysClient,
    azimuth: f64,
    zenith: f64,
) -> Result<()> {
    loop {
        match client.get_current_position().await? {
            Some((current_az, current_ze)) => {
                let remaining = (current_az - azimuth).abs() + (current_ze - zenith).abs();
                if remaining <= ARRIVAL_TOLERANCE_DEG {
                    debug!(
                        "Arrived at azimuth {:.4}, zenith {:.4}",
                        current_az, current_ze
                    );
                    return Ok(());
                }
                debug!(
                    "Moving, {:.4} degrees to go (azimuth {:.4} -> {:.4}, zenith {:.4} -> {:.4})",
                    remaining, current_az, azimuth, current_ze, zenith
                );
            }
            None => warn!("Position unknown this poll, continuing to wait"),
        }
        tokio::time::sleep(ARRIVAL_POLL).await;
    }
}

/// Compute a led target, command both axes and wait for arrival
///
/// The target is the body position `lead_seconds` in the future plus the
/// given offset, so the device is centered when it matters rather than when
/// the command was sent. Returns the commanded target.
pub async fn read_and_move(
    client: &mut SolysClient,
    source: &dyn PositionSource,
    location: &Location,
    offset: (f64, f64),
    lead_seconds: f64,
) -> Result<Horizontal> {
    if let Some((az, ze)) = client.get_current_position().await? {
        debug!("Current position: azimuth {:.4}, zenith {:.4}", az, ze);
    }

    let at = Utc::now() + TimeDelta::milliseconds((lead_seconds * 1000.0) as i64);
    let body = source.position(location, at)?;
    let target_az = (body.azimuth + offset.0).min(360.0);
    let target_ze = (body.zenith + offset.1).min(90.0);
    info!(
        "Moving to azimuth {:.4}, zenith {:.4} (offset {:+.2}/{:+.2}, lead {:.1}s)",
        target_az, target_ze, offset.0, offset.1, lead_seconds
    );

    client.set_azimuth(target_az).await?;
    client.set_zenith(target_ze).await?;

    // The encoders report position including the motor adjustment pair.
    let (adjust_az, adjust_ze) = client.adjustments();
    wait_position_reached(client, target_az + adjust_az, target_ze + adjust_ze).await?;

    Ok(Horizontal {
        azimuth: target_az,
        zenith: target_ze,
    })
}

/// Log the device clock against local UTC, warning on real drift
pub async fn check_device_clock(client: &mut SolysClient) -> Result<()> {
    match client.clock_offset().await? {
        Some(offset) => {
            let seconds = offset.num_milliseconds() as f64 / 1000.0;
            if offset.num_seconds().abs() > MAX_CLOCK_DRIFT_SECONDS {
                warn!("Device clock is off by {:.1}s against local UTC", seconds);
            } else {
                info!("Device clock offset: {:.1}s", seconds);
            }
        }
        None => warn!("Device did not report a usable time"),
    }
    Ok(())
}
