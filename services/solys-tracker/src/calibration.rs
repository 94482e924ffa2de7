//! Calibration sweep worker
//!
//! Visits an ordered list of angular offsets around a tracked body and holds
//! each one through a synchronized countdown, so an external instrument can
//! sample at a predictable instant. The timing math compensates for how
//! long the device actually took to move: slack is slept away before the
//! countdown starts, overruns shorten the countdown, and an overrun that
//! eats the whole countdown budget aborts the sweep as a configuration
//! error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sky_position::{Body, Location, PositionSource};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{CalibrationParameters, DeviceConfig, TrackingConfig};
use crate::control::SharedFlag;
use crate::error::{Result, SolysError};
use crate::motion::{read_and_move, wait_position_reached};
use crate::session::SolysClient;
use crate::tracker::prepare_session;
use crate::MeasurementHook;

/// Which offset points a sweep visits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepPattern {
    /// Axis-aligned points only: azimuth offsets at zenith 0, then zenith
    /// offsets at azimuth 0
    Cross,
    /// Full Cartesian product of both axis sequences
    Mesh,
}

fn axis_points(min: f64, max: f64, step: f64) -> Result<Vec<f64>> {
    if step <= 0.0 {
        return Err(SolysError::Config(format!("offset step must be positive, got {step}")));
    }
    if max < min {
        return Err(SolysError::Config(format!(
            "offset range is empty: min {min} > max {max}"
        )));
    }
    // Index-based stepping keeps the inclusive-of-minimum count exact even
    // when (max - min) is not a whole multiple of step.
    let count = ((max - min) / step + 1e-9).floor() as usize + 1;
    Ok((0..count).map(|i| min + step * i as f64).collect())
}

/// Generate the ordered offset list for a sweep
pub fn generate_offsets(
    params: &CalibrationParameters,
    pattern: SweepPattern,
) -> Result<Vec<(f64, f64)>> {
    let azimuths = axis_points(params.azimuth_min, params.azimuth_max, params.azimuth_step)?;
    let zeniths = axis_points(params.zenith_min, params.zenith_max, params.zenith_step)?;

    let offsets = match pattern {
        SweepPattern::Cross => azimuths
            .iter()
            .map(|&az| (az, 0.0))
            .chain(zeniths.iter().map(|&ze| (0.0, ze)))
            .collect(),
        SweepPattern::Mesh => azimuths
            .iter()
            .flat_map(|&az| zeniths.iter().map(move |&ze| (az, ze)))
            .collect(),
    };
    Ok(offsets)
}

/// Seconds in the future for which each point's target is computed
///
/// Covers the countdown, half the instrument's sampling window, the device
/// travel time and its margin, so the device is centered on the true body
/// position exactly when the instrument samples.
fn target_lead(timing: &TrackingConfig, countdown: u32) -> f64 {
    countdown as f64
        + timing.instrument_delay / 2.0
        + timing.device_delay
        + timing.device_delay_margin
}

/// Reduce the countdown after a move that overran its budget
///
/// `wait_time` is the (non-positive) slack left after the move. Returns the
/// shortened whole-second countdown and the fractional remainder to sleep
/// first. A sub-second remainder still measures (with a zero countdown);
/// only an overrun consuming the entire budget fails.
fn effective_countdown(countdown: u32, wait_time: f64) -> Result<(u32, f64)> {
    let reduced = countdown as f64 + wait_time;
    if reduced <= 0.0 {
        return Err(SolysError::TimingBudget {
            overrun_seconds: -wait_time,
        });
    }
    let whole = reduced.floor();
    Ok((whole as u32, reduced - whole))
}

/// Handle to a running calibration sweep
pub struct CalibrationSweep {
    stop: SharedFlag,
    finished: SharedFlag,
    handle: JoinHandle<()>,
}

impl CalibrationSweep {
    /// Connect to the device and start sweeping around `body`
    ///
    /// Like the tracker, a first-connection failure surfaces here
    /// synchronously; everything after that is reported through logging and
    /// the finished flag.
    #[allow(clippy::too_many_arguments)]
    pub async fn start(
        device: &DeviceConfig,
        timing: TrackingConfig,
        params: CalibrationParameters,
        pattern: SweepPattern,
        body: Body,
        source: Arc<dyn PositionSource>,
        altitude_m: f64,
        hook: Option<Arc<dyn MeasurementHook>>,
    ) -> Result<CalibrationSweep> {
        // Reject bad offset ranges before touching the device.
        let points = generate_offsets(&params, pattern)?.len();
        let mut client = SolysClient::connect(device).await?;
        let location = prepare_session(&mut client, altitude_m).await?;
        info!("Sweeping {} {:?} points around {}", points, pattern, body);
        Ok(Self::launch(
            client, timing, params, pattern, source, location, hook,
        ))
    }

    fn launch(
        client: SolysClient,
        timing: TrackingConfig,
        params: CalibrationParameters,
        pattern: SweepPattern,
        source: Arc<dyn PositionSource>,
        location: Location,
        hook: Option<Arc<dyn MeasurementHook>>,
    ) -> CalibrationSweep {
        let stop = SharedFlag::new(false);
        let finished = SharedFlag::new(false);
        let handle = tokio::spawn(run_sweep(
            client,
            timing,
            params,
            pattern,
            source,
            location,
            hook,
            stop.clone(),
            finished.clone(),
        ));
        CalibrationSweep {
            stop,
            finished,
            handle,
        }
    }

    /// Request the sweep to stop before its next point (non-blocking)
    pub fn stop(&self) {
        self.stop.set(true);
    }

    /// Whether the sweep loop has exited and closed its session
    pub fn is_finished(&self) -> bool {
        self.finished.get()
    }

    /// Wait for the sweep task to exit
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_sweep(
    mut client: SolysClient,
    timing: TrackingConfig,
    params: CalibrationParameters,
    pattern: SweepPattern,
    source: Arc<dyn PositionSource>,
    location: Location,
    hook: Option<Arc<dyn MeasurementHook>>,
    stop: SharedFlag,
    finished: SharedFlag,
) {
    match sweep_points(
        &mut client,
        &timing,
        &params,
        pattern,
        source.as_ref(),
        &location,
        hook.as_deref(),
        &stop,
    )
    .await
    {
        Ok(()) => info!("Calibration sweep complete"),
        Err(e) => error!("Calibration sweep aborted: {}", e),
    }

    if let Err(e) = client.close().await {
        warn!("Failed to close the device session: {}", e);
    }
    finished.set(true);
    info!("Calibration worker finished");
}

#[allow(clippy::too_many_arguments)]
async fn sweep_points(
    client: &mut SolysClient,
    timing: &TrackingConfig,
    params: &CalibrationParameters,
    pattern: SweepPattern,
    source: &dyn PositionSource,
    location: &Location,
    hook: Option<&dyn MeasurementHook>,
    stop: &SharedFlag,
) -> Result<()> {
    let offsets = generate_offsets(params, pattern)?;

    // Home on the un-offset body first so every relative offset is measured
    // from the same baseline.
    read_and_move(
        client,
        source,
        location,
        (0.0, 0.0),
        timing.device_delay + timing.device_delay_margin,
    )
    .await?;

    for (index, offset) in offsets.iter().enumerate() {
        if stop.get() {
            info!("Stop requested, leaving the sweep early");
            return Ok(());
        }
        info!(
            "Point {}/{}: offset {:+.2}/{:+.2}",
            index + 1,
            offsets.len(),
            offset.0,
            offset.1
        );
        visit_point(client, timing, params, source, location, hook, *offset).await?;
    }
    Ok(())
}

async fn visit_point(
    client: &mut SolysClient,
    timing: &TrackingConfig,
    params: &CalibrationParameters,
    source: &dyn PositionSource,
    location: &Location,
    hook: Option<&dyn MeasurementHook>,
    offset: (f64, f64),
) -> Result<()> {
    let dt_offset = target_lead(timing, params.countdown);

    let move_started = Instant::now();
    read_and_move(client, source, location, offset, dt_offset).await?;
    let diff_td = move_started.elapsed().as_secs_f64();

    // Slack left between arrival and the start of the visible countdown.
    let wait_time =
        (dt_offset - timing.instrument_delay / 2.0) - (diff_td + params.countdown as f64);

    let countdown = if wait_time > 0.0 {
        tokio::time::sleep(Duration::from_secs_f64(wait_time)).await;
        params.countdown
    } else {
        let (reduced, fractional) = effective_countdown(params.countdown, wait_time)?;
        warn!(
            "Move overran its budget by {:.1}s, countdown reduced to {}",
            -wait_time, reduced
        );
        if fractional > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(fractional)).await;
        }
        reduced
    };

    for remaining in (1..=countdown).rev() {
        info!("{}...", remaining);
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    info!("0: measuring");

    match hook {
        Some(hook) => hook.on_target().await,
        // Stand in for the instrument's measurement window.
        None => tokio::time::sleep(Duration::from_secs_f64(timing.instrument_delay)).await,
    }

    tokio::time::sleep(Duration::from_secs(params.post_wait.into())).await;
    Ok(())
}

/// Point the device away from the body and log the dark quadrant readings
///
/// Used for dark-noise reference measurements: azimuth is rotated a half
/// turn away from the body, zenith parked at 45 degrees.
pub async fn black_scan(
    client: &mut SolysClient,
    timing: &TrackingConfig,
    source: &dyn PositionSource,
    location: &Location,
    hook: Option<&dyn MeasurementHook>,
) -> Result<()> {
    let lead = timing.device_delay + timing.device_delay_margin;
    let at = chrono::Utc::now() + chrono::TimeDelta::milliseconds((lead * 1000.0) as i64);
    let body = source.position(location, at)?;

    let azimuth = (body.azimuth + 180.0).rem_euclid(360.0);
    let zenith = 45.0;
    info!("Black scan: pointing away at azimuth {:.4}, zenith {:.1}", azimuth, zenith);

    client.set_azimuth(azimuth).await?;
    client.set_zenith(zenith).await?;
    let (adjust_az, adjust_ze) = client.adjustments();
    wait_position_reached(client, azimuth + adjust_az, zenith + adjust_ze).await?;

    if let Some(intensity) = client.get_sun_intensity().await? {
        info!(
            "Dark quadrants: {:?}, total {:.1}",
            intensity.quadrants,
            intensity.total()
        );
    }

    match hook {
        Some(hook) => hook.on_target().await,
        None => tokio::time::sleep(Duration::from_secs_f64(timing.instrument_delay)).await,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_params() -> CalibrationParameters {
        CalibrationParameters {
            azimuth_min: -1.0,
            azimuth_max: 1.0,
            azimuth_step: 0.5,
            zenith_min: -1.0,
            zenith_max: 1.0,
            zenith_step: 1.0,
            countdown: 5,
            post_wait: 3,
        }
    }

    #[test]
    fn cross_concatenates_both_axes() {
        let offsets = generate_offsets(&example_params(), SweepPattern::Cross).unwrap();
        // 5 azimuth points + 3 zenith points
        assert_eq!(offsets.len(), 8);
        assert_eq!(offsets[0], (-1.0, 0.0));
        assert_eq!(offsets[4], (1.0, 0.0));
        assert_eq!(offsets[5], (0.0, -1.0));
        assert_eq!(offsets[7], (0.0, 1.0));
    }

    #[test]
    fn mesh_is_the_cartesian_product() {
        let offsets = generate_offsets(&example_params(), SweepPattern::Mesh).unwrap();
        assert_eq!(offsets.len(), 15);
        assert_eq!(offsets[0], (-1.0, -1.0));
        assert_eq!(offsets[14], (1.0, 1.0));
    }

    #[test]
    fn axis_count_rounds_down_on_uneven_ranges() {
        let points = axis_points(0.0, 1.0, 0.4).unwrap();
        assert_eq!(points.len(), 3);
        assert!((points[2] - 0.8).abs() < 1e-9);
    }

    #[test]
    fn axis_endpoints_are_inclusive_on_exact_ranges() {
        let points = axis_points(-1.0, 1.0, 0.5).unwrap();
        assert_eq!(points.len(), 5);
        assert!((points[4] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn bad_steps_are_rejected() {
        assert!(matches!(
            axis_points(0.0, 1.0, 0.0),
            Err(SolysError::Config(_))
        ));
        assert!(matches!(
            axis_points(1.0, 0.0, 0.5),
            Err(SolysError::Config(_))
        ));
    }

    #[test]
    fn target_lead_adds_all_delays() {
        let timing = TrackingConfig {
            instrument_delay: 2.0,
            device_delay: 5.0,
            device_delay_margin: 2.0,
            ..TrackingConfig::default()
        };
        assert_eq!(target_lead(&timing, 5), 13.0);
    }

    #[test]
    fn small_overrun_shortens_the_countdown() {
        // Overrun of 1.5s against a 5s countdown: display 5 - ceil(1.5) = 3,
        // sleep the 0.5s remainder first.
        let (countdown, fractional) = effective_countdown(5, -1.5).unwrap();
        assert_eq!(countdown, 3);
        assert!((fractional - 0.5).abs() < 1e-9);
    }

    #[test]
    fn sub_second_budget_measures_with_zero_countdown() {
        // 4.5s overrun against a 5s countdown leaves half a second: sleep
        // it and go straight to the measurement, no abort.
        let (countdown, fractional) = effective_countdown(5, -4.5).unwrap();
        assert_eq!(countdown, 0);
        assert!((fractional - 0.5).abs() < 1e-9);
    }

    #[test]
    fn whole_second_overrun_has_no_fraction() {
        let (countdown, fractional) = effective_countdown(5, -2.0).unwrap();
        assert_eq!(countdown, 3);
        assert_eq!(fractional, 0.0);
    }

    #[test]
    fn exhausted_budget_is_fatal() {
        let err = effective_countdown(5, -5.0).unwrap_err();
        assert!(matches!(
            err,
            SolysError::TimingBudget { overrun_seconds } if overrun_seconds == 5.0
        ));
    }
}
