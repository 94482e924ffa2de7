//! Continuous body-tracking worker
//!
//! The worker repeatedly computes where the body will be a little in the
//! future, commands the device there, waits for arrival and sleeps out the
//! rest of the cadence period. Per-cycle device failures are logged and the
//! loop carries on; only a stop request ends it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sky_position::{Body, Location, PositionSource};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{DeviceConfig, TrackingConfig};
use crate::control::SharedFlag;
use crate::error::{Result, SolysError};
use crate::motion::{check_device_clock, read_and_move};
use crate::session::SolysClient;
use crate::MeasurementHook;

/// Handle to a running tracking worker
pub struct BodyTracker {
    stop: SharedFlag,
    finished: SharedFlag,
    handle: JoinHandle<()>,
}

impl BodyTracker {
    /// Connect to the device and start tracking `body`
    ///
    /// The connect, handshake, power-save disable and location read happen
    /// before this returns, so a first-connection failure surfaces here
    /// synchronously rather than through the finished flag.
    pub async fn start(
        device: &DeviceConfig,
        timing: TrackingConfig,
        body: Body,
        source: Arc<dyn PositionSource>,
        altitude_m: f64,
        hook: Option<Arc<dyn MeasurementHook>>,
    ) -> Result<BodyTracker> {
        let mut client = SolysClient::connect(device).await?;
        let location = prepare_session(&mut client, altitude_m).await?;
        info!("Tracking {} from {:?}", body, location);
        Ok(Self::launch(client, timing, body, source, location, hook))
    }

    fn launch(
        client: SolysClient,
        timing: TrackingConfig,
        body: Body,
        source: Arc<dyn PositionSource>,
        location: Location,
        hook: Option<Arc<dyn MeasurementHook>>,
    ) -> BodyTracker {
        let stop = SharedFlag::new(false);
        let finished = SharedFlag::new(false);
        let handle = tokio::spawn(run_loop(
            client,
            timing,
            body,
            source,
            location,
            hook,
            stop.clone(),
            finished.clone(),
        ));
        BodyTracker {
            stop,
            finished,
            handle,
        }
    }

    /// Request the worker to stop after its current cycle (non-blocking)
    pub fn stop(&self) {
        self.stop.set(true);
    }

    /// Whether the worker loop has exited and closed its session
    pub fn is_finished(&self) -> bool {
        self.finished.get()
    }

    /// Wait for the worker task to exit
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

/// Disable power save and read the observer location off the device
pub async fn prepare_session(
    client: &mut SolysClient,
    altitude_m: f64,
) -> Result<Location> {
    client.set_power_save(false).await?;
    let (latitude, longitude, pressure) = client
        .get_location_pressure()
        .await?
        .ok_or_else(|| SolysError::Protocol("device did not report its location".to_string()))?;
    info!(
        "Device location: {:.4}N {:.4}E, pressure {:.0} mbar",
        latitude, longitude, pressure
    );
    check_device_clock(client).await?;
    Ok(Location {
        latitude,
        longitude,
        altitude_m,
    })
}

/// Seconds ahead of now for which the target position is computed
///
/// The halfway point of the remaining cadence (or of the instrument's
/// sampling window when a hook is installed), pushed out by the device's
/// travel time, so the device is centered on the body midway through the
/// interval it holds that position.
fn lead_seconds(timing: &TrackingConfig, has_hook: bool) -> f64 {
    if has_hook {
        timing.instrument_delay / 2.0 + timing.device_delay
    } else {
        (timing.cadence_seconds - timing.device_delay) / 2.0 + timing.device_delay
    }
}

/// Wall time still to sleep after a cycle that took `elapsed_seconds`
fn remaining_sleep(cadence_seconds: f64, elapsed_seconds: f64) -> f64 {
    (cadence_seconds - elapsed_seconds).max(0.0)
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    mut client: SolysClient,
    timing: TrackingConfig,
    body: Body,
    source: Arc<dyn PositionSource>,
    location: Location,
    hook: Option<Arc<dyn MeasurementHook>>,
    stop: SharedFlag,
    finished: SharedFlag,
) {
    let clock_check = Duration::from_secs(timing.clock_check_seconds.max(1));
    let mut last_clock_check = Instant::now();

    while !stop.get() {
        let cycle_started = Instant::now();

        if let Err(e) = run_cycle(
            &mut client,
            &timing,
            body,
            source.as_ref(),
            &location,
            hook.as_deref(),
        )
        .await
        {
            error!("Tracking cycle failed: {}", e);
        }

        if last_clock_check.elapsed() >= clock_check {
            if let Err(e) = check_device_clock(&mut client).await {
                warn!("Clock check failed: {}", e);
            }
            last_clock_check = Instant::now();
        }

        let sleep = remaining_sleep(
            timing.cadence_seconds,
            cycle_started.elapsed().as_secs_f64(),
        );
        if sleep > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(sleep)).await;
        }
    }

    if let Err(e) = client.close().await {
        warn!("Failed to close the device session: {}", e);
    }
    finished.set(true);
    info!("Tracking worker finished");
}

async fn run_cycle(
    client: &mut SolysClient,
    timing: &TrackingConfig,
    body: Body,
    source: &dyn PositionSource,
    location: &Location,
    hook: Option<&dyn MeasurementHook>,
) -> Result<()> {
    if body == Body::Sun {
        if let Some(intensity) = client.get_sun_intensity().await? {
            info!(
                "Sun intensity: {:?}, total {:.1}",
                intensity.quadrants,
                intensity.total()
            );
        }
    }

    let lead = lead_seconds(timing, hook.is_some());
    read_and_move(client, source, location, (0.0, 0.0), lead).await?;

    if let Some(hook) = hook {
        hook.on_target().await;
    }
    Ok(())
}
