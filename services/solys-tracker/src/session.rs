//! Command session for the tracker device
//!
//! [`SolysClient`] owns the transport and enforces the protocol contract:
//! one command in flight, stale echoes read past until the real answer
//! arrives, lost authentication transparently re-established, and dead
//! connections replaced. Callers see typed operations; degraded answers
//! (payload shorter than the operation needs) come back as `None` rather
//! than an error, so automation can log and carry on.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::error::{Result, SolysError};
use crate::response::{classify, describe_error, ParsedResponse, ResponseKind, PROTECTION_ERROR_CODE};
use crate::transport::{
    is_connection_dropped, DeviceTransport, TcpTransportFactory, TransportFactory,
};

/// Protection losses tolerated in one call chain before giving up
const MAX_RELOGIN_DEPTH: u32 = 3;

/// Consecutive stale replies tolerated before the transport is assumed dead
const STALE_UNTIL_RECONNECT: usize = 100;

/// Pause between receives while waiting out stale traffic
const STALE_POLL: Duration = Duration::from_millis(100);

/// Largest relative motor adjustment the device accepts, in degrees
const MAX_ADJUSTMENT_DEG: f64 = 0.2;

/// Operating function codes of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolysFunction {
    NoFunction,
    StandardOperation,
    SunTracking,
    ActiveTracking,
    BothTracking,
}

impl SolysFunction {
    pub fn code(self) -> u8 {
        match self {
            SolysFunction::NoFunction => 0,
            SolysFunction::StandardOperation => 1,
            SolysFunction::SunTracking => 2,
            SolysFunction::ActiveTracking => 4,
            SolysFunction::BothTracking => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SolysFunction::NoFunction),
            1 => Some(SolysFunction::StandardOperation),
            2 => Some(SolysFunction::SunTracking),
            4 => Some(SolysFunction::ActiveTracking),
            6 => Some(SolysFunction::BothTracking),
            _ => None,
        }
    }
}

/// Quadrant intensities from the sun sensor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunIntensity {
    pub quadrants: [f64; 4],
}

impl SunIntensity {
    pub fn total(&self) -> f64 {
        self.quadrants.iter().sum()
    }
}

/// Authenticated session with the device
pub struct SolysClient {
    factory: Box<dyn TransportFactory>,
    transport: Box<dyn DeviceTransport>,
    password: String,
    closed: bool,
    /// Last-known (azimuth, zenith) motor adjustment pair
    adjustments: (f64, f64),
}

impl SolysClient {
    /// Connect to the device and run the handshake
    ///
    /// The handshake authenticates, lifts write-protection, caches the motor
    /// adjustment pair and logs the firmware version. On success every
    /// later mutating command may assume the session is authenticated;
    /// [`SolysClient::send_command`] restores that invariant transparently
    /// if the device drops it.
    pub async fn connect(config: &DeviceConfig) -> Result<Self> {
        let factory = Box::new(TcpTransportFactory::new(
            config.host.clone(),
            config.port,
            Duration::from_secs(config.timeout_seconds),
        ));
        Self::with_factory(factory, &config.password).await
    }

    /// Connect through an explicit transport factory
    pub async fn with_factory(
        factory: Box<dyn TransportFactory>,
        password: &str,
    ) -> Result<Self> {
        let transport = factory.connect().await?;
        let mut client = Self {
            factory,
            transport,
            password: password.to_string(),
            closed: false,
            adjustments: (0.0, 0.0),
        };

        client.authenticate().await?;
        if let Some(adjustments) = client.query_adjustments().await? {
            client.adjustments = adjustments;
        }
        let version = client.version().await?;
        info!("Connected to device, firmware: {}", version);

        Ok(client)
    }

    async fn authenticate(&mut self) -> Result<()> {
        let password = self.password.clone();
        self.send_command(&format!("PW {password}")).await?;
        self.send_command("PR 0").await?;
        debug!("Authenticated and write-protection lifted");
        Ok(())
    }

    /// Send a command and return its classified answer
    ///
    /// The single funnel every operation goes through. Handles stale
    /// traffic, dead-connection recovery and re-authentication; any
    /// remaining device rejection surfaces as [`SolysError::Device`].
    pub async fn send_command(&mut self, cmd: &str) -> Result<ParsedResponse> {
        self.send_command_opts(cmd, false).await
    }

    /// Variant selecting hexadecimal payload decoding (queue status only)
    pub async fn send_command_opts(&mut self, cmd: &str, hex: bool) -> Result<ParsedResponse> {
        let mut depth = 0u32;
        loop {
            let parsed = self.exchange(cmd, hex).await?;
            if parsed.kind != ResponseKind::DeviceError {
                return Ok(parsed);
            }

            let code = parsed.error.clone().unwrap_or_default();
            if code == PROTECTION_ERROR_CODE && !cmd.starts_with("PW") {
                if depth >= MAX_RELOGIN_DEPTH {
                    return Err(SolysError::ReloginLoop(cmd.to_string()));
                }
                depth += 1;
                warn!(
                    "Device deauthenticated while sending '{}', re-authenticating (attempt {})",
                    cmd, depth
                );
                let password = self.password.clone();
                self.expect_ack(&format!("PW {password}"), false).await?;
                self.expect_ack("PR 0", false).await?;
                continue;
            }

            return Err(SolysError::Device {
                reason: describe_error(&code).to_string(),
                code,
                raw: parsed.raw,
            });
        }
    }

    /// One exchange that must not itself come back as a device error
    async fn expect_ack(&mut self, cmd: &str, hex: bool) -> Result<ParsedResponse> {
        let parsed = self.exchange(cmd, hex).await?;
        if parsed.kind == ResponseKind::DeviceError {
            let code = parsed.error.clone().unwrap_or_default();
            return Err(SolysError::Device {
                reason: describe_error(&code).to_string(),
                code,
                raw: parsed.raw,
            });
        }
        Ok(parsed)
    }

    /// Drain, send, then read past stale replies until one answers `cmd`
    async fn exchange(&mut self, cmd: &str, hex: bool) -> Result<ParsedResponse> {
        if self.closed {
            return Err(SolysError::NotConnected);
        }

        self.transport.drain().await?;
        let mut reply = match self.transport.send(cmd).await {
            Ok(reply) => reply,
            Err(e) if is_connection_dropped(&e) => {
                warn!("Connection dropped while sending '{}', reconnecting: {}", cmd, e);
                self.reconnect().await?;
                self.transport.send(cmd).await?
            }
            Err(e) => return Err(e),
        };

        let mut stale_count = 0usize;
        let mut parsed = classify(&reply, cmd, hex);
        while parsed.kind == ResponseKind::Stale {
            stale_count += 1;
            if stale_count > STALE_UNTIL_RECONNECT {
                warn!(
                    "No answer to '{}' after {} stale replies, assuming dead transport",
                    cmd, stale_count
                );
                self.reconnect().await?;
                reply = self.transport.send(cmd).await?;
                stale_count = 0;
            } else {
                tokio::time::sleep(STALE_POLL).await;
                reply = self.transport.receive().await?;
            }
            parsed = classify(&reply, cmd, hex);
        }
        Ok(parsed)
    }

    async fn reconnect(&mut self) -> Result<()> {
        let _ = self.transport.close().await;
        self.transport = self.factory.connect().await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Typed operations
    // ------------------------------------------------------------------

    /// Command the azimuth axis to an absolute angle, reduced modulo 360
    pub async fn set_azimuth(&mut self, azimuth: f64) -> Result<()> {
        let azimuth = azimuth.rem_euclid(360.0);
        self.send_command(&format!("PO 0 {azimuth:.4}")).await?;
        Ok(())
    }

    /// Command the zenith axis to an absolute angle, clamped to [0, 90]
    pub async fn set_zenith(&mut self, zenith: f64) -> Result<()> {
        let zenith = zenith.abs().min(90.0);
        self.send_command(&format!("PO 1 {zenith:.4}")).await?;
        Ok(())
    }

    /// Current (azimuth, zenith) as reported by the position encoders
    pub async fn get_current_position(&mut self) -> Result<Option<(f64, f64)>> {
        let parsed = self.send_command("CP").await?;
        Ok(take_pair(&parsed, "CP"))
    }

    /// The position the motion queue is currently heading for
    pub async fn get_planned_position(&mut self) -> Result<Option<(f64, f64)>> {
        let parsed = self.send_command("PO").await?;
        Ok(take_pair(&parsed, "PO"))
    }

    /// Configured (latitude°, longitude°, pressure mbar)
    pub async fn get_location_pressure(&mut self) -> Result<Option<(f64, f64, f64)>> {
        let parsed = self.send_command("LL").await?;
        if parsed.kind == ResponseKind::Answered && parsed.numbers.len() >= 3 {
            Ok(Some((parsed.numbers[0], parsed.numbers[1], parsed.numbers[2])))
        } else {
            warn!("Degraded LL answer: {:?}", parsed);
            Ok(None)
        }
    }

    pub async fn get_power_save(&mut self) -> Result<Option<bool>> {
        let parsed = self.send_command("PS").await?;
        Ok(take_first(&parsed, "PS").map(|v| v != 0.0))
    }

    pub async fn set_power_save(&mut self, enabled: bool) -> Result<()> {
        self.send_command(&format!("PS {}", u8::from(enabled))).await?;
        Ok(())
    }

    pub async fn get_function(&mut self) -> Result<Option<SolysFunction>> {
        let parsed = self.send_command("FU").await?;
        Ok(take_first(&parsed, "FU").and_then(|v| SolysFunction::from_code(v as u8)))
    }

    pub async fn set_function(&mut self, function: SolysFunction) -> Result<()> {
        self.send_command(&format!("FU {}", function.code())).await?;
        Ok(())
    }

    /// Quadrant intensities from the sun sensor
    pub async fn get_sun_intensity(&mut self) -> Result<Option<SunIntensity>> {
        let parsed = self.send_command("SI").await?;
        if parsed.kind == ResponseKind::Answered && parsed.numbers.len() >= 4 {
            Ok(Some(SunIntensity {
                quadrants: [
                    parsed.numbers[0],
                    parsed.numbers[1],
                    parsed.numbers[2],
                    parsed.numbers[3],
                ],
            }))
        } else {
            warn!("Degraded SI answer: {:?}", parsed);
            Ok(None)
        }
    }

    /// Raw status word
    pub async fn get_raw_status(&mut self) -> Result<Option<u64>> {
        let parsed = self.send_command("IS").await?;
        Ok(take_first(&parsed, "IS").map(|v| v as u64))
    }

    /// Motion queue depth, decoded from the device's hex reply
    pub async fn get_queue_status(&mut self) -> Result<Option<u64>> {
        let parsed = self.send_command_opts("QS", true).await?;
        Ok(take_first(&parsed, "QS").map(|v| v as u64))
    }

    /// Last-known (azimuth, zenith) motor adjustment pair
    pub fn adjustments(&self) -> (f64, f64) {
        self.adjustments
    }

    /// Query the device for the adjustment pair and refresh the cache
    pub async fn query_adjustments(&mut self) -> Result<Option<(f64, f64)>> {
        let parsed = self.send_command("AD").await?;
        let pair = take_pair(&parsed, "AD");
        if let Some(pair) = pair {
            self.adjustments = pair;
        }
        Ok(pair)
    }

    /// Nudge the azimuth motor by a relative step, clamped to ±0.2°
    pub async fn adjust_azimuth(&mut self, degrees: f64) -> Result<()> {
        self.adjust_motor(0, degrees).await
    }

    /// Nudge the zenith motor by a relative step, clamped to ±0.2°
    pub async fn adjust_zenith(&mut self, degrees: f64) -> Result<()> {
        self.adjust_motor(1, degrees).await
    }

    async fn adjust_motor(&mut self, motor: u8, degrees: f64) -> Result<()> {
        let step = degrees.clamp(-MAX_ADJUSTMENT_DEG, MAX_ADJUSTMENT_DEG);
        if step != degrees {
            warn!(
                "Requested adjustment {:.4} clamped to {:.4} for motor {}",
                degrees, step, motor
            );
        }
        self.send_command(&format!("AD {motor} {step:.4}")).await?;
        self.query_adjustments().await?;
        Ok(())
    }

    /// Send the device to its home position
    pub async fn home(&mut self) -> Result<()> {
        self.send_command("HO").await?;
        Ok(())
    }

    /// Firmware version string as reported by the device
    pub async fn version(&mut self) -> Result<String> {
        let parsed = self.send_command("VE").await?;
        Ok(parsed.raw.trim_start_matches("VE").trim().to_string())
    }

    /// Device UTC time, corrected by half the measured round trip
    pub async fn get_datetime(&mut self) -> Result<Option<DateTime<Utc>>> {
        let started = std::time::Instant::now();
        let parsed = self.send_command("TI").await?;
        let rtt = started.elapsed();

        if parsed.kind != ResponseKind::Answered || parsed.numbers.len() < 5 {
            warn!("Degraded TI answer: {:?}", parsed);
            return Ok(None);
        }

        let [year, doy, hour, minute, second] = [
            parsed.numbers[0],
            parsed.numbers[1],
            parsed.numbers[2],
            parsed.numbers[3],
            parsed.numbers[4],
        ];
        let datetime = NaiveDate::from_yo_opt(year as i32, doy as u32)
            .and_then(|d| d.and_hms_opt(hour as u32, minute as u32, second as u32))
            .map(|dt| dt.and_utc() + TimeDelta::milliseconds(rtt.as_millis() as i64 / 2));
        if datetime.is_none() {
            warn!("TI answer out of calendar range: {:?}", parsed.numbers);
        }
        Ok(datetime)
    }

    /// Signed offset of the device clock against local UTC
    pub async fn clock_offset(&mut self) -> Result<Option<TimeDelta>> {
        Ok(self.get_datetime().await?.map(|device| device - Utc::now()))
    }

    /// Close the session; further commands fail with `NotConnected`
    pub async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.transport.close().await?;
        }
        Ok(())
    }
}

fn take_first(parsed: &ParsedResponse, what: &str) -> Option<f64> {
    if parsed.kind == ResponseKind::Answered && !parsed.numbers.is_empty() {
        Some(parsed.numbers[0])
    } else {
        warn!("Degraded {} answer: {:?}", what, parsed);
        None
    }
}

fn take_pair(parsed: &ParsedResponse, what: &str) -> Option<(f64, f64)> {
    if parsed.kind == ResponseKind::Answered && parsed.numbers.len() >= 2 {
        Some((parsed.numbers[0], parsed.numbers[1]))
    } else {
        warn!("Degraded {} answer: {:?}", what, parsed);
        None
    }
}
