use clap::{Parser, Subcommand};
use sky_position::{make_source, Body, SourceKind};
use solys_tracker::calibration::{black_scan, CalibrationSweep, SweepPattern};
use solys_tracker::config::{load_config, CalibrationParameters, Config};
use solys_tracker::motion::check_device_clock;
use solys_tracker::tracker::{prepare_session, BodyTracker};
use solys_tracker::SolysClient;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, Level};

#[derive(Parser)]
#[command(name = "solys-tracker")]
#[command(about = "Automation for a two-axis sun/moon tracker")]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device host address (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Device port (overrides the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Device password (overrides the config file)
    #[arg(long)]
    password: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info", value_parser = clap::value_parser!(Level))]
    log_level: Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct SourceArgs {
    /// Body to track
    #[arg(long, default_value = "sun")]
    body: Body,

    /// Position source backend
    #[arg(long)]
    source: Option<SourceKind>,

    /// Reference-data directory for table/kernel sources
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Observer altitude in meters
    #[arg(long)]
    altitude: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the device and show its status
    Status,

    /// Track a body continuously until Ctrl-C
    Track {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        timing: TimingArgs,

        /// Seconds between tracking cycles
        #[arg(long)]
        cadence: Option<f64>,
    },

    /// Run an axis-aligned calibration sweep
    Cross {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        timing: TimingArgs,

        #[command(flatten)]
        sweep: SweepArgs,
    },

    /// Run a full-grid calibration sweep
    Mesh {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        timing: TimingArgs,

        #[command(flatten)]
        sweep: SweepArgs,
    },

    /// Point away from the body and log dark quadrant readings
    Black {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        timing: TimingArgs,
    },

    /// Send the device to its home position
    Home,
}

#[derive(clap::Args, Clone)]
struct TimingArgs {
    /// Estimated seconds for the device to reach a commanded position
    #[arg(long)]
    device_delay: Option<f64>,

    /// Seconds the external instrument takes per sample
    #[arg(long)]
    instrument_delay: Option<f64>,
}

impl TimingArgs {
    fn apply(&self, timing: &mut solys_tracker::TrackingConfig) {
        if let Some(v) = self.device_delay {
            timing.device_delay = v;
        }
        if let Some(v) = self.instrument_delay {
            timing.instrument_delay = v;
        }
    }
}

#[derive(clap::Args, Clone)]
struct SweepArgs {
    /// Azimuth offset range minimum, degrees
    #[arg(long)]
    azimuth_min: Option<f64>,

    /// Azimuth offset range maximum, degrees
    #[arg(long)]
    azimuth_max: Option<f64>,

    /// Azimuth offset step, degrees
    #[arg(long)]
    azimuth_step: Option<f64>,

    /// Zenith offset range minimum, degrees
    #[arg(long)]
    zenith_min: Option<f64>,

    /// Zenith offset range maximum, degrees
    #[arg(long)]
    zenith_max: Option<f64>,

    /// Zenith offset step, degrees
    #[arg(long)]
    zenith_step: Option<f64>,

    /// Countdown seconds before each measurement
    #[arg(long)]
    countdown: Option<u32>,

    /// Settle seconds after each measurement
    #[arg(long)]
    post_wait: Option<u32>,
}

impl SweepArgs {
    fn apply(&self, mut params: CalibrationParameters) -> CalibrationParameters {
        if let Some(v) = self.azimuth_min {
            params.azimuth_min = v;
        }
        if let Some(v) = self.azimuth_max {
            params.azimuth_max = v;
        }
        if let Some(v) = self.azimuth_step {
            params.azimuth_step = v;
        }
        if let Some(v) = self.zenith_min {
            params.zenith_min = v;
        }
        if let Some(v) = self.zenith_max {
            params.zenith_max = v;
        }
        if let Some(v) = self.zenith_step {
            params.zenith_step = v;
        }
        if let Some(v) = self.countdown {
            params.countdown = v;
        }
        if let Some(v) = self.post_wait {
            params.post_wait = v;
        }
        params
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    let mut config = if let Some(config_path) = &args.config {
        debug!("Loading configuration from {:?}", config_path);
        load_config(config_path)?
    } else {
        Config {
            device: Default::default(),
            tracking: Default::default(),
            calibration: Default::default(),
            source: Default::default(),
        }
    };
    apply_device_flags(&args, &mut config);

    debug!(
        "Device endpoint: host={}, port={}, log_level={:?}",
        config.device.host, config.device.port, args.log_level
    );

    match args.command {
        Commands::Status => {
            run_status(&config).await?;
        }
        Commands::Track {
            source,
            timing,
            cadence,
        } => {
            timing.apply(&mut config.tracking);
            if let Some(cadence) = cadence {
                config.tracking.cadence_seconds = cadence;
            }
            run_track(&config, &source).await?;
        }
        Commands::Cross {
            source,
            timing,
            sweep,
        } => {
            timing.apply(&mut config.tracking);
            run_sweep(&config, &source, &sweep, SweepPattern::Cross).await?;
        }
        Commands::Mesh {
            source,
            timing,
            sweep,
        } => {
            timing.apply(&mut config.tracking);
            run_sweep(&config, &source, &sweep, SweepPattern::Mesh).await?;
        }
        Commands::Black { source, timing } => {
            timing.apply(&mut config.tracking);
            run_black(&config, &source).await?;
        }
        Commands::Home => {
            run_home(&config).await?;
        }
    }

    Ok(())
}

/// Layer the device flags over the configuration; a given flag wins over
/// the config file, an absent one keeps the file's (or default) value.
fn apply_device_flags(args: &Args, config: &mut Config) {
    if let Some(host) = &args.host {
        config.device.host = host.clone();
    }
    if let Some(port) = args.port {
        config.device.port = port;
    }
    if let Some(password) = &args.password {
        config.device.password = password.clone();
    }
}

fn build_source(
    config: &Config,
    args: &SourceArgs,
) -> Result<
    (
        Body,
        std::sync::Arc<dyn sky_position::PositionSource>,
        f64,
    ),
    Box<dyn std::error::Error>,
> {
    let kind = args.source.unwrap_or(config.source.kind);
    let data_dir = args.data_dir.clone().or_else(|| config.source.data_dir.clone());
    let altitude = args.altitude.unwrap_or(config.source.altitude_m);
    let source = make_source(kind, args.body, data_dir.as_deref(), altitude)?;
    info!("Using position source '{}' for {}", kind, args.body);
    Ok((args.body, source, altitude))
}

async fn run_status(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Connecting to the device...");
    let mut client = SolysClient::connect(&config.device).await?;

    check_device_clock(&mut client).await?;

    if let Some((az, ze)) = client.get_current_position().await? {
        info!("Current position: azimuth {:.4}, zenith {:.4}", az, ze);
    }
    if let Some((az, ze)) = client.get_planned_position().await? {
        info!("Planned position: azimuth {:.4}, zenith {:.4}", az, ze);
    }
    if let Some((lat, lon, pressure)) = client.get_location_pressure().await? {
        info!("Location: {:.4}N {:.4}E, pressure {:.0} mbar", lat, lon, pressure);
    }
    if let Some(function) = client.get_function().await? {
        info!("Operating function: {:?}", function);
    }
    if let Some(power_save) = client.get_power_save().await? {
        info!("Power save: {}", power_save);
    }
    if let Some(queue) = client.get_queue_status().await? {
        info!("Motion queue depth: {}", queue);
    }
    if let Some(status) = client.get_raw_status().await? {
        info!("Raw status word: {:#x}", status);
    }
    if let Some(intensity) = client.get_sun_intensity().await? {
        info!(
            "Sun intensity: {:?}, total {:.1}",
            intensity.quadrants,
            intensity.total()
        );
    }
    let (adjust_az, adjust_ze) = client.adjustments();
    info!("Motor adjustments: azimuth {:+.4}, zenith {:+.4}", adjust_az, adjust_ze);

    client.close().await?;
    Ok(())
}

async fn run_track(config: &Config, source_args: &SourceArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (body, source, altitude) = build_source(config, source_args)?;

    info!("Starting tracking (cadence {}s)...", config.tracking.cadence_seconds);
    let tracker = BodyTracker::start(
        &config.device,
        config.tracking.clone(),
        body,
        source,
        altitude,
        None,
    )
    .await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    tracker.stop();
    wait_finished(|| tracker.is_finished()).await;
    tracker.join().await;
    Ok(())
}

async fn run_sweep(
    config: &Config,
    source_args: &SourceArgs,
    sweep_args: &SweepArgs,
    pattern: SweepPattern,
) -> Result<(), Box<dyn std::error::Error>> {
    let (body, source, altitude) = build_source(config, source_args)?;
    let params = sweep_args.apply(config.calibration.clone());

    let sweep = CalibrationSweep::start(
        &config.device,
        config.tracking.clone(),
        params,
        pattern,
        body,
        source,
        altitude,
        None,
    )
    .await?;

    // Run to completion, or stop early on Ctrl-C.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            sweep.stop();
        }
        _ = wait_finished(|| sweep.is_finished()) => {}
    }
    wait_finished(|| sweep.is_finished()).await;
    sweep.join().await;
    Ok(())
}

async fn run_black(config: &Config, source_args: &SourceArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (_, source, altitude) = build_source(config, source_args)?;

    info!("Connecting to the device...");
    let mut client = SolysClient::connect(&config.device).await?;
    let location = prepare_session(&mut client, altitude).await?;
    black_scan(
        &mut client,
        &config.tracking,
        source.as_ref(),
        &location,
        None,
    )
    .await?;
    client.close().await?;
    Ok(())
}

async fn run_home(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Connecting to the device...");
    let mut client = SolysClient::connect(&config.device).await?;
    client.home().await?;
    info!("Home command accepted");
    client.close().await?;
    Ok(())
}

async fn wait_finished(finished: impl Fn() -> bool) {
    while !finished() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
