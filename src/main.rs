use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::Parser;
use depthcam::{PipelineConfig, SensorSession, SessionState, SimulatedSensor, StreamMode};

/// Runs the depth camera pipeline against the simulated sensor.
#[derive(Debug, Parser)]
#[command(name = "depthcam", version)]
struct Args {
    /// TOML settings file.
    #[arg(long, env = "DEPTHCAM_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `session.mode`: color, depth or face-overlay.
    #[arg(long)]
    mode: Option<StreamMode>,

    /// Stop after this many seconds; runs until Ctrl-C otherwise.
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Save a still before closing.
    #[arg(long)]
    capture: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = PipelineConfig::load(args.config.as_deref()).context("failed to load config")?;
    if let Some(mode) = args.mode {
        config.session.mode = mode;
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    let running = Arc::new(AtomicBool::new(true));
    let running_flag = running.clone();
    ctrlc::set_handler(move || running_flag.store(false, Ordering::SeqCst))
        .context("failed to install Ctrl-C handler")?;

    let sensor = SimulatedSensor::get_default(config.simulator.clone());
    let mut session = SensorSession::new(sensor, config.session_config())?;
    log::info!("{}", session.status());

    let status = session.toggle().to_string();
    if session.state() != SessionState::Opened {
        anyhow::bail!("failed to open sensor: {status}");
    }
    log::info!("{status}");

    let started = Instant::now();
    let deadline = args.duration_secs.map(Duration::from_secs);
    let mut last_report = Instant::now();
    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        thread::sleep(Duration::from_millis(50));

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            let stats = session.stats();
            log::info!(
                "frames: color {} depth {} body {} face {} (empty {}, failed {}), tracking {:?}, face {}",
                stats.color_frames,
                stats.depth_frames,
                stats.body_frames,
                stats.face_frames,
                stats.empty_frames,
                stats.failed_frames,
                session.tracking_state(),
                session.expression().as_deref().unwrap_or("none"),
            );
        }
    }

    if args.capture {
        let outcome = session.capture().context("failed to capture still")?;
        log::info!("{}", outcome.status_message());
    }

    session.close().context("sensor teardown incomplete")?;
    log::info!("{}", depthcam::session::STATUS_CLOSED);
    Ok(())
}
