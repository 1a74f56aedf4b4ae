use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::time::{interval, Duration, Instant};

use motion_balance_rs::compensation::{CompensationEngine, RenderHandle};
use motion_balance_rs::live_status::{LiveStatus, SessionStats};
use motion_balance_rs::safety::{LogFeedbackSink, SafetyMonitor};
use motion_balance_rs::sampler::MotionSampler;
use motion_balance_rs::settings::{FilterSettings, MotionPreset, PipelineConfig};
use motion_balance_rs::sim::{FrameCounter, LoopbackRadio, SimulatedBattery, SimulatedSensor};
use motion_balance_rs::transport::{Advertiser, LinkHandle, Scanner, TokioScheduler};
use motion_balance_rs::types::ScreenBounds;

#[derive(Parser, Debug)]
#[command(name = "motion_balance")]
#[command(about = "Motion compensation pipeline over a simulated sensor and loopback radio", long_about = None)]
struct Args {
    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(value_name = "SECONDS", default_value = "30")]
    duration: u64,

    /// Settings preset, ignored when --settings is given
    #[arg(long, value_enum, default_value = "moderate")]
    preset: MotionPreset,

    /// FilterSettings JSON file
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Render clock in Hz
    #[arg(long, default_value = "60")]
    render_hz: f64,

    /// Initial simulated battery level (0.0 - 1.0)
    #[arg(long, default_value = "1.0")]
    battery: f64,

    /// Seed for the simulated sensor and marker placement
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Collect a calibration batch before streaming
    #[arg(long)]
    calibrate: bool,

    /// Screen size in points
    #[arg(long, default_value = "1920")]
    width: f64,
    #[arg(long, default_value = "1080")]
    height: f64,

    /// Directory for live_status.json
    #[arg(long, default_value = "motion_balance_status")]
    status_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let settings = match &args.settings {
        Some(path) => FilterSettings::from_json_file(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => args.preset.settings(),
    };
    anyhow::ensure!(
        args.render_hz.is_finite() && args.render_hz > 0.0,
        "render rate must be positive"
    );
    let config = PipelineConfig {
        render_interval: Duration::from_secs_f64(1.0 / args.render_hz),
        ..PipelineConfig::default()
    };
    let bounds = ScreenBounds::new(args.width, args.height)?;
    std::fs::create_dir_all(&args.status_dir)?;
    let status_path = args.status_dir.join("live_status.json");

    log::info!("Motion Balance starting");
    log::info!("  Duration: {} seconds (0=continuous)", args.duration);
    log::info!("  Settings: {:?}", settings);
    log::info!("  Status file: {}", status_path.display());

    // Sender side
    let radio = LoopbackRadio::pair();
    let battery = SimulatedBattery::new(args.battery);
    let safety = SafetyMonitor::new(&config, Box::new(LogFeedbackSink));
    let mut sampler = MotionSampler::new(
        Box::new(SimulatedSensor::new(args.seed)),
        settings.clone(),
        &config,
    )
    .with_safety(safety)
    .with_battery_probe(Box::new(battery.clone()));

    let (sched, timers) = TokioScheduler::channel();
    let advertiser = Advertiser::new(radio.peripheral, sched, &config);
    let mut sender_link = LinkHandle::spawn(
        advertiser,
        radio.peripheral_events,
        timers,
        Some(sampler.samples()),
    );

    // Receiver side
    let (sched, timers) = TokioScheduler::channel();
    let scanner = Scanner::new(radio.central, sched, &config);
    let mut receiver_link = LinkHandle::spawn(scanner, radio.central_events, timers, None);

    let frames = FrameCounter::new();
    let engine = CompensationEngine::new(settings, bounds, config.velocity_gain, args.seed);
    let mut render = RenderHandle::spawn(
        engine,
        receiver_link.inbound(),
        Box::new(frames.clone()),
        config.render_interval,
    );

    sampler.start()?;

    if args.calibrate {
        log::info!("Calibrating ({} samples)...", config.calibration_quota);
        let batch = sampler
            .start_calibration()
            .await
            .context("calibration cancelled")?;
        let n = batch.len().max(1) as f64;
        let bias_x = batch.iter().map(|s| s.rotation_rate_x).sum::<f64>() / n;
        let bias_y = batch.iter().map(|s| s.rotation_rate_y).sum::<f64>() / n;
        log::info!("Calibration done: rotation bias x={:.4} y={:.4}", bias_x, bias_y);
    }

    let started = Instant::now();
    let deadline = (args.duration > 0).then(|| started + Duration::from_secs(args.duration));
    let mut status_tick = interval(Duration::from_secs(1));
    let sampler_status = sampler.status();
    let render_snapshot = render.snapshot();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, stopping...");
                break;
            }
            _ = async {
                match deadline {
                    Some(d) => tokio::time::sleep_until(d).await,
                    None => std::future::pending().await,
                }
            } => {
                log::info!("Duration reached, stopping...");
                break;
            }
            _ = status_tick.tick() => {
                let sender_stats = *sender_link.stats().borrow();
                let receiver_stats = *receiver_link.stats().borrow();
                let mut status = LiveStatus::new()
                    .with_sampler(&sampler_status.borrow())
                    .with_compensation(&render_snapshot.borrow());
                status.uptime_seconds = started.elapsed().as_secs();
                status.safety = sampler.safety_status().map(|s| s.message().to_string()).unwrap_or_default();
                status.wellbeing = sampler.wellbeing_status().map(|w| w.message()).unwrap_or_default();
                status.advertiser_state = sender_link.state().borrow().to_string();
                status.scanner_state = receiver_link.state().borrow().to_string();
                status.advertiser_error = sender_link.last_error().borrow().as_ref().map(|e| e.to_string());
                status.scanner_error = receiver_link.last_error().borrow().as_ref().map(|e| e.to_string());
                status.session = SessionStats::collect(&sampler.stats(), &sender_stats, &receiver_stats);

                if let Err(e) = status.save(&status_path) {
                    log::warn!("Failed to write live status: {}", e);
                }
                log::info!(
                    "[{}s] sender={} receiver={} sent={} received={} frames={}",
                    status.uptime_seconds,
                    status.advertiser_state,
                    status.scanner_state,
                    status.session.samples_sent,
                    status.session.samples_received,
                    frames.stats().frames,
                );
            }
        }
    }

    // Sender first so nothing is in flight when the receiver goes down
    sampler.stop().await;
    sender_link.shutdown().await;
    receiver_link.shutdown().await;
    render.shutdown().await;

    let final_stats = SessionStats::collect(
        &sampler.stats(),
        &sender_link.stats().borrow(),
        &receiver_link.stats().borrow(),
    );
    println!("{}", serde_json::to_string_pretty(&final_stats)?);
    Ok(())
}
