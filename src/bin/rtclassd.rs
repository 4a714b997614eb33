//! rtclassd - real-time camera classifier
//!
//! This daemon:
//! 1. Loads the label table and the model graph
//! 2. Starts the camera pipeline, which pushes frames into the model
//! 3. Refreshes the on-screen label from the latest result on a fixed timer
//! 4. Stops on Ctrl-C or when the camera source goes unhealthy

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rt_classify::{CameraSource, ClassifierConfig, FrameSink, Model, TensorSelector};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(name = "rtclassd", about = "Classify camera frames in real time")]
struct Args {
    /// Config file (TOML, or JSON with a .json extension)
    #[arg(long, env = "RTCLASS_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Camera device, image://<path>, or stub://<name>
    #[arg(short = 'd', long, value_name = "DEVICE")]
    device: Option<String>,

    /// Model graph
    #[arg(short = 'm', long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Label file, one class per line
    #[arg(short = 'l', long, value_name = "PATH")]
    label: Option<PathBuf>,

    /// Overlay tensor: output index or tensor name
    #[arg(long, value_name = "INDEX|NAME")]
    overlay_tensor: Option<String>,

    /// Channel of the overlay tensor to extract
    #[arg(long, value_name = "N")]
    overlay_channel: Option<usize>,

    /// Run without a display window
    #[arg(long)]
    headless: bool,

    /// Label refresh period
    #[arg(long, value_name = "MS")]
    label_interval_ms: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = load_config(&args)?;

    log::info!(
        "rtclassd {} starting: device={} model={} labels={}",
        env!("CARGO_PKG_VERSION"),
        cfg.camera.device,
        cfg.model.model_path.display(),
        cfg.model.label_path.display()
    );

    let model = Arc::new(Model::load(cfg.model.clone())?);
    let mut source = CameraSource::new(cfg.camera.clone())?;
    source.start(Arc::clone(&model) as Arc<dyn FrameSink>)?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;
    }

    let mut last_label_update = Instant::now();
    let mut last_health_log = Instant::now();
    let mut last_label = String::new();

    while running.load(Ordering::SeqCst) {
        if last_label_update.elapsed() >= cfg.label_interval {
            let label = model.current_label();
            source.set_label_text(&label);
            if label != last_label {
                log::debug!("label: {:?}", label);
                last_label = label;
            }
            if let Some(overlay) = model.current_overlay() {
                log::trace!("overlay {}x{} ready", overlay.width(), overlay.width());
            }
            last_label_update = Instant::now();
        }

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let camera = source.stats();
            let frames = model.stats();
            let healthy = source.is_healthy();
            log::info!(
                "camera health={} frames={} device={} published={} discarded={} overlay={}",
                healthy,
                camera.frames_delivered,
                camera.device,
                frames.frames_published,
                frames.frames_discarded,
                model.overlay_enabled()
            );
            if !healthy {
                source.stop();
                return Err(anyhow!("camera source {} is unhealthy", camera.device));
            }
            last_health_log = Instant::now();
        }

        std::thread::sleep(POLL_INTERVAL);
    }

    log::info!("shutting down");
    source.stop();
    Ok(())
}

fn load_config(args: &Args) -> Result<ClassifierConfig> {
    let mut cfg = ClassifierConfig::load_from(args.config.as_deref())?;
    if let Some(device) = &args.device {
        cfg.camera.device = device.clone();
    }
    if let Some(model) = &args.model {
        cfg.model.model_path = model.clone();
    }
    if let Some(label) = &args.label {
        cfg.model.label_path = label.clone();
    }
    if let Some(selector) = &args.overlay_tensor {
        cfg.model.overlay = TensorSelector::parse(selector);
    }
    if let Some(channel) = args.overlay_channel {
        cfg.model.overlay_channel = channel;
    }
    if args.headless {
        cfg.camera.display.sink = None;
    }
    if let Some(ms) = args.label_interval_ms {
        cfg.label_interval = Duration::from_millis(ms);
    }
    cfg.validate()?;
    Ok(cfg)
}
