use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use drowsy_core::{FaceDetector, LANDMARK_INDICES};
use drowsy_hw::{Camera, StillImage};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

mod config;
mod display;
mod pipeline;
mod system;

use config::Config;
use display::{Display, Headless};
use pipeline::DetectionCamera;
use system::{DrowsinessSystem, RunLimits};

#[derive(Parser)]
#[command(name = "drowsy", about = "Driver drowsiness detection: face and eye tracking from a webcam")]
struct Cli {
    /// Path to a TOML config file (default: $DROWSY_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory containing the Haar cascade XML files
    #[arg(long, global = true)]
    cascade_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run live detection from the camera
    Run {
        /// Camera index (/dev/videoN)
        #[arg(short, long)]
        camera: Option<u32>,
        /// Stop after this many processed frames
        #[arg(long)]
        max_frames: Option<u64>,
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
        /// Do not open a preview window
        #[arg(long)]
        headless: bool,
    },
    /// Detect the face and eyes in a still image
    Detect {
        image: PathBuf,
        /// Write the annotated image here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Measure capture and detection throughput
    Bench {
        #[arg(short, long)]
        camera: Option<u32>,
        /// Frames to measure (default: bench_frames from config)
        #[arg(short, long)]
        frames: Option<usize>,
    },
    /// List V4L2 capture devices
    Devices,
    /// Initialize the system and print its status
    Status {
        #[arg(short, long)]
        camera: Option<u32>,
    },
    /// Print the landmark index table
    Indices,
    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, ignored) = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.cascade_dir {
        config.cascade_dir = dir;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    for o in &ignored {
        tracing::warn!(key = o.key, value = %o.value, "ignoring unparseable override");
    }

    match cli.command {
        Commands::Run {
            camera,
            max_frames,
            duration,
            headless,
        } => {
            config.select_camera(camera);
            let mut system = build_system(&config, headless)?;
            let summary = system.start_detection(RunLimits {
                max_frames,
                duration: duration.map(Duration::from_secs),
            });
            tracing::debug!(
                last_face = ?system.get_camera_module().last_face_region(),
                reason = ?summary.stop_reason,
                "run finished"
            );
            println!(
                "Processed {} frames in {:.1}s ({:.1} fps), face in {} ({:.1}%)",
                summary.frames_processed,
                summary.elapsed_secs,
                summary.fps(),
                summary.frames_with_face,
                percent(summary.frames_with_face, summary.frames_processed),
            );
        }
        Commands::Detect { image, output } => detect_image(&config, &image, output.as_deref())?,
        Commands::Bench { camera, frames } => {
            config.select_camera(camera);
            let frames = frames.unwrap_or(config.bench_frames);
            bench(&config, frames)?;
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Status { camera } => {
            config.select_camera(camera);
            let mut system = build_system(&config, true)?;
            let status = system.get_system_status();
            system.stop_detection();
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Indices => {
            let table: serde_json::Map<String, serde_json::Value> = LANDMARK_INDICES
                .iter()
                .map(|(name, idx)| (name.to_string(), (*idx).into()))
                .collect();
            println!("{}", serde_json::to_string_pretty(&table)?);
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config).context("failed to serialize config")?);
        }
    }

    Ok(())
}

fn load_detector(config: &Config) -> Result<FaceDetector> {
    FaceDetector::load(&config.cascade_dir, config.detector_options())
        .context("failed to initialize face detection")
}

/// Open the camera, load the cascades and discard warmup frames.
fn open_pipeline(config: &Config, display: Box<dyn Display>) -> Result<DetectionCamera> {
    let settings = config.camera_settings();
    let camera = Camera::open(&settings)
        .with_context(|| format!("failed to open camera {}", settings.device_path()))?;
    let card = camera.card_name().unwrap_or_else(|| "unknown".to_string());
    tracing::info!(
        device = %camera.device_path,
        width = camera.width,
        height = camera.height,
        card = %card,
        "camera opened"
    );

    let detector = load_detector(config)?;
    let mut pipeline = DetectionCamera::new(Box::new(camera), detector, display);
    pipeline
        .warm_up(config.warmup_frames)
        .context("camera failed during warmup")?;
    Ok(pipeline)
}

fn build_system(config: &Config, headless: bool) -> Result<DrowsinessSystem> {
    let pipeline = open_pipeline(config, make_display(config, headless))?;
    Ok(DrowsinessSystem::new(pipeline, config.frame_skip))
}

#[cfg(feature = "window")]
fn make_display(config: &Config, headless: bool) -> Box<dyn Display> {
    if headless {
        Box::new(Headless)
    } else {
        Box::new(display::WindowDisplay::new(&config.window_name, config.target_fps))
    }
}

#[cfg(not(feature = "window"))]
fn make_display(_config: &Config, headless: bool) -> Box<dyn Display> {
    if !headless {
        tracing::warn!("built without the window feature, running headless");
    }
    Box::new(Headless)
}

fn detect_image(config: &Config, image: &Path, output: Option<&Path>) -> Result<()> {
    let source = StillImage::open(image).with_context(|| format!("failed to load {}", image.display()))?;
    let detector = load_detector(config)?;
    let mut pipeline = DetectionCamera::new(Box::new(source), detector, Box::new(Headless));

    let capture = pipeline.capture_and_detect()?;
    pipeline.release();

    if let Some(path) = output {
        let Some(img) = capture.frame.to_rgb_image() else {
            bail!("annotated frame has an invalid buffer");
        };
        img.save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "annotated image written");
    }

    let report = serde_json::json!({
        "face_detected": capture.face_detected,
        "face": capture.face,
        "landmarks": capture.landmarks,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn bench(config: &Config, frames: usize) -> Result<()> {
    if frames == 0 {
        bail!("bench needs at least one frame");
    }
    let mut pipeline = open_pipeline(config, Box::new(Headless))?;

    let mut with_face = 0u64;
    let mut with_landmarks = 0u64;
    let started = Instant::now();
    for _ in 0..frames {
        let capture = pipeline.capture_and_detect()?;
        with_face += u64::from(capture.face_detected);
        with_landmarks += u64::from(capture.landmarks.is_some());
    }
    let elapsed = started.elapsed();
    pipeline.release();

    let secs = elapsed.as_secs_f64();
    println!("Frames:        {frames}");
    println!("Total:         {:.2}s", secs);
    println!("Throughput:    {:.1} fps", frames as f64 / secs.max(f64::EPSILON));
    println!("Per frame:     {:.1} ms", secs * 1000.0 / frames as f64);
    println!(
        "Face found:    {with_face}/{frames} ({:.1}%)",
        percent(with_face, frames as u64)
    );
    println!("Eyes found:    {with_landmarks}/{frames}");
    Ok(())
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}
