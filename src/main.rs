//! plate-reader - License plate detection and reading
//!
//! Reads plates from images, video files and camera streams, either as
//! one-shot commands printing JSON or as an HTTP/WebSocket service.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use plate_reader::api::run_server;
use plate_reader::app::PlateReaderApp;
use plate_reader::capture::{iterate_video, iterate_video_source, load_image, VideoSource};
use plate_reader::config::{self, AppConfig, DetectorStrategy};
use plate_reader::shared::UploadResponse;
use plate_reader::storage;
use plate_reader::stream::process_video;

/// plate-reader - License plate recognition
#[derive(Parser, Debug)]
#[command(name = "plate-reader")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Detect and read license plates in images, videos and live streams")]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Region detector: geometric or learned
    #[arg(long, global = true)]
    strategy: Option<DetectorStrategy>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP/WebSocket server
    Serve {
        /// Listen address, overrides the config file
        #[arg(long)]
        bind: Option<String>,
    },
    /// Read plates in a single image
    Image { path: PathBuf },
    /// Read plates in a video file
    Video {
        path: PathBuf,
        /// Analyze every Nth frame, overrides the config file
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Read plates from a camera or stream URL until it ends
    Watch {
        /// Device path or URL, e.g. /dev/video0 or rtsp://host/stream
        source: String,
        /// ffmpeg input format, e.g. v4l2
        #[arg(long)]
        format: Option<String>,
        /// Analyze every Nth frame, overrides the config file
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_or_create_config(args.config.as_deref())?;
    init_logging(&config.logging.level)?;

    if let Some(strategy) = args.strategy {
        config.pipeline.detector_strategy = strategy;
    }

    match args.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            let bind = config.server.bind.clone();
            let app = PlateReaderApp::load(config).await?;
            run_server(app.app_state(), &bind).await?;
        }
        Command::Image { path } => {
            let app = PlateReaderApp::load(config).await?;
            let frame = load_image(&path)?;
            let results = app.pipeline.analyze_frame(&frame)?;
            print_json(&UploadResponse {
                filename: display_name(&path),
                results,
            })?;
        }
        Command::Video { path, interval } => {
            if let Some(interval) = interval {
                config.pipeline.video_sample_interval = interval;
            }
            let interval = config.pipeline.video_sample_interval;
            let app = PlateReaderApp::load(config).await?;

            let pipeline = app.pipeline.clone();
            let video_path = path.clone();
            let results = tokio::task::spawn_blocking(move || {
                let frames = iterate_video(&video_path)?;
                let mut results = Vec::new();
                process_video(&pipeline, frames, interval, |_, detections| {
                    results.extend_from_slice(detections)
                })?;
                Ok::<_, plate_reader::PlateError>(results)
            })
            .await
            .context("Video worker failed")??;

            print_json(&UploadResponse {
                filename: display_name(&path),
                results,
            })?;
        }
        Command::Watch {
            source,
            format,
            interval,
        } => {
            if let Some(interval) = interval {
                config.pipeline.live_sample_interval = interval;
            }
            let interval = config.pipeline.live_sample_interval;
            let app = PlateReaderApp::load(config).await?;

            let source = VideoSource {
                location: source,
                input_format: format,
            };
            let pipeline = app.pipeline.clone();
            let report = tokio::task::spawn_blocking(move || {
                let frames = iterate_video_source(&source)?;
                process_video(&pipeline, frames, interval, |_, detections| {
                    // One JSON line per analyzed frame with plates
                    for detection in detections {
                        if let Err(e) = print_json_line(detection) {
                            warn!("Failed to write detection: {}", e);
                        }
                    }
                })
            })
            .await
            .context("Watch worker failed")??;
            info!("Stream ended after {} frames", report.frames_read);
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over the configured level
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

/// Load configuration from file or create default
fn load_or_create_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        return config::load_config(path);
    }

    let path = storage::default_config_path()?;
    if path.exists() {
        return config::load_config(&path);
    }

    let config = AppConfig::default();
    if let Err(e) = config::save_config(&config, &path) {
        eprintln!("Could not write default config to {:?}: {:#}", path, e);
    }
    Ok(config)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    println!("{}", text);
    Ok(())
}

fn print_json_line<T: serde::Serialize>(value: &T) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, value)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}
