use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use posegate_core::{FaceObservation, FaceValidator, Pose, QualityScorer};
use serde_json::json;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod frames;
mod replay;

use config::Config;

#[derive(Parser)]
#[command(name = "posegate", version, about = "Capture quality and active liveness checks")]
struct Cli {
    /// TOML configuration file (overrides POSEGATE_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Score images as consecutive camera frames, one JSON line per image
    Quality {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Validate face-detector output (a JSON array of faces; "-" reads stdin)
    Validate {
        input: PathBuf,
        /// Also check the first face against a target pose
        #[arg(long, value_enum)]
        pose: Option<PoseArg>,
    },
    /// Run a liveness session against a scripted detector
    Replay {
        /// JSON Lines script of detector responses
        script: PathBuf,
        /// Image used for every frame (default: a synthetic gray frame)
        #[arg(long)]
        frame: Option<PathBuf>,
        /// Offer frames at this interval instead of processing each in turn
        #[arg(long)]
        pace_ms: Option<u64>,
        #[arg(long, default_value_t = 320)]
        width: u32,
        #[arg(long, default_value_t = 240)]
        height: u32,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum PoseArg {
    Front,
    Left,
    Right,
}

impl From<PoseArg> for Pose {
    fn from(arg: PoseArg) -> Self {
        match arg {
            PoseArg::Front => Pose::Front,
            PoseArg::Left => Pose::Left,
            PoseArg::Right => Pose::Right,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Quality { images } => quality(&config, &images),
        Command::Validate { input, pose } => validate(&config, &input, pose.map(Pose::from)),
        Command::Replay {
            script,
            frame,
            pace_ms,
            width,
            height,
        } => {
            let text = std::fs::read_to_string(&script)
                .with_context(|| format!("failed to read script {}", script.display()))?;
            let steps = replay::parse_script(&text)?;
            let frame = match frame {
                Some(path) => frames::load_luma_frame(&path)?,
                None => frames::synthetic_frame(width, height),
            };
            let pace = pace_ms.map(Duration::from_millis);
            let summary = replay::run(&config, steps, frame, pace).await?;
            println!("{}", serde_json::to_string(&json!({ "summary": summary }))?);
            Ok(())
        }
        Command::Config => {
            println!("{}", toml::to_string_pretty(&config.engine)?);
            println!("[session]");
            println!("timeout_secs = {}", config.session_timeout.as_secs());
            println!(
                "detector_timeout_ms = {}",
                config.detector_timeout.as_millis()
            );
            Ok(())
        }
    }
}

fn quality(config: &Config, images: &[PathBuf]) -> Result<()> {
    let thresholds = config.engine.quality;
    let mut scorer = QualityScorer::new(thresholds);
    for path in images {
        let frame = frames::load_luma_frame(path)?;
        let result = scorer.score_frame(&frame);
        let line = json!({
            "image": path.display().to_string(),
            "result": result,
            "quality_percentage": result.quality_percentage(&thresholds),
            "error_message": result.error_message(),
            "consecutive_good_frames": scorer.consecutive_good_frames(),
            "stable": scorer.has_minimum_frames(),
        });
        println!("{line}");
    }
    tracing::info!(frames = scorer.frames_analyzed(), "quality scoring finished");
    Ok(())
}

fn validate(config: &Config, input: &Path, pose: Option<Pose>) -> Result<()> {
    let text = if input == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("failed to read {}", input.display()))?
    };
    let faces: Vec<FaceObservation> =
        serde_json::from_str(&text).context("expected a JSON array of faces")?;

    let validator = FaceValidator::new(config.engine.geometry);
    let result = validator.validate(&faces);
    let mut line = json!({
        "result": result,
        "validation_score": result.validation_score(),
        "issues": result.issues(),
        "error_message": result.error_message(),
    });
    if let (Some(pose), Some(face)) = (pose, faces.first()) {
        line["pose"] = json!(pose);
        line["matches_pose"] = json!(validator.matches_target_pose(face, pose));
    }
    println!("{line}");
    Ok(())
}
