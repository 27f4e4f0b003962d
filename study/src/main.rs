//! gesture-study: headless runner for the VR gesture learning study.
//!
//! Loads the gesture catalog and study story, resolves the plan for one
//! participant and modality, and replays a timestamped control script
//! through the session protocol, writing per-tick and per-gesture records.

mod control;
mod error;
pub mod gesture;
pub mod hand;
mod replay;
pub mod session;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use gesture::GestureCatalog;
use replay::{HeadlessHost, ReplayConfig};
use session::{Study, StudyConfig, StudyStory};

#[derive(Parser, Debug)]
#[command(name = "gesture-study", about = "Headless VR gesture study runner")]
struct Cli {
    /// Gesture catalog (JSON)
    #[arg(long)]
    catalog: PathBuf,

    /// Study story listing each participant's modalities (JSON)
    #[arg(long)]
    story: PathBuf,

    /// Participant number, starting at 1
    #[arg(long)]
    participant: usize,

    /// Modality number, starting at 1
    #[arg(long)]
    modality: usize,

    /// Control script: one `(:at SECONDS :type ...)` message per line
    #[arg(long)]
    script: PathBuf,

    /// Directory for ticks.csv and summary.csv
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Ticks per second
    #[arg(long, default_value_t = 90, value_parser = clap::value_parser!(u32).range(1..))]
    frame_rate: u32,

    /// Demonstration clip length in seconds
    #[arg(long, default_value_t = 2.0)]
    clip_length: f64,

    /// Seconds to keep ticking after the last script message
    #[arg(long, default_value_t = 5.0)]
    tail: f64,

    /// Allow the repeat loop without a successful first attempt
    #[arg(long)]
    no_first_success_gate: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gesture_study=info".into()),
        )
        .init();

    info!("gesture-study v{} starting", env!("CARGO_PKG_VERSION"));

    let catalog = GestureCatalog::load(&cli.catalog)
        .with_context(|| format!("loading catalog {}", cli.catalog.display()))?;
    let story = StudyStory::load(&cli.story)
        .with_context(|| format!("loading story {}", cli.story.display()))?;
    let plan = story
        .plan(cli.participant, cli.modality, &catalog)
        .map_err(|e| {
            error!(kind = e.kind().as_str(), "cannot start study: {}", e);
            e
        })
        .context("resolving study plan")?;

    let config = StudyConfig {
        require_first_success: !cli.no_first_success_gate,
        ..StudyConfig::default()
    };
    info!("Protocol config: {}", config.config_sexp());
    let mut study = Study::new(&catalog, plan, config)?;

    let script_text = std::fs::read_to_string(&cli.script)
        .with_context(|| format!("reading script {}", cli.script.display()))?;
    let script = replay::parse_script(&script_text)?;

    let replay_config = ReplayConfig {
        frame_rate: cli.frame_rate,
        clip_length: Duration::try_from_secs_f64(cli.clip_length).context("invalid --clip-length")?,
        tail: Duration::try_from_secs_f64(cli.tail).context("invalid --tail")?,
    };
    let mut host = HeadlessHost::create(&cli.out_dir, replay_config.clip_length)?;
    let outcome = replay::run(&mut study, &mut host, &script, &replay_config)?;
    host.into_inner().context("writing records")?;

    info!(
        "Replay done: {} frames, {:.3}s, finished: {}, {} dynamic recognitions, {} rejected messages",
        outcome.frames,
        outcome.elapsed.as_secs_f64(),
        outcome.finished,
        outcome.dynamic_recognitions,
        outcome.rejected_messages
    );
    Ok(())
}
