//! Headless replay: drive a study run from a timestamped control script.
//!
//! Ticks at a fixed frame rate from t = 0, delivering every script message
//! whose `:at` time has been reached, until the run finishes or the script
//! is exhausted and the tail has elapsed.  Records are written as
//! semicolon-delimited rows.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{debug, info, warn};

use crate::control;
use crate::gesture::GestureId;
use crate::hand::pose::{positions_row, rest_pose, HAND_BONE_COUNT};
use crate::hand::{BonePose, HandPose};
use crate::session::host::{PlaybackDriver, RecordSink, SkeletonSource};
use crate::session::record::{GestureSummary, TickRecord, SUMMARY_HEADER, TICK_HEADER};
use crate::session::{Study, StudyHost};

/// Replay loop configuration.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Ticks per second.
    pub frame_rate: u32,
    /// Length reported for every demonstration clip.
    pub clip_length: Duration,
    /// How long to keep ticking after the last script message.
    pub tail: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            frame_rate: 90,
            clip_length: Duration::from_secs(2),
            tail: Duration::from_secs(5),
        }
    }
}

impl ReplayConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.frame_rate.max(1)
    }
}

// ── Script ─────────────────────────────────────────────────

/// One control message scheduled at a session time.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptEntry {
    pub at: Duration,
    pub line: usize,
    pub raw: String,
}

/// Parse a replay script: one s-expression per line, each carrying `:at`
/// seconds.  Blank lines and `;` comments are skipped.  Entries come back
/// ordered by time, keeping file order for equal times.
pub fn parse_script(text: &str) -> anyhow::Result<Vec<ScriptEntry>> {
    let mut entries = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(';') {
            continue;
        }
        let value = lexpr::from_str(trimmed).with_context(|| format!("script line {line_no}: malformed s-expression"))?;
        let Some(at) = control::get_float(&value, "at") else {
            bail!("script line {line_no}: missing :at");
        };
        let at = Duration::try_from_secs_f64(at).with_context(|| format!("script line {line_no}: invalid :at {at}"))?;
        entries.push(ScriptEntry {
            at,
            line: line_no,
            raw: trimmed.to_string(),
        });
    }
    entries.sort_by_key(|e| e.at);
    Ok(entries)
}

// ── Headless host ──────────────────────────────────────────

/// Host with no headset: a rest-pose skeleton, fixed-length clips, and
/// records written to two row writers.
pub struct HeadlessHost<W: Write> {
    clip_length: Duration,
    rest: HandPose,
    displayed: HandPose,
    ticks: W,
    summaries: W,
    write_error: Option<io::Error>,
}

impl HeadlessHost<BufWriter<File>> {
    /// Create `ticks.csv` and `summary.csv` in `out_dir`.
    pub fn create(out_dir: &Path, clip_length: Duration) -> anyhow::Result<Self> {
        std::fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
        let open = |name: &str| -> anyhow::Result<BufWriter<File>> {
            let path = out_dir.join(name);
            let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
            Ok(BufWriter::new(file))
        };
        let host = Self::new(open("ticks.csv")?, open("summary.csv")?, clip_length)?;
        info!("Writing records to {}", out_dir.display());
        Ok(host)
    }
}

impl<W: Write> HeadlessHost<W> {
    /// Wrap two writers and emit the header rows.
    pub fn new(mut ticks: W, mut summaries: W, clip_length: Duration) -> io::Result<Self> {
        let bones = (0..HAND_BONE_COUNT)
            .map(|i| format!("bone{i}_x;bone{i}_y;bone{i}_z"))
            .collect::<Vec<_>>()
            .join(";");
        writeln!(ticks, "{TICK_HEADER};{bones}")?;
        writeln!(summaries, "{SUMMARY_HEADER}")?;
        let rest = rest_pose(HAND_BONE_COUNT);
        Ok(Self {
            clip_length,
            displayed: rest.clone(),
            rest,
            ticks,
            summaries,
            write_error: None,
        })
    }

    /// Flush both writers and hand them back, reporting the first write
    /// failure seen during the run.
    pub fn into_inner(mut self) -> io::Result<(W, W)> {
        if let Some(e) = self.write_error.take() {
            return Err(e);
        }
        self.ticks.flush()?;
        self.summaries.flush()?;
        Ok((self.ticks, self.summaries))
    }

    fn note_error(&mut self, result: io::Result<()>) {
        if let Err(e) = result {
            warn!("record write failed: {}", e);
            self.write_error.get_or_insert(e);
        }
    }
}

impl<W: Write> PlaybackDriver for HeadlessHost<W> {
    fn play(&mut self, gesture: &GestureId) {
        debug!("headless playback of {}", gesture);
    }

    fn stop(&mut self) {
        self.displayed = self.rest.clone();
    }

    fn current_clip_length(&self) -> Duration {
        self.clip_length
    }

    fn playback_pose(&self) -> HandPose {
        self.rest.clone()
    }
}

impl<W: Write> SkeletonSource for HeadlessHost<W> {
    fn live_pose(&self) -> HandPose {
        self.rest.clone()
    }

    fn apply_pose(&mut self, pose: &[BonePose]) {
        self.displayed = pose.to_vec();
    }
}

impl<W: Write> RecordSink for HeadlessHost<W> {
    fn write_tick(&mut self, record: &TickRecord) {
        let result = writeln!(self.ticks, "{};{}", record.to_row(), positions_row(&self.displayed));
        self.note_error(result);
    }

    fn write_summary(&mut self, summary: &GestureSummary) {
        let result = writeln!(self.summaries, "{}", summary.to_row());
        self.note_error(result);
    }
}

// ── Replay loop ────────────────────────────────────────────

/// What a replay run did.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayOutcome {
    pub frames: u64,
    pub elapsed: Duration,
    pub finished: bool,
    pub dynamic_recognitions: usize,
    pub rejected_messages: usize,
}

/// Run `script` against `study` until the run finishes or the script and
/// its tail are exhausted.
pub fn run<H: StudyHost>(
    study: &mut Study,
    host: &mut H,
    script: &[ScriptEntry],
    config: &ReplayConfig,
) -> anyhow::Result<ReplayOutcome> {
    let dt = config.frame_interval();
    let end = script.last().map(|e| e.at).unwrap_or_default() + config.tail;
    let status_interval = Duration::from_secs(10);

    let mut outcome = ReplayOutcome {
        frames: 0,
        elapsed: Duration::ZERO,
        finished: false,
        dynamic_recognitions: 0,
        rejected_messages: 0,
    };
    let mut now = Duration::ZERO;
    let mut next = 0;
    let mut last_status = Duration::ZERO;
    info!(
        "Replaying {} messages at {} Hz ({:.1}s tail)",
        script.len(),
        config.frame_rate,
        config.tail.as_secs_f64()
    );

    loop {
        let mut pending = Vec::new();
        while let Some(entry) = script.get(next).filter(|e| e.at <= now) {
            let response = control::handle_message(study, host, now, &mut pending, &entry.raw);
            if response.contains(":status :error") {
                warn!("script line {}: {}", entry.line, response);
                outcome.rejected_messages += 1;
            } else {
                debug!("script line {}: {}", entry.line, response);
            }
            next += 1;
        }

        let frame_dt = if outcome.frames == 0 { Duration::ZERO } else { dt };
        let completed = study
            .step(now, frame_dt, &pending, host)
            .with_context(|| format!("study step at {:.3}s", now.as_secs_f64()))?;
        outcome.dynamic_recognitions += completed.len();
        outcome.frames += 1;
        outcome.elapsed = now;

        if study.is_finished() {
            outcome.finished = true;
            info!("Study finished at {:.3}s", now.as_secs_f64());
            break;
        }
        if next >= script.len() && now >= end {
            info!("Script exhausted at {:.3}s", now.as_secs_f64());
            break;
        }
        if now.saturating_sub(last_status) >= status_interval {
            info!("{}", study.status_sexp(now));
            last_status = now;
        }
        now += dt;
    }
    Ok(outcome)
}

// ── Tests ──────────────────────────────────────────────────
