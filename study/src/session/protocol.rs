//! Session protocol state machine.
//!
//! Walks one participant through the four gestures of a plan.  Each gesture
//! goes Idle → ShowTechnique → FirstPerform → Repetitions and back to Idle
//! for the next one; after the last gesture the run is Finished.
//!
//! ShowTechnique replays the demonstration clip in a loop.  With the
//! override technique the playback replaces the participant's hand, so a
//! short pose blend hands it back at the end of every clip, and recognition
//! is dropped while that blend runs.  FirstPerform opens one expecting
//! window; a timeout closes it with a missed marker, and a later correct
//! performance still counts until the experimenter moves on.  Repetitions
//! alternates a neutral rest window with an expecting window until the
//! repetition target is reached.
//!
//! All time is a `Duration` since session start passed in by the caller,
//! and deadlines are plain data checked by `tick`.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::config::StudyConfig;
use super::host::StudyHost;
use super::record::{GestureSummary, SuccessCounts, TickRecord};
use super::story::{StudyPlan, Technique};
use crate::error::StudyError;
use crate::gesture::{GestureCatalog, GestureDefinition, GestureId};
use crate::hand::PresentationBlender;

/// Whether an expecting window that times out still counts as a repetition.
pub const TIMEOUT_COUNTS_AS_REPETITION: bool = true;

const INSTRUCTION_IDLE: &str = "Press show to see the next gesture";
const INSTRUCTION_WATCH: &str = "Watch the demonstration";
const INSTRUCTION_PERFORM: &str = "Perform the gesture";
const INSTRUCTION_NEUTRAL: &str = "Return to the neutral position";
const INSTRUCTION_DONE: &str = "Thank you, the session is complete";

// ── Phase and UI state ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    ShowTechnique,
    FirstPerform,
    Repetitions,
    Finished,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ShowTechnique => "show-technique",
            Self::FirstPerform => "first-perform",
            Self::Repetitions => "repetitions",
            Self::Finished => "finished",
        }
    }
}

/// Feedback marker shown next to the participant's hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Hidden,
    Waiting,
    Detected,
    Missed,
}

impl Marker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hidden => "hidden",
            Self::Waiting => "waiting",
            Self::Detected => "detected",
            Self::Missed => "missed",
        }
    }
}

/// What the experimenter panel and participant overlay should display.
#[derive(Debug, Clone, PartialEq)]
pub struct UiState {
    pub show_enabled: bool,
    pub try_enabled: bool,
    pub repeat_enabled: bool,
    pub marker: Marker,
    pub counter_text: String,
    pub instruction: &'static str,
}

impl UiState {
    fn idle() -> Self {
        Self {
            show_enabled: true,
            try_enabled: false,
            repeat_enabled: false,
            marker: Marker::Hidden,
            counter_text: String::new(),
            instruction: INSTRUCTION_IDLE,
        }
    }

    fn finished() -> Self {
        Self {
            show_enabled: false,
            instruction: INSTRUCTION_DONE,
            ..Self::idle()
        }
    }
}

/// Deadlines of the self-rescheduling demonstration loop.
#[derive(Debug, Clone)]
struct PlaybackLoop {
    next_play_at: Duration,
    blend_at: Option<Duration>,
    handback_at: Option<Duration>,
}

fn sexp_secs(d: Option<Duration>) -> String {
    match d {
        Some(d) => format!("{:.3}", d.as_secs_f64()),
        None => "nil".to_string(),
    }
}

fn sexp_bool(b: bool) -> &'static str {
    if b {
        "t"
    } else {
        "nil"
    }
}

// ── Protocol ───────────────────────────────────────────────

pub struct SessionProtocol {
    config: StudyConfig,
    plan: StudyPlan,
    /// Definitions parallel to `plan.gestures`, resolved at construction.
    sequence: Vec<GestureDefinition>,
    blender: PresentationBlender,

    phase: Phase,
    /// 1-based position in the plan; past the end once finished.
    current_gesture_index: usize,
    current_gesture: GestureId,
    current_definition: GestureDefinition,

    repetition_count: u32,
    is_expecting_gesture: bool,
    gesture_deadline: Option<Duration>,
    neutral_deadline: Option<Duration>,
    last_static_detection: HashMap<GestureId, Duration>,

    playback: Option<PlaybackLoop>,
    is_animating: bool,

    show_repeats: u32,
    successes: SuccessCounts,
    show_started_at: Option<Duration>,
    first_perform_started_at: Option<Duration>,
    time_to_first_attempt: Option<Duration>,
    time_to_repetitions: Option<Duration>,

    ui: UiState,
}

impl SessionProtocol {
    /// Resolve the plan against `catalog` and enter Idle on the first gesture.
    pub fn new(catalog: &GestureCatalog, plan: StudyPlan, config: StudyConfig) -> Result<Self, StudyError> {
        let sequence = plan
            .gestures
            .iter()
            .map(|g| catalog.resolve(g).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        let current_gesture = plan.gestures[0].clone();
        let current_definition = sequence[0].clone();

        let mut protocol = Self {
            blender: PresentationBlender::new(config.blend_duration),
            config,
            plan,
            sequence,
            phase: Phase::Idle,
            current_gesture_index: 0,
            current_gesture,
            current_definition,
            repetition_count: 0,
            is_expecting_gesture: false,
            gesture_deadline: None,
            neutral_deadline: None,
            last_static_detection: HashMap::new(),
            playback: None,
            is_animating: false,
            show_repeats: 0,
            successes: SuccessCounts::default(),
            show_started_at: None,
            first_perform_started_at: None,
            time_to_first_attempt: None,
            time_to_repetitions: None,
            ui: UiState::idle(),
        };
        protocol.enter_idle();
        Ok(protocol)
    }

    // ── Commands ───────────────────────────────────────────

    /// Start (or restart) the demonstration of the current gesture.
    pub fn advance_to_show(&mut self, now: Duration) -> bool {
        if !matches!(self.phase, Phase::Idle | Phase::ShowTechnique) {
            warn!("advance-show ignored in phase {}", self.phase.as_str());
            return false;
        }
        self.clear_timers();
        self.phase = Phase::ShowTechnique;
        self.show_repeats += 1;
        self.show_started_at.get_or_insert(now);
        self.playback = Some(PlaybackLoop {
            next_play_at: now,
            blend_at: None,
            handback_at: None,
        });
        self.ui.try_enabled = true;
        self.ui.instruction = INSTRUCTION_WATCH;
        info!(
            "ShowTechnique: {} via {} (show #{})",
            self.current_gesture,
            self.plan.technique.as_str(),
            self.show_repeats
        );
        true
    }

    /// Stop the demonstration and ask for a first attempt.
    pub fn advance_to_try<H: StudyHost>(&mut self, now: Duration, host: &mut H) -> bool {
        if self.phase != Phase::ShowTechnique {
            warn!("advance-try ignored in phase {}", self.phase.as_str());
            return false;
        }
        self.clear_timers();
        host.stop();
        self.phase = Phase::FirstPerform;
        if self.time_to_first_attempt.is_none() {
            self.time_to_first_attempt = self.show_started_at.map(|t| now.saturating_sub(t));
        }
        self.first_perform_started_at.get_or_insert(now);
        self.ui.repeat_enabled = !self.config.require_first_success;
        self.open_expecting_window(now);
        info!(
            "FirstPerform: {} ({:.1}s window)",
            self.current_gesture,
            self.expecting_window().as_secs_f64()
        );
        true
    }

    /// Enter the repeat loop.  Refused until the first attempt succeeded,
    /// unless the gate is disabled.
    pub fn advance_to_repeat(&mut self, now: Duration) -> bool {
        if self.phase != Phase::FirstPerform {
            warn!("advance-repeat ignored in phase {}", self.phase.as_str());
            return false;
        }
        if self.config.require_first_success && self.successes.first_perform == 0 {
            warn!("advance-repeat ignored: {} not performed yet", self.current_gesture);
            return false;
        }
        self.clear_timers();
        self.phase = Phase::Repetitions;
        self.repetition_count = 0;
        self.time_to_repetitions = self.first_perform_started_at.map(|t| now.saturating_sub(t));
        self.ui.show_enabled = false;
        self.ui.try_enabled = false;
        self.ui.repeat_enabled = false;
        self.ui.counter_text = self.counter_text();
        self.open_neutral_window(now);
        info!(
            "Repetitions: {} ({} trials)",
            self.current_gesture, self.config.max_repetitions
        );
        true
    }

    // ── Events ─────────────────────────────────────────────

    /// Handle a recognized gesture (static or completed dynamic).
    ///
    /// Returns `true` when it counted as a correct performance.
    pub fn on_recognize<H: StudyHost>(&mut self, gesture: &GestureId, now: Duration, host: &mut H) -> bool {
        if self.blender.is_active(now) {
            debug!("Dropping {} during hand-back blend", gesture);
            return false;
        }
        match self.phase {
            Phase::Idle | Phase::Finished => return false,
            Phase::Repetitions if !self.is_expecting_gesture => return false,
            _ => {}
        }

        let is_target = *gesture == self.current_gesture;
        if is_target && self.current_definition.is_static() {
            if let Some(&last) = self.last_static_detection.get(gesture) {
                if now < last + self.config.static_debounce {
                    debug!("Debounced {} at {:.3}s", gesture, now.as_secs_f64());
                    return false;
                }
            }
            self.last_static_detection.insert(gesture.clone(), now);
        }

        host.write_tick(&self.tick_record(now, Some(gesture.clone())));
        if !is_target {
            debug!("Recognized {} while expecting {}", gesture, self.current_gesture);
            return false;
        }

        match self.phase {
            Phase::ShowTechnique => {
                self.successes.show += 1;
                debug!("{} performed during demonstration", gesture);
            }
            Phase::FirstPerform => {
                self.successes.first_perform += 1;
                self.is_expecting_gesture = false;
                self.gesture_deadline = None;
                self.ui.marker = Marker::Detected;
                self.ui.repeat_enabled = true;
                info!("First attempt at {} succeeded", gesture);
            }
            Phase::Repetitions => {
                self.successes.repetitions += 1;
                self.finish_trial(now, true);
                self.check_repetitions_done(host);
            }
            Phase::Idle | Phase::Finished => {}
        }
        true
    }

    /// Advance timers: the demonstration loop, the blend, window timeouts.
    /// Writes one tick record unless the run is finished.
    pub fn tick<H: StudyHost>(&mut self, now: Duration, host: &mut H) -> Result<(), StudyError> {
        match self.phase {
            Phase::ShowTechnique => self.drive_playback(now, host)?,
            Phase::FirstPerform => {
                if self.window_expired(now) {
                    debug!("First attempt at {} timed out at {:.3}s", self.current_gesture, now.as_secs_f64());
                    self.is_expecting_gesture = false;
                    self.gesture_deadline = None;
                    self.ui.marker = Marker::Missed;
                }
            }
            Phase::Repetitions => {
                if self.is_expecting_gesture {
                    if self.window_expired(now) {
                        self.finish_trial(now, false);
                    }
                } else if self.neutral_deadline.is_some_and(|d| now > d) {
                    self.open_expecting_window(now);
                }
                self.check_repetitions_done(host);
            }
            Phase::Idle | Phase::Finished => {}
        }

        if self.blender.is_active(now) {
            host.apply_pose(&self.blender.sample(now));
        }
        if self.phase != Phase::Finished {
            host.write_tick(&self.tick_record(now, None));
        }
        Ok(())
    }

    // ── Internals ──────────────────────────────────────────

    fn drive_playback<H: StudyHost>(&mut self, now: Duration, host: &mut H) -> Result<(), StudyError> {
        let Some(playback) = self.playback.as_mut() else {
            return Ok(());
        };

        if now >= playback.next_play_at {
            host.play(&self.current_gesture);
            let clip = host.current_clip_length();
            playback.next_play_at = now + clip + self.config.replay_delay;
            playback.handback_at = Some(now + clip);
            playback.blend_at = (self.plan.technique == Technique::Override)
                .then(|| now + clip.saturating_sub(self.config.blend_lead));
            self.is_animating = true;
            debug!(
                "Playing {} ({:.2}s clip), next at {:.2}s",
                self.current_gesture,
                clip.as_secs_f64(),
                playback.next_play_at.as_secs_f64()
            );
        }

        if playback.blend_at.is_some_and(|t| now >= t) {
            playback.blend_at = None;
            self.blender
                .begin(host.playback_pose(), host.live_pose(), now)?;
        }

        if playback.handback_at.is_some_and(|t| now >= t) {
            playback.handback_at = None;
            host.stop();
            self.is_animating = false;
            debug!("Demonstration ended, hand back to live tracking");
        }
        Ok(())
    }

    fn expecting_window(&self) -> Duration {
        self.current_definition
            .expecting_window(self.config.static_timeout)
    }

    fn window_expired(&self, now: Duration) -> bool {
        self.is_expecting_gesture && self.gesture_deadline.is_some_and(|d| now > d)
    }

    fn open_expecting_window(&mut self, now: Duration) {
        self.is_expecting_gesture = true;
        self.gesture_deadline = Some(now + self.expecting_window());
        self.neutral_deadline = None;
        self.ui.marker = Marker::Waiting;
        self.ui.instruction = INSTRUCTION_PERFORM;
    }

    fn open_neutral_window(&mut self, now: Duration) {
        self.is_expecting_gesture = false;
        self.gesture_deadline = None;
        self.neutral_deadline = Some(now + self.config.neutral_duration);
        self.ui.instruction = INSTRUCTION_NEUTRAL;
    }

    /// Close a repeat-loop expecting window and rest.
    fn finish_trial(&mut self, now: Duration, success: bool) {
        if success || TIMEOUT_COUNTS_AS_REPETITION {
            self.repetition_count += 1;
        }
        self.ui.marker = if success { Marker::Detected } else { Marker::Missed };
        self.ui.counter_text = self.counter_text();
        debug!(
            "Trial {} of {} {} at {:.3}s",
            self.repetition_count,
            self.current_gesture,
            if success { "succeeded" } else { "timed out" },
            now.as_secs_f64()
        );
        self.open_neutral_window(now);
    }

    fn check_repetitions_done<H: StudyHost>(&mut self, host: &mut H) {
        if self.phase != Phase::Repetitions || self.repetition_count < self.config.max_repetitions {
            return;
        }
        let summary = self.summary();
        host.write_summary(&summary);
        info!(
            "Completed {}: {}/{} repetitions recognized",
            self.current_gesture, self.successes.repetitions, self.repetition_count
        );
        self.enter_idle();
    }

    /// Move to the next gesture of the plan, or finish the run.
    fn enter_idle(&mut self) {
        self.clear_timers();
        self.current_gesture_index += 1;
        self.repetition_count = 0;
        self.show_repeats = 0;
        self.successes = SuccessCounts::default();
        self.show_started_at = None;
        self.first_perform_started_at = None;
        self.time_to_first_attempt = None;
        self.time_to_repetitions = None;
        self.last_static_detection.clear();

        let slot = self.current_gesture_index - 1;
        let next = self.plan.gestures.get(slot).zip(self.sequence.get(slot));
        let Some((gesture, definition)) = next.map(|(g, d)| (g.clone(), d.clone())) else {
            self.phase = Phase::Finished;
            self.ui = UiState::finished();
            info!(
                "Study run complete for participant {} modality {}",
                self.plan.participant, self.plan.modality
            );
            return;
        };

        self.current_gesture = gesture;
        self.current_definition = definition;
        self.phase = Phase::Idle;
        self.ui = UiState::idle();
        info!(
            "Idle: gesture {}/{} is {} ({}){}",
            self.current_gesture_index,
            self.plan.gestures.len(),
            self.current_gesture,
            self.current_definition.kind_str(),
            if self.is_training() { " [training]" } else { "" }
        );
    }

    /// Drop every deadline, the playback loop and any blend.
    fn clear_timers(&mut self) {
        self.is_expecting_gesture = false;
        self.gesture_deadline = None;
        self.neutral_deadline = None;
        self.playback = None;
        self.is_animating = false;
        self.blender.cancel();
    }

    fn counter_text(&self) -> String {
        format!("{}/{}", self.repetition_count, self.config.max_repetitions)
    }

    fn tick_record(&self, now: Duration, detected: Option<GestureId>) -> TickRecord {
        TickRecord {
            participant: self.plan.participant,
            modality: self.plan.modality,
            technique: self.plan.technique,
            timestamp: now,
            is_training: self.is_training(),
            phase: self.phase,
            is_animating: self.is_animating,
            repetition_count: self.repetition_count,
            show_repeats: self.show_repeats,
            current_gesture: self.current_gesture.clone(),
            detected,
        }
    }

    fn summary(&self) -> GestureSummary {
        GestureSummary {
            participant: self.plan.participant,
            modality: self.plan.modality,
            technique: self.plan.technique,
            gesture: self.current_gesture.clone(),
            is_training: self.is_training(),
            show_repeats: self.show_repeats,
            time_to_first_attempt: self.time_to_first_attempt,
            time_to_repetitions: self.time_to_repetitions,
            successes: self.successes,
        }
    }

    // ── Accessors ──────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    pub fn current_gesture(&self) -> &GestureId {
        &self.current_gesture
    }

    pub fn current_gesture_index(&self) -> usize {
        self.current_gesture_index
    }

    /// The first gesture of a run is the training gesture.
    pub fn is_training(&self) -> bool {
        self.current_gesture_index == 1
    }

    pub fn repetition_count(&self) -> u32 {
        self.repetition_count
    }

    pub fn is_expecting_gesture(&self) -> bool {
        self.is_expecting_gesture
    }

    pub fn gesture_deadline(&self) -> Option<Duration> {
        self.gesture_deadline
    }

    pub fn neutral_deadline(&self) -> Option<Duration> {
        self.neutral_deadline
    }

    pub fn is_animating(&self) -> bool {
        self.is_animating
    }

    pub fn is_blending(&self, now: Duration) -> bool {
        self.blender.is_active(now)
    }

    pub fn show_repeats(&self) -> u32 {
        self.show_repeats
    }

    pub fn successes(&self) -> SuccessCounts {
        self.successes
    }

    pub fn ui(&self) -> &UiState {
        &self.ui
    }

    pub fn config(&self) -> &StudyConfig {
        &self.config
    }

    /// Generate s-expression for status queries.
    pub fn status_sexp(&self, now: Duration) -> String {
        format!(
            "(:phase :{} :gesture \"{}\" :kind :{} :index {} :of {} :technique :{} :training {} :repetitions {} :expecting {} :deadline {} :neutral {} :animating {} :blending {} :show-repeats {} :marker :{} :successes (:show {} :first-perform {} :repetitions {}))",
            self.phase.as_str(),
            self.current_gesture,
            self.current_definition.kind_str(),
            self.current_gesture_index,
            self.plan.gestures.len(),
            self.plan.technique.as_str(),
            sexp_bool(self.is_training()),
            self.repetition_count,
            sexp_bool(self.is_expecting_gesture),
            sexp_secs(self.gesture_deadline),
            sexp_secs(self.neutral_deadline),
            sexp_bool(self.is_animating),
            sexp_bool(self.blender.is_active(now)),
            self.show_repeats,
            self.ui.marker.as_str(),
            self.successes.show,
            self.successes.first_perform,
            self.successes.repetitions,
        )
    }
}

// ── Test helpers ───────────────────────────────────────────

#[cfg(test)]
pub(crate) fn test_plan(technique: Technique) -> StudyPlan {
    use crate::gesture::catalog::test_catalog;
    StudyPlan::new(
        1,
        1,
        technique,
        [
            GestureId::from("training"),
            GestureId::from("g2"),
            GestureId::from("g3"),
            GestureId::from("g5"),
        ],
        &test_catalog(),
    )
    .unwrap()
}

// ── Tests ──────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::catalog::test_catalog;
    use crate::hand::pose::{BonePose, HAND_BONE_COUNT};
    use crate::session::host::RecordingHost;
    use glam::{Quat, Vec3};

    const TICK_MS: u64 = 100;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn id(s: &str) -> GestureId {
        GestureId::from(s)
    }

    fn protocol_with(technique: Technique, config: StudyConfig) -> SessionProtocol {
        SessionProtocol::new(&test_catalog(), test_plan(technique), config).unwrap()
    }

    fn protocol(technique: Technique) -> SessionProtocol {
        protocol_with(technique, StudyConfig::default())
    }

    fn host() -> RecordingHost {
        RecordingHost::new(Duration::from_secs(2))
    }

    /// Tick `n` times at a fixed step.
    fn advance(p: &mut SessionProtocol, host: &mut RecordingHost, now: &mut Duration, n: usize) {
        for _ in 0..n {
            *now += ms(TICK_MS);
            p.tick(*now, host).unwrap();
        }
    }

    /// Drive the current gesture from Idle through its repeat loop,
    /// recognizing the target whenever it is expected.
    fn run_gesture(p: &mut SessionProtocol, host: &mut RecordingHost, now: &mut Duration) {
        let target = p.current_gesture().clone();
        assert!(p.advance_to_show(*now));
        advance(p, host, now, 10);
        assert!(p.advance_to_try(*now, host));
        assert!(p.on_recognize(&target, *now, host));
        assert!(p.advance_to_repeat(*now));
        while p.phase() == Phase::Repetitions {
            advance(p, host, now, 1);
            if p.is_expecting_gesture() {
                p.on_recognize(&target, *now, host);
            }
        }
    }

    /// Bring the protocol to the start of the repeat loop for gesture 1.
    fn enter_repetitions(p: &mut SessionProtocol, host: &mut RecordingHost, now: &mut Duration) {
        let target = p.current_gesture().clone();
        p.advance_to_show(*now);
        advance(p, host, now, 5);
        p.advance_to_try(*now, host);
        p.on_recognize(&target, *now, host);
        assert!(p.advance_to_repeat(*now));
    }

    #[test]
    fn test_starts_idle_on_training_gesture() {
        let p = protocol(Technique::Ghost);
        assert_eq!(p.phase(), Phase::Idle);
        assert_eq!(p.current_gesture_index(), 1);
        assert_eq!(p.current_gesture(), &id("training"));
        assert!(p.is_training());
        assert!(p.ui().show_enabled);
        assert!(!p.ui().try_enabled);
    }

    #[test]
    fn test_unknown_gesture_in_plan_rejected() {
        let plan = test_plan(Technique::Ghost);
        let smaller = GestureCatalog::builder()
            .static_gesture("training", 0.1)
            .build()
            .unwrap();
        let err = SessionProtocol::new(&smaller, plan, StudyConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, StudyError::UnknownGesture(_)));
    }

    #[test]
    fn test_commands_ignored_out_of_phase() {
        let mut p = protocol(Technique::Ghost);
        let mut h = host();
        assert!(!p.advance_to_try(Duration::ZERO, &mut h));
        assert!(!p.advance_to_repeat(Duration::ZERO));
        assert_eq!(p.phase(), Phase::Idle);
        assert_eq!(h.stops, 0);

        assert!(p.advance_to_show(Duration::ZERO));
        assert!(!p.advance_to_repeat(Duration::ZERO));
        assert_eq!(p.phase(), Phase::ShowTechnique);
    }

    #[test]
    fn test_idle_ignores_recognition() {
        let mut p = protocol(Technique::Ghost);
        let mut h = host();
        assert!(!p.on_recognize(&id("training"), ms(500), &mut h));
        assert!(h.ticks.is_empty());
        assert_eq!(p.successes(), SuccessCounts::default());
    }

    #[test]
    fn test_demonstration_loop_reschedules() {
        let mut p = protocol(Technique::Ghost);
        let mut h = host();
        assert!(p.advance_to_show(Duration::ZERO));
        p.tick(Duration::ZERO, &mut h).unwrap();
        assert_eq!(h.plays, vec![id("training")]);
        assert!(p.is_animating());

        // Clip is 2s: hand back at 2.0, replay at 2.0 + 3.5
        p.tick(ms(1999), &mut h).unwrap();
        assert!(p.is_animating());
        p.tick(ms(2000), &mut h).unwrap();
        assert!(!p.is_animating());
        assert_eq!(h.stops, 1);

        p.tick(ms(5499), &mut h).unwrap();
        assert_eq!(h.plays.len(), 1);
        p.tick(ms(5500), &mut h).unwrap();
        assert_eq!(h.plays.len(), 2);
        assert!(p.is_animating());
    }

    #[test]
    fn test_reshow_counts_show_repeats() {
        let mut p = protocol(Technique::Ghost);
        let mut h = host();
        p.advance_to_show(Duration::ZERO);
        p.tick(Duration::ZERO, &mut h).unwrap();
        assert!(p.advance_to_show(ms(1000)));
        p.tick(ms(1000), &mut h).unwrap();
        assert_eq!(p.show_repeats(), 2);
        assert_eq!(h.plays.len(), 2);
    }

    #[test]
    fn test_ghost_never_blends() {
        let mut p = protocol(Technique::Ghost);
        let mut h = host();
        let mut now = Duration::ZERO;
        p.advance_to_show(now);
        advance(&mut p, &mut h, &mut now, 30);
        assert!(h.applied.is_empty());
        assert!(!p.is_blending(now));
    }

    #[test]
    fn test_override_blend_suppresses_recognition() {
        let mut p = protocol(Technique::Override);
        let mut h = host();
        h.playback = vec![BonePose::new(Vec3::X, Quat::IDENTITY); HAND_BONE_COUNT];
        p.advance_to_show(Duration::ZERO);
        p.tick(Duration::ZERO, &mut h).unwrap();

        // Blend starts 50ms before the 2s clip ends
        p.tick(ms(1949), &mut h).unwrap();
        assert!(!p.is_blending(ms(1949)));
        p.tick(ms(1950), &mut h).unwrap();
        assert!(p.is_blending(ms(1950)));
        assert_eq!(h.applied.len(), 1);
        assert!((h.applied[0][0].position.x - 1.0).abs() < 1e-6);

        let ticks_before = h.ticks.len();
        assert!(!p.on_recognize(&id("training"), ms(2000), &mut h));
        assert!(!p.on_recognize(&id("g2"), ms(2100), &mut h));
        assert_eq!(h.ticks.len(), ticks_before);
        assert_eq!(p.successes().show, 0);

        // Window ends at 2150ms
        assert!(!p.is_blending(ms(2150)));
        assert!(p.on_recognize(&id("training"), ms(2150), &mut h));
        assert_eq!(p.successes().show, 1);
    }

    #[test]
    fn test_advance_to_try_cancels_demonstration() {
        let mut p = protocol(Technique::Override);
        let mut h = host();
        p.advance_to_show(Duration::ZERO);
        p.tick(Duration::ZERO, &mut h).unwrap();
        p.tick(ms(1960), &mut h).unwrap();
        assert!(p.is_blending(ms(1960)));

        assert!(p.advance_to_try(ms(1970), &mut h));
        assert_eq!(h.stops, 1);
        assert!(!p.is_blending(ms(1970)));
        assert!(!p.is_animating());

        let mut now = ms(1970);
        advance(&mut p, &mut h, &mut now, 80);
        assert_eq!(h.plays.len(), 1);
    }

    #[test]
    fn test_first_perform_timeout_closes_window() {
        let mut p = protocol(Technique::Ghost);
        let mut h = host();
        p.advance_to_show(Duration::ZERO);
        p.advance_to_try(ms(10_000), &mut h);
        assert_eq!(p.gesture_deadline(), Some(ms(13_000)));
        assert_eq!(p.ui().marker, Marker::Waiting);

        p.tick(ms(13_000), &mut h).unwrap();
        assert!(p.is_expecting_gesture());
        p.tick(ms(13_100), &mut h).unwrap();
        assert!(!p.is_expecting_gesture());
        assert_eq!(p.gesture_deadline(), None);
        assert_eq!(p.ui().marker, Marker::Missed);
        assert_eq!(p.phase(), Phase::FirstPerform);
        assert!(p.status_sexp(ms(13_100)).contains(":marker :missed"));

        // Stays closed on later ticks
        p.tick(ms(30_000), &mut h).unwrap();
        assert!(!p.is_expecting_gesture());
        assert_eq!(p.gesture_deadline(), None);
        assert!(!p.advance_to_repeat(ms(30_000)));

        // A late correct performance still unlocks the repeat loop
        assert!(p.on_recognize(&id("training"), ms(31_000), &mut h));
        assert_eq!(p.successes().first_perform, 1);
        assert_eq!(p.ui().marker, Marker::Detected);
        assert!(p.advance_to_repeat(ms(31_500)));
    }

    #[test]
    fn test_first_attempt_timing() {
        let mut p = protocol(Technique::Ghost);
        let mut h = host();
        p.advance_to_show(ms(1000));
        p.advance_to_try(ms(8500), &mut h);
        p.on_recognize(&id("training"), ms(9000), &mut h);
        p.advance_to_repeat(ms(12_000));
        assert_eq!(p.time_to_first_attempt, Some(ms(7500)));
        assert_eq!(p.time_to_repetitions, Some(ms(3500)));
    }

    #[test]
    fn test_repeat_gated_on_first_success() {
        let mut p = protocol(Technique::Ghost);
        let mut h = host();
        p.advance_to_show(Duration::ZERO);
        p.advance_to_try(ms(1000), &mut h);
        assert!(!p.ui().repeat_enabled);
        assert!(!p.advance_to_repeat(ms(1500)));
        assert_eq!(p.phase(), Phase::FirstPerform);

        assert!(!p.on_recognize(&id("g2"), ms(1600), &mut h));
        assert!(p.on_recognize(&id("training"), ms(1700), &mut h));
        assert_eq!(p.ui().marker, Marker::Detected);
        assert!(p.ui().repeat_enabled);
        assert!(!p.is_expecting_gesture());

        // Window closed by the success: no re-arm on timeout
        p.tick(ms(5000), &mut h).unwrap();
        assert!(!p.is_expecting_gesture());
        assert!(p.advance_to_repeat(ms(5100)));
        assert_eq!(p.phase(), Phase::Repetitions);
    }

    #[test]
    fn test_repeat_gate_disabled() {
        let config = StudyConfig {
            require_first_success: false,
            ..StudyConfig::default()
        };
        let mut p = protocol_with(Technique::Ghost, config);
        let mut h = host();
        p.advance_to_show(Duration::ZERO);
        p.advance_to_try(ms(1000), &mut h);
        assert!(p.ui().repeat_enabled);
        assert!(p.advance_to_repeat(ms(1100)));
    }

    #[test]
    fn test_repetitions_open_with_neutral_window() {
        let mut p = protocol(Technique::Ghost);
        let mut h = host();
        let mut now = Duration::ZERO;
        enter_repetitions(&mut p, &mut h, &mut now);
        assert_eq!(p.repetition_count(), 0);
        assert!(!p.is_expecting_gesture());
        assert_eq!(p.neutral_deadline(), Some(now + Duration::from_secs(4)));
        assert_eq!(p.ui().counter_text, "0/10");
        assert!(!p.ui().show_enabled);

        // Neutral hides recognition entirely
        assert!(!p.on_recognize(&id("training"), now + ms(3000), &mut h));
        assert_eq!(p.successes().repetitions, 0);
    }

    #[test]
    fn test_timeout_counts_as_repetition() {
        let mut p = protocol(Technique::Ghost);
        let mut h = host();
        let mut now = Duration::ZERO;
        enter_repetitions(&mut p, &mut h, &mut now);

        while !p.is_expecting_gesture() {
            advance(&mut p, &mut h, &mut now, 1);
        }
        let deadline = p.gesture_deadline().unwrap();
        assert_eq!(deadline, now + Duration::from_secs(3));
        while now <= deadline {
            advance(&mut p, &mut h, &mut now, 1);
        }
        assert_eq!(p.repetition_count(), 1);
        assert_eq!(p.successes().repetitions, 0);
        assert!(!p.is_expecting_gesture());
        assert_eq!(p.ui().marker, Marker::Missed);
    }

    #[test]
    fn test_success_ends_window_early() {
        let mut p = protocol(Technique::Ghost);
        let mut h = host();
        let mut now = Duration::ZERO;
        enter_repetitions(&mut p, &mut h, &mut now);
        while !p.is_expecting_gesture() {
            advance(&mut p, &mut h, &mut now, 1);
        }
        assert!(p.on_recognize(&id("training"), now, &mut h));
        assert_eq!(p.repetition_count(), 1);
        assert_eq!(p.successes().repetitions, 1);
        assert_eq!(p.neutral_deadline(), Some(now + Duration::from_secs(4)));
        assert_eq!(p.ui().counter_text, "1/10");
    }

    #[test]
    fn test_repetition_count_monotonic_until_forced_idle() {
        let mut p = protocol(Technique::Ghost);
        let mut h = host();
        let mut now = Duration::ZERO;
        enter_repetitions(&mut p, &mut h, &mut now);

        // A count change must be a single step on an expecting → not expecting edge
        fn check_step(p: &SessionProtocol, was_expecting: bool, count: u32) -> bool {
            if p.phase() != Phase::Repetitions {
                // Idle on the same call that closed the tenth trial
                assert!(was_expecting);
                assert_eq!(count, 9);
                return true;
            }
            if p.repetition_count() == count {
                return false;
            }
            assert_eq!(p.repetition_count(), count + 1);
            assert!(was_expecting && !p.is_expecting_gesture());
            assert!(p.repetition_count() < 10);
            true
        }

        let mut trials = 0;
        while p.phase() == Phase::Repetitions {
            let (was_expecting, count) = (p.is_expecting_gesture(), p.repetition_count());
            advance(&mut p, &mut h, &mut now, 1);
            trials += u32::from(check_step(&p, was_expecting, count));

            // Alternate successes and timeouts
            if p.is_expecting_gesture() && p.repetition_count() % 2 == 0 {
                let count = p.repetition_count();
                assert!(p.on_recognize(&id("training"), now, &mut h));
                assert!(check_step(&p, true, count));
                trials += 1;
            }
        }
        assert_eq!(trials, 10);

        assert_eq!(p.phase(), Phase::Idle);
        assert_eq!(p.current_gesture_index(), 2);
        assert_eq!(p.current_gesture(), &id("g2"));
        assert_eq!(p.repetition_count(), 0);
        assert_eq!(p.neutral_deadline(), None);
        assert_eq!(p.gesture_deadline(), None);
        assert_eq!(h.summaries.len(), 1);
        assert_eq!(h.summaries[0].gesture, id("training"));
        assert!(h.summaries[0].is_training);
        assert_eq!(h.summaries[0].successes.repetitions, 5);
    }

    #[test]
    fn test_forced_idle_on_tenth_success() {
        let mut p = protocol(Technique::Ghost);
        let mut h = host();
        let mut now = Duration::ZERO;
        run_gesture(&mut p, &mut h, &mut now);

        let summary = &h.summaries[0];
        assert_eq!(summary.successes.repetitions, 10);
        assert_eq!(summary.successes.first_perform, 1);
        assert_eq!(summary.show_repeats, 1);
        assert_eq!(p.phase(), Phase::Idle);
        assert!(!p.is_training());
    }

    #[test]
    fn test_static_debounce() {
        let mut p = protocol(Technique::Ghost);
        let mut h = host();
        p.advance_to_show(Duration::ZERO);

        assert!(p.on_recognize(&id("training"), ms(1000), &mut h));
        // Under 2s since the last accepted sighting
        assert!(!p.on_recognize(&id("training"), ms(2500), &mut h));
        assert!(p.on_recognize(&id("training"), ms(3000), &mut h));
        // Suppressed sightings do not move the reference
        assert!(!p.on_recognize(&id("training"), ms(4900), &mut h));
        assert!(p.on_recognize(&id("training"), ms(5000), &mut h));
        assert_eq!(p.successes().show, 3);
        assert_eq!(h.detections().len(), 3);
    }

    #[test]
    fn test_non_target_not_debounced() {
        let mut p = protocol(Technique::Ghost);
        let mut h = host();
        p.advance_to_show(Duration::ZERO);
        for t in [100, 200, 300] {
            assert!(!p.on_recognize(&id("g2"), ms(t), &mut h));
        }
        assert_eq!(h.detections(), vec![id("g2"), id("g2"), id("g2")]);
        assert_eq!(p.successes().show, 0);
    }

    #[test]
    fn test_dynamic_target_not_debounced() {
        let mut p = protocol(Technique::Ghost);
        let mut h = host();
        let mut now = Duration::ZERO;
        run_gesture(&mut p, &mut h, &mut now);
        run_gesture(&mut p, &mut h, &mut now);
        assert_eq!(p.current_gesture(), &id("g3"));

        p.advance_to_show(now);
        assert!(p.on_recognize(&id("g3"), now + ms(100), &mut h));
        assert!(p.on_recognize(&id("g3"), now + ms(200), &mut h));
        assert_eq!(p.successes().show, 2);
    }

    #[test]
    fn test_dynamic_window_uses_exec_time() {
        let mut p = protocol(Technique::Ghost);
        let mut h = host();
        let mut now = Duration::ZERO;
        run_gesture(&mut p, &mut h, &mut now);
        run_gesture(&mut p, &mut h, &mut now);
        run_gesture(&mut p, &mut h, &mut now);
        assert_eq!(p.current_gesture(), &id("g5"));

        p.advance_to_show(now);
        p.advance_to_try(now, &mut h);
        assert_eq!(p.gesture_deadline(), Some(now + Duration::from_secs(4)));
    }

    #[test]
    fn test_finished_after_four_gestures() {
        let mut p = protocol(Technique::Override);
        let mut h = host();
        let mut now = Duration::ZERO;
        for _ in 0..4 {
            run_gesture(&mut p, &mut h, &mut now);
        }
        assert!(p.is_finished());
        assert_eq!(h.summaries.len(), 4);
        let gestures: Vec<_> = h.summaries.iter().map(|s| s.gesture.clone()).collect();
        assert_eq!(gestures, vec![id("training"), id("g2"), id("g3"), id("g5")]);
        assert_eq!(
            h.summaries.iter().filter(|s| s.is_training).count(),
            1
        );
        assert!(!p.ui().show_enabled);

        assert!(!p.advance_to_show(now));
        let ticks = h.ticks.len();
        p.tick(now + ms(100), &mut h).unwrap();
        assert!(!p.on_recognize(&id("g5"), now + ms(200), &mut h));
        assert_eq!(h.ticks.len(), ticks);
    }

    #[test]
    fn test_blend_bone_mismatch_is_error() {
        let mut p = protocol(Technique::Override);
        let mut h = host();
        h.playback.truncate(19);
        p.advance_to_show(Duration::ZERO);
        p.tick(Duration::ZERO, &mut h).unwrap();
        let err = p.tick(ms(1950), &mut h).unwrap_err();
        assert!(matches!(err, StudyError::BoneCountMismatch { start: 19, end: 24 }));
    }

    #[test]
    fn test_tick_records_track_phase() {
        let mut p = protocol(Technique::Ghost);
        let mut h = host();
        p.tick(Duration::ZERO, &mut h).unwrap();
        p.advance_to_show(ms(100));
        p.tick(ms(100), &mut h).unwrap();
        assert_eq!(h.ticks.len(), 2);
        assert_eq!(h.ticks[0].phase, Phase::Idle);
        assert_eq!(h.ticks[1].phase, Phase::ShowTechnique);
        assert!(h.ticks[1].is_animating);
        assert_eq!(h.ticks[1].show_repeats, 1);
        assert_eq!(h.ticks[1].detected, None);
    }

    #[test]
    fn test_status_sexp() {
        let mut p = protocol(Technique::Override);
        p.advance_to_show(Duration::ZERO);
        let status = p.status_sexp(Duration::ZERO);
        assert!(status.starts_with("(:phase :show-technique"));
        assert!(status.contains(":gesture \"training\""));
        assert!(status.contains(":technique :override"));
        assert!(status.contains(":training t"));
        assert!(status.contains(":deadline nil"));
        assert!(status.contains(":show-repeats 1"));
    }
}
