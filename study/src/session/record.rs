//! Records the session hands to its sink: one per tick and one summary per
//! completed gesture.  Rows are semicolon-delimited.

use std::time::Duration;

use super::protocol::Phase;
use super::story::Technique;
use crate::gesture::GestureId;

/// Placeholder written when no gesture was detected on a tick.
pub const NOT_DETECTED: &str = "n/a";

pub const TICK_HEADER: &str = "participant;modality;technique;timestamp;is_training;phase;is_animating;repetition;show_repeats;expected;detected";

pub const SUMMARY_HEADER: &str = "participant;modality;technique;gesture;is_training;show_repeats;time_to_first_attempt;time_to_repetitions;show_successes;first_perform_successes;repetition_successes";

fn flag(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

fn seconds(d: Option<Duration>) -> String {
    match d {
        Some(d) => format!("{:.3}", d.as_secs_f64()),
        None => NOT_DETECTED.to_string(),
    }
}

/// Snapshot of the session taken every tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickRecord {
    pub participant: usize,
    pub modality: usize,
    pub technique: Technique,
    pub timestamp: Duration,
    pub is_training: bool,
    pub phase: Phase,
    pub is_animating: bool,
    pub repetition_count: u32,
    pub show_repeats: u32,
    pub current_gesture: GestureId,
    pub detected: Option<GestureId>,
}

impl TickRecord {
    pub fn to_row(&self) -> String {
        format!(
            "{};{};{};{:.4};{};{};{};{};{};{};{}",
            self.participant,
            self.modality,
            self.technique.as_str(),
            self.timestamp.as_secs_f64(),
            flag(self.is_training),
            self.phase.as_str(),
            flag(self.is_animating),
            self.repetition_count,
            self.show_repeats,
            self.current_gesture,
            self.detected.as_ref().map(GestureId::as_str).unwrap_or(NOT_DETECTED),
        )
    }
}

/// Correct recognitions per phase for one gesture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuccessCounts {
    pub show: u32,
    pub first_perform: u32,
    pub repetitions: u32,
}

/// Per-gesture outcome written when the repeat loop completes.
#[derive(Debug, Clone, PartialEq)]
pub struct GestureSummary {
    pub participant: usize,
    pub modality: usize,
    pub technique: Technique,
    pub gesture: GestureId,
    pub is_training: bool,
    pub show_repeats: u32,
    /// From the first demonstration to the first attempt.
    pub time_to_first_attempt: Option<Duration>,
    /// From the first attempt to the start of the repeat loop.
    pub time_to_repetitions: Option<Duration>,
    pub successes: SuccessCounts,
}

impl GestureSummary {
    pub fn to_row(&self) -> String {
        format!(
            "{};{};{};{};{};{};{};{};{};{};{}",
            self.participant,
            self.modality,
            self.technique.as_str(),
            self.gesture,
            flag(self.is_training),
            self.show_repeats,
            seconds(self.time_to_first_attempt),
            seconds(self.time_to_repetitions),
            self.successes.show,
            self.successes.first_perform,
            self.successes.repetitions,
        )
    }
}
