//! Session protocol timing configuration.

use std::time::Duration;

use crate::hand::blend::DEFAULT_BLEND_DURATION;

/// Timing and gating parameters of the session protocol.
#[derive(Debug, Clone)]
pub struct StudyConfig {
    /// Expecting window for static gestures (dynamic ones use their exec time).
    pub static_timeout: Duration,
    /// Rest period between two trials of the repeat loop.
    pub neutral_duration: Duration,
    /// Minimum time between two accepted sightings of the same static target.
    pub static_debounce: Duration,
    /// Trials per gesture before moving on to the next one.
    pub max_repetitions: u32,
    /// Pause between the end of one demonstration and the next replay.
    pub replay_delay: Duration,
    /// Length of the override hand-back blend.
    pub blend_duration: Duration,
    /// How long before the end of a clip the hand-back blend starts.
    pub blend_lead: Duration,
    /// Whether leaving FirstPerform requires at least one correct attempt.
    pub require_first_success: bool,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            static_timeout: Duration::from_secs(3),
            neutral_duration: Duration::from_secs(4),
            static_debounce: Duration::from_secs(2),
            max_repetitions: 10,
            replay_delay: Duration::from_millis(3500),
            blend_duration: DEFAULT_BLEND_DURATION,
            blend_lead: Duration::from_millis(50),
            require_first_success: true,
        }
    }
}

impl StudyConfig {
    /// Generate s-expression for config queries.
    pub fn config_sexp(&self) -> String {
        format!(
            "(:static-timeout {:.2} :neutral {:.2} :debounce {:.2} :max-repetitions {} :replay-delay {:.2} :blend {:.3} :blend-lead {:.3} :require-first-success {})",
            self.static_timeout.as_secs_f64(),
            self.neutral_duration.as_secs_f64(),
            self.static_debounce.as_secs_f64(),
            self.max_repetitions,
            self.replay_delay.as_secs_f64(),
            self.blend_duration.as_secs_f64(),
            self.blend_lead.as_secs_f64(),
            if self.require_first_success { "t" } else { "nil" },
        )
    }
}
