//! Presentation blend. Hands control back from a played-back pose to the
//! live tracked pose without a visible jump.
//!
//! Used only by the override technique, where the demonstration replaces
//! the participant's own hand.  While a blend is running the displayed hand
//! is not the participant's real pose, so recognition must be suppressed.

use std::time::Duration;

use tracing::debug;

use super::pose::{BonePose, HandPose};
use crate::error::StudyError;

/// Default length of the hand-back blend.
pub const DEFAULT_BLEND_DURATION: Duration = Duration::from_millis(200);

/// An in-flight blend between two captured poses.
#[derive(Debug, Clone)]
pub struct BlendState {
    pub start_pose: HandPose,
    pub end_pose: HandPose,
    pub start_time: Duration,
    pub duration: Duration,
}

impl BlendState {
    fn end_time(&self) -> Duration {
        self.start_time + self.duration
    }
}

/// Skeletal pose interpolator with a busy flag.
#[derive(Debug, Clone)]
pub struct PresentationBlender {
    duration: Duration,
    state: Option<BlendState>,
}

impl Default for PresentationBlender {
    fn default() -> Self {
        Self::new(DEFAULT_BLEND_DURATION)
    }
}

impl PresentationBlender {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            state: None,
        }
    }

    /// Capture both poses and start a blend window at `now`.
    ///
    /// Both poses must come from the same skeleton; a bone count mismatch
    /// is rejected and leaves any previous blend untouched.
    pub fn begin(&mut self, start_pose: HandPose, end_pose: HandPose, now: Duration) -> Result<(), StudyError> {
        if start_pose.len() != end_pose.len() {
            return Err(StudyError::BoneCountMismatch {
                start: start_pose.len(),
                end: end_pose.len(),
            });
        }
        debug!(
            "Blend started at {:.3}s over {} bones ({}ms)",
            now.as_secs_f64(),
            start_pose.len(),
            self.duration.as_millis()
        );
        self.state = Some(BlendState {
            start_pose,
            end_pose,
            start_time: now,
            duration: self.duration,
        });
        Ok(())
    }

    /// Blend factor in `[0, 1]`, or `None` if no blend was ever started.
    pub fn progress(&self, now: Duration) -> Option<f32> {
        let state = self.state.as_ref()?;
        if state.duration.is_zero() {
            return Some(1.0);
        }
        let elapsed = now.saturating_sub(state.start_time);
        Some((elapsed.as_secs_f32() / state.duration.as_secs_f32()).clamp(0.0, 1.0))
    }

    /// Interpolated pose for every bone at `now`.
    ///
    /// Empty when no blend has been started.  After the window ends this
    /// keeps returning the end pose.
    pub fn sample(&self, now: Duration) -> HandPose {
        let (Some(state), Some(t)) = (self.state.as_ref(), self.progress(now)) else {
            return Vec::new();
        };
        state
            .start_pose
            .iter()
            .zip(&state.end_pose)
            .map(|(start, end): (&BonePose, &BonePose)| start.blend(end, t))
            .collect()
    }

    /// Whether the blend window is still open at `now`.
    pub fn is_active(&self, now: Duration) -> bool {
        self.state
            .as_ref()
            .map(|s| now < s.end_time())
            .unwrap_or(false)
    }

    /// Drop any blend state.
    pub fn cancel(&mut self) {
        self.state = None;
    }
}

// ── Tests ──────────────────────────────────────────────────
