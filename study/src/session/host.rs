//! Seams between the session protocol and the outside world.
//!
//! The protocol never owns an animation system, a tracked skeleton or a
//! log file.  It drives them through these traits, so the same state
//! machine runs against a headset runtime or the headless replay host.

use std::time::Duration;

use super::record::{GestureSummary, TickRecord};
use crate::gesture::GestureId;
use crate::hand::{BonePose, HandPose};

/// Plays recorded demonstrations of a gesture.
pub trait PlaybackDriver {
    /// Start (or restart) the demonstration clip for `gesture`.
    fn play(&mut self, gesture: &GestureId);
    /// Stop playback and hand the displayed hand back to live tracking.
    fn stop(&mut self);
    /// Length of the clip started by the last `play`.
    fn current_clip_length(&self) -> Duration;
    /// Pose of the playback rig right now.
    fn playback_pose(&self) -> HandPose;
}

/// The participant's tracked hand.
pub trait SkeletonSource {
    fn live_pose(&self) -> HandPose;
    /// Overwrite the displayed hand with `pose` for this frame.
    fn apply_pose(&mut self, pose: &[BonePose]);
}

/// Receives study records.
pub trait RecordSink {
    fn write_tick(&mut self, record: &TickRecord);
    fn write_summary(&mut self, summary: &GestureSummary);
}

/// Everything a running session needs from its environment.
pub trait StudyHost: PlaybackDriver + SkeletonSource + RecordSink {}

impl<T: PlaybackDriver + SkeletonSource + RecordSink> StudyHost for T {}

// ── Test host ──────────────────────────────────────────────

/// In-memory host that records every call.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct RecordingHost {
    pub clip_length: Duration,
    pub live: HandPose,
    pub playback: HandPose,
    pub plays: Vec<GestureId>,
    pub stops: usize,
    pub applied: Vec<HandPose>,
    pub ticks: Vec<TickRecord>,
    pub summaries: Vec<GestureSummary>,
}

#[cfg(test)]
impl RecordingHost {
    pub fn new(clip_length: Duration) -> Self {
        use crate::hand::pose::{rest_pose, HAND_BONE_COUNT};
        Self {
            clip_length,
            live: rest_pose(HAND_BONE_COUNT),
            playback: rest_pose(HAND_BONE_COUNT),
            plays: Vec::new(),
            stops: 0,
            applied: Vec::new(),
            ticks: Vec::new(),
            summaries: Vec::new(),
        }
    }

    /// Detected gestures across all tick records, in order.
    pub fn detections(&self) -> Vec<GestureId> {
        self.ticks.iter().filter_map(|t| t.detected.clone()).collect()
    }
}

#[cfg(test)]
impl PlaybackDriver for RecordingHost {
    fn play(&mut self, gesture: &GestureId) {
        self.plays.push(gesture.clone());
    }

    fn stop(&mut self) {
        self.stops += 1;
    }

    fn current_clip_length(&self) -> Duration {
        self.clip_length
    }

    fn playback_pose(&self) -> HandPose {
        self.playback.clone()
    }
}

#[cfg(test)]
impl SkeletonSource for RecordingHost {
    fn live_pose(&self) -> HandPose {
        self.live.clone()
    }

    fn apply_pose(&mut self, pose: &[BonePose]) {
        self.applied.push(pose.to_vec());
    }
}

#[cfg(test)]
impl RecordSink for RecordingHost {
    fn write_tick(&mut self, record: &TickRecord) {
        self.ticks.push(record.clone());
    }

    fn write_summary(&mut self, summary: &GestureSummary) {
        self.summaries.push(summary.clone());
    }
}
