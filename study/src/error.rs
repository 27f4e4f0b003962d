//! Error taxonomy for catalog building, plan resolution and pose blending.
//!
//! Every variant is fatal: configuration errors stop the run before the
//! session enters Idle, precondition violations are rejected when the
//! offending value is constructed.  Timeouts and debounce suppression are
//! ordinary control flow and never surface here.

use crate::gesture::GestureId;

/// Broad class of a [`StudyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad catalog, story file, or participant/modality selection.
    Configuration,
    /// A value violated a structural invariant (empty keyframes, skeleton mismatch).
    Precondition,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Precondition => "precondition",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StudyError {
    #[error("unknown gesture reference `{0}`")]
    UnknownGesture(GestureId),

    #[error("gesture `{0}` is defined more than once")]
    DuplicateGesture(GestureId),

    #[error("dynamic gesture `{gesture}` uses `{keyframe}` as a keyframe, which is not a static gesture")]
    InvalidKeyframe { gesture: GestureId, keyframe: GestureId },

    #[error("dynamic gesture `{0}` needs a positive execution time")]
    InvalidExecTime(GestureId),

    #[error("static gesture `{0}` has a negative or non-finite threshold")]
    InvalidThreshold(GestureId),

    #[error("participant {participant} / modality {modality} not found in study story")]
    UnknownSelection { participant: usize, modality: usize },

    #[error("plan slot `{slot}` needs a {expected} gesture, but `{gesture}` is not one")]
    SlotKindMismatch {
        slot: &'static str,
        gesture: GestureId,
        expected: &'static str,
    },

    #[error("unknown presentation technique `{0}` (expected OVERRIDE, GHOST or EXTERNAL)")]
    UnknownTechnique(String),

    #[error("failed to read {what}: {source}")]
    Io {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {what}: {source}")]
    Parse {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("dynamic gesture `{0}` has no keyframes")]
    EmptyKeyframes(GestureId),

    #[error("blend poses have mismatched bone counts (start {start}, end {end})")]
    BoneCountMismatch { start: usize, end: usize },
}

impl StudyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyKeyframes(_) | Self::BoneCountMismatch { .. } => ErrorKind::Precondition,
            _ => ErrorKind::Configuration,
        }
    }
}
