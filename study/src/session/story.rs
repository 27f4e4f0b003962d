//! Study story: which technique and gestures each participant sees.
//!
//! The story file lists participants, each with one entry per modality.
//! Selecting a participant and modality (both 1-based) and resolving the
//! four gesture references against the catalog yields a [`StudyPlan`].
//! Every way this can go wrong is a configuration error raised here, before
//! the session exists.

use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::StudyError;
use crate::gesture::{GestureCatalog, GestureId};

/// Gestures per run: training, static target, short dynamic, long dynamic.
pub const GESTURES_PER_RUN: usize = 4;

/// Slot name and required kind (`None` accepts either) for each plan position.
const PLAN_SLOTS: [(&str, Option<&str>); GESTURES_PER_RUN] = [
    ("training", None),
    ("static", Some("static")),
    ("short", Some("dynamic")),
    ("long", Some("dynamic")),
];

/// How the target gesture is demonstrated to the participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Technique {
    /// Semi-transparent hand overlaid on the participant's own.
    Ghost,
    /// Separate hand shown in front of the participant.
    External,
    /// The participant's own hand is replaced by the playback.
    Override,
}

impl Technique {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ghost => "ghost",
            Self::External => "external",
            Self::Override => "override",
        }
    }

    /// Parse a technique name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ghost" => Some(Self::Ghost),
            "external" => Some(Self::External),
            "override" => Some(Self::Override),
            _ => None,
        }
    }
}

// ── Story file ─────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Modality {
    pub show_technique: String,
    pub gesture_training: GestureId,
    pub gesture_static: GestureId,
    pub gesture_short: GestureId,
    pub gesture_long: GestureId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Participant {
    pub modalities: Vec<Modality>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StudyStory {
    pub participants: Vec<Participant>,
}

impl StudyStory {
    pub fn from_json_str(json: &str) -> Result<Self, StudyError> {
        serde_json::from_str(json).map_err(|source| StudyError::Parse {
            what: "study story",
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, StudyError> {
        let json = std::fs::read_to_string(path).map_err(|source| StudyError::Io {
            what: "study story",
            source,
        })?;
        let story = Self::from_json_str(&json)?;
        info!(
            "Loaded study story with {} participants from {}",
            story.participants.len(),
            path.display()
        );
        Ok(story)
    }

    /// Look up a modality by 1-based participant and modality numbers.
    pub fn modality(&self, participant: usize, modality: usize) -> Option<&Modality> {
        self.participants
            .get(participant.checked_sub(1)?)?
            .modalities
            .get(modality.checked_sub(1)?)
    }

    /// Resolve the plan for one participant/modality against `catalog`.
    pub fn plan(&self, participant: usize, modality: usize, catalog: &GestureCatalog) -> Result<StudyPlan, StudyError> {
        let entry = self
            .modality(participant, modality)
            .ok_or(StudyError::UnknownSelection {
                participant,
                modality,
            })?;
        let technique = Technique::parse(&entry.show_technique)
            .ok_or_else(|| StudyError::UnknownTechnique(entry.show_technique.clone()))?;
        StudyPlan::new(
            participant,
            modality,
            technique,
            [
                entry.gesture_training.clone(),
                entry.gesture_static.clone(),
                entry.gesture_short.clone(),
                entry.gesture_long.clone(),
            ],
            catalog,
        )
    }
}

// ── Plan ───────────────────────────────────────────────────

/// The resolved sequence of gestures and technique for one run.
#[derive(Debug, Clone)]
pub struct StudyPlan {
    pub participant: usize,
    pub modality: usize,
    pub technique: Technique,
    pub gestures: [GestureId; GESTURES_PER_RUN],
}

impl StudyPlan {
    /// Build a plan, checking that every gesture exists in `catalog` and
    /// fits the kind its slot asks for.
    pub fn new(
        participant: usize,
        modality: usize,
        technique: Technique,
        gestures: [GestureId; GESTURES_PER_RUN],
        catalog: &GestureCatalog,
    ) -> Result<Self, StudyError> {
        for (gesture, (slot, expected)) in gestures.iter().zip(PLAN_SLOTS) {
            let kind = catalog.resolve(gesture)?.kind_str();
            if let Some(expected) = expected.filter(|&e| e != kind) {
                return Err(StudyError::SlotKindMismatch {
                    slot,
                    gesture: gesture.clone(),
                    expected,
                });
            }
        }
        info!(
            "Plan for participant {} modality {}: {} [{}]",
            participant,
            modality,
            technique.as_str(),
            gestures
                .iter()
                .map(GestureId::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self {
            participant,
            modality,
            technique,
            gestures,
        })
    }
}

// ── Tests ──────────────────────────────────────────────────
