//! Gesture catalog: immutable static and dynamic gesture definitions.
//!
//! A catalog is built once at session start, either programmatically via
//! [`CatalogBuilder`] or from a JSON file, and validated as a whole: names
//! are unique, every dynamic gesture has at least one keyframe, all of its
//! keyframes are static gestures of the same catalog, and its execution
//! time is positive.  Lookups afterwards return `Option`/`Result`, never a
//! placeholder.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StudyError;

/// Default matching threshold for static poses when a catalog file omits it.
pub const DEFAULT_STATIC_THRESHOLD: f32 = 0.1;

// ── Identifiers ────────────────────────────────────────────

/// Stable name of a gesture definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GestureId(String);

impl GestureId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GestureId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for GestureId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for GestureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Definitions ────────────────────────────────────────────

/// A gesture the participant can be asked to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum GestureDefinition {
    /// A single held hand pose, matched externally against `threshold`.
    Static { threshold: f32 },
    /// An ordered sequence of static poses that must complete within `exec_time`.
    Dynamic {
        ordered_keyframes: Vec<GestureId>,
        exec_time: Duration,
    },
}

impl GestureDefinition {
    pub fn is_static(&self) -> bool {
        matches!(self, Self::Static { .. })
    }

    /// String representation for logs and status output.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Static { .. } => "static",
            Self::Dynamic { .. } => "dynamic",
        }
    }

    /// How long the participant has to perform this gesture once asked.
    ///
    /// Dynamic gestures get their own execution time; static gestures share
    /// the protocol-wide `static_timeout`.
    pub fn expecting_window(&self, static_timeout: Duration) -> Duration {
        match self {
            Self::Static { .. } => static_timeout,
            Self::Dynamic { exec_time, .. } => *exec_time,
        }
    }
}

// ── Catalog ────────────────────────────────────────────────

/// Validated, immutable set of gesture definitions.
#[derive(Debug, Clone)]
pub struct GestureCatalog {
    entries: Vec<(GestureId, GestureDefinition)>,
    index: HashMap<GestureId, usize>,
}

impl GestureCatalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    pub fn get(&self, id: &GestureId) -> Option<&GestureDefinition> {
        self.index.get(id).map(|&i| &self.entries[i].1)
    }

    /// Like [`get`](Self::get), but a miss is a configuration error.
    pub fn resolve(&self, id: &GestureId) -> Result<&GestureDefinition, StudyError> {
        self.get(id)
            .ok_or_else(|| StudyError::UnknownGesture(id.clone()))
    }

    pub fn contains(&self, id: &GestureId) -> bool {
        self.index.contains_key(id)
    }

    /// All dynamic gestures in definition order, with keyframes and execution time.
    pub fn dynamic_gestures(&self) -> impl Iterator<Item = (&GestureId, &[GestureId], Duration)> {
        self.entries.iter().filter_map(|(id, def)| match def {
            GestureDefinition::Dynamic {
                ordered_keyframes,
                exec_time,
            } => Some((id, ordered_keyframes.as_slice(), *exec_time)),
            GestureDefinition::Static { .. } => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse and validate a JSON catalog.
    pub fn from_json_str(json: &str) -> Result<Self, StudyError> {
        let file: CatalogFile = serde_json::from_str(json).map_err(|source| StudyError::Parse {
            what: "gesture catalog",
            source,
        })?;

        let mut builder = Self::builder();
        for entry in file.gestures {
            builder = match entry {
                CatalogEntry::Static { name, threshold } => builder.static_gesture(name, threshold),
                CatalogEntry::Dynamic {
                    name,
                    keyframes,
                    exec_time_s,
                } => {
                    let exec_time = Duration::try_from_secs_f64(exec_time_s)
                        .map_err(|_| StudyError::InvalidExecTime(name.clone()))?;
                    builder.dynamic_gesture(name, keyframes, exec_time)
                }
            };
        }
        builder.build()
    }

    /// Load and validate a JSON catalog from disk.
    pub fn load(path: &Path) -> Result<Self, StudyError> {
        let json = std::fs::read_to_string(path).map_err(|source| StudyError::Io {
            what: "gesture catalog",
            source,
        })?;
        let catalog = Self::from_json_str(&json)?;
        info!("Loaded {} gestures from {}", catalog.len(), path.display());
        Ok(catalog)
    }
}

// ── Builder ────────────────────────────────────────────────

/// Collects definitions; [`build`](Self::build) validates them all at once.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    entries: Vec<(GestureId, GestureDefinition)>,
}

impl CatalogBuilder {
    pub fn static_gesture(mut self, name: impl Into<GestureId>, threshold: f32) -> Self {
        self.entries
            .push((name.into(), GestureDefinition::Static { threshold }));
        self
    }

    pub fn dynamic_gesture<I, K>(mut self, name: impl Into<GestureId>, keyframes: I, exec_time: Duration) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<GestureId>,
    {
        self.entries.push((
            name.into(),
            GestureDefinition::Dynamic {
                ordered_keyframes: keyframes.into_iter().map(Into::into).collect(),
                exec_time,
            },
        ));
        self
    }

    pub fn build(self) -> Result<GestureCatalog, StudyError> {
        let mut index = HashMap::with_capacity(self.entries.len());
        for (i, (id, def)) in self.entries.iter().enumerate() {
            if index.insert(id.clone(), i).is_some() {
                return Err(StudyError::DuplicateGesture(id.clone()));
            }
            if let GestureDefinition::Static { threshold } = def {
                if !threshold.is_finite() || *threshold < 0.0 {
                    return Err(StudyError::InvalidThreshold(id.clone()));
                }
            }
        }

        // Keyframe references can point forward, so check them after indexing.
        for (id, def) in &self.entries {
            let GestureDefinition::Dynamic {
                ordered_keyframes,
                exec_time,
            } = def
            else {
                continue;
            };
            if ordered_keyframes.is_empty() {
                return Err(StudyError::EmptyKeyframes(id.clone()));
            }
            if exec_time.is_zero() {
                return Err(StudyError::InvalidExecTime(id.clone()));
            }
            for keyframe in ordered_keyframes {
                let Some(&k) = index.get(keyframe) else {
                    return Err(StudyError::UnknownGesture(keyframe.clone()));
                };
                if !self.entries[k].1.is_static() {
                    return Err(StudyError::InvalidKeyframe {
                        gesture: id.clone(),
                        keyframe: keyframe.clone(),
                    });
                }
            }
            debug!(
                "Dynamic gesture {} validated: {} keyframes in {:.2}s",
                id,
                ordered_keyframes.len(),
                exec_time.as_secs_f64()
            );
        }

        Ok(GestureCatalog {
            entries: self.entries,
            index,
        })
    }
}

// ── File format ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CatalogFile {
    gestures: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum CatalogEntry {
    Static {
        name: GestureId,
        #[serde(default = "default_threshold")]
        threshold: f32,
    },
    Dynamic {
        name: GestureId,
        keyframes: Vec<GestureId>,
        exec_time_s: f64,
    },
}

fn default_threshold() -> f32 {
    DEFAULT_STATIC_THRESHOLD
}

// ── Test helpers ───────────────────────────────────────────

/// The catalog used across the crate's tests: a training pose, two static
/// targets, and one short dynamic gesture `g3 = [g2, g4]` within 2s.
#[cfg(test)]
pub(crate) fn test_catalog() -> GestureCatalog {
    GestureCatalog::builder()
        .static_gesture("training", 0.1)
        .static_gesture("g2", 0.1)
        .static_gesture("g4", 0.1)
        .dynamic_gesture("g3", ["g2", "g4"], Duration::from_secs(2))
        .dynamic_gesture("g5", ["g4", "g2", "training"], Duration::from_secs(4))
        .build()
        .unwrap()
}

// ── Tests ──────────────────────────────────────────────────
