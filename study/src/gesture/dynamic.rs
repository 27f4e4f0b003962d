//! Dynamic gesture recognition from a stream of static pose events.
//!
//! Each dynamic gesture is an ordered list of static keyframes that must
//! be seen in order within the gesture's execution time.  The tracker keeps
//! one progress entry per dynamic definition, in an arena indexed the same
//! way as the definition list, so entries are never shared and never move.
//!
//! Seeing the first keyframe of a gesture always (re)starts that gesture,
//! even if it was already part-way through its sequence.  A gesture whose
//! first keyframe reappears later in its own sequence therefore cannot
//! complete.

use std::time::Duration;

use tracing::debug;

use super::catalog::{GestureCatalog, GestureId};

/// A dynamic gesture definition as the tracker sees it.
#[derive(Debug, Clone)]
struct TrackedGesture {
    id: GestureId,
    keyframes: Vec<GestureId>,
    exec_time: Duration,
}

impl TrackedGesture {
    fn last_index(&self) -> usize {
        self.keyframes.len() - 1
    }
}

/// Progress of one in-flight dynamic gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerEntry {
    /// Time since the first keyframe was seen.
    pub elapsed: Duration,
    /// Index of the last keyframe reached.
    pub reached_index: usize,
}

impl TrackerEntry {
    fn started() -> Self {
        Self {
            elapsed: Duration::ZERO,
            reached_index: 0,
        }
    }
}

/// Per-definition progress and expiry tracking for dynamic gestures.
#[derive(Debug, Clone)]
pub struct DynamicGestureTracker {
    gestures: Vec<TrackedGesture>,
    /// `entries[i]` belongs to `gestures[i]`; `None` means inactive.
    entries: Vec<Option<TrackerEntry>>,
}

impl DynamicGestureTracker {
    /// Track every dynamic gesture of `catalog`.
    ///
    /// The catalog guarantees non-empty keyframe lists and positive
    /// execution times, so the tracker itself cannot fail.
    pub fn new(catalog: &GestureCatalog) -> Self {
        let gestures: Vec<TrackedGesture> = catalog
            .dynamic_gestures()
            .map(|(id, keyframes, exec_time)| TrackedGesture {
                id: id.clone(),
                keyframes: keyframes.to_vec(),
                exec_time,
            })
            .collect();
        let entries = vec![None; gestures.len()];
        Self { gestures, entries }
    }

    /// Feed one externally recognized static pose.
    ///
    /// Returns the dynamic gestures completed by this event, in definition
    /// order.  Holding a pose may call this repeatedly; callers deduplicate.
    pub fn on_static_recognized(&mut self, gesture: &GestureId) -> Vec<GestureId> {
        let mut recognized = Vec::new();

        for (tracked, entry) in self.gestures.iter().zip(self.entries.iter_mut()) {
            if tracked.keyframes[0] == *gesture {
                if tracked.last_index() == 0 {
                    debug!("Dynamic gesture recognized: {} (single keyframe)", tracked.id);
                    recognized.push(tracked.id.clone());
                    *entry = None;
                } else {
                    *entry = Some(TrackerEntry::started());
                }
                continue;
            }

            let Some(progress) = entry.as_mut() else {
                continue;
            };
            let next = progress.reached_index + 1;
            if tracked.keyframes[next] != *gesture {
                continue;
            }

            if next == tracked.last_index() {
                debug!(
                    "Dynamic gesture recognized: {} after {:.3}s",
                    tracked.id,
                    progress.elapsed.as_secs_f64()
                );
                recognized.push(tracked.id.clone());
                *entry = None;
            } else {
                progress.reached_index = next;
            }
        }

        recognized
    }

    /// Advance all running timers by `dt` and drop expired entries.
    pub fn tick(&mut self, dt: Duration) {
        let mut expired = Vec::new();
        for (i, entry) in self.entries.iter_mut().enumerate() {
            if let Some(progress) = entry {
                progress.elapsed += dt;
                if progress.elapsed > self.gestures[i].exec_time {
                    expired.push(i);
                }
            }
        }

        for i in expired {
            debug!(
                "Dynamic gesture {} expired at keyframe {}",
                self.gestures[i].id,
                self.entries[i].map(|e| e.reached_index).unwrap_or_default()
            );
            self.entries[i] = None;
        }
    }

    /// Current progress of a dynamic gesture, or `None` if it is inactive or unknown.
    pub fn progress(&self, gesture: &GestureId) -> Option<TrackerEntry> {
        self.gestures
            .iter()
            .position(|g| g.id == *gesture)
            .and_then(|i| self.entries[i])
    }

    pub fn is_active(&self, gesture: &GestureId) -> bool {
        self.progress(gesture).is_some()
    }

    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn tracked_count(&self) -> usize {
        self.gestures.len()
    }

    /// Drop all in-flight progress.
    pub fn reset(&mut self) {
        self.entries.iter_mut().for_each(|e| *e = None);
    }

    /// Generate s-expression for status queries.
    pub fn status_sexp(&self) -> String {
        let mut s = format!(
            "(:tracked {} :active {} :gestures (",
            self.tracked_count(),
            self.active_count()
        );
        for (i, (tracked, entry)) in self.gestures.iter().zip(&self.entries).enumerate() {
            if i > 0 {
                s.push(' ');
            }
            match entry {
                Some(p) => s.push_str(&format!(
                    "(:name \"{}\" :reached {} :of {} :elapsed {:.3})",
                    tracked.id,
                    p.reached_index,
                    tracked.keyframes.len(),
                    p.elapsed.as_secs_f64()
                )),
                None => s.push_str(&format!("(:name \"{}\" :reached nil)", tracked.id)),
            }
        }
        s.push_str("))");
        s
    }
}

// ── Tests ──────────────────────────────────────────────────
