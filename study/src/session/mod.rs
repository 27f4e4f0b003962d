//! Study session: the protocol state machine plus the dynamic gesture
//! tracker feeding it, stepped once per frame.

pub mod config;
pub mod host;
pub mod protocol;
pub mod record;
pub mod story;

use std::time::Duration;

use tracing::debug;

pub use config::StudyConfig;
pub use host::StudyHost;
pub use protocol::{Phase, SessionProtocol};
pub use story::{StudyPlan, StudyStory};

use crate::error::StudyError;
use crate::gesture::{DynamicGestureTracker, GestureCatalog, GestureId};

/// One participant/modality run.
pub struct Study {
    tracker: DynamicGestureTracker,
    protocol: SessionProtocol,
}

impl Study {
    pub fn new(catalog: &GestureCatalog, plan: StudyPlan, config: StudyConfig) -> Result<Self, StudyError> {
        Ok(Self {
            tracker: DynamicGestureTracker::new(catalog),
            protocol: SessionProtocol::new(catalog, plan, config)?,
        })
    }

    /// Advance one frame.
    ///
    /// Tracker timers expire first, then every static recognition of this
    /// frame goes to the tracker and the protocol, followed by the dynamic
    /// gestures it completed.  Only then does the protocol check its own
    /// deadlines, so a recognition arriving on the frame its window closes
    /// still counts.  Tracker progress is dropped whenever the frame moves
    /// the protocol to another gesture.  Returns the dynamic gestures
    /// completed this frame.
    pub fn step<H: StudyHost>(
        &mut self,
        now: Duration,
        dt: Duration,
        statics: &[GestureId],
        host: &mut H,
    ) -> Result<Vec<GestureId>, StudyError> {
        let gesture_index = self.protocol.current_gesture_index();
        self.tracker.tick(dt);

        let mut completed = Vec::new();
        for gesture in statics {
            completed.extend(self.tracker.on_static_recognized(gesture));
            self.protocol.on_recognize(gesture, now, host);
        }
        for gesture in &completed {
            debug!("Dynamic gesture {} completed", gesture);
            self.protocol.on_recognize(gesture, now, host);
        }

        self.protocol.tick(now, host)?;
        if self.protocol.current_gesture_index() != gesture_index {
            debug!("Gesture switched to {}, resetting tracker", self.protocol.current_gesture());
            self.tracker.reset();
        }
        Ok(completed)
    }

    pub fn tracker(&self) -> &DynamicGestureTracker {
        &self.tracker
    }

    pub fn protocol(&self) -> &SessionProtocol {
        &self.protocol
    }

    pub fn protocol_mut(&mut self) -> &mut SessionProtocol {
        &mut self.protocol
    }

    pub fn is_finished(&self) -> bool {
        self.protocol.is_finished()
    }

    /// Protocol and tracker status in one s-expression.
    pub fn status_sexp(&self, now: Duration) -> String {
        format!(
            "(:time {:.3} :protocol {} :tracker {})",
            now.as_secs_f64(),
            self.protocol.status_sexp(now),
            self.tracker.status_sexp()
        )
    }
}
