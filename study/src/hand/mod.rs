//! Hand skeleton poses and the override-technique hand-back blend.

pub mod blend;
pub mod pose;

pub use blend::PresentationBlender;
pub use pose::{BonePose, HandPose};
