//! Gesture definitions and dynamic (sequence) gesture recognition.
//!
//! Static pose matching happens outside this crate; its results arrive
//! here as `GestureId`s.

pub mod catalog;
pub mod dynamic;

pub use catalog::{GestureCatalog, GestureDefinition, GestureId};
pub use dynamic::DynamicGestureTracker;
