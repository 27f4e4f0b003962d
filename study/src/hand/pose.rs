//! Skeletal hand pose data.
//!
//! A pose is one local position + rotation sample per bone, in the
//! skeleton's own bone order.  Live tracking and the demonstration
//! playback rig share the same skeleton, so their poses line up by index.

use glam::{Quat, Vec3};

/// Bones in a tracked hand skeleton (19 finger/wrist bones + 5 tips).
pub const HAND_BONE_COUNT: usize = 24;

/// Local transform of a single bone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BonePose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for BonePose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl BonePose {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Interpolate towards `end`: linear in position, spherical in rotation.
    pub fn blend(&self, end: &BonePose, t: f32) -> BonePose {
        BonePose {
            position: self.position.lerp(end.position, t),
            rotation: self.rotation.slerp(end.rotation, t),
        }
    }
}

/// A full-skeleton pose.
pub type HandPose = Vec<BonePose>;

/// Rest pose: every bone at the origin with identity rotation.
pub fn rest_pose(bones: usize) -> HandPose {
    vec![BonePose::default(); bones]
}

/// Format a pose's bone positions as semicolon-separated `x;y;z` triples.
pub fn positions_row(pose: &[BonePose]) -> String {
    pose.iter()
        .map(|b| format!("{:.4};{:.4};{:.4}", b.position.x, b.position.y, b.position.z))
        .collect::<Vec<_>>()
        .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rest_pose() {
        let pose = rest_pose(HAND_BONE_COUNT);
        assert_eq!(pose.len(), 24);
        assert!(pose.iter().all(|b| *b == BonePose::default()));
    }

    #[test]
    fn test_blend_endpoints() {
        let a = BonePose::new(Vec3::ZERO, Quat::IDENTITY);
        let b = BonePose::new(Vec3::new(1.0, 2.0, 3.0), Quat::from_rotation_y(1.0));
        assert_eq!(a.blend(&b, 0.0).position, a.position);
        assert!((a.blend(&b, 1.0).position - b.position).length() < 1e-6);
        assert!(a.blend(&b, 1.0).rotation.angle_between(b.rotation) < 1e-4);
    }

    #[test]
    fn test_blend_midpoint() {
        let a = BonePose::new(Vec3::ZERO, Quat::IDENTITY);
        let b = BonePose::new(Vec3::new(2.0, 0.0, 0.0), Quat::from_rotation_z(1.0));
        let mid = a.blend(&b, 0.5);
        assert!((mid.position.x - 1.0).abs() < 1e-6);
        // Spherical interpolation: half the angle
        assert!((mid.rotation.angle_between(Quat::IDENTITY) - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_positions_row() {
        let pose = vec![
            BonePose::new(Vec3::new(0.1, 0.2, 0.3), Quat::IDENTITY),
            BonePose::default(),
        ];
        assert_eq!(positions_row(&pose), "0.1000;0.2000;0.3000;0.0000;0.0000;0.0000");
    }
}
