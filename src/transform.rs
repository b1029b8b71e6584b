//! World transforms for light entities.

use glam::{Mat4, Quat, Vec3};

/// Position, rotation and scale of an entity.
///
/// Attach this next to a [`SpotLight`](crate::SpotLight) in a `hecs::World`.
/// A light shines along the transform's local -Z axis.
///
/// # Example
///
/// ```
/// use godrays::{Transform, Vec3};
///
/// // A light hanging at (0, 4, 0) shining straight down.
/// let transform = Transform::from_position(Vec3::new(0.0, 4.0, 0.0))
///     .looking_to(Vec3::NEG_Y);
/// assert!((transform.forward() - Vec3::NEG_Y).length() < 1e-5);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    /// World-space position (translation).
    pub position: Vec3,
    /// Rotation as a unit quaternion.
    pub rotation: Quat,
    /// Scale factors for each axis.
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    /// Creates a new identity transform (origin, no rotation, unit scale).
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transform positioned at the given location.
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Sets the position (translation) component.
    pub fn position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    /// Sets the rotation component.
    pub fn rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    /// Sets the scale component.
    pub fn scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Rotates so that local -Z points along `direction`.
    ///
    /// A zero direction leaves the rotation unchanged.
    pub fn looking_to(mut self, direction: Vec3) -> Self {
        let direction = direction.normalize_or_zero();
        if direction != Vec3::ZERO {
            self.rotation = Quat::from_rotation_arc(Vec3::NEG_Z, direction);
        }
        self
    }

    /// Rotates so that local -Z points at `target`.
    pub fn looking_at(self, target: Vec3) -> Self {
        let direction = target - self.position;
        self.looking_to(direction)
    }

    /// The world-space direction of local -Z.
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    /// Computes the 4x4 model matrix (scale, then rotate, then translate).
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looking_at_target_sets_forward() {
        let t = Transform::from_position(Vec3::new(1.0, 2.0, 3.0)).looking_at(Vec3::new(1.0, 2.0, 10.0));
        assert!((t.forward() - Vec3::Z).length() < 1e-5);
    }

    #[test]
    fn matrix_translates_origin_to_position() {
        let t = Transform::from_position(Vec3::new(4.0, -1.0, 2.0)).looking_to(Vec3::X);
        let p = t.matrix().transform_point3(Vec3::ZERO);
        assert!((p - t.position).length() < 1e-6);
    }

    #[test]
    fn zero_direction_keeps_rotation() {
        let t = Transform::new().looking_to(Vec3::ZERO);
        assert_eq!(t.rotation, Quat::IDENTITY);
    }
}
