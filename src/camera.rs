use glam::{Mat4, Vec3};

/// A perspective camera.
///
/// Provides position, orientation, field of view and clip planes, and the
/// matrices the volumetric kernel needs to turn a depth sample back into a
/// world-space position.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
    pub fov: f32, // radians, vertical
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_2, // 90 degrees
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, x: f32, y: f32, z: f32) -> Self {
        self.position = Vec3::new(x, y, z);
        self
    }

    pub fn looking_at(mut self, target_x: f32, target_y: f32, target_z: f32) -> Self {
        let forward = (Vec3::new(target_x, target_y, target_z) - self.position).normalize_or_zero();
        if forward != Vec3::ZERO {
            self.forward = forward;
        }
        self
    }

    pub fn with_fov(mut self, fov_degrees: f32) -> Self {
        self.fov = fov_degrees.to_radians();
        self
    }

    pub fn clip_planes(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    /// Compute the right vector from forward and up.
    pub fn right(&self) -> Vec3 {
        let right = self.forward.cross(self.up).normalize_or_zero();
        if right == Vec3::ZERO {
            // Looking straight along `up`.
            self.forward.any_orthonormal_vector()
        } else {
            right
        }
    }

    /// Recompute up to be orthogonal to forward and right.
    pub fn orthogonal_up(&self) -> Vec3 {
        self.right().cross(self.forward).normalize_or_zero()
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward, self.orthogonal_up())
    }

    /// Right-handed perspective projection with a `[0, 1]` depth range.
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov, aspect.max(f32::EPSILON), self.near, self.far)
    }

    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        self.projection_matrix(aspect) * self.view_matrix()
    }

    pub fn inverse_view_projection(&self, aspect: f32) -> Mat4 {
        self.view_projection(aspect).inverse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looking_at_points_forward_at_target() {
        let camera = Camera::new().at(0.0, 0.0, -10.0).looking_at(0.0, 0.0, 0.0);
        assert!((camera.forward - Vec3::Z).length() < 1e-6);
    }

    #[test]
    fn origin_projects_to_screen_center() {
        let camera = Camera::new().at(0.0, 0.0, -10.0).looking_at(0.0, 0.0, 0.0);
        let clip = camera.view_projection(1.0) * glam::Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-5);
        assert!(ndc.y.abs() < 1e-5);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn right_is_defined_when_looking_straight_up() {
        let mut camera = Camera::new();
        camera.forward = Vec3::Y;
        let right = camera.right();
        assert!((right.length() - 1.0).abs() < 1e-5);
        assert!(right.dot(camera.forward).abs() < 1e-5);
    }
}
