use thiserror::Error;

use crate::{Mat4, Vec3};

/// Projection used by [`Camera::proj`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ProjectionKind {
    #[default]
    Perspective,
    Orthographic,
}

#[derive(Debug, Error, PartialEq)]
pub enum CameraError {
    #[error("invalid clip planes: near={near}, far={far} (need 0 < near < far)")]
    ClipPlanes { near: f32, far: f32 },
    #[error("camera direction must be non-zero and finite")]
    Direction,
}

/// Free camera (right-handed, depth in [0, 1]).
///
/// `direction` is a view direction, not a target point, and does not need to
/// be normalized. All matrices are derived on demand, nothing is cached.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub kind: ProjectionKind,
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
    pub fov_y_rad: f32,
    /// Vertical extent of the view volume for orthographic projection.
    pub orthographic_height: f32,
    pub aspect: f32,
    pub z_near: f32,
    pub z_far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            kind: ProjectionKind::Perspective,
            position: Vec3::ZERO,
            direction: Vec3::NEG_Z,
            up: Vec3::Y,
            fov_y_rad: 90f32.to_radians(),
            orthographic_height: 2.0,
            aspect: 1.0,
            z_near: 0.01,
            z_far: 1000.0,
        }
    }
}

impl Camera {
    pub fn new_perspective(
        position: Vec3,
        direction: Vec3,
        fov_y_rad: f32,
        z_near: f32,
        z_far: f32,
        aspect: f32,
    ) -> Self {
        Self {
            kind: ProjectionKind::Perspective,
            position,
            direction,
            fov_y_rad,
            z_near,
            z_far,
            aspect,
            ..Self::default()
        }
    }

    pub fn new_orthographic(
        position: Vec3,
        direction: Vec3,
        height: f32,
        z_near: f32,
        z_far: f32,
        aspect: f32,
    ) -> Self {
        Self {
            kind: ProjectionKind::Orthographic,
            position,
            direction,
            orthographic_height: height,
            z_near,
            z_far,
            aspect,
            ..Self::default()
        }
    }

    /// Check the clip-plane and direction invariants.
    pub fn validate(&self) -> Result<(), CameraError> {
        let planes_ok = self.z_near > 0.0 && self.z_far > self.z_near && self.z_far.is_finite();
        if !planes_ok {
            return Err(CameraError::ClipPlanes {
                near: self.z_near,
                far: self.z_far,
            });
        }
        if !self.direction.is_finite() || self.direction.length_squared() == 0.0 {
            return Err(CameraError::Direction);
        }
        Ok(())
    }

    /// Unit view direction.
    #[inline]
    pub fn forward(&self) -> Vec3 {
        self.direction.normalize_or_zero()
    }

    /// Unit vector pointing to the right of the view direction.
    #[inline]
    pub fn right(&self) -> Vec3 {
        self.forward().cross(self.up).normalize_or_zero()
    }

    #[inline]
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.direction, self.up)
    }

    #[inline]
    pub fn proj(&self) -> Mat4 {
        let aspect = self.aspect.max(1e-6);
        match self.kind {
            ProjectionKind::Perspective => {
                Mat4::perspective_rh(self.fov_y_rad, aspect, self.z_near, self.z_far)
            }
            ProjectionKind::Orthographic => {
                let half_h = self.orthographic_height * 0.5;
                let half_w = half_h * aspect;
                Mat4::orthographic_rh(-half_w, half_w, -half_h, half_h, self.z_near, self.z_far)
            }
        }
    }

    /// `Projection * View`, recomputed on every call.
    #[inline]
    pub fn proj_view(&self) -> Mat4 {
        self.proj() * self.view()
    }

    /// Update the aspect ratio from a framebuffer size. Zero sizes are ignored.
    pub fn set_aspect_from_size(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        } else {
            log::debug!("Ignoring {width}x{height} aspect update");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec3;

    fn approx_eq(a: Mat4, b: Mat4) -> bool {
        a.abs_diff_eq(b, 1e-5)
    }

    #[test]
    fn proj_view_is_projection_times_view() {
        let cam = Camera::new_perspective(
            vec3(0.0, 2.0, 0.0),
            vec3(-1.0, 0.0, -2.0),
            60f32.to_radians(),
            0.1,
            100.0,
            16.0 / 9.0,
        );
        assert!(approx_eq(cam.proj_view(), cam.proj() * cam.view()));
    }

    #[test]
    fn proj_view_follows_mutation() {
        let mut cam = Camera::default();
        let before = cam.proj_view();
        cam.position = vec3(3.0, 1.0, -2.0);
        let moved = cam.proj_view();
        assert!(!approx_eq(before, moved));
        let fresh = Mat4::perspective_rh(cam.fov_y_rad, cam.aspect, cam.z_near, cam.z_far)
            * Mat4::look_at_rh(cam.position, cam.position + cam.direction, Vec3::Y);
        assert!(approx_eq(moved, fresh));

        cam.direction = vec3(1.0, 0.0, 0.0);
        let turned = cam.proj_view();
        assert!(approx_eq(turned, cam.proj() * cam.view()));
        assert!(!approx_eq(moved, turned));
    }

    #[test]
    fn direction_is_not_a_target() {
        let a = Camera::new_perspective(vec3(5.0, 0.0, 0.0), Vec3::NEG_Z, 1.0, 0.1, 10.0, 1.0);
        let mut b = a;
        b.direction = Vec3::NEG_Z * 7.0;
        assert!(approx_eq(a.view(), b.view()));
    }

    #[test]
    fn orthographic_projection_keeps_depth_linear() {
        let cam = Camera::new_orthographic(Vec3::ZERO, Vec3::NEG_Z, 4.0, 1.0, 11.0, 2.0);
        let p = cam.proj();
        let near = p.project_point3(vec3(0.0, 0.0, -1.0));
        let mid = p.project_point3(vec3(0.0, 0.0, -6.0));
        let edge = p.project_point3(vec3(4.0, 2.0, -1.0));
        assert!((near.z - 0.0).abs() < 1e-5);
        assert!((mid.z - 0.5).abs() < 1e-5);
        assert!((edge.x - 1.0).abs() < 1e-5);
        assert!((edge.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn validate_rejects_bad_planes_and_direction() {
        let mut cam = Camera::default();
        assert!(cam.validate().is_ok());
        cam.z_near = 10.0;
        cam.z_far = 1.0;
        assert!(matches!(cam.validate(), Err(CameraError::ClipPlanes { .. })));
        cam.z_near = 0.0;
        cam.z_far = 1.0;
        assert!(cam.validate().is_err());
        cam.z_near = 0.1;
        cam.direction = Vec3::ZERO;
        assert_eq!(cam.validate(), Err(CameraError::Direction));
    }

    #[test]
    fn aspect_from_size_ignores_zero() {
        let mut cam = Camera::default();
        cam.set_aspect_from_size(1280, 720);
        assert!((cam.aspect - 1280.0 / 720.0).abs() < 1e-6);
        cam.set_aspect_from_size(0, 720);
        assert!((cam.aspect - 1280.0 / 720.0).abs() < 1e-6);
    }
}
