use crate::{EulerRot, Mat4, Quat, Vec3};

/// Model transform placing a mesh in the world (Euler XYZ rotation).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    /// Euler angles in radians (XYZ order).
    pub rotation_euler: Vec3,
    pub scale: Vec3,
}

impl Transform {
    #[inline]
    pub const fn identity() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation_euler: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }

    #[inline]
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::identity()
        }
    }

    /// Build matrix = T * R * S.
    #[inline]
    pub fn matrix(&self) -> Mat4 {
        let q = Quat::from_euler(
            EulerRot::XYZ,
            self.rotation_euler.x,
            self.rotation_euler.y,
            self.rotation_euler.z,
        );
        Mat4::from_scale_rotation_translation(self.scale, q, self.translation)
    }

    /// Clip-space transform for this model under `view_projection`.
    #[inline]
    pub fn mvp(&self, view_projection: Mat4) -> Mat4 {
        view_projection * self.matrix()
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec3;

    #[test]
    fn identity_transform_is_identity_matrix() {
        assert_eq!(Transform::identity().matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn translate_then_scale_matrix() {
        let t = Transform {
            translation: vec3(1.0, 2.0, 3.0),
            scale: vec3(2.0, 2.0, 2.0),
            ..Transform::identity()
        };
        let m = t.matrix().to_cols_array();
        assert!((m[12] - 1.0).abs() < 1e-6);
        assert!((m[13] - 2.0).abs() < 1e-6);
        assert!((m[14] - 3.0).abs() < 1e-6);
        assert!((m[0] - 2.0).abs() < 1e-6);
        assert!((m[5] - 2.0).abs() < 1e-6);
        assert!((m[10] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn mvp_applies_model_first() {
        let vp = Mat4::from_scale(vec3(2.0, 2.0, 2.0));
        let t = Transform::from_translation(vec3(-10.0, 0.0, -10.0));
        let p = t.mvp(vp).transform_point3(Vec3::ZERO);
        assert!(p.abs_diff_eq(vec3(-20.0, 0.0, -20.0), 1e-5));
    }
}
