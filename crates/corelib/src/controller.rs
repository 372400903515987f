//! Fly-style camera controller: free movement driven by polled input, with
//! no velocity or acceleration state.

use std::f32::consts::{FRAC_PI_2, PI};

use crate::{
    Vec3,
    camera::Camera,
    input::{Input, Key, MouseButton},
};

/// Pitch stays short of straight up or down so the view basis keeps a
/// well-defined right vector.
const PITCH_LIMIT: f32 = FRAC_PI_2 - 1e-3;

#[derive(Clone, Debug)]
pub struct FlyCameraController {
    yaw: f32,
    pitch: f32,
    /// Radians per pixel of horizontal mouse movement.
    pub yaw_sensitivity: f32,
    /// Radians per pixel of vertical mouse movement.
    pub pitch_sensitivity: f32,
    /// World units per second.
    pub movement_sensitivity: f32,
    /// World units per second while Shift is held.
    pub fast_movement_sensitivity: f32,
    /// Radians of fov per wheel line.
    pub field_of_view_sensitivity: f32,
    pub fov_min: f32,
    pub fov_max: f32,
}

impl FlyCameraController {
    /// Build a controller whose yaw/pitch match the camera's current direction.
    pub fn new(camera: &Camera) -> Self {
        let d = camera.direction;
        let yaw = d.z.atan2(d.x);
        let pitch = d.y.atan2((d.x * d.x + d.z * d.z).sqrt());
        Self {
            yaw,
            pitch,
            yaw_sensitivity: 0.002,
            pitch_sensitivity: 0.002,
            movement_sensitivity: 1.0,
            fast_movement_sensitivity: 10.0,
            field_of_view_sensitivity: 0.05,
            fov_min: PI / 8.0,
            fov_max: PI * 0.9,
        }
    }

    pub fn with_movement_sensitivity(mut self, units_per_second: f32) -> Self {
        self.movement_sensitivity = units_per_second;
        self
    }

    #[inline]
    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    #[inline]
    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    /// Apply one frame of input to `camera`. `dt` is in seconds.
    ///
    /// Without input the camera is left untouched, whatever `dt` is.
    pub fn update(&mut self, camera: &mut Camera, input: &Input, dt: f32) {
        let mouse = input.mouse_delta();
        if input.is_button_down(MouseButton::Left) && mouse != crate::Vec2::ZERO {
            self.yaw += mouse.x * self.yaw_sensitivity;
            self.pitch -= mouse.y * self.pitch_sensitivity;
            self.pitch = self.pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT);
            camera.direction = Vec3::new(
                self.yaw.cos() * self.pitch.cos(),
                self.pitch.sin(),
                self.yaw.sin() * self.pitch.cos(),
            );
        }

        let forward = camera.forward();
        let right = camera.right();
        let up = camera.up.normalize_or_zero();

        let mut movement = Vec3::ZERO;
        if input.is_key_down(Key::W) {
            movement += forward;
        }
        if input.is_key_down(Key::S) {
            movement -= forward;
        }
        if input.is_key_down(Key::D) {
            movement += right;
        }
        if input.is_key_down(Key::A) {
            movement -= right;
        }
        if input.is_key_down(Key::Q) {
            movement += up;
        }
        if input.is_key_down(Key::E) {
            movement -= up;
        }

        if movement != Vec3::ZERO {
            let speed = if input.is_key_down(Key::Shift) {
                self.fast_movement_sensitivity
            } else {
                self.movement_sensitivity
            };
            camera.position += movement * (dt * speed);
        }

        let wheel = input.wheel_delta();
        if wheel != 0.0 {
            camera.fov_y_rad = (camera.fov_y_rad - wheel * self.field_of_view_sensitivity)
                .clamp(self.fov_min, self.fov_max);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Vec2, vec3};

    fn tank_camera() -> Camera {
        Camera::new_perspective(
            vec3(0.0, 2.0, 0.0),
            vec3(-1.0, 0.0, -2.0),
            90f32.to_radians(),
            0.01,
            1000.0,
            16.0 / 9.0,
        )
    }

    #[test]
    fn idle_input_leaves_pose_unchanged() {
        let mut camera = tank_camera();
        let before = camera;
        let mut controller = FlyCameraController::new(&camera);
        let input = Input::new();
        for dt in [0.0, 0.016, 1.0, 1e6, f32::INFINITY, f32::NAN] {
            controller.update(&mut camera, &input, dt);
            assert_eq!(camera, before);
        }
    }

    #[test]
    fn mouse_delta_without_button_does_not_rotate() {
        let mut camera = tank_camera();
        let before = camera;
        let mut controller = FlyCameraController::new(&camera);
        let mut input = Input::new();
        input.add_mouse_delta(Vec2::new(40.0, 10.0));
        controller.update(&mut camera, &input, 0.016);
        assert_eq!(camera.direction, before.direction);
    }

    #[test]
    fn forward_key_moves_along_direction_scaled_by_dt() {
        let mut camera = tank_camera();
        let start = camera.position;
        let mut controller = FlyCameraController::new(&camera).with_movement_sensitivity(5.0);
        let mut input = Input::new();
        input.set_key(Key::W, true);
        controller.update(&mut camera, &input, 0.5);
        let expected = start + camera.forward() * 2.5;
        assert!(camera.position.abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn shift_uses_fast_sensitivity() {
        let mut camera = tank_camera();
        let start = camera.position;
        let mut controller = FlyCameraController::new(&camera);
        let mut input = Input::new();
        input.set_key(Key::Q, true);
        input.set_key(Key::Shift, true);
        controller.update(&mut camera, &input, 1.0);
        assert!((camera.position.y - start.y - controller.fast_movement_sensitivity).abs() < 1e-5);
    }

    #[test]
    fn drag_rotates_and_clamps_pitch() {
        let mut camera = tank_camera();
        let mut controller = FlyCameraController::new(&camera);
        let mut input = Input::new();
        input.set_button(MouseButton::Left, true);
        input.add_mouse_delta(Vec2::new(0.0, -1.0e6));
        controller.update(&mut camera, &input, 0.016);
        assert!((controller.pitch() - PITCH_LIMIT).abs() < 1e-6);
        assert!(camera.direction.y > 0.99);
        assert!(camera.right().length() > 0.5);
        assert!(camera.proj_view().is_finite());
    }

    #[test]
    fn yaw_pitch_roundtrip_from_direction() {
        let camera = tank_camera();
        let mut copy = camera;
        let mut controller = FlyCameraController::new(&camera);
        let mut input = Input::new();
        input.set_button(MouseButton::Left, true);
        // A zero-sized drag would be skipped, so nudge and undo.
        input.add_mouse_delta(Vec2::new(1.0, 0.0));
        controller.update(&mut copy, &input, 0.0);
        input.end_frame();
        input.add_mouse_delta(Vec2::new(-1.0, 0.0));
        controller.update(&mut copy, &input, 0.0);
        assert!(copy.forward().abs_diff_eq(camera.forward(), 1e-5));
    }

    #[test]
    fn wheel_zooms_within_bounds() {
        let mut camera = tank_camera();
        let mut controller = FlyCameraController::new(&camera);
        let mut input = Input::new();
        input.add_wheel_delta(1000.0);
        controller.update(&mut camera, &input, 0.016);
        assert_eq!(camera.fov_y_rad, controller.fov_min);
    }
}
