//! Translation of winit events into [`corelib::Input`] updates.

use corelib::{Input, Key, MouseButton, Vec2};
use winit::{
    event::{ElementState, MouseScrollDelta},
    keyboard::KeyCode,
};

/// Pixels per wheel line for touchpads reporting pixel deltas.
const PIXELS_PER_LINE: f32 = 40.0;

pub fn map_key(code: KeyCode) -> Option<Key> {
    Some(match code {
        KeyCode::KeyW => Key::W,
        KeyCode::KeyA => Key::A,
        KeyCode::KeyS => Key::S,
        KeyCode::KeyD => Key::D,
        KeyCode::KeyQ => Key::Q,
        KeyCode::KeyE => Key::E,
        KeyCode::ShiftLeft | KeyCode::ShiftRight => Key::Shift,
        KeyCode::Space => Key::Space,
        KeyCode::Escape => Key::Escape,
        _ => return None,
    })
}

pub fn map_button(button: winit::event::MouseButton) -> Option<MouseButton> {
    match button {
        winit::event::MouseButton::Left => Some(MouseButton::Left),
        winit::event::MouseButton::Right => Some(MouseButton::Right),
        winit::event::MouseButton::Middle => Some(MouseButton::Middle),
        _ => None,
    }
}

/// Wheel movement in lines, positive away from the user.
pub fn wheel_lines(delta: MouseScrollDelta) -> f32 {
    match delta {
        MouseScrollDelta::LineDelta(_, y) => y,
        MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / PIXELS_PER_LINE,
    }
}

pub fn on_key(input: &mut Input, code: KeyCode, state: ElementState) {
    if let Some(key) = map_key(code) {
        input.set_key(key, state.is_pressed());
    }
}

pub fn on_button(input: &mut Input, button: winit::event::MouseButton, state: ElementState) {
    if let Some(button) = map_button(button) {
        input.set_button(button, state.is_pressed());
    }
}

pub fn on_mouse_motion(input: &mut Input, (dx, dy): (f64, f64)) {
    input.add_mouse_delta(Vec2::new(dx as f32, dy as f32));
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::dpi::PhysicalPosition;

    #[test]
    fn maps_movement_keys() {
        assert_eq!(map_key(KeyCode::KeyW), Some(Key::W));
        assert_eq!(map_key(KeyCode::ShiftRight), Some(Key::Shift));
        assert_eq!(map_key(KeyCode::KeyZ), None);
    }

    #[test]
    fn key_state_is_tracked() {
        let mut input = Input::new();
        on_key(&mut input, KeyCode::KeyA, ElementState::Pressed);
        assert!(input.is_key_down(Key::A));
        on_key(&mut input, KeyCode::KeyA, ElementState::Released);
        assert!(!input.is_key_down(Key::A));
    }

    #[test]
    fn buttons_and_motion() {
        let mut input = Input::new();
        on_button(&mut input, winit::event::MouseButton::Left, ElementState::Pressed);
        on_mouse_motion(&mut input, (3.0, -2.0));
        on_mouse_motion(&mut input, (1.0, 0.0));
        assert!(input.is_button_down(MouseButton::Left));
        assert_eq!(input.mouse_delta(), Vec2::new(4.0, -2.0));
        assert_eq!(map_button(winit::event::MouseButton::Back), None);
    }

    #[test]
    fn wheel_deltas_in_lines() {
        assert_eq!(wheel_lines(MouseScrollDelta::LineDelta(0.0, -1.0)), -1.0);
        assert_eq!(
            wheel_lines(MouseScrollDelta::PixelDelta(PhysicalPosition::new(0.0, 80.0))),
            2.0
        );
    }
}
