//! Polled input state. The platform layer feeds raw window events in, scenes
//! and controllers only read the current snapshot.

use std::collections::HashSet;

use crate::Vec2;

/// Keys the engine cares about. Everything else is dropped by the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    W,
    A,
    S,
    D,
    Q,
    E,
    Shift,
    Space,
    Escape,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Snapshot of held keys/buttons plus deltas accumulated since the last
/// [`Input::end_frame`].
#[derive(Clone, Debug, Default)]
pub struct Input {
    keys: HashSet<Key>,
    buttons: HashSet<MouseButton>,
    mouse_delta: Vec2,
    wheel_delta: f32,
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_key_down(&self, key: Key) -> bool {
        self.keys.contains(&key)
    }

    #[inline]
    pub fn is_button_down(&self, button: MouseButton) -> bool {
        self.buttons.contains(&button)
    }

    #[inline]
    pub fn mouse_delta(&self) -> Vec2 {
        self.mouse_delta
    }

    #[inline]
    pub fn wheel_delta(&self) -> f32 {
        self.wheel_delta
    }

    pub fn set_key(&mut self, key: Key, pressed: bool) {
        if pressed {
            self.keys.insert(key);
        } else {
            self.keys.remove(&key);
        }
    }

    pub fn set_button(&mut self, button: MouseButton, pressed: bool) {
        if pressed {
            self.buttons.insert(button);
        } else {
            self.buttons.remove(&button);
        }
    }

    pub fn add_mouse_delta(&mut self, delta: Vec2) {
        self.mouse_delta += delta;
    }

    pub fn add_wheel_delta(&mut self, delta: f32) {
        self.wheel_delta += delta;
    }

    /// Drop per-frame deltas. Held keys and buttons persist.
    pub fn end_frame(&mut self) {
        self.mouse_delta = Vec2::ZERO;
        self.wheel_delta = 0.0;
    }

    /// Release everything, e.g. when the window loses focus.
    pub fn clear(&mut self) {
        self.keys.clear();
        self.buttons.clear();
        self.end_frame();
    }
}
