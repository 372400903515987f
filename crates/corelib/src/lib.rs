//! Core types: math re-exports, Transform, Camera, input and the fly
//! camera controller.

pub use glam::{EulerRot, Mat4, Quat, Vec2, Vec3, Vec4, vec3};

pub mod camera;
pub mod controller;
pub mod input;
pub mod transform;

pub use camera::{Camera, CameraError, ProjectionKind};
pub use controller::FlyCameraController;
pub use input::{Input, Key, MouseButton};
pub use transform::Transform;
