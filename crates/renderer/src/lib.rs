//! Renderer: the graphics context contract, its headless and wgpu backends,
//! and the GPU-owning resources built on top of it (shader programs, meshes,
//! textures).
//!
//! wgpu = 26.x, winit = 0.30.x, naga = 26.x

use thiserror::Error;

pub mod gl;
pub mod gpu;
pub mod headless;
pub mod mesh;
pub mod reflect;
pub mod shader;
pub mod texture;

pub use gl::{
    ClearColor, ClearMask, CullState, DepthFunc, Face, FilterMode, FrontFace, GraphicsContext,
    SamplerParams, ShaderStage, Topology, UniformKind, UniformValue, WrapMode,
};
pub use gpu::WgpuContext;
pub use headless::HeadlessContext;
pub use mesh::Mesh;
pub use shader::ShaderProgram;
pub use texture::{Texture, TextureOptions};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{stage} shader failed to compile:\n{log}")]
    ShaderCompile { stage: ShaderStage, log: String },
    #[error("program failed to link: {log}")]
    ShaderLink { log: String },
    #[error("uniform '{name}' is {expected:?}, cannot set {found:?}")]
    UniformTypeMismatch {
        name: String,
        expected: UniformKind,
        found: UniformKind,
    },
    #[error("{0} used after dispose")]
    Disposed(&'static str),
    #[error("invalid handle: {0}")]
    InvalidHandle(String),
    #[error("program is not linked")]
    NotLinked,
    #[error("draw issued without a program in use")]
    NoProgram,
    #[error("invalid draw: {0}")]
    InvalidDraw(String),
    #[error("texture error: {0}")]
    Texture(String),
    #[error("graphics device error: {0}")]
    Device(String),
}

pub type RenderResult<T> = Result<T, RenderError>;
