//! Immediate-mode graphics context contract.
//!
//! Scene code talks to the GPU only through [`GraphicsContext`]: shader
//! compilation, buffer/texture upload, fixed-function state and indexed draws,
//! addressed through small copyable handles. The trait is object safe so a
//! scene can hold `&mut dyn GraphicsContext` regardless of the backend.

use asset::{MeshVertex, TextureData};
use bitflags::bitflags;

use crate::RenderResult;

macro_rules! handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {$(
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);
    )*};
}

handle!(
    /// A compiled shader stage.
    ShaderId,
    /// A linked program.
    ProgramId,
    /// Vertex and index buffers of one mesh.
    VertexArrayId,
    TextureId,
);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        })
    }
}

/// Primitive topology of an indexed draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Topology {
    #[default]
    Triangles,
    TriangleStrip,
    Lines,
    LineStrip,
    Points,
}

impl Topology {
    pub const ALL: [Topology; 5] = [
        Topology::Triangles,
        Topology::TriangleStrip,
        Topology::Lines,
        Topology::LineStrip,
        Topology::Points,
    ];
}

bitflags! {
    /// Buffers affected by [`GraphicsContext::clear`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ClearMask: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum WrapMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

/// Sampling state of a texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SamplerParams {
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    /// `None` samples only the base level.
    pub mipmap_filter: Option<FilterMode>,
}

impl Default for SamplerParams {
    /// Repeat wrapping, linear magnification, trilinear minification.
    fn default() -> Self {
        Self {
            wrap_s: WrapMode::Repeat,
            wrap_t: WrapMode::Repeat,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: Some(FilterMode::Linear),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Face {
    Front,
    Back,
}

/// Winding order of front faces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum FrontFace {
    #[default]
    Ccw,
    Cw,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CullState {
    pub face: Face,
    pub front_face: FrontFace,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepthFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearColor {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl ClearColor {
    pub const BLACK: Self = Self::rgba(0.0, 0.0, 0.0, 1.0);

    pub const fn rgba(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }
    }
}

impl From<ClearColor> for wgpu::Color {
    fn from(c: ClearColor) -> Self {
        wgpu::Color {
            r: c.r,
            g: c.g,
            b: c.b,
            a: c.a,
        }
    }
}

/// Type of a uniform as declared by the shader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Int,
    Float4,
    Mat4,
    /// A texture binding; its `Int` value selects the texture unit.
    Sampler,
    Unsupported,
}

/// A value for [`GraphicsContext::set_uniform`]. Matrices are column-major.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float4([f32; 4]),
    Mat4([f32; 16]),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Int(_) => UniformKind::Int,
            UniformValue::Float4(_) => UniformKind::Float4,
            UniformValue::Mat4(_) => UniformKind::Mat4,
        }
    }

    /// Whether this value may be stored into a uniform of `kind`.
    pub fn fits(&self, kind: UniformKind) -> bool {
        match (self, kind) {
            (UniformValue::Int(_), UniformKind::Sampler) => true,
            _ => self.kind() == kind,
        }
    }
}

/// Index of a uniform in [`ProgramLayout::uniforms`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniformInfo {
    pub name: String,
    pub kind: UniformKind,
    /// Byte offset inside the uniform block, or the binding index for
    /// samplers.
    pub offset: u32,
}

/// A texture binding and the sampler bound right after it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureSlot {
    pub name: String,
    pub binding: u32,
    pub sampler_binding: u32,
}

/// What linking learned about a program's interface.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgramLayout {
    pub vertex_entry: String,
    pub fragment_entry: String,
    pub uniforms: Vec<UniformInfo>,
    /// Size of the uniform block in bytes (16-byte multiple), 0 if none.
    pub block_size: u32,
    pub textures: Vec<TextureSlot>,
}

impl ProgramLayout {
    pub fn location(&self, name: &str) -> Option<UniformLocation> {
        self.uniforms
            .iter()
            .position(|u| u.name == name)
            .map(|i| UniformLocation(i as u32))
    }

    pub fn uniform(&self, location: UniformLocation) -> Option<&UniformInfo> {
        self.uniforms.get(location.0 as usize)
    }

    /// Index in `textures` of the sampler uniform at `location`.
    pub fn texture_slot(&self, location: UniformLocation) -> Option<usize> {
        let info = self.uniform(location)?;
        if info.kind != UniformKind::Sampler {
            return None;
        }
        self.textures.iter().position(|t| t.binding == info.offset)
    }
}

pub trait GraphicsContext {
    /// Compile one stage. Fails with `ShaderCompile` carrying the diagnostics.
    fn create_shader(&mut self, stage: ShaderStage, source: &str) -> RenderResult<ShaderId>;
    fn delete_shader(&mut self, shader: ShaderId) -> RenderResult<()>;

    /// Link a vertex and a fragment stage. Fails with `ShaderLink`.
    fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
    ) -> RenderResult<(ProgramId, ProgramLayout)>;
    fn delete_program(&mut self, program: ProgramId) -> RenderResult<()>;
    /// Program used by subsequent draws; `None` unbinds.
    fn use_program(&mut self, program: Option<ProgramId>) -> RenderResult<()>;
    fn set_uniform(
        &mut self,
        program: ProgramId,
        location: UniformLocation,
        value: UniformValue,
    ) -> RenderResult<()>;

    fn create_vertex_array(
        &mut self,
        vertices: &[MeshVertex],
        indices: &[u32],
    ) -> RenderResult<VertexArrayId>;
    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId) -> RenderResult<()>;
    /// Draw the first `count` indices with the program in use and the
    /// textures currently bound to the units its samplers select.
    fn draw_elements(
        &mut self,
        vertex_array: VertexArrayId,
        topology: Topology,
        count: u32,
    ) -> RenderResult<()>;

    fn create_texture(&mut self) -> RenderResult<TextureId>;
    /// Replace the base level of `texture`.
    fn tex_image_2d(&mut self, texture: TextureId, image: &TextureData) -> RenderResult<()>;
    fn generate_mipmap(&mut self, texture: TextureId) -> RenderResult<()>;
    fn tex_parameters(&mut self, texture: TextureId, params: SamplerParams) -> RenderResult<()>;
    /// Bind `texture` to texture unit `unit`; `None` unbinds.
    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) -> RenderResult<()>;
    fn delete_texture(&mut self, texture: TextureId) -> RenderResult<()>;

    fn clear_color(&mut self, color: ClearColor);
    fn clear(&mut self, mask: ClearMask);
    /// `None` disables face culling.
    fn set_cull_face(&mut self, cull: Option<CullState>);
    /// `None` disables depth testing (and depth writes).
    fn set_depth_test(&mut self, func: Option<DepthFunc>);

    fn drawing_buffer_size(&self) -> (u32, u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ProgramLayout {
        ProgramLayout {
            uniforms: vec![
                UniformInfo {
                    name: "MVP".into(),
                    kind: UniformKind::Mat4,
                    offset: 0,
                },
                UniformInfo {
                    name: "texture_sampler".into(),
                    kind: UniformKind::Sampler,
                    offset: 0,
                },
            ],
            block_size: 64,
            textures: vec![TextureSlot {
                name: "texture_sampler".into(),
                binding: 0,
                sampler_binding: 1,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn locations_resolve_by_name() {
        let layout = layout();
        assert_eq!(layout.location("MVP"), Some(UniformLocation(0)));
        assert_eq!(layout.location("mvp"), None);
        assert_eq!(layout.texture_slot(UniformLocation(1)), Some(0));
        assert_eq!(layout.texture_slot(UniformLocation(0)), None);
    }

    #[test]
    fn int_values_fit_samplers() {
        assert!(UniformValue::Int(0).fits(UniformKind::Sampler));
        assert!(UniformValue::Int(0).fits(UniformKind::Int));
        assert!(!UniformValue::Float4([0.0; 4]).fits(UniformKind::Mat4));
        assert!(!UniformValue::Mat4([0.0; 16]).fits(UniformKind::Sampler));
    }

    #[test]
    fn clear_mask_combines() {
        let mask = ClearMask::COLOR | ClearMask::DEPTH;
        assert!(mask.contains(ClearMask::DEPTH));
        assert_eq!(mask, ClearMask::all());
    }
}
