//! A [`GraphicsContext`] without a GPU.
//!
//! Shaders are compiled and linked through naga exactly like the wgpu
//! backend does, every handle is tracked, and each call is recorded so tests
//! can assert on what a scene asked the GPU to do.

use std::collections::{BTreeMap, HashMap};

use asset::{MeshVertex, TextureData};

use crate::{
    RenderError, RenderResult,
    gl::{
        ClearColor, ClearMask, CullState, DepthFunc, GraphicsContext, ProgramId, ProgramLayout,
        SamplerParams, ShaderId, ShaderStage, TextureId, Topology, UniformKind, UniformLocation,
        UniformValue, VertexArrayId,
    },
    reflect::{self, CompiledStage},
};

/// One recorded call.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    CreateShader(ShaderStage, ShaderId),
    DeleteShader(ShaderId),
    LinkProgram(ProgramId),
    DeleteProgram(ProgramId),
    UseProgram(Option<ProgramId>),
    SetUniform {
        program: ProgramId,
        name: String,
        value: UniformValue,
    },
    CreateVertexArray {
        vertex_array: VertexArrayId,
        vertices: usize,
        indices: usize,
    },
    DeleteVertexArray(VertexArrayId),
    Draw(DrawCall),
    CreateTexture(TextureId),
    /// Level 0 upload; `pixels` are RGBA8 rows, first row first.
    TexImage2D {
        texture: TextureId,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    },
    GenerateMipmap(TextureId),
    TexParameters(TextureId, SamplerParams),
    BindTexture(u32, Option<TextureId>),
    DeleteTexture(TextureId),
    ClearColor(ClearColor),
    Clear(ClearMask),
    CullFace(Option<CullState>),
    DepthTest(Option<DepthFunc>),
}

/// Everything an indexed draw depended on, captured at the time of the call.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawCall {
    pub program: ProgramId,
    pub vertex_array: VertexArrayId,
    pub topology: Topology,
    pub count: u32,
    /// Sampler name, the unit it reads and the texture bound there.
    pub textures: Vec<(String, u32, Option<TextureId>)>,
    pub uniforms: Vec<(String, UniformValue)>,
    pub cull: Option<CullState>,
    pub depth: Option<DepthFunc>,
}

impl DrawCall {
    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniforms
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn texture(&self, sampler: &str) -> Option<TextureId> {
        self.textures
            .iter()
            .find(|(n, _, _)| n == sampler)
            .and_then(|(_, _, t)| *t)
    }
}

#[derive(Debug)]
struct ProgramState {
    layout: ProgramLayout,
    values: Vec<Option<UniformValue>>,
}

#[derive(Debug)]
struct VertexArrayState {
    vertices: usize,
    indices: usize,
}

#[derive(Debug, Default)]
struct TextureState {
    size: Option<(u32, u32)>,
    levels: u32,
    params: SamplerParams,
}

#[derive(Debug)]
pub struct HeadlessContext {
    width: u32,
    height: u32,
    next_id: u32,
    shaders: HashMap<ShaderId, CompiledStage>,
    programs: HashMap<ProgramId, ProgramState>,
    vertex_arrays: HashMap<VertexArrayId, VertexArrayState>,
    textures: HashMap<TextureId, TextureState>,
    units: BTreeMap<u32, TextureId>,
    current: Option<ProgramId>,
    cull: Option<CullState>,
    depth: Option<DepthFunc>,
    calls: Vec<Call>,
}

impl HeadlessContext {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            next_id: 1,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            vertex_arrays: HashMap::new(),
            textures: HashMap::new(),
            units: BTreeMap::new(),
            current: None,
            cull: None,
            depth: None,
            calls: Vec::new(),
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    /// Drain the recorded calls, e.g. between frames.
    pub fn take_calls(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
    }

    pub fn draw_calls(&self) -> impl Iterator<Item = &DrawCall> {
        self.calls.iter().filter_map(|c| match c {
            Call::Draw(draw) => Some(draw),
            _ => None,
        })
    }

    /// Shaders, programs, vertex arrays and textures not yet deleted.
    pub fn live_handles(&self) -> usize {
        self.shaders.len() + self.programs.len() + self.vertex_arrays.len() + self.textures.len()
    }

    pub fn current_program(&self) -> Option<ProgramId> {
        self.current
    }

    pub fn uniform_value(&self, program: ProgramId, name: &str) -> Option<UniformValue> {
        let state = self.programs.get(&program)?;
        let location = state.layout.location(name)?;
        state.values.get(location.0 as usize).copied().flatten()
    }

    pub fn bound_texture(&self, unit: u32) -> Option<TextureId> {
        self.units.get(&unit).copied()
    }

    pub fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.textures.get(&texture)?.size
    }

    pub fn texture_levels(&self, texture: TextureId) -> Option<u32> {
        self.textures.get(&texture).map(|t| t.levels)
    }

    pub fn texture_params(&self, texture: TextureId) -> Option<SamplerParams> {
        self.textures.get(&texture).map(|t| t.params)
    }

    /// Pixels of the most recent level 0 upload to `texture`.
    pub fn uploaded_pixels(&self, texture: TextureId) -> Option<&[u8]> {
        self.calls.iter().rev().find_map(|call| match call {
            Call::TexImage2D {
                texture: id,
                pixels,
                ..
            } if *id == texture => Some(pixels.as_slice()),
            _ => None,
        })
    }

    fn next(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn program(&self, program: ProgramId) -> RenderResult<&ProgramState> {
        self.programs
            .get(&program)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{program:?}")))
    }
}

impl GraphicsContext for HeadlessContext {
    fn create_shader(&mut self, stage: ShaderStage, source: &str) -> RenderResult<ShaderId> {
        let compiled = reflect::compile(stage, source)?;
        let id = ShaderId(self.next());
        self.shaders.insert(id, compiled);
        self.calls.push(Call::CreateShader(stage, id));
        Ok(id)
    }

    fn delete_shader(&mut self, shader: ShaderId) -> RenderResult<()> {
        self.shaders
            .remove(&shader)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{shader:?}")))?;
        self.calls.push(Call::DeleteShader(shader));
        Ok(())
    }

    fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
    ) -> RenderResult<(ProgramId, ProgramLayout)> {
        let lookup = |id: ShaderId| {
            self.shaders
                .get(&id)
                .ok_or_else(|| RenderError::InvalidHandle(format!("{id:?}")))
        };
        let layout = reflect::link(lookup(vertex)?, lookup(fragment)?)?;
        let id = ProgramId(self.next());
        self.programs.insert(
            id,
            ProgramState {
                values: vec![None; layout.uniforms.len()],
                layout: layout.clone(),
            },
        );
        self.calls.push(Call::LinkProgram(id));
        Ok((id, layout))
    }

    fn delete_program(&mut self, program: ProgramId) -> RenderResult<()> {
        self.programs
            .remove(&program)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{program:?}")))?;
        if self.current == Some(program) {
            self.current = None;
        }
        self.calls.push(Call::DeleteProgram(program));
        Ok(())
    }

    fn use_program(&mut self, program: Option<ProgramId>) -> RenderResult<()> {
        if let Some(program) = program {
            self.program(program)?;
        }
        self.current = program;
        self.calls.push(Call::UseProgram(program));
        Ok(())
    }

    fn set_uniform(
        &mut self,
        program: ProgramId,
        location: UniformLocation,
        value: UniformValue,
    ) -> RenderResult<()> {
        let state = self
            .programs
            .get_mut(&program)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{program:?}")))?;
        let info = state
            .layout
            .uniform(location)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{location:?}")))?;
        if !value.fits(info.kind) {
            return Err(RenderError::UniformTypeMismatch {
                name: info.name.clone(),
                expected: info.kind,
                found: value.kind(),
            });
        }
        if let (UniformKind::Sampler, UniformValue::Int(unit)) = (info.kind, value) {
            if unit < 0 {
                return Err(RenderError::Texture(format!("negative texture unit {unit}")));
            }
        }
        let name = info.name.clone();
        state.values[location.0 as usize] = Some(value);
        self.calls.push(Call::SetUniform {
            program,
            name,
            value,
        });
        Ok(())
    }

    fn create_vertex_array(
        &mut self,
        vertices: &[MeshVertex],
        indices: &[u32],
    ) -> RenderResult<VertexArrayId> {
        if let Some(&bad) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(RenderError::InvalidDraw(format!(
                "index {bad} out of range for {} vertices",
                vertices.len()
            )));
        }
        let id = VertexArrayId(self.next());
        self.vertex_arrays.insert(
            id,
            VertexArrayState {
                vertices: vertices.len(),
                indices: indices.len(),
            },
        );
        self.calls.push(Call::CreateVertexArray {
            vertex_array: id,
            vertices: vertices.len(),
            indices: indices.len(),
        });
        Ok(id)
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId) -> RenderResult<()> {
        self.vertex_arrays
            .remove(&vertex_array)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{vertex_array:?}")))?;
        self.calls.push(Call::DeleteVertexArray(vertex_array));
        Ok(())
    }

    fn draw_elements(
        &mut self,
        vertex_array: VertexArrayId,
        topology: Topology,
        count: u32,
    ) -> RenderResult<()> {
        let program = self.current.ok_or(RenderError::NoProgram)?;
        let buffers = self
            .vertex_arrays
            .get(&vertex_array)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{vertex_array:?}")))?;
        if count as usize > buffers.indices {
            return Err(RenderError::InvalidDraw(format!(
                "{count} indices requested, {} available ({} vertices)",
                buffers.indices, buffers.vertices
            )));
        }

        let state = self.program(program)?;
        let mut textures = Vec::new();
        let mut uniforms = Vec::new();
        for (info, value) in state.layout.uniforms.iter().zip(&state.values) {
            if info.kind == UniformKind::Sampler {
                // unset samplers read unit 0
                let unit = match value {
                    Some(UniformValue::Int(unit)) => *unit as u32,
                    _ => 0,
                };
                textures.push((info.name.clone(), unit, self.units.get(&unit).copied()));
            }
            if let Some(value) = value {
                uniforms.push((info.name.clone(), *value));
            }
        }

        self.calls.push(Call::Draw(DrawCall {
            program,
            vertex_array,
            topology,
            count,
            textures,
            uniforms,
            cull: self.cull,
            depth: self.depth,
        }));
        Ok(())
    }

    fn create_texture(&mut self) -> RenderResult<TextureId> {
        let id = TextureId(self.next());
        self.textures.insert(id, TextureState::default());
        self.calls.push(Call::CreateTexture(id));
        Ok(id)
    }

    fn tex_image_2d(&mut self, texture: TextureId, image: &TextureData) -> RenderResult<()> {
        if !image.is_valid() {
            return Err(RenderError::Texture(format!(
                "{} bytes do not describe a {}x{} image",
                image.data.len(),
                image.width,
                image.height
            )));
        }
        let state = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{texture:?}")))?;
        state.size = Some((image.width, image.height));
        state.levels = 1;
        self.calls.push(Call::TexImage2D {
            texture,
            width: image.width,
            height: image.height,
            pixels: image.data.clone(),
        });
        Ok(())
    }

    fn generate_mipmap(&mut self, texture: TextureId) -> RenderResult<()> {
        let state = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{texture:?}")))?;
        let (w, h) = state
            .size
            .ok_or_else(|| RenderError::Texture("mipmaps requested before upload".into()))?;
        state.levels = 32 - w.max(h).max(1).leading_zeros();
        self.calls.push(Call::GenerateMipmap(texture));
        Ok(())
    }

    fn tex_parameters(&mut self, texture: TextureId, params: SamplerParams) -> RenderResult<()> {
        let state = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{texture:?}")))?;
        state.params = params;
        self.calls.push(Call::TexParameters(texture, params));
        Ok(())
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) -> RenderResult<()> {
        match texture {
            Some(id) => {
                if !self.textures.contains_key(&id) {
                    return Err(RenderError::InvalidHandle(format!("{id:?}")));
                }
                self.units.insert(unit, id);
            }
            None => {
                self.units.remove(&unit);
            }
        }
        self.calls.push(Call::BindTexture(unit, texture));
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) -> RenderResult<()> {
        self.textures
            .remove(&texture)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{texture:?}")))?;
        self.units.retain(|_, bound| *bound != texture);
        self.calls.push(Call::DeleteTexture(texture));
        Ok(())
    }

    fn clear_color(&mut self, color: ClearColor) {
        self.calls.push(Call::ClearColor(color));
    }

    fn clear(&mut self, mask: ClearMask) {
        self.calls.push(Call::Clear(mask));
    }

    fn set_cull_face(&mut self, cull: Option<CullState>) {
        self.cull = cull;
        self.calls.push(Call::CullFace(cull));
    }

    fn set_depth_test(&mut self, func: Option<DepthFunc>) {
        self.depth = func;
        self.calls.push(Call::DepthTest(func));
    }

    fn drawing_buffer_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::tests::{TEXTURE_FRAG, TEXTURE_VERT};

    fn program(gl: &mut HeadlessContext) -> (ProgramId, ProgramLayout) {
        let vs = gl.create_shader(ShaderStage::Vertex, TEXTURE_VERT).unwrap();
        let fs = gl.create_shader(ShaderStage::Fragment, TEXTURE_FRAG).unwrap();
        gl.link_program(vs, fs).unwrap()
    }

    fn gray(size: u32) -> TextureData {
        TextureData::new_rgba8(size, size, vec![128; (size * size * 4) as usize]).unwrap()
    }

    fn quad(gl: &mut HeadlessContext) -> VertexArrayId {
        let vertices = [MeshVertex::default(); 4];
        gl.create_vertex_array(&vertices, &[0, 1, 2, 0, 2, 3]).unwrap()
    }

    #[test]
    fn draw_without_program_fails() {
        let mut gl = HeadlessContext::new(4, 4);
        let vao = quad(&mut gl);
        assert!(matches!(
            gl.draw_elements(vao, Topology::Triangles, 6),
            Err(RenderError::NoProgram)
        ));
    }

    #[test]
    fn draw_captures_textures_and_uniforms() {
        let mut gl = HeadlessContext::new(4, 4);
        let (id, layout) = program(&mut gl);
        let vao = quad(&mut gl);
        let tex = gl.create_texture().unwrap();
        gl.tex_image_2d(tex, &gray(4)).unwrap();
        gl.bind_texture(2, Some(tex)).unwrap();

        gl.use_program(Some(id)).unwrap();
        let sampler = layout.location("texture_sampler").unwrap();
        gl.set_uniform(id, sampler, UniformValue::Int(2)).unwrap();
        gl.set_cull_face(None);
        gl.set_depth_test(Some(DepthFunc::LessEqual));
        gl.draw_elements(vao, Topology::Triangles, 6).unwrap();

        let draws: Vec<_> = gl.draw_calls().collect();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].texture("texture_sampler"), Some(tex));
        assert_eq!(draws[0].uniform("texture_sampler"), Some(UniformValue::Int(2)));
        assert_eq!(draws[0].uniform("MVP"), None);
        assert_eq!(draws[0].depth, Some(DepthFunc::LessEqual));
    }

    #[test]
    fn draw_count_is_bounded_by_indices() {
        let mut gl = HeadlessContext::new(4, 4);
        let (id, _) = program(&mut gl);
        let vao = quad(&mut gl);
        gl.use_program(Some(id)).unwrap();
        assert!(matches!(
            gl.draw_elements(vao, Topology::Triangles, 9),
            Err(RenderError::InvalidDraw(_))
        ));
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let mut gl = HeadlessContext::new(4, 4);
        let vertices = [MeshVertex::default(); 2];
        assert!(gl.create_vertex_array(&vertices, &[0, 1, 2]).is_err());
    }

    #[test]
    fn mipmaps_need_an_image() {
        let mut gl = HeadlessContext::new(4, 4);
        let tex = gl.create_texture().unwrap();
        assert!(gl.generate_mipmap(tex).is_err());
        gl.tex_image_2d(tex, &gray(8)).unwrap();
        gl.generate_mipmap(tex).unwrap();
        assert_eq!(gl.texture_levels(tex), Some(4));
    }

    #[test]
    fn deleting_unbinds_and_releases() {
        let mut gl = HeadlessContext::new(4, 4);
        let tex = gl.create_texture().unwrap();
        gl.bind_texture(0, Some(tex)).unwrap();
        gl.delete_texture(tex).unwrap();
        assert_eq!(gl.bound_texture(0), None);
        assert!(gl.delete_texture(tex).is_err());
        assert_eq!(gl.live_handles(), 0);
    }
}
