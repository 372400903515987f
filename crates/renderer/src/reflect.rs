//! WGSL front end shared by every backend: compiles stages with naga and
//! checks/reflects a vertex+fragment pair at link time.
//!
//! Binding convention:
//! - group 0, binding 0: the uniform block (a struct, or a single value);
//! - group 1: textures, each followed by its sampler at `binding + 1`.
//!
//! Vertex inputs must match [`asset::MeshVertex`]: `@location(0)` position
//! `vec3<f32>`, `@location(1)` normal `vec3<f32>`, `@location(2)` uv
//! `vec2<f32>`.

use std::collections::BTreeMap;

use naga::{
    AddressSpace, Binding, Handle, Module, Scalar, ScalarKind, Type, TypeInner, VectorSize,
    valid::{Capabilities, ValidationFlags, Validator},
};

use crate::{
    RenderError, RenderResult,
    gl::{ProgramLayout, ShaderStage, TextureSlot, UniformInfo, UniformKind},
};

pub const UNIFORM_GROUP: u32 = 0;
pub const TEXTURE_GROUP: u32 = 1;

/// A validated shader stage.
#[derive(Debug)]
pub struct CompiledStage {
    pub stage: ShaderStage,
    pub source: String,
    pub module: Module,
    pub entry_point: String,
}

pub fn compile(stage: ShaderStage, source: &str) -> RenderResult<CompiledStage> {
    let compile_error = |log: String| RenderError::ShaderCompile { stage, log };

    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| compile_error(e.emit_to_string(source)))?;
    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| compile_error(e.emit_to_string(source)))?;

    let naga_stage = match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    };
    let mut entries = module.entry_points.iter().filter(|ep| ep.stage == naga_stage);
    let entry_point = match (entries.next(), entries.next()) {
        (Some(ep), None) => ep.name.clone(),
        (None, _) => return Err(compile_error(format!("no @{stage} entry point"))),
        (Some(_), Some(_)) => {
            return Err(compile_error(format!("more than one @{stage} entry point")));
        }
    };

    Ok(CompiledStage {
        stage,
        source: source.to_owned(),
        module,
        entry_point,
    })
}

/// Check that `vertex` and `fragment` fit together and reflect their
/// uniforms and textures.
pub fn link(vertex: &CompiledStage, fragment: &CompiledStage) -> RenderResult<ProgramLayout> {
    if vertex.stage != ShaderStage::Vertex || fragment.stage != ShaderStage::Fragment {
        return Err(link_error(format!(
            "expected a vertex and a fragment stage, got {} and {}",
            vertex.stage, fragment.stage
        )));
    }

    check_vertex_inputs(vertex)?;
    check_varyings(vertex, fragment)?;

    let block_vs = uniform_block(&vertex.module)?;
    let block_fs = uniform_block(&fragment.module)?;
    let (uniforms, block_size) = match (block_vs, block_fs) {
        (Some(a), Some(b)) if a != b => {
            return Err(link_error(
                "vertex and fragment stages declare different uniform blocks",
            ));
        }
        (Some(block), _) | (None, Some(block)) => block,
        (None, None) => (Vec::new(), 0),
    };

    let mut textures = texture_slots(&vertex.module)?;
    for slot in texture_slots(&fragment.module)? {
        match textures.iter().find(|t| t.binding == slot.binding) {
            Some(existing) if existing.name != slot.name => {
                return Err(link_error(format!(
                    "texture binding {} is '{}' in one stage and '{}' in the other",
                    slot.binding, existing.name, slot.name
                )));
            }
            Some(_) => {}
            None => textures.push(slot),
        }
    }
    textures.sort_by_key(|t| t.binding);

    let mut uniforms = uniforms;
    uniforms.extend(textures.iter().map(|t| UniformInfo {
        name: t.name.clone(),
        kind: UniformKind::Sampler,
        offset: t.binding,
    }));

    Ok(ProgramLayout {
        vertex_entry: vertex.entry_point.clone(),
        fragment_entry: fragment.entry_point.clone(),
        uniforms,
        block_size,
        textures,
    })
}

fn link_error(log: impl Into<String>) -> RenderError {
    RenderError::ShaderLink { log: log.into() }
}

fn entry_function<'a>(stage: &'a CompiledStage) -> Option<&'a naga::Function> {
    stage
        .module
        .entry_points
        .iter()
        .find(|ep| ep.name == stage.entry_point)
        .map(|ep| &ep.function)
}

/// Collect `@location` bindings reachable from a value of type `ty`.
fn collect_locations(
    module: &Module,
    ty: Handle<Type>,
    binding: Option<&Binding>,
    out: &mut BTreeMap<u32, TypeInner>,
) {
    match binding {
        Some(Binding::Location { location, .. }) => {
            out.insert(*location, module.types[ty].inner.clone());
        }
        Some(Binding::BuiltIn(_)) => {}
        None => {
            if let TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_locations(module, member.ty, member.binding.as_ref(), out);
                }
            }
        }
    }
}

fn inputs(stage: &CompiledStage) -> BTreeMap<u32, TypeInner> {
    let mut out = BTreeMap::new();
    if let Some(function) = entry_function(stage) {
        for arg in &function.arguments {
            collect_locations(&stage.module, arg.ty, arg.binding.as_ref(), &mut out);
        }
    }
    out
}

fn outputs(stage: &CompiledStage) -> BTreeMap<u32, TypeInner> {
    let mut out = BTreeMap::new();
    if let Some(result) = entry_function(stage).and_then(|f| f.result.as_ref()) {
        collect_locations(&stage.module, result.ty, result.binding.as_ref(), &mut out);
    }
    out
}

fn float_vector(size: VectorSize) -> TypeInner {
    TypeInner::Vector {
        size,
        scalar: Scalar::F32,
    }
}

fn check_vertex_inputs(vertex: &CompiledStage) -> RenderResult<()> {
    let attributes = [
        (0, "position", float_vector(VectorSize::Tri)),
        (1, "normal", float_vector(VectorSize::Tri)),
        (2, "uv", float_vector(VectorSize::Bi)),
    ];
    for (location, ty) in inputs(vertex) {
        match attributes.iter().find(|(l, _, _)| *l == location) {
            Some((_, _, expected)) if *expected == ty => {}
            Some((_, name, _)) => {
                return Err(link_error(format!(
                    "vertex input @location({location}) must match the mesh {name} attribute"
                )));
            }
            None => {
                return Err(link_error(format!(
                    "vertex input @location({location}) has no mesh attribute"
                )));
            }
        }
    }
    Ok(())
}

fn check_varyings(vertex: &CompiledStage, fragment: &CompiledStage) -> RenderResult<()> {
    let provided = outputs(vertex);
    for (location, ty) in inputs(fragment) {
        match provided.get(&location) {
            Some(out_ty) if *out_ty == ty => {}
            Some(_) => {
                return Err(link_error(format!(
                    "varying @location({location}) has different types in the vertex and fragment stages"
                )));
            }
            None => {
                return Err(link_error(format!(
                    "fragment input @location({location}) is not written by the vertex stage"
                )));
            }
        }
    }
    Ok(())
}

fn uniform_kind(inner: &TypeInner) -> UniformKind {
    match *inner {
        TypeInner::Scalar(Scalar {
            kind: ScalarKind::Sint,
            width: 4,
        }) => UniformKind::Int,
        TypeInner::Vector {
            size: VectorSize::Quad,
            scalar: Scalar::F32,
        } => UniformKind::Float4,
        TypeInner::Matrix {
            columns: VectorSize::Quad,
            rows: VectorSize::Quad,
            scalar: Scalar::F32,
        } => UniformKind::Mat4,
        _ => UniformKind::Unsupported,
    }
}

type UniformBlock = (Vec<UniformInfo>, u32);

fn uniform_block(module: &Module) -> RenderResult<Option<UniformBlock>> {
    let mut block = None;
    for (_, var) in module.global_variables.iter() {
        if var.space != AddressSpace::Uniform {
            continue;
        }
        let name = var.name.clone().unwrap_or_default();
        match &var.binding {
            Some(b) if b.group == UNIFORM_GROUP && b.binding == 0 => {}
            _ => {
                return Err(link_error(format!(
                    "uniform '{name}' must be bound at @group({UNIFORM_GROUP}) @binding(0)"
                )));
            }
        }

        let inner = &module.types[var.ty].inner;
        let uniforms = match inner {
            TypeInner::Struct { members, .. } => members
                .iter()
                .map(|m| UniformInfo {
                    name: m.name.clone().unwrap_or_default(),
                    kind: uniform_kind(&module.types[m.ty].inner),
                    offset: m.offset,
                })
                .collect(),
            other => vec![UniformInfo {
                name,
                kind: uniform_kind(other),
                offset: 0,
            }],
        };
        let size = inner.size(module.to_ctx()).next_multiple_of(16);
        block = Some((uniforms, size));
    }
    Ok(block)
}

fn texture_slots(module: &Module) -> RenderResult<Vec<TextureSlot>> {
    let mut textures = Vec::new();
    let mut samplers = Vec::new();
    for (_, var) in module.global_variables.iter() {
        let inner = &module.types[var.ty].inner;
        let is_texture = matches!(inner, TypeInner::Image { .. });
        let is_sampler = matches!(inner, TypeInner::Sampler { .. });
        if !is_texture && !is_sampler {
            continue;
        }
        let name = var.name.clone().unwrap_or_default();
        let binding = match &var.binding {
            Some(b) if b.group == TEXTURE_GROUP => b.binding,
            _ => {
                return Err(link_error(format!(
                    "texture/sampler '{name}' must be bound in @group({TEXTURE_GROUP})"
                )));
            }
        };
        if is_texture {
            textures.push((name, binding));
        } else {
            samplers.push(binding);
        }
    }

    textures
        .into_iter()
        .map(|(name, binding)| {
            if samplers.contains(&(binding + 1)) {
                Ok(TextureSlot {
                    name,
                    binding,
                    sampler_binding: binding + 1,
                })
            } else {
                Err(link_error(format!(
                    "texture '{name}' needs a sampler at @binding({})",
                    binding + 1
                )))
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const TEXTURE_VERT: &str = r#"
struct Uniforms {
    MVP: mat4x4<f32>,
    tint: vec4<f32>,
};
@group(0) @binding(0) var<uniform> u: Uniforms;

struct VertexOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(2) uv: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.clip = u.MVP * vec4<f32>(position, 1.0);
    out.uv = uv;
    return out;
}
"#;

    pub(crate) const TEXTURE_FRAG: &str = r#"
struct Uniforms {
    MVP: mat4x4<f32>,
    tint: vec4<f32>,
};
@group(0) @binding(0) var<uniform> u: Uniforms;
@group(1) @binding(0) var texture_sampler: texture_2d<f32>;
@group(1) @binding(1) var texture_sampler_s: sampler;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(texture_sampler, texture_sampler_s, uv) * u.tint;
}
"#;

    fn vs(src: &str) -> CompiledStage {
        compile(ShaderStage::Vertex, src).expect("vertex compiles")
    }

    fn fs(src: &str) -> CompiledStage {
        compile(ShaderStage::Fragment, src).expect("fragment compiles")
    }

    #[test]
    fn reflects_block_and_textures() {
        let layout = link(&vs(TEXTURE_VERT), &fs(TEXTURE_FRAG)).expect("links");
        assert_eq!(layout.vertex_entry, "vs_main");
        assert_eq!(layout.fragment_entry, "fs_main");
        assert_eq!(layout.block_size, 80);
        let names: Vec<_> = layout
            .uniforms
            .iter()
            .map(|u| (u.name.as_str(), u.kind, u.offset))
            .collect();
        assert_eq!(
            names,
            vec![
                ("MVP", UniformKind::Mat4, 0),
                ("tint", UniformKind::Float4, 64),
                ("texture_sampler", UniformKind::Sampler, 0),
            ]
        );
        assert_eq!(layout.textures[0].sampler_binding, 1);
    }

    #[test]
    fn syntax_errors_carry_the_compiler_log() {
        let err = compile(ShaderStage::Vertex, "@vertex fn vs_main( -> {").unwrap_err();
        match err {
            RenderError::ShaderCompile { stage, log } => {
                assert_eq!(stage, ShaderStage::Vertex);
                assert!(!log.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_entry_point_is_a_compile_error() {
        let err = compile(ShaderStage::Fragment, TEXTURE_VERT).unwrap_err();
        assert!(matches!(err, RenderError::ShaderCompile { .. }));
    }

    #[test]
    fn unmatched_varying_fails_to_link() {
        let frag = r#"
@fragment
fn fs_main(@location(3) color: vec4<f32>) -> @location(0) vec4<f32> {
    return color;
}
"#;
        let err = link(&vs(TEXTURE_VERT), &fs(frag)).unwrap_err();
        assert!(matches!(err, RenderError::ShaderLink { ref log } if log.contains("@location(3)")));
    }

    #[test]
    fn varying_type_mismatch_fails_to_link() {
        let frag = r#"
@fragment
fn fs_main(@location(0) uv: vec4<f32>) -> @location(0) vec4<f32> {
    return uv;
}
"#;
        assert!(matches!(
            link(&vs(TEXTURE_VERT), &fs(frag)),
            Err(RenderError::ShaderLink { .. })
        ));
    }

    #[test]
    fn vertex_inputs_must_match_mesh_layout() {
        let vert = r#"
@vertex
fn vs_main(@location(0) position: vec4<f32>) -> @builtin(position) vec4<f32> {
    return position;
}
"#;
        let frag = r#"
@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0);
}
"#;
        assert!(matches!(
            link(&vs(vert), &fs(frag)),
            Err(RenderError::ShaderLink { .. })
        ));
    }

    #[test]
    fn stages_must_be_ordered() {
        let err = link(&fs(TEXTURE_FRAG), &fs(TEXTURE_FRAG)).unwrap_err();
        assert!(matches!(err, RenderError::ShaderLink { .. }));
    }
}
