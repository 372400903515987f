//! Shader program: a vertex and a fragment stage linked together, with
//! uniforms addressed by name.
//!
//! Unknown uniform names are ignored with a one-time warning per name, the
//! way a GL driver ignores location -1. Setting a known uniform with a value
//! of the wrong type is an error.

use std::collections::HashSet;

use glam::Mat4;

use crate::{
    RenderError, RenderResult,
    gl::{GraphicsContext, ProgramId, ProgramLayout, ShaderId, ShaderStage, UniformValue},
};

#[derive(Debug, Default)]
pub struct ShaderProgram {
    vertex: Option<ShaderId>,
    fragment: Option<ShaderId>,
    linked: Option<(ProgramId, ProgramLayout)>,
    warned: HashSet<String>,
    disposed: bool,
}

impl ShaderProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `source` as the program's `stage`, replacing any stage of the
    /// same kind attached before.
    pub fn attach(
        &mut self,
        gl: &mut dyn GraphicsContext,
        source: &str,
        stage: ShaderStage,
    ) -> RenderResult<()> {
        self.ensure_alive()?;
        let shader = gl.create_shader(stage, source)?;
        let slot = match stage {
            ShaderStage::Vertex => &mut self.vertex,
            ShaderStage::Fragment => &mut self.fragment,
        };
        if let Some(old) = slot.replace(shader) {
            gl.delete_shader(old)?;
        }
        Ok(())
    }

    pub fn link(&mut self, gl: &mut dyn GraphicsContext) -> RenderResult<()> {
        self.ensure_alive()?;
        let (Some(vertex), Some(fragment)) = (self.vertex, self.fragment) else {
            return Err(RenderError::ShaderLink {
                log: "both a vertex and a fragment stage must be attached".into(),
            });
        };
        let (program, layout) = gl.link_program(vertex, fragment)?;
        log::debug!(
            "Linked program {:?} with uniforms {:?}",
            program,
            layout.uniforms.iter().map(|u| &u.name).collect::<Vec<_>>()
        );
        if let Some((old, _)) = self.linked.replace((program, layout)) {
            gl.delete_program(old)?;
        }
        self.warned.clear();
        Ok(())
    }

    /// Make this the program used by subsequent draws.
    pub fn use_program(&self, gl: &mut dyn GraphicsContext) -> RenderResult<()> {
        let (program, _) = self.linked()?;
        gl.use_program(Some(program))
    }

    pub fn set_uniform_1i(
        &mut self,
        gl: &mut dyn GraphicsContext,
        name: &str,
        value: i32,
    ) -> RenderResult<()> {
        self.set_uniform(gl, name, UniformValue::Int(value))
    }

    pub fn set_uniform_4f(
        &mut self,
        gl: &mut dyn GraphicsContext,
        name: &str,
        value: [f32; 4],
    ) -> RenderResult<()> {
        self.set_uniform(gl, name, UniformValue::Float4(value))
    }

    pub fn set_uniform_matrix4fv(
        &mut self,
        gl: &mut dyn GraphicsContext,
        name: &str,
        transpose: bool,
        value: &Mat4,
    ) -> RenderResult<()> {
        let m = if transpose { value.transpose() } else { *value };
        self.set_uniform(gl, name, UniformValue::Mat4(m.to_cols_array()))
    }

    pub fn set_uniform(
        &mut self,
        gl: &mut dyn GraphicsContext,
        name: &str,
        value: UniformValue,
    ) -> RenderResult<()> {
        let (program, layout) = self.linked()?;
        let Some(location) = layout.location(name) else {
            if self.warned.insert(name.to_owned()) {
                log::warn!("Program {:?} has no uniform '{}'; ignoring", program, name);
            }
            return Ok(());
        };
        if let Some(info) = layout.uniform(location) {
            if !value.fits(info.kind) {
                return Err(RenderError::UniformTypeMismatch {
                    name: name.to_owned(),
                    expected: info.kind,
                    found: value.kind(),
                });
            }
        }
        gl.set_uniform(program, location, value)
    }

    pub fn id(&self) -> Option<ProgramId> {
        self.linked.as_ref().map(|(id, _)| *id)
    }

    pub fn layout(&self) -> Option<&ProgramLayout> {
        self.linked.as_ref().map(|(_, layout)| layout)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Release the program and its stages. The program is unusable after.
    ///
    /// Every handle is released even if an earlier one fails; handles that
    /// could not be deleted are kept and the first error is returned.
    pub fn dispose(&mut self, gl: &mut dyn GraphicsContext) -> RenderResult<()> {
        self.ensure_alive()?;
        let mut first_err = None;
        if let Some((program, _)) = &self.linked {
            match gl.delete_program(*program) {
                Ok(()) => self.linked = None,
                Err(err) => first_err = Some(err),
            }
        }
        for stage in [&mut self.vertex, &mut self.fragment] {
            let Some(shader) = *stage else { continue };
            match gl.delete_shader(shader) {
                Ok(()) => *stage = None,
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => {
                self.disposed = true;
                Ok(())
            }
        }
    }

    fn ensure_alive(&self) -> RenderResult<()> {
        if self.disposed {
            Err(RenderError::Disposed("shader program"))
        } else {
            Ok(())
        }
    }

    fn linked(&self) -> RenderResult<(ProgramId, &ProgramLayout)> {
        self.ensure_alive()?;
        self.linked
            .as_ref()
            .map(|(id, layout)| (*id, layout))
            .ok_or(RenderError::NotLinked)
    }
}

impl Drop for ShaderProgram {
    fn drop(&mut self) {
        if !self.disposed && (self.linked.is_some() || self.vertex.is_some() || self.fragment.is_some()) {
            log::warn!("ShaderProgram dropped without dispose(); its GPU handles leak");
        }
    }
}
