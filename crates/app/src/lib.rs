//! The Pocket Tanks demo scene: a textured tank model viewed through a fly
//! camera.

use asset::{Loader, Manifest, load_obj_mesh};
use corelib::{Camera, FlyCameraController, Transform, vec3};
use platform::{Scene, SceneContext, SceneResult};
use renderer::{
    ClearColor, ClearMask, CullState, DepthFunc, Face, FrontFace, GraphicsContext, Mesh,
    RenderError, ShaderProgram, ShaderStage, Texture, TextureOptions, Topology,
};

pub const VERTEX_SHADER: &str = "texture.vert";
pub const FRAGMENT_SHADER: &str = "texture.frag";
pub const TANK_MODEL: &str = "tank-model";
pub const TANK_TEXTURE: &str = "tank-texture";

/// Camera speed in world units per second.
const MOVEMENT_SPEED: f32 = 5.0;
/// Vertical field of view in degrees.
const FOV_Y: f32 = 90.0;
const Z_NEAR: f32 = 0.01;
const Z_FAR: f32 = 1000.0;

/// Manifest of the assets shipped in `crates/app/assets`.
pub fn default_manifest() -> Manifest {
    Manifest::new()
        .text(VERTEX_SHADER, "shaders/texture.vert")
        .text(FRAGMENT_SHADER, "shaders/texture.frag")
        .text(TANK_MODEL, "models/tank.obj")
        .image(TANK_TEXTURE, "textures/tank.ppm")
}

pub struct TankScene {
    manifest: Manifest,
    program: Option<ShaderProgram>,
    mesh: Option<Mesh>,
    texture: Option<Texture>,
    camera: Camera,
    controller: Option<FlyCameraController>,
    model: Transform,
    tint: [f32; 4],
}

impl TankScene {
    pub fn new() -> Self {
        Self::with_manifest(default_manifest())
    }

    /// Use a different manifest; it must provide the same keys.
    pub fn with_manifest(manifest: Manifest) -> Self {
        Self {
            manifest,
            program: None,
            mesh: None,
            texture: None,
            camera: Camera::default(),
            controller: None,
            model: Transform::from_translation(vec3(-10.0, 0.0, -10.0)),
            tint: [1.0, 1.0, 1.0, 1.0],
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn program(&self) -> Option<&ShaderProgram> {
        self.program.as_ref()
    }

    pub fn texture(&self) -> Option<&Texture> {
        self.texture.as_ref()
    }
}

impl Default for TankScene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene for TankScene {
    fn name(&self) -> &str {
        "PocketTanks2019"
    }

    fn load(&mut self, loader: &mut Loader) -> SceneResult<()> {
        loader.load(&self.manifest);
        Ok(())
    }

    fn start(&mut self, ctx: &mut SceneContext<'_>) -> SceneResult<()> {
        let resources = ctx.resources;

        // Stored before use so a failure part way is still released by end().
        let program = self.program.insert(ShaderProgram::new());
        program.attach(ctx.gl, resources.text(VERTEX_SHADER)?, ShaderStage::Vertex)?;
        program.attach(ctx.gl, resources.text(FRAGMENT_SHADER)?, ShaderStage::Fragment)?;
        program.link(ctx.gl)?;

        let mesh_data = load_obj_mesh(resources.text(TANK_MODEL)?).map_err(asset::AssetError::from)?;
        self.mesh = Some(Mesh::from_data(ctx.gl, &mesh_data)?);
        self.texture = Some(Texture::from_data(
            ctx.gl,
            resources.image(TANK_TEXTURE)?,
            TextureOptions::default(),
        )?);

        let (width, height) = ctx.gl.drawing_buffer_size();
        self.camera = Camera::new_perspective(
            vec3(0.0, 2.0, 0.0),
            vec3(-1.0, 0.0, -2.0),
            FOV_Y.to_radians(),
            Z_NEAR,
            Z_FAR,
            1.0,
        );
        self.camera.set_aspect_from_size(width, height);
        self.camera.validate()?;
        self.controller =
            Some(FlyCameraController::new(&self.camera).with_movement_sensitivity(MOVEMENT_SPEED));

        ctx.gl.set_cull_face(Some(CullState {
            face: Face::Back,
            front_face: FrontFace::Cw,
        }));
        ctx.gl.set_depth_test(Some(DepthFunc::LessEqual));
        ctx.gl.clear_color(ClearColor::BLACK);
        Ok(())
    }

    fn draw(&mut self, ctx: &mut SceneContext<'_>, dt: f32) -> SceneResult<()> {
        let (Some(program), Some(mesh), Some(texture), Some(controller)) = (
            self.program.as_mut(),
            self.mesh.as_ref(),
            self.texture.as_ref(),
            self.controller.as_mut(),
        ) else {
            return Err(RenderError::Disposed("tank scene").into());
        };

        controller.update(&mut self.camera, ctx.input, dt);
        ctx.gl.clear(ClearMask::COLOR | ClearMask::DEPTH);

        program.use_program(ctx.gl)?;
        let mvp = self.model.mvp(self.camera.proj_view());
        program.set_uniform_matrix4fv(ctx.gl, "MVP", false, &mvp)?;
        program.set_uniform_4f(ctx.gl, "tint", self.tint)?;

        texture.bind(ctx.gl, 0)?;
        program.set_uniform_1i(ctx.gl, "texture_sampler", 0)?;

        mesh.draw(ctx.gl, Topology::Triangles)?;
        Ok(())
    }

    fn end(&mut self, gl: &mut dyn GraphicsContext) -> SceneResult<()> {
        self.controller = None;
        let released = [
            self.program.take().map(|mut p| p.dispose(gl)),
            self.mesh.take().map(|mut m| m.dispose(gl)),
            self.texture.take().map(|mut t| t.dispose(gl)),
        ];
        for result in released.into_iter().flatten() {
            result?;
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.camera.set_aspect_from_size(width, height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_matches_shipped_file() {
        let shipped = include_str!("../assets/manifest.json");
        assert_eq!(Manifest::from_json(shipped).unwrap(), default_manifest());
    }

    #[test]
    fn default_scene_places_the_tank() {
        let scene = TankScene::new();
        assert_eq!(scene.name(), "PocketTanks2019");
        assert!(scene.program().is_none());
        assert_eq!(scene.model.translation, vec3(-10.0, 0.0, -10.0));
    }
}
