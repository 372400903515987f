use asset::TextureData;

use crate::{
    RenderError, RenderResult,
    gl::{GraphicsContext, SamplerParams, TextureId},
};

/// How an image becomes a GPU texture.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextureOptions {
    /// Reverse row order before upload. Rows are uploaded first row first and
    /// V = 0 samples the first row, which already matches the top-left
    /// texture coordinates `load_obj_mesh` produces. Set this only for data
    /// whose V axis points up.
    pub flip_y: bool,
    pub mipmaps: bool,
    pub params: SamplerParams,
}

impl Default for TextureOptions {
    fn default() -> Self {
        Self {
            flip_y: false,
            mipmaps: true,
            params: SamplerParams::default(),
        }
    }
}

#[derive(Debug)]
pub struct Texture {
    id: Option<TextureId>,
    width: u32,
    height: u32,
}

impl Texture {
    pub fn from_data(
        gl: &mut dyn GraphicsContext,
        image: &TextureData,
        options: TextureOptions,
    ) -> RenderResult<Self> {
        if !image.is_valid() {
            return Err(RenderError::Texture(format!(
                "invalid {}x{} image",
                image.width, image.height
            )));
        }
        let flipped;
        let image = if options.flip_y {
            flipped = image.flipped_vertically();
            &flipped
        } else {
            image
        };

        let id = gl.create_texture()?;
        if let Err(err) = upload(gl, id, image, options) {
            gl.delete_texture(id)?;
            return Err(err);
        }

        Ok(Self {
            id: Some(id),
            width: image.width,
            height: image.height,
        })
    }

    /// Bind to texture unit `unit`.
    pub fn bind(&self, gl: &mut dyn GraphicsContext, unit: u32) -> RenderResult<()> {
        let id = self.id.ok_or(RenderError::Disposed("texture"))?;
        gl.bind_texture(unit, Some(id))
    }

    pub fn id(&self) -> Option<TextureId> {
        self.id
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn dispose(&mut self, gl: &mut dyn GraphicsContext) -> RenderResult<()> {
        let id = self.id.take().ok_or(RenderError::Disposed("texture"))?;
        gl.delete_texture(id)
    }
}

fn upload(
    gl: &mut dyn GraphicsContext,
    id: TextureId,
    image: &TextureData,
    options: TextureOptions,
) -> RenderResult<()> {
    gl.tex_image_2d(id, image)?;
    let mut params = options.params;
    if options.mipmaps {
        gl.generate_mipmap(id)?;
    } else {
        params.mipmap_filter = None;
    }
    gl.tex_parameters(id, params)
}

impl Drop for Texture {
    fn drop(&mut self) {
        if self.id.is_some() {
            log::warn!("Texture dropped without dispose(); GPU memory leaks");
        }
    }
}
