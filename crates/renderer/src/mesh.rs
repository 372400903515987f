use asset::MeshData;

use crate::{
    RenderError, RenderResult,
    gl::{GraphicsContext, Topology, VertexArrayId},
};

/// Parsed mesh data uploaded to vertex and index buffers.
#[derive(Debug)]
pub struct Mesh {
    vertex_array: Option<VertexArrayId>,
    vertex_count: usize,
    index_count: u32,
}

impl Mesh {
    pub fn from_data(gl: &mut dyn GraphicsContext, data: &MeshData) -> RenderResult<Self> {
        if !data.is_valid() {
            return Err(RenderError::InvalidDraw(format!(
                "mesh has {} indices over {} vertices",
                data.indices.len(),
                data.vertices.len()
            )));
        }
        let vertex_array = gl.create_vertex_array(&data.vertices, &data.indices)?;
        log::debug!(
            "Uploaded mesh {:?}: {} vertices, {} triangles",
            vertex_array,
            data.vertices.len(),
            data.triangle_count()
        );
        Ok(Self {
            vertex_array: Some(vertex_array),
            vertex_count: data.vertices.len(),
            index_count: data.indices.len() as u32,
        })
    }

    /// Indexed draw of every index with the program currently in use.
    pub fn draw(&self, gl: &mut dyn GraphicsContext, topology: Topology) -> RenderResult<()> {
        let vertex_array = self.vertex_array.ok_or(RenderError::Disposed("mesh"))?;
        gl.draw_elements(vertex_array, topology, self.index_count)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn is_disposed(&self) -> bool {
        self.vertex_array.is_none()
    }

    pub fn dispose(&mut self, gl: &mut dyn GraphicsContext) -> RenderResult<()> {
        let vertex_array = self.vertex_array.take().ok_or(RenderError::Disposed("mesh"))?;
        gl.delete_vertex_array(vertex_array)
    }
}

impl Drop for Mesh {
    fn drop(&mut self) {
        if self.vertex_array.is_some() {
            log::warn!("Mesh dropped without dispose(); its buffers leak");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ShaderProgram,
        gl::ShaderStage,
        headless::HeadlessContext,
        reflect::tests::{TEXTURE_FRAG, TEXTURE_VERT},
    };
    use asset::{MeshVertex, load_obj_mesh};

    const TRIANGLE: &str = "v 0 0 0\nv 1 0 0\nv 0 1 0\nvt 0 0\nvt 1 0\nvt 0 1\nf 1/1 2/2 3/3\n";

    #[test]
    fn draws_every_index() {
        let mut gl = HeadlessContext::new(8, 8);
        let mut program = ShaderProgram::new();
        program.attach(&mut gl, TEXTURE_VERT, ShaderStage::Vertex).unwrap();
        program.attach(&mut gl, TEXTURE_FRAG, ShaderStage::Fragment).unwrap();
        program.link(&mut gl).unwrap();
        program.use_program(&mut gl).unwrap();

        let mut mesh = Mesh::from_data(&mut gl, &load_obj_mesh(TRIANGLE).unwrap()).unwrap();
        mesh.draw(&mut gl, Topology::Triangles).unwrap();

        let draw = gl.draw_calls().next().unwrap().clone();
        assert_eq!(draw.count, 3);
        assert_eq!(draw.topology, Topology::Triangles);
        assert_eq!(mesh.vertex_count(), 3);

        mesh.dispose(&mut gl).unwrap();
        program.dispose(&mut gl).unwrap();
        assert_eq!(gl.live_handles(), 0);
    }

    #[test]
    fn invalid_data_is_rejected_before_upload() {
        let mut gl = HeadlessContext::new(8, 8);
        let data = MeshData::new(vec![MeshVertex::default(); 2], vec![0, 1, 5]);
        assert!(Mesh::from_data(&mut gl, &data).is_err());
        assert_eq!(gl.live_handles(), 0);
    }

    #[test]
    fn draw_after_dispose_is_a_fault() {
        let mut gl = HeadlessContext::new(8, 8);
        let mut mesh = Mesh::from_data(&mut gl, &load_obj_mesh(TRIANGLE).unwrap()).unwrap();
        mesh.dispose(&mut gl).unwrap();
        assert!(mesh.is_disposed());
        assert!(matches!(
            mesh.draw(&mut gl, Topology::Triangles),
            Err(RenderError::Disposed("mesh"))
        ));
        assert!(mesh.dispose(&mut gl).is_err());
    }
}
