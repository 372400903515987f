//! Wavefront OBJ parser for positions, normals and texture coordinates.
//!
//! Faces are fan-triangulated and identical `p/t/n` corners share one vertex.
//! Any malformed record fails the whole parse: partial geometry is never
//! returned. Directives other than `v`, `vt`, `vn` and `f` are ignored.

use std::collections::HashMap;

use crate::{
    error::ObjParseError,
    mesh::{MeshData, MeshVertex},
};

type ParseResult<T> = Result<T, ObjParseError>;

/// Parse OBJ source text into an indexed triangle mesh.
pub fn load_obj_mesh(contents: &str) -> ParseResult<MeshData> {
    parse_obj(contents)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
struct Corner(usize, Option<usize>, Option<usize>);

fn parse_obj(contents: &str) -> ParseResult<MeshData> {
    let mut positions: Vec<[f32; 3]> = Vec::new();
    let mut normals: Vec<[f32; 3]> = Vec::new();
    let mut texcoords: Vec<[f32; 2]> = Vec::new();

    let mut unique: HashMap<Corner, u32> = HashMap::new();
    let mut vertices: Vec<MeshVertex> = Vec::new();
    let mut indices: Vec<u32> = Vec::new();
    let mut face_indices: Vec<u32> = Vec::new();

    for (line_idx, line) in contents.lines().enumerate() {
        let line_no = line_idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut parts = trimmed.split_whitespace();
        let Some(tag) = parts.next() else {
            continue;
        };

        match tag {
            "v" => {
                let x = parse_f32(parts.next(), line_no, "x coordinate")?;
                let y = parse_f32(parts.next(), line_no, "y coordinate")?;
                let z = parse_f32(parts.next(), line_no, "z coordinate")?;
                positions.push([x, y, z]);
            }
            "vt" => {
                let u = parse_f32(parts.next(), line_no, "u coordinate")?;
                let v = parse_f32(parts.next(), line_no, "v coordinate")?;
                texcoords.push([u, 1.0 - v]);
            }
            "vn" => {
                let nx = parse_f32(parts.next(), line_no, "nx coordinate")?;
                let ny = parse_f32(parts.next(), line_no, "ny coordinate")?;
                let nz = parse_f32(parts.next(), line_no, "nz coordinate")?;
                normals.push([nx, ny, nz]);
            }
            "f" => {
                face_indices.clear();
                for part in parts {
                    let (vi, vti, vni) = parse_face_vertex(
                        part,
                        positions.len(),
                        texcoords.len(),
                        normals.len(),
                        line_no,
                    )?;
                    let key = Corner(vi, vti, vni);
                    let index = match unique.get(&key) {
                        Some(&idx) => idx,
                        None => {
                            let position = positions[vi];
                            let uv = vti.map_or([0.0, 0.0], |i| texcoords[i]);
                            let normal = vni.map_or([0.0, 0.0, 1.0], |i| normals[i]);

                            let idx = u32::try_from(vertices.len()).map_err(|_| {
                                ObjParseError::new(line_no, "too many vertices for 32-bit indices")
                            })?;
                            vertices.push(MeshVertex::new(position, normal, uv));
                            unique.insert(key, idx);
                            idx
                        }
                    };
                    face_indices.push(index);
                }

                if face_indices.len() < 3 {
                    return Err(ObjParseError::new(
                        line_no,
                        format!("face needs at least 3 vertices, found {}", face_indices.len()),
                    ));
                }
                for tri in 1..(face_indices.len() - 1) {
                    indices.extend_from_slice(&[
                        face_indices[0],
                        face_indices[tri],
                        face_indices[tri + 1],
                    ]);
                }
            }
            _ => {}
        }
    }

    if indices.is_empty() {
        return Err(ObjParseError::new(
            contents.lines().count().max(1),
            "source contains no triangles",
        ));
    }

    log::debug!(
        "Parsed OBJ: {} vertices, {} triangles",
        vertices.len(),
        indices.len() / 3
    );
    Ok(MeshData::new(vertices, indices))
}

fn parse_f32(value: Option<&str>, line_no: usize, what: &str) -> ParseResult<f32> {
    let token = value.ok_or_else(|| ObjParseError::new(line_no, format!("missing {what}")))?;
    token
        .parse::<f32>()
        .map_err(|e| ObjParseError::new(line_no, format!("invalid {what} '{token}': {e}")))
}

fn parse_face_vertex(
    token: &str,
    pos_count: usize,
    tex_count: usize,
    norm_count: usize,
    line_no: usize,
) -> ParseResult<(usize, Option<usize>, Option<usize>)> {
    let mut split = token.split('/');
    let pos = split.next().unwrap_or_default();
    let pos_idx = resolve_index(pos, pos_count, line_no)?;

    let tex_idx = match split.next() {
        Some(value) if !value.is_empty() => Some(resolve_index(value, tex_count, line_no)?),
        _ => None,
    };

    let norm_idx = match split.next() {
        Some(value) if !value.is_empty() => Some(resolve_index(value, norm_count, line_no)?),
        _ => None,
    };

    if split.next().is_some() {
        return Err(ObjParseError::new(
            line_no,
            format!("malformed face element '{token}'"),
        ));
    }

    Ok((pos_idx, tex_idx, norm_idx))
}

/// Resolve a 1-based (or negative, end-relative) OBJ index into `0..len`.
fn resolve_index(token: &str, len: usize, line_no: usize) -> ParseResult<usize> {
    let raw = token
        .parse::<i64>()
        .map_err(|_| ObjParseError::new(line_no, format!("invalid index '{token}'")))?;
    if raw == 0 {
        return Err(ObjParseError::new(line_no, "OBJ indices are 1-based; found 0"));
    }

    let idx = if raw > 0 { raw - 1 } else { len as i64 + raw };

    if idx < 0 || idx as usize >= len {
        return Err(ObjParseError::new(
            line_no,
            format!("index {raw} out of bounds (len={len})"),
        ));
    }

    Ok(idx as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_well_formed(mesh: &MeshData) {
        assert_eq!(mesh.indices.len() % 3, 0);
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
    }

    #[test]
    fn parse_simple_triangle() {
        let src = r#"
            v 0.0 0.0 0.0
            v 1.0 0.0 0.0
            v 0.0 1.0 0.0
            vn 0.0 0.0 1.0
            vt 0.0 0.0
            vt 1.0 0.0
            vt 0.0 1.0
            f 1/1/1 2/2/1 3/3/1
        "#;
        let mesh = load_obj_mesh(src).expect("parse triangle");
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        assert!(mesh.is_valid());
        // V is flipped for a top-left texture origin.
        assert_eq!(mesh.vertices[0].uv, [0.0, 1.0]);
        assert_eq!(mesh.vertices[2].uv, [0.0, 0.0]);
    }

    #[test]
    fn quads_and_ngons_are_fan_triangulated() {
        let src = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
v -1 1 0
o quad
usemtl whatever
f 1 2 3 4
f 1 2 3 4 5
";
        let mesh = load_obj_mesh(src).expect("parse polygons");
        assert_eq!(mesh.vertices.len(), 5);
        assert_eq!(mesh.triangle_count(), 2 + 3);
        assert_eq!(&mesh.indices[..6], &[0, 1, 2, 0, 2, 3]);
        assert_well_formed(&mesh);
    }

    #[test]
    fn shared_corners_are_deduplicated_and_split_on_attributes() {
        let src = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vn 0 0 1
vn 0 0 -1
f 1//1 2//1 3//1
f 1//1 3//1 4//1
f 1//2 3//2 2//2
";
        let mesh = load_obj_mesh(src).expect("parse");
        // 4 front corners + 3 back corners with a different normal.
        assert_eq!(mesh.vertices.len(), 7);
        assert_eq!(mesh.vertices[4].normal, [0.0, 0.0, -1.0]);
        assert_well_formed(&mesh);
    }

    #[test]
    fn negative_indices_are_relative() {
        let src = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n";
        let mesh = load_obj_mesh(src).expect("parse");
        assert_eq!(mesh.vertices[2].position, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn missing_attributes_get_defaults() {
        let mesh = load_obj_mesh("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").expect("parse");
        assert_eq!(mesh.vertices[0].normal, [0.0, 0.0, 1.0]);
        assert_eq!(mesh.vertices[0].uv, [0.0, 0.0]);
    }

    #[test]
    fn malformed_lines_fail_with_line_number() {
        let err = load_obj_mesh("v 0 0 0\nv 1 zero 0\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("y coordinate"));

        let err = load_obj_mesh("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 4\n").unwrap_err();
        assert_eq!(err.line, 4);
        assert!(err.message.contains("out of bounds"));

        let err = load_obj_mesh("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 0 1 2\n").unwrap_err();
        assert!(err.message.contains("1-based"));

        let err = load_obj_mesh("v 0 0 0\nv 1 0 0\nf 1 2\n").unwrap_err();
        assert_eq!(err.line, 3);

        let err = load_obj_mesh("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1/// 2 3\n").unwrap_err();
        assert!(err.message.contains("malformed face"));
    }

    #[test]
    fn empty_geometry_is_an_error() {
        assert!(load_obj_mesh("").is_err());
        assert!(load_obj_mesh("# only a comment\nv 0 0 0\n").is_err());
    }

    #[test]
    fn generated_grid_upholds_index_invariants() {
        let n = 6;
        let mut src = String::new();
        for y in 0..=n {
            for x in 0..=n {
                src.push_str(&format!("v {x} {y} 0\nvt {} {}\n", x as f32 / n as f32, y as f32 / n as f32));
            }
        }
        for y in 0..n {
            for x in 0..n {
                let a = y * (n + 1) + x + 1;
                let b = a + 1;
                let c = a + n + 2;
                let d = a + n + 1;
                src.push_str(&format!("f {a}/{a} {b}/{b} {c}/{c} {d}/{d}\n"));
            }
        }
        let mesh = load_obj_mesh(&src).expect("parse grid");
        assert_eq!(mesh.vertices.len(), (n + 1) * (n + 1));
        assert_eq!(mesh.triangle_count(), 2 * n * n);
        assert_well_formed(&mesh);
    }
}
