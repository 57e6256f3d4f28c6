use super::{InputError, tokens};
use crate::sphere::{TriangleMesh, Vec3};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Reads the vertices and faces of a Wavefront OBJ file.
///
/// Face corners may be written `v`, `v/vt`, `v//vn` or `v/vt/vn`, with
/// negative indices counting back from the last vertex read. Polygons are
/// split into fans. Every other statement is ignored.
pub fn read_obj(path: &Path) -> Result<TriangleMesh, InputError> {
    let content = fs::read_to_string(path).map_err(|e| InputError::io(path, e))?;
    parse_obj(path, &content)
}

pub fn parse_obj(path: &Path, content: &str) -> Result<TriangleMesh, InputError> {
    let mut vertices: Vec<Vec3> = Vec::new();
    let mut triangles: Vec<[usize; 3]> = Vec::new();

    for (i, line) in content.lines().enumerate() {
        let lineno = i + 1;
        let mut fields = tokens(line);
        match fields.next() {
            Some("v") => {
                let coords = fields
                    .take(3)
                    .map(|t| t.parse::<f64>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| InputError::parse(path, lineno, e.to_string()))?;
                if coords.len() < 3 {
                    return Err(InputError::parse(path, lineno, "vertex needs three coordinates"));
                }
                vertices.push(Vec3::new(coords[0], coords[1], coords[2]));
            }
            Some("f") => {
                let corners = fields
                    .map(|t| corner_index(t, vertices.len()))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| InputError::parse(path, lineno, format!("bad face '{line}'")))?;
                if corners.len() < 3 {
                    return Err(InputError::parse(
                        path,
                        lineno,
                        "face needs at least three corners",
                    ));
                }
                for k in 2..corners.len() {
                    triangles.push([corners[0], corners[k - 1], corners[k]]);
                }
            }
            _ => {}
        }
    }

    TriangleMesh::new(vertices, triangles).map_err(|source| InputError::Mesh {
        path: path.to_path_buf(),
        source,
    })
}

// One-based (or negative, relative) OBJ index to a zero-based vertex index.
fn corner_index(token: &str, seen: usize) -> Option<usize> {
    let index: i64 = token.split('/').next()?.parse().ok()?;
    match index {
        0 => None,
        i if i > 0 => Some(i as usize - 1),
        i => seen.checked_sub(i.unsigned_abs() as usize),
    }
}

pub fn write_obj(path: &Path, mesh: &TriangleMesh) -> Result<(), InputError> {
    let file = fs::File::create(path).map_err(|e| InputError::io(path, e))?;
    let mut out = BufWriter::new(file);
    let mut write = || -> std::io::Result<()> {
        let mut buffer = ryu::Buffer::new();
        for v in &mesh.vertices {
            write!(out, "v {}", buffer.format(v.x))?;
            write!(out, " {}", buffer.format(v.y))?;
            writeln!(out, " {}", buffer.format(v.z))?;
        }
        for [a, b, c] in &mesh.triangles {
            writeln!(out, "f {} {} {}", a + 1, b + 1, c + 1)?;
        }
        out.flush()
    };
    write().map_err(|e| InputError::io(path, e))
}
