use nalgebra::Vector3;
use thiserror::Error;

/// Three-dimensional vector used for every vertex and direction in the crate.
pub type Vec3 = Vector3<f64>;

/// Triangles whose area falls below this value are treated as degenerate.
pub const DEGENERATE_AREA: f64 = 1e-14;

/// Errors raised while assembling a mesh from external data.
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("The mesh has no vertices.")]
    Empty,

    #[error("The mesh has no triangles.")]
    NoTriangles,

    #[error(
        "Triangle {triangle} references vertex {vertex}, but the mesh only has {vertex_count} vertices."
    )]
    IndexOutOfBounds {
        triangle: usize,
        vertex: usize,
        vertex_count: usize,
    },

    #[error("Vertex {0} lies at the origin and cannot be projected onto the unit sphere.")]
    DegenerateVertex(usize),

    #[error("Vertex {0} has non-finite coordinates.")]
    NonFiniteVertex(usize),
}

/// An indexed triangle mesh.
///
/// Sphere meshes and the original surfaces they parameterize share this type;
/// a sphere and its surface are expected to share vertex indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct TriangleMesh {
    pub vertices: Vec<Vec3>,
    pub triangles: Vec<[usize; 3]>,
}

impl TriangleMesh {
    /// Builds a mesh, checking that every triangle references an existing vertex.
    pub fn new(vertices: Vec<Vec3>, triangles: Vec<[usize; 3]>) -> Result<Self, MeshError> {
        let mesh = Self {
            vertices,
            triangles,
        };
        mesh.validate()?;
        Ok(mesh)
    }

    /// Checks a mesh assembled field by field the same way [`new`](Self::new) does.
    pub fn validate(&self) -> Result<(), MeshError> {
        let Self {
            vertices,
            triangles,
        } = self;
        if vertices.is_empty() {
            return Err(MeshError::Empty);
        }
        if triangles.is_empty() {
            return Err(MeshError::NoTriangles);
        }
        if let Some(i) = vertices
            .iter()
            .position(|v| !v.iter().all(|c| c.is_finite()))
        {
            return Err(MeshError::NonFiniteVertex(i));
        }
        for (t, tri) in triangles.iter().enumerate() {
            if let Some(&vertex) = tri.iter().find(|&&v| v >= vertices.len()) {
                return Err(MeshError::IndexOutOfBounds {
                    triangle: t,
                    vertex,
                    vertex_count: vertices.len(),
                });
            }
        }
        Ok(())
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Projects every vertex radially onto the unit sphere.
    pub fn into_unit_sphere(mut self) -> Result<Self, MeshError> {
        for (i, v) in self.vertices.iter_mut().enumerate() {
            let norm = v.norm();
            if norm <= f64::MIN_POSITIVE {
                return Err(MeshError::DegenerateVertex(i));
            }
            *v /= norm;
        }
        Ok(self)
    }

    /// Corner positions of triangle `t`.
    pub fn corners(&self, t: usize) -> [Vec3; 3] {
        corners_of(&self.vertices, self.triangles[t])
    }

    /// Index of the vertex closest to `point` (linear scan).
    pub fn nearest_vertex(&self, point: &Vec3) -> usize {
        let mut best = 0;
        let mut best_dist2 = f64::INFINITY;
        for (i, v) in self.vertices.iter().enumerate() {
            let d2 = (v - point).norm_squared();
            if d2 < best_dist2 {
                best_dist2 = d2;
                best = i;
            }
        }
        best
    }
}

/// Gathers the corners of a triangle from a vertex buffer.
#[inline]
pub fn corners_of(vertices: &[Vec3], tri: [usize; 3]) -> [Vec3; 3] {
    [vertices[tri[0]], vertices[tri[1]], vertices[tri[2]]]
}

/// Signed volume of the tetrahedron (origin, a, b, c), times six.
///
/// Positive when the triangle winds counter-clockwise seen from outside the
/// sphere, i.e. when its normal points away from the origin.
#[inline]
pub fn signed_volume(a: &Vec3, b: &Vec3, c: &Vec3) -> f64 {
    a.dot(&b.cross(c))
}

#[inline]
pub fn triangle_area(a: &Vec3, b: &Vec3, c: &Vec3) -> f64 {
    0.5 * (b - a).cross(&(c - a)).norm()
}

/// Intersects the ray from the origin along `dir` with the plane of triangle
/// (a, b, c).
///
/// Returns the barycentric coordinates of the hit point and the ray parameter,
/// or `None` when the ray is parallel to the plane or hits it behind the origin.
/// The barycentrics may be negative; callers decide what counts as inside.
pub fn ray_barycentric(dir: &Vec3, a: &Vec3, b: &Vec3, c: &Vec3) -> Option<([f64; 3], f64)> {
    let e1 = b - a;
    let e2 = c - a;
    let pvec = dir.cross(&e2);
    let det = e1.dot(&pvec);
    if det == 0.0 || !det.is_finite() {
        return None;
    }
    let inv_det = 1.0 / det;
    let tvec = -a;
    let u = tvec.dot(&pvec) * inv_det;
    let qvec = tvec.cross(&e1);
    let v = dir.dot(&qvec) * inv_det;
    let t = e2.dot(&qvec) * inv_det;
    if !(t > 0.0) {
        return None;
    }
    Some(([1.0 - u - v, u, v], t))
}

/// Barycentric coordinates of the point of triangle (a, b, c) closest to `p`.
///
/// Region-based closest point test after Ericson, Real-Time Collision
/// Detection, section 5.1.5.
pub fn closest_point_barycentric(p: &Vec3, a: &Vec3, b: &Vec3, c: &Vec3) -> [f64; 3] {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return [1.0, 0.0, 0.0];
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return [0.0, 1.0, 0.0];
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return guard([1.0 - v, v, 0.0]);
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return [0.0, 0.0, 1.0];
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return guard([1.0 - w, 0.0, w]);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return guard([0.0, 1.0 - w, w]);
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    guard([1.0 - v - w, v, w])
}

// Collapsed triangles can produce 0/0 above; fall back to the first corner.
fn guard(bary: [f64; 3]) -> [f64; 3] {
    if bary.iter().all(|b| b.is_finite()) {
        bary
    } else {
        [1.0, 0.0, 0.0]
    }
}
