use super::coefficients::SpharmCoefficients;
use super::harmonics::{BasisTable, PoleFrame};
use crate::sphere::{TriangleMesh, Vec3};
use ndarray::{ArrayView1, ArrayView2};

/// Moves one base direction along the harmonic displacement field.
///
/// `coeff` holds one row per spatial axis and one column per basis function
/// (only the first `coeff.ncols()` entries of `basis_row` are used). The field
/// value is computed in the pole frame, rotated back to world coordinates,
/// projected onto the tangent plane at `v0` and applied with the exponential
/// map of the sphere. The result is renormalized, so it is a unit vector for
/// every input.
pub fn update_coordinate(
    v0: &Vec3,
    basis_row: ArrayView1<f64>,
    coeff: ArrayView2<f64>,
    frame: &PoleFrame,
) -> Vec3 {
    let n = coeff.ncols().min(basis_row.len());
    let mut local = Vec3::zeros();
    for axis in 0..3 {
        let row = coeff.row(axis);
        local[axis] = (0..n).map(|i| row[i] * basis_row[i]).sum();
    }
    if local.iter().all(|&d| d == 0.0) {
        return *v0;
    }

    let delta = frame.to_world(&local);
    let tangent = delta - v0 * v0.dot(&delta);
    let angle = tangent.norm();
    let moved = if angle > 1e-15 && angle.is_finite() {
        v0 * angle.cos() + tangent * (angle.sin() / angle)
    } else {
        *v0
    };
    let norm = moved.norm();
    if norm > 0.0 && norm.is_finite() {
        moved / norm
    } else {
        *v0
    }
}

/// Deforms every base vertex, writing the new positions into `out`.
pub fn deform_vertices(
    base: &[Vec3],
    table: &BasisTable,
    coeff: ArrayView2<f64>,
    degree: usize,
    out: &mut Vec<Vec3>,
) {
    out.clear();
    out.extend(
        base.iter()
            .enumerate()
            .map(|(i, v)| update_coordinate(v, table.row(i, degree), coeff, table.frame())),
    );
}

/// Deforms a unit sphere with stored coefficients at their own degree and
/// pole. `None` when the pole is the zero vector.
pub fn deform_mesh(sphere: &TriangleMesh, coeff: &SpharmCoefficients) -> Option<TriangleMesh> {
    let frame = PoleFrame::new(Vec3::from(coeff.pole))?;
    let table = BasisTable::new(&sphere.vertices, coeff.degree, frame);
    let mut vertices = Vec::with_capacity(sphere.vertex_count());
    deform_vertices(
        &sphere.vertices,
        &table,
        coeff.coefficients.view(),
        coeff.degree,
        &mut vertices,
    );
    Some(TriangleMesh {
        vertices,
        triangles: sphere.triangles.clone(),
    })
}
