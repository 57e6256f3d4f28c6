use crate::sphere::Vec3;
use nalgebra::{Rotation3, Unit};
use ndarray::{Array2, ArrayView1};
use std::f64::consts::PI;

/// Number of real spherical harmonics up to and including `degree`.
#[inline]
pub fn basis_size(degree: usize) -> usize {
    (degree + 1) * (degree + 1)
}

/// Position of `Y_l^m` inside a basis row.
#[inline]
pub fn basis_index(l: usize, m: i64) -> usize {
    ((l * l + l) as i64 + m) as usize
}

/// Rotation that brings the pole of the harmonic basis onto +z.
///
/// The basis is evaluated in this frame, so `Y_l^0` is symmetric about the pole.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoleFrame {
    pole: Unit<Vec3>,
    to_local: Rotation3<f64>,
}

impl PoleFrame {
    /// Returns `None` for a zero-length or non-finite pole.
    pub fn new(pole: Vec3) -> Option<Self> {
        if !pole.iter().all(|c| c.is_finite()) {
            return None;
        }
        let pole = Unit::try_new(pole, 1e-12)?;
        let to_local = Rotation3::rotation_between(&pole, &Vec3::z()).unwrap_or_else(|| {
            // Antiparallel to +z: any half turn about a horizontal axis.
            Rotation3::from_axis_angle(&Vec3::x_axis(), PI)
        });
        Some(Self { pole, to_local })
    }

    pub fn pole(&self) -> Vec3 {
        self.pole.into_inner()
    }

    #[inline]
    pub fn to_local(&self, v: &Vec3) -> Vec3 {
        self.to_local * v
    }

    #[inline]
    pub fn to_world(&self, v: &Vec3) -> Vec3 {
        self.to_local.inverse_transform_vector(v)
    }
}

/// Evaluates the real orthonormal spherical harmonics up to `degree` at the
/// unit direction `dir`, writing them into `out` in `l*l + l + m` order.
///
/// Associated Legendre functions come from the standard three-term recurrence,
/// without the Condon-Shortley phase. For `m > 0` the cosine branch is stored at
/// `+m` and the sine branch at `-m`.
pub fn real_spherical_harmonics(dir: &Vec3, degree: usize, out: &mut [f64]) {
    debug_assert!(out.len() >= basis_size(degree));
    let z = dir.z.clamp(-1.0, 1.0);
    let sin_theta = (1.0 - z * z).max(0.0).sqrt();
    let phi = dir.y.atan2(dir.x);

    // legendre[l] holds P_l^m for the current m.
    let mut legendre = vec![0.0; degree + 1];
    let mut p_mm = 1.0;
    for m in 0..=degree {
        if m > 0 {
            p_mm *= (2 * m - 1) as f64 * sin_theta;
        }
        legendre[m] = p_mm;
        if m < degree {
            legendre[m + 1] = z * (2 * m + 1) as f64 * p_mm;
        }
        for l in (m + 2)..=degree {
            legendre[l] = ((2 * l - 1) as f64 * z * legendre[l - 1]
                - (l + m - 1) as f64 * legendre[l - 2])
                / (l - m) as f64;
        }

        let (sin_m, cos_m) = (m as f64 * phi).sin_cos();
        for l in m..=degree {
            let k = normalization(l, m);
            if m == 0 {
                out[basis_index(l, 0)] = k * legendre[l];
            } else {
                let scaled = std::f64::consts::SQRT_2 * k * legendre[l];
                out[basis_index(l, m as i64)] = scaled * cos_m;
                out[basis_index(l, -(m as i64))] = scaled * sin_m;
            }
        }
    }
}

// sqrt((2l+1)/(4 pi) * (l-m)!/(l+m)!)
fn normalization(l: usize, m: usize) -> f64 {
    let ratio: f64 = ((l - m + 1)..=(l + m)).map(|k| 1.0 / k as f64).product();
    ((2 * l + 1) as f64 / (4.0 * PI) * ratio).sqrt()
}

/// Basis rows of every base vertex, precomputed once per sphere, pole and degree.
///
/// Rows are evaluated at the maximum degree of the run; a lower active degree
/// reads the prefix of each row, which is exactly the lower-degree basis.
#[derive(Debug, Clone)]
pub struct BasisTable {
    degree: usize,
    frame: PoleFrame,
    rows: Array2<f64>,
}

impl BasisTable {
    pub fn new(vertices: &[Vec3], degree: usize, frame: PoleFrame) -> Self {
        let mut rows = Array2::zeros((vertices.len(), basis_size(degree)));
        let mut scratch = vec![0.0; basis_size(degree)];
        for (i, v) in vertices.iter().enumerate() {
            let local = frame.to_local(v);
            real_spherical_harmonics(&local, degree, &mut scratch);
            rows.row_mut(i)
                .iter_mut()
                .zip(&scratch)
                .for_each(|(dst, &src)| *dst = src);
        }
        Self {
            degree,
            frame,
            rows,
        }
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn frame(&self) -> &PoleFrame {
        &self.frame
    }

    pub fn vertex_count(&self) -> usize {
        self.rows.nrows()
    }

    /// Basis row of vertex `i` truncated to `degree`.
    pub fn row(&self, i: usize, degree: usize) -> ArrayView1<'_, f64> {
        let n = basis_size(degree.min(self.degree));
        self.rows.slice(ndarray::s![i, ..n])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::icosphere;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_constant_harmonic() {
        let mut out = vec![0.0; 1];
        real_spherical_harmonics(&Vec3::new(0.3, 0.4, 0.866).normalize(), 0, &mut out);
        assert_abs_diff_eq!(out[0], 0.5 / PI.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_degree_one_is_proportional_to_coordinates() {
        let dir = Vec3::new(0.2, -0.5, 0.7).normalize();
        let mut out = vec![0.0; basis_size(1)];
        real_spherical_harmonics(&dir, 1, &mut out);
        let c = (3.0 / (4.0 * PI)).sqrt();
        assert_abs_diff_eq!(out[basis_index(1, -1)], c * dir.y, epsilon = 1e-12);
        assert_abs_diff_eq!(out[basis_index(1, 0)], c * dir.z, epsilon = 1e-12);
        assert_abs_diff_eq!(out[basis_index(1, 1)], c * dir.x, epsilon = 1e-12);
    }

    #[test]
    fn test_addition_theorem() {
        let degree = 8;
        let mut out = vec![0.0; basis_size(degree)];
        for dir in [
            Vec3::new(0.1, 0.2, 0.97),
            Vec3::new(-0.6, 0.3, -0.2),
            Vec3::new(0.0, 0.0, -1.0),
        ] {
            real_spherical_harmonics(&dir.normalize(), degree, &mut out);
            for l in 0..=degree {
                let sum: f64 = out[l * l..(l + 1) * (l + 1)].iter().map(|y| y * y).sum();
                assert_abs_diff_eq!(sum, (2 * l + 1) as f64 / (4.0 * PI), epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_orthonormality_on_icosphere() {
        // Products of degree <= 2 harmonics have no icosahedrally invariant
        // part besides the constant, so the vertex average is exact.
        let degree = 2;
        let mesh = icosphere(2);
        let n = basis_size(degree);
        let mut gram = Array2::<f64>::zeros((n, n));
        let mut out = vec![0.0; n];
        for v in &mesh.vertices {
            real_spherical_harmonics(v, degree, &mut out);
            for a in 0..n {
                for b in 0..n {
                    gram[[a, b]] += out[a] * out[b];
                }
            }
        }
        gram *= 4.0 * PI / mesh.vertex_count() as f64;
        for a in 0..n {
            for b in 0..n {
                let expected = if a == b { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(gram[[a, b]], expected, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_pole_frame_maps_pole_to_z() {
        for pole in [Vec3::new(1.0, 2.0, -0.5), -Vec3::z(), Vec3::z()] {
            let frame = PoleFrame::new(pole).expect("valid pole");
            let local = frame.to_local(&pole.normalize());
            assert_abs_diff_eq!(local.z, 1.0, epsilon = 1e-12);
            let back = frame.to_world(&local);
            assert_abs_diff_eq!((back - pole.normalize()).norm(), 0.0, epsilon = 1e-12);
        }
        assert!(PoleFrame::new(Vec3::zeros()).is_none());
    }

    #[test]
    fn test_table_row_prefix_matches_lower_degree() {
        let mesh = icosphere(1);
        let frame = PoleFrame::new(Vec3::z()).expect("valid pole");
        let table = BasisTable::new(&mesh.vertices, 4, frame);
        let mut low = vec![0.0; basis_size(2)];
        real_spherical_harmonics(&mesh.vertices[5], 2, &mut low);
        let row = table.row(5, 2);
        assert_eq!(row.len(), low.len());
        for (a, b) in row.iter().zip(&low) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-14);
        }
    }
}
