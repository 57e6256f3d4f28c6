use crate::sphere::mesh::{DEGENERATE_AREA, corners_of, triangle_area};
use crate::sphere::{Location, SphereIndex, Vec3};
use ndarray::{ArrayView2, ArrayViewMut2};

/// Vertex weights used to read a property at one sample direction.
///
/// Either the three corners of the located triangle with their barycentric
/// weights, or a single vertex when the triangle is degenerate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Interpolation {
    Barycentric([usize; 3], [f64; 3]),
    Nearest(usize),
}

impl Interpolation {
    /// Chooses the weights for `dir` given its location on the deformed mesh.
    pub fn at(dir: &Vec3, location: &Location, triangle: [usize; 3], deformed: &[Vec3]) -> Self {
        let corners = corners_of(deformed, triangle);
        let [a, b, c] = &corners;
        if triangle_area(a, b, c) < DEGENERATE_AREA
            || !location.bary.iter().all(|w| w.is_finite())
        {
            let nearest = (0..3)
                .min_by(|&i, &j| {
                    (corners[i] - dir)
                        .norm_squared()
                        .total_cmp(&(corners[j] - dir).norm_squared())
                })
                .unwrap_or(0);
            return Interpolation::Nearest(triangle[nearest]);
        }
        Interpolation::Barycentric(triangle, location.bary)
    }

    /// Interpolates column `k` of `values` (one row per vertex).
    #[inline]
    pub fn apply(&self, values: ArrayView2<f64>, k: usize) -> f64 {
        match *self {
            Interpolation::Barycentric(tri, w) => {
                w[0] * values[[tri[0], k]] + w[1] * values[[tri[1], k]] + w[2] * values[[tri[2], k]]
            }
            Interpolation::Nearest(v) => values[[v, k]],
        }
    }
}

/// Resamples every property of one subject on the sample grid.
///
/// `index` must be built over `deformed`. `cache` holds the triangle found for
/// each sample by the previous call and is refreshed in place. `out` receives
/// one row per sample and one column per property; a sample that cannot be
/// located reads NaN.
pub fn resample_properties(
    index: &SphereIndex,
    triangles: &[[usize; 3]],
    deformed: &[Vec3],
    properties: ArrayView2<f64>,
    samples: &[Vec3],
    cache: &mut [Option<usize>],
    mut out: ArrayViewMut2<f64>,
) {
    let property_count = properties.ncols();
    for (j, dir) in samples.iter().enumerate() {
        let Some(location) = index.locate(dir, cache[j]) else {
            cache[j] = None;
            out.row_mut(j).fill(f64::NAN);
            continue;
        };
        cache[j] = Some(location.triangle);
        let weights = Interpolation::at(dir, &location, triangles[location.triangle], deformed);
        for k in 0..property_count {
            out[[j, k]] = weights.apply(properties, k);
        }
    }
}

/// Current positions of a subject's landmark vertices.
pub fn landmark_positions(deformed: &[Vec3], landmark_vertices: &[usize], out: &mut Vec<Vec3>) {
    out.clear();
    out.extend(landmark_vertices.iter().map(|&v| deformed[v]));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::icosphere;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    #[test]
    fn test_identity_at_coincident_vertices() {
        let mesh = icosphere(2);
        let index = SphereIndex::build(&mesh.vertices, &mesh.triangles);
        let props = Array2::from_shape_fn((mesh.vertex_count(), 2), |(i, k)| {
            (i as f64 * 0.37).sin() + k as f64
        });
        let mut cache = vec![None; mesh.vertex_count()];
        let mut out = Array2::zeros((mesh.vertex_count(), 2));
        resample_properties(
            &index,
            &mesh.triangles,
            &mesh.vertices,
            props.view(),
            &mesh.vertices,
            &mut cache,
            out.view_mut(),
        );
        for i in 0..mesh.vertex_count() {
            for k in 0..2 {
                assert_abs_diff_eq!(out[[i, k]], props[[i, k]], epsilon = 1e-9);
            }
        }
        assert!(cache.iter().all(Option::is_some));
    }

    #[test]
    fn test_linear_field_is_reproduced_inside_triangles() {
        let mesh = icosphere(1);
        let index = SphereIndex::build(&mesh.vertices, &mesh.triangles);
        let props = Array2::from_shape_fn((mesh.vertex_count(), 1), |(i, _)| i as f64);
        let [a, b, c] = mesh.triangles[4];
        let [pa, pb, pc] = mesh.corners(4);
        let dir = (pa * 0.5 + pb * 0.3 + pc * 0.2).normalize();
        let location = index.locate(&dir, None).unwrap();
        let triangle = mesh.triangles[location.triangle];
        let weights = Interpolation::at(&dir, &location, triangle, &mesh.vertices);
        let value = weights.apply(props.view(), 0);
        assert_eq!(location.triangle, 4);
        assert!((value - (0.5 * a as f64 + 0.3 * b as f64 + 0.2 * c as f64)).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_triangle_falls_back_to_nearest_vertex() {
        let vertices = vec![Vec3::x(), Vec3::x(), Vec3::x(), Vec3::y()];
        let location = Location {
            triangle: 0,
            bary: [f64::NAN, f64::NAN, f64::NAN],
            contained: false,
        };
        let weights = Interpolation::at(&Vec3::x(), &location, [3, 1, 2], &vertices);
        assert_eq!(weights, Interpolation::Nearest(1));
    }

    #[test]
    fn test_unlocated_samples_read_nan_instead_of_stale_values() {
        let mesh = icosphere(1);
        let index = SphereIndex::build(&mesh.vertices, &[]);
        let props = Array2::from_elem((mesh.vertex_count(), 2), 1.0);
        let mut cache = vec![Some(3); 2];
        let mut out = Array2::from_elem((2, 2), 7.0);
        resample_properties(
            &index,
            &[],
            &mesh.vertices,
            props.view(),
            &[Vec3::x(), Vec3::z()],
            &mut cache,
            out.view_mut(),
        );
        assert!(out.iter().all(|v| v.is_nan()));
        assert!(cache.iter().all(Option::is_none));
    }

    #[test]
    fn test_landmark_positions_follow_deformation() {
        let deformed = vec![Vec3::x(), Vec3::y(), Vec3::z()];
        let mut out = Vec::new();
        landmark_positions(&deformed, &[2, 0], &mut out);
        assert_eq!(out, vec![Vec3::z(), Vec3::x()]);
    }
}
