use super::mesh::{Vec3, corners_of, signed_volume};

/// Signed volumes at or below this magnitude count as collapsed triangles.
pub const COLLAPSED_VOLUME: f64 = 1e-15;

/// Detects triangles whose orientation reversed relative to the undeformed mesh.
///
/// Orientation is the sign of `a · (b × c)`, i.e. whether the triangle normal
/// points away from the sphere center. A triangle that collapses to zero
/// volume is reported as flipped as well, since its orientation is undefined.
#[derive(Debug, Clone)]
pub struct FlipValidator {
    triangles: Vec<[usize; 3]>,
    outward: Vec<bool>,
}

impl FlipValidator {
    /// Records the reference orientation of every triangle of `vertices`.
    pub fn new(vertices: &[Vec3], triangles: &[[usize; 3]]) -> Self {
        let outward = triangles
            .iter()
            .map(|&tri| {
                let [a, b, c] = corners_of(vertices, tri);
                signed_volume(&a, &b, &c) >= 0.0
            })
            .collect();
        Self {
            triangles: triangles.to_vec(),
            outward,
        }
    }

    #[inline]
    fn is_flipped(&self, vertices: &[Vec3], t: usize) -> bool {
        let [a, b, c] = corners_of(vertices, self.triangles[t]);
        let volume = signed_volume(&a, &b, &c);
        if !volume.is_finite() || volume.abs() <= COLLAPSED_VOLUME {
            return true;
        }
        (volume > 0.0) != self.outward[t]
    }

    /// Writes one flag per triangle into `flags` and returns the number of flips.
    pub fn flipped(&self, vertices: &[Vec3], flags: &mut Vec<bool>) -> usize {
        flags.clear();
        flags.extend((0..self.triangles.len()).map(|t| self.is_flipped(vertices, t)));
        flags.iter().filter(|&&f| f).count()
    }

    pub fn count_flips(&self, vertices: &[Vec3]) -> usize {
        (0..self.triangles.len())
            .filter(|&t| self.is_flipped(vertices, t))
            .count()
    }

    /// Short-circuits on the first flipped triangle.
    pub fn any_flip(&self, vertices: &[Vec3]) -> bool {
        (0..self.triangles.len()).any(|t| self.is_flipped(vertices, t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::icosahedron::icosphere;

    #[test]
    fn test_undeformed_mesh_has_no_flips() {
        let mesh = icosphere(3);
        let validator = FlipValidator::new(&mesh.vertices, &mesh.triangles);
        assert!(!validator.any_flip(&mesh.vertices));
        let mut flags = Vec::new();
        assert_eq!(validator.flipped(&mesh.vertices, &mut flags), 0);
        assert_eq!(flags.len(), mesh.triangle_count());
    }

    #[test]
    fn test_vertex_pushed_across_its_ring_flips_triangles() {
        let mesh = icosphere(1);
        let validator = FlipValidator::new(&mesh.vertices, &mesh.triangles);
        let mut moved = mesh.vertices.clone();
        // Vertex 0 moved onto the antipode inverts every triangle of its ring.
        moved[0] = -moved[0];
        let ring = mesh.triangles.iter().filter(|t| t.contains(&0)).count();
        assert!(validator.any_flip(&moved));
        assert_eq!(validator.count_flips(&moved), ring);
    }

    #[test]
    fn test_collapsed_triangle_counts_as_flipped() {
        let mesh = icosphere(0);
        let validator = FlipValidator::new(&mesh.vertices, &mesh.triangles);
        let mut moved = mesh.vertices.clone();
        let [a, b, _] = mesh.triangles[0];
        moved[b] = moved[a];
        let mut flags = Vec::new();
        assert!(validator.flipped(&moved, &mut flags) >= 1);
        assert!(flags[0]);
    }

    #[test]
    fn test_small_rotation_keeps_orientation() {
        let mesh = icosphere(2);
        let validator = FlipValidator::new(&mesh.vertices, &mesh.triangles);
        let rotation = nalgebra::Rotation3::from_axis_angle(&Vec3::z_axis(), 0.3);
        let rotated: Vec<Vec3> = mesh.vertices.iter().map(|v| rotation * v).collect();
        assert_eq!(validator.count_flips(&rotated), 0);
    }
}
