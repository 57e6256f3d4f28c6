use super::mesh::{TriangleMesh, Vec3, signed_volume};
use ahash::AHashMap;

const BASE_FACES: [[usize; 3]; 20] = [
    [0, 11, 5],
    [0, 5, 1],
    [0, 1, 7],
    [0, 7, 10],
    [0, 10, 11],
    [1, 5, 9],
    [5, 11, 4],
    [11, 10, 2],
    [10, 7, 6],
    [7, 1, 8],
    [3, 9, 4],
    [3, 4, 2],
    [3, 2, 6],
    [3, 6, 8],
    [3, 8, 9],
    [4, 9, 5],
    [2, 4, 11],
    [6, 2, 10],
    [8, 6, 7],
    [9, 8, 1],
];

fn base_vertices() -> Vec<Vec3> {
    let t = (1.0 + 5.0_f64.sqrt()) / 2.0;
    [
        (-1.0, t, 0.0),
        (1.0, t, 0.0),
        (-1.0, -t, 0.0),
        (1.0, -t, 0.0),
        (0.0, -1.0, t),
        (0.0, 1.0, t),
        (0.0, -1.0, -t),
        (0.0, 1.0, -t),
        (t, 0.0, -1.0),
        (t, 0.0, 1.0),
        (-t, 0.0, -1.0),
        (-t, 0.0, 1.0),
    ]
    .into_iter()
    .map(|(x, y, z)| Vec3::new(x, y, z).normalize())
    .collect()
}

/// Number of vertices of an icosphere at `level`: 10 * 4^level + 2.
pub fn icosphere_vertex_count(level: u32) -> usize {
    10 * 4usize.pow(level) + 2
}

/// Unit icosphere obtained by `level` rounds of 1-to-4 triangle subdivision.
///
/// Every triangle is wound counter-clockwise when seen from outside, so its
/// signed volume with respect to the origin is positive. The vertices double
/// as the fixed sampling grid of the registration.
pub fn icosphere(level: u32) -> TriangleMesh {
    let mut vertices = base_vertices();
    let mut triangles: Vec<[usize; 3]> = BASE_FACES
        .iter()
        .map(|&[a, b, c]| {
            if signed_volume(&vertices[a], &vertices[b], &vertices[c]) < 0.0 {
                [a, c, b]
            } else {
                [a, b, c]
            }
        })
        .collect();

    for _ in 0..level {
        let mut midpoints: AHashMap<(usize, usize), usize> = AHashMap::new();
        let mut next = Vec::with_capacity(triangles.len() * 4);
        let mut midpoint = |a: usize, b: usize, vertices: &mut Vec<Vec3>| -> usize {
            let key = if a < b { (a, b) } else { (b, a) };
            *midpoints.entry(key).or_insert_with(|| {
                vertices.push(((vertices[a] + vertices[b]) * 0.5).normalize());
                vertices.len() - 1
            })
        };
        for &[v0, v1, v2] in &triangles {
            let m01 = midpoint(v0, v1, &mut vertices);
            let m12 = midpoint(v1, v2, &mut vertices);
            let m20 = midpoint(v2, v0, &mut vertices);
            next.push([v0, m01, m20]);
            next.push([v1, m12, m01]);
            next.push([v2, m20, m12]);
            next.push([m01, m12, m20]);
        }
        triangles = next;
    }

    TriangleMesh {
        vertices,
        triangles,
    }
}
