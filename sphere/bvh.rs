use super::mesh::{Vec3, closest_point_barycentric, corners_of, ray_barycentric};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Barycentric slack accepted when deciding that a ray hit lies inside a triangle.
pub const CONTAINMENT_EPS: f64 = 1e-9;

const LEAF_SIZE: usize = 8;

// Triangles of a unit sphere are hit well before this ray parameter.
const RAY_T_MAX: f64 = 2.0;

/// Result of locating a direction on a spherical mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub triangle: usize,
    /// Weights of the triangle's three corners, in triangle order.
    pub bary: [f64; 3],
    /// False when no triangle contains the direction and the nearest one was used.
    pub contained: bool,
}

#[derive(Debug, Clone, Copy)]
struct Aabb {
    min: Vec3,
    max: Vec3,
}

impl Aabb {
    fn of_triangle(corners: &[Vec3; 3]) -> Self {
        let mut min = corners[0];
        let mut max = corners[0];
        for c in &corners[1..] {
            min = min.inf(c);
            max = max.sup(c);
        }
        Self { min, max }
    }

    fn union(self, other: Self) -> Self {
        Self {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    fn distance_squared(&self, point: &Vec3) -> f64 {
        (0..3)
            .map(|k| {
                let d = if point[k] < self.min[k] {
                    self.min[k] - point[k]
                } else if point[k] > self.max[k] {
                    point[k] - self.max[k]
                } else {
                    0.0
                };
                d * d
            })
            .sum()
    }

    // Slab test for the ray starting at the origin.
    fn hit_by_ray(&self, dir: &Vec3, t_max: f64) -> bool {
        let mut tmin = 0.0_f64;
        let mut tmax = t_max;
        for k in 0..3 {
            let d = dir[k];
            if d.abs() <= 1e-15 {
                if 0.0 < self.min[k] || 0.0 > self.max[k] {
                    return false;
                }
                continue;
            }
            let inv = 1.0 / d;
            let mut t0 = self.min[k] * inv;
            let mut t1 = self.max[k] * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            tmin = tmin.max(t0);
            tmax = tmax.min(t1);
            if tmax < tmin {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy)]
struct Node {
    bbox: Aabb,
    left: u32,
    right: u32,
    start: u32,
    count: u32,
}

impl Node {
    fn is_leaf(&self) -> bool {
        self.count != 0
    }
}

/// Bounding-volume hierarchy over the triangles of one (deformed) spherical mesh.
///
/// The index owns a copy of every triangle's corners, so it stays valid while
/// the vertex buffer it was built from is being rewritten; it has to be rebuilt
/// once the new positions are committed.
#[derive(Debug, Clone)]
pub struct SphereIndex {
    corners: Vec<[Vec3; 3]>,
    nodes: Vec<Node>,
    order: Vec<u32>,
}

impl SphereIndex {
    pub fn build(vertices: &[Vec3], triangles: &[[usize; 3]]) -> Self {
        let corners: Vec<[Vec3; 3]> = triangles
            .iter()
            .map(|&tri| corners_of(vertices, tri))
            .collect();
        let boxes: Vec<Aabb> = corners.iter().map(Aabb::of_triangle).collect();
        let mut index = Self {
            corners,
            nodes: Vec::with_capacity(boxes.len() * 2),
            order: (0..boxes.len() as u32).collect(),
        };
        if !boxes.is_empty() {
            index.build_node(&boxes, 0, boxes.len());
        }
        index
    }

    pub fn triangle_count(&self) -> usize {
        self.corners.len()
    }

    fn build_node(&mut self, boxes: &[Aabb], start: usize, end: usize) -> u32 {
        let node_index = self.nodes.len() as u32;
        let bbox = self.order[start + 1..end]
            .iter()
            .fold(boxes[self.order[start] as usize], |acc, &i| {
                acc.union(boxes[i as usize])
            });
        self.nodes.push(Node {
            bbox,
            left: u32::MAX,
            right: u32::MAX,
            start: start as u32,
            count: (end - start) as u32,
        });

        let count = end - start;
        if count <= LEAF_SIZE {
            return node_index;
        }

        let axis = split_axis(boxes, &self.order[start..end]);
        let mid = start + count / 2;
        self.order[start..end].select_nth_unstable_by(mid - start, |&a, &b| {
            boxes[a as usize].center()[axis].total_cmp(&boxes[b as usize].center()[axis])
        });

        let left = self.build_node(boxes, start, mid);
        let right = self.build_node(boxes, mid, end);
        let node = &mut self.nodes[node_index as usize];
        node.left = left;
        node.right = right;
        node.count = 0;
        node_index
    }

    /// Finds the triangle containing `dir`, or the one nearest to it.
    ///
    /// `hint` is the triangle matched by the previous query for the same sample;
    /// it is tried first and skips the tree walk when it still contains `dir`.
    /// Returns `None` only for an empty index.
    pub fn locate(&self, dir: &Vec3, hint: Option<usize>) -> Option<Location> {
        if let Some(t) = hint.filter(|&t| t < self.corners.len()) {
            if let Some(bary) = self.contains(t, dir) {
                return Some(Location {
                    triangle: t,
                    bary,
                    contained: true,
                });
            }
        }

        let mut best: Option<(usize, [f64; 3], f64)> = None;
        self.query_ray(dir, |t| {
            if let Some(bary) = self.contains(t, dir) {
                let score = bary[0].min(bary[1]).min(bary[2]);
                if best.is_none_or(|(_, _, s)| score > s) {
                    best = Some((t, bary, score));
                }
            }
        });
        if let Some((triangle, bary, _)) = best {
            return Some(Location {
                triangle,
                bary,
                contained: true,
            });
        }

        self.nearest(dir).map(|(triangle, bary)| Location {
            triangle,
            bary,
            contained: false,
        })
    }

    fn contains(&self, t: usize, dir: &Vec3) -> Option<[f64; 3]> {
        let [a, b, c] = &self.corners[t];
        ray_barycentric(dir, a, b, c)
            .map(|(bary, _)| bary)
            .filter(|bary| bary.iter().all(|&w| w >= -CONTAINMENT_EPS))
    }

    fn query_ray<F: FnMut(usize)>(&self, dir: &Vec3, mut visit: F) {
        if self.nodes.is_empty() {
            return;
        }
        let mut stack = vec![0u32];
        while let Some(node_idx) = stack.pop() {
            let node = &self.nodes[node_idx as usize];
            if !node.bbox.hit_by_ray(dir, RAY_T_MAX) {
                continue;
            }
            if node.is_leaf() {
                let start = node.start as usize;
                let end = start + node.count as usize;
                for &prim in &self.order[start..end] {
                    visit(prim as usize);
                }
                continue;
            }
            stack.push(node.left);
            stack.push(node.right);
        }
    }

    // Best-first search on box distance; returns the triangle and the
    // barycentrics of its point closest to `point`.
    fn nearest(&self, point: &Vec3) -> Option<(usize, [f64; 3])> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut best_dist2 = f64::INFINITY;
        let mut best: Option<(usize, [f64; 3])> = None;

        let mut heap = BinaryHeap::new();
        heap.push(HeapEntry {
            dist2: self.nodes[0].bbox.distance_squared(point),
            node: 0,
        });

        while let Some(entry) = heap.pop() {
            if entry.dist2 > best_dist2 {
                break;
            }
            let node = &self.nodes[entry.node as usize];
            if node.is_leaf() {
                let start = node.start as usize;
                let end = start + node.count as usize;
                for &prim in &self.order[start..end] {
                    let t = prim as usize;
                    let [a, b, c] = &self.corners[t];
                    let bary = closest_point_barycentric(point, a, b, c);
                    let closest = a * bary[0] + b * bary[1] + c * bary[2];
                    let d2 = (closest - point).norm_squared();
                    if d2.is_finite() && d2 < best_dist2 {
                        best_dist2 = d2;
                        best = Some((t, bary));
                    }
                }
                continue;
            }
            for child in [node.left, node.right] {
                let d2 = self.nodes[child as usize].bbox.distance_squared(point);
                if d2 <= best_dist2 {
                    heap.push(HeapEntry {
                        dist2: d2,
                        node: child,
                    });
                }
            }
        }
        best
    }
}

fn split_axis(boxes: &[Aabb], prims: &[u32]) -> usize {
    let first = boxes[prims[0] as usize].center();
    let (min, max) = prims[1..].iter().fold((first, first), |(lo, hi), &i| {
        let c = boxes[i as usize].center();
        (lo.inf(&c), hi.sup(&c))
    });
    let extent = max - min;
    if extent.x >= extent.y && extent.x >= extent.z {
        0
    } else if extent.y >= extent.z {
        1
    } else {
        2
    }
}

#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    dist2: f64,
    node: u32,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap pops the closest node first.
        other
            .dist2
            .total_cmp(&self.dist2)
            .then_with(|| self.node.cmp(&other.node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::icosahedron::icosphere;

    fn brute_force_contains(index: &SphereIndex, dir: &Vec3) -> Vec<usize> {
        (0..index.triangle_count())
            .filter(|&t| index.contains(t, dir).is_some())
            .collect()
    }

    #[test]
    fn test_every_vertex_direction_is_contained() {
        let mesh = icosphere(2);
        let index = SphereIndex::build(&mesh.vertices, &mesh.triangles);
        for v in &mesh.vertices {
            let loc = index.locate(v, None).expect("non-empty index");
            assert!(loc.contained);
            assert!((loc.bary.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_locate_agrees_with_brute_force() {
        let mesh = icosphere(3);
        let index = SphereIndex::build(&mesh.vertices, &mesh.triangles);
        let probes = [
            Vec3::new(0.3, -0.2, 0.9),
            Vec3::new(-0.7, 0.1, -0.2),
            Vec3::new(0.01, 0.99, 0.05),
            Vec3::new(-0.4, -0.4, -0.8),
        ];
        for p in probes {
            let dir = p.normalize();
            let loc = index.locate(&dir, None).expect("non-empty index");
            assert!(loc.contained);
            assert!(brute_force_contains(&index, &dir).contains(&loc.triangle));
        }
    }

    #[test]
    fn test_hint_is_used_when_it_still_contains_the_direction() {
        let mesh = icosphere(1);
        let index = SphereIndex::build(&mesh.vertices, &mesh.triangles);
        let [a, b, c] = mesh.corners(7);
        let centroid = ((a + b + c) / 3.0).normalize();
        let loc = index.locate(&centroid, Some(7)).expect("non-empty index");
        assert_eq!(loc.triangle, 7);
        for w in loc.bary {
            assert!((w - 1.0 / 3.0).abs() < 1e-9);
        }

        // A stale hint is ignored.
        let far = index.locate(&(-centroid), Some(7)).expect("non-empty index");
        assert_ne!(far.triangle, 7);
        assert!(far.contained);
    }

    #[test]
    fn test_nearest_fallback_when_mesh_has_a_hole() {
        let mesh = icosphere(1);
        let [a, b, c] = mesh.corners(0);
        let centroid = ((a + b + c) / 3.0).normalize();
        let triangles: Vec<[usize; 3]> = mesh.triangles[1..].to_vec();
        let index = SphereIndex::build(&mesh.vertices, &triangles);
        let loc = index.locate(&centroid, None).expect("non-empty index");
        assert!(!loc.contained);
        assert!((loc.bary.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_index_locates_nothing() {
        let index = SphereIndex::build(&[], &[]);
        assert!(index.locate(&Vec3::z(), None).is_none());
    }
}
