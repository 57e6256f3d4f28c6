//! Geometry of spherical meshes: the triangle mesh container, icosahedral
//! sampling, the bounding-volume hierarchy used for point location and the
//! triangle-flip validator that keeps deformations bijective.

pub mod bvh;
pub mod flip;
pub mod icosahedron;
pub mod mesh;

pub use bvh::{Location, SphereIndex};
pub use flip::FlipValidator;
pub use icosahedron::icosphere;
pub use mesh::{MeshError, TriangleMesh, Vec3};
