//! Spherical harmonic deformation fields: basis evaluation, the per-vertex
//! update rule and coefficient persistence.

pub mod coefficients;
pub mod deformer;
pub mod harmonics;

pub use coefficients::{CoefficientError, SpharmCoefficients};
pub use deformer::{deform_mesh, deform_vertices, update_coordinate};
pub use harmonics::{BasisTable, PoleFrame, basis_size};
