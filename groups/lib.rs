#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

//! Groupwise registration of spherical surface meshes.
//!
//! Every subject brings a spherical parameterization of its surface, one or more
//! per-vertex scalar properties (curvature, sulcal depth, ...) and optionally a
//! set of landmarks. The engine deforms each sphere with a smooth field expanded
//! in real spherical harmonics and searches the coefficients that minimize the
//! entropy of the properties across subjects, sampled on a fixed icosahedral grid.

#[path = "../sphere/mod.rs"]
pub mod sphere;

#[path = "../deform/mod.rs"]
pub mod deform;

#[path = "../register/mod.rs"]
pub mod register;

#[path = "../io/mod.rs"]
pub mod io;

pub use register::config::{LandmarkCentering, OptimizerConfig, RegistrationSettings};
pub use register::driver::{GroupwiseRegistration, RegistrationError, RegistrationSummary};
pub use register::rigid::{RigidAlignment, RigidSettings, align_subjects};
pub use register::subject::{LandmarkSpec, SubjectData};
