//! Rigid pre-alignment of subject spheres on their landmarks.
//!
//! Each sphere is rotated about its center so that its landmarks line up
//! with a common template. The template is the normalized mean of the rotated
//! landmark sets and is refined until it stops moving, which is generalized
//! Procrustes analysis restricted to rotations. The first subject keeps its
//! orientation.

use super::subject::{SubjectData, anchor_landmarks};
use crate::sphere::{MeshError, TriangleMesh, Vec3};
use nalgebra::{Matrix3, Rotation3};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RigidError {
    #[error("Rigid alignment needs at least one subject.")]
    NoSubjects,
    #[error(
        "Subject '{subject}' has {found} landmarks; at least two are needed to fix a rotation."
    )]
    TooFewLandmarks { subject: String, found: usize },
    #[error("Subject '{subject}' has {found} landmarks, but '{first}' has {expected}.")]
    LandmarkCount {
        subject: String,
        found: usize,
        first: String,
        expected: usize,
    },
    #[error("Subject '{subject}': landmark vertex {vertex} does not exist.")]
    LandmarkVertex { subject: String, vertex: usize },
    #[error("Subject '{subject}': {source}")]
    Mesh {
        subject: String,
        #[source]
        source: MeshError,
    },
    #[error("The landmark cross-covariance could not be decomposed.")]
    Svd,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidSettings {
    /// Template refinements before giving up on convergence.
    pub max_iterations: usize,
    /// Largest landmark move of the template that counts as converged.
    pub tolerance: f64,
}

impl Default for RigidSettings {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-12,
        }
    }
}

/// Landmark directions of one subject on its unit sphere.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    pub name: String,
    pub points: Vec<Vec3>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RigidAlignment {
    /// One rotation per subject, taking its sphere onto the template.
    pub rotations: Vec<Rotation3<f64>>,
    pub template: Vec<Vec3>,
    pub iterations: usize,
    pub converged: bool,
    /// Root mean square distance of the rotated landmarks to the template.
    pub rms: f64,
}

/// Rotation about the origin that maps `source` onto `target` with the
/// least squared error (Kabsch without the translation).
pub fn rotation_onto(source: &[Vec3], target: &[Vec3]) -> Result<Rotation3<f64>, RigidError> {
    let h = source
        .iter()
        .zip(target)
        .fold(Matrix3::<f64>::zeros(), |h, (s, t)| h + s * t.transpose());
    let svd = h.svd(true, true);
    let u = svd.u.ok_or(RigidError::Svd)?;
    let v_t = svd.v_t.ok_or(RigidError::Svd)?;
    let mut v = v_t.transpose();
    if (v * u.transpose()).determinant() < 0.0 {
        // Reflect along the weakest direction.
        let weakest = svd.singular_values.imin();
        v.column_mut(weakest).neg_mut();
    }
    Ok(Rotation3::from_matrix_unchecked(v * u.transpose()))
}

fn check_sets(sets: &[LandmarkSet]) -> Result<(), RigidError> {
    let first = sets.first().ok_or(RigidError::NoSubjects)?;
    if first.points.len() < 2 {
        return Err(RigidError::TooFewLandmarks {
            subject: first.name.clone(),
            found: first.points.len(),
        });
    }
    if let Some(other) = sets.iter().find(|s| s.points.len() != first.points.len()) {
        return Err(RigidError::LandmarkCount {
            subject: other.name.clone(),
            found: other.points.len(),
            first: first.name.clone(),
            expected: first.points.len(),
        });
    }
    Ok(())
}

fn fit_all(sets: &[LandmarkSet], template: &[Vec3]) -> Result<Vec<Rotation3<f64>>, RigidError> {
    sets.iter().map(|set| rotation_onto(&set.points, template)).collect()
}

// Mean of the rotated landmarks, projected back onto the sphere. A landmark
// whose mean vanishes keeps its previous template position.
fn mean_template(
    sets: &[LandmarkSet],
    rotations: &[Rotation3<f64>],
    previous: &[Vec3],
) -> Vec<Vec3> {
    previous
        .iter()
        .enumerate()
        .map(|(k, old)| {
            let sum: Vec3 = sets
                .iter()
                .zip(rotations)
                .map(|(set, r)| r * set.points[k])
                .sum();
            sum.try_normalize(f64::EPSILON).unwrap_or(*old)
        })
        .collect()
}

/// Aligns landmark sets that share their landmark order.
pub fn align_landmarks(
    sets: &[LandmarkSet],
    settings: &RigidSettings,
) -> Result<RigidAlignment, RigidError> {
    check_sets(sets)?;
    let mut template: Vec<Vec3> = sets[0].points.iter().map(|p| p.normalize()).collect();
    let mut iterations = 0;
    let mut converged = false;
    while iterations < settings.max_iterations {
        iterations += 1;
        let rotations = fit_all(sets, &template)?;
        let next = mean_template(sets, &rotations, &template);
        let shift = template
            .iter()
            .zip(&next)
            .map(|(a, b)| (a - b).norm())
            .fold(0.0, f64::max);
        template = next;
        log::debug!("Rigid iteration {iterations}: template moved {shift:.3e}");
        if shift <= settings.tolerance {
            converged = true;
            break;
        }
    }

    let mut rotations = fit_all(sets, &template)?;
    let anchor = rotations[0].inverse();
    for r in &mut rotations {
        *r = anchor * *r;
    }
    for t in &mut template {
        *t = anchor * *t;
    }

    let mut squared = 0.0;
    let mut count = 0usize;
    for (set, r) in sets.iter().zip(&rotations) {
        for (p, t) in set.points.iter().zip(&template) {
            squared += (r * p - t).norm_squared();
            count += 1;
        }
    }
    Ok(RigidAlignment {
        rotations,
        template,
        iterations,
        converged,
        rms: (squared / count.max(1) as f64).sqrt(),
    })
}

/// A copy of `mesh` rotated about the origin.
pub fn rotate_mesh(mesh: &TriangleMesh, rotation: &Rotation3<f64>) -> TriangleMesh {
    TriangleMesh {
        vertices: mesh.vertices.iter().map(|v| rotation * v).collect(),
        triangles: mesh.triangles.clone(),
    }
}

/// Rotates every subject's unit sphere onto the common landmark template.
///
/// Landmarks are anchored to sphere vertices the same way the groupwise
/// stage anchors them. Returns the alignment and the rotated spheres.
pub fn align_subjects(
    subjects: &[SubjectData],
    settings: &RigidSettings,
) -> Result<(RigidAlignment, Vec<TriangleMesh>), RigidError> {
    let mut spheres = Vec::with_capacity(subjects.len());
    let mut sets = Vec::with_capacity(subjects.len());
    for data in subjects {
        let sphere = data
            .sphere
            .clone()
            .into_unit_sphere()
            .map_err(|source| RigidError::Mesh {
                subject: data.name.clone(),
                source,
            })?;
        let vertices = anchor_landmarks(&data.landmarks, &sphere, data.surface.as_ref())
            .map_err(|vertex| RigidError::LandmarkVertex {
                subject: data.name.clone(),
                vertex,
            })?;
        sets.push(LandmarkSet {
            name: data.name.clone(),
            points: vertices.iter().map(|&v| sphere.vertices[v]).collect(),
        });
        spheres.push(sphere);
    }

    let alignment = align_landmarks(&sets, settings)?;
    log::info!(
        "Rigid alignment of {} subjects: {} iterations, landmark RMS {:.6}{}",
        sets.len(),
        alignment.iterations,
        alignment.rms,
        if alignment.converged { "" } else { " (not converged)" }
    );
    let rotated = spheres
        .iter()
        .zip(&alignment.rotations)
        .map(|(sphere, r)| rotate_mesh(sphere, r))
        .collect();
    Ok((alignment, rotated))
}
