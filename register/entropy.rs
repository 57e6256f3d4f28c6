use super::config::LandmarkCentering;
use crate::sphere::Vec3;
use ndarray::{ArrayView2, ShapeError};
use ndarray_linalg::{Eigh, UPLO, error::LinalgError};
use rayon::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EntropyError {
    #[error("Eigendecomposition of a sample covariance failed: {0}")]
    EigendecompositionFailed(#[from] LinalgError),
    #[error("Covariance buffer does not match its dimension: {0}")]
    CovarianceShape(#[from] ShapeError),
    #[error("Expected {expected} resampled property columns, found {found}.")]
    PropertyCountMismatch { expected: usize, found: usize },
}

/// Dense symmetric eigenvalue primitive.
///
/// `covariance` is a row-major `dim x dim` symmetric matrix; the eigenvalues
/// are written into `eigenvalues` (length `dim`) in any order.
pub trait SymmetricEigenSolver: Send + Sync {
    fn eigenvalues(
        &self,
        covariance: &[f64],
        dim: usize,
        eigenvalues: &mut [f64],
    ) -> Result<(), EntropyError>;
}

/// LAPACK-backed solver; `1 x 1` matrices are answered directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct LapackEigenSolver;

impl SymmetricEigenSolver for LapackEigenSolver {
    fn eigenvalues(
        &self,
        covariance: &[f64],
        dim: usize,
        eigenvalues: &mut [f64],
    ) -> Result<(), EntropyError> {
        if dim == 1 {
            eigenvalues[0] = covariance[0];
            return Ok(());
        }
        let matrix = ArrayView2::from_shape((dim, dim), covariance)?;
        let (values, _) = matrix.eigh(UPLO::Lower)?;
        for (dst, &src) in eigenvalues.iter_mut().zip(values.iter()) {
            *dst = src;
        }
        Ok(())
    }
}

/// Per-worker scratch of one sample evaluation, sized once.
#[derive(Debug, Clone)]
pub struct EntropyWorkspace {
    features: Vec<f64>,
    mean: Vec<f64>,
    covariance: Vec<f64>,
    eigenvalues: Vec<f64>,
}

impl EntropyWorkspace {
    pub fn new(subject_count: usize, property_count: usize) -> Self {
        Self {
            features: vec![0.0; subject_count * property_count],
            mean: vec![0.0; property_count],
            covariance: vec![0.0; property_count * property_count],
            eigenvalues: vec![0.0; property_count],
        }
    }
}

/// Group entropy of resampled properties.
///
/// At every sample the weighted, normalized property vectors of all subjects
/// form a `P x P` covariance `C`; the sample contributes
/// `1/2 * sum(ln(max(lambda_k(C), floor)))`. The property cost is the mean
/// over samples.
pub struct EntropyObjective {
    sqrt_weights: Vec<f64>,
    floor: f64,
    solver: Box<dyn SymmetricEigenSolver>,
}

impl EntropyObjective {
    pub fn new(weights: &[f64], floor: f64) -> Self {
        Self::with_solver(weights, floor, Box::new(LapackEigenSolver))
    }

    pub fn with_solver(
        weights: &[f64],
        floor: f64,
        solver: Box<dyn SymmetricEigenSolver>,
    ) -> Self {
        Self {
            sqrt_weights: weights.iter().map(|w| w.sqrt()).collect(),
            floor,
            solver,
        }
    }

    pub fn property_count(&self) -> usize {
        self.sqrt_weights.len()
    }

    /// Entropy of one sample; `resampled[s]` is subject `s`'s `samples x P` table.
    pub fn sample_entropy(
        &self,
        resampled: &[ArrayView2<f64>],
        sample: usize,
        ws: &mut EntropyWorkspace,
    ) -> Result<f64, EntropyError> {
        let p = self.property_count();
        let n = resampled.len();
        ws.mean.iter_mut().for_each(|m| *m = 0.0);
        for (s, table) in resampled.iter().enumerate() {
            for k in 0..p {
                let f = self.sqrt_weights[k] * table[[sample, k]];
                ws.features[s * p + k] = f;
                ws.mean[k] += f;
            }
        }
        ws.mean.iter_mut().for_each(|m| *m /= n as f64);

        ws.covariance.iter_mut().for_each(|c| *c = 0.0);
        for s in 0..n {
            let row = &ws.features[s * p..(s + 1) * p];
            for a in 0..p {
                let da = row[a] - ws.mean[a];
                for b in 0..=a {
                    ws.covariance[a * p + b] += da * (row[b] - ws.mean[b]);
                }
            }
        }
        for a in 0..p {
            for b in 0..=a {
                let c = ws.covariance[a * p + b] / n as f64;
                ws.covariance[a * p + b] = c;
                ws.covariance[b * p + a] = c;
            }
        }

        self.solver.eigenvalues(&ws.covariance, p, &mut ws.eigenvalues)?;
        Ok(0.5
            * ws.eigenvalues
                .iter()
                .map(|&l| l.max(self.floor).ln())
                .sum::<f64>())
    }

    /// Mean sample entropy over the grid.
    ///
    /// Samples are evaluated in parallel with one workspace per worker; the
    /// per-sample terms are collected in sample order and summed sequentially,
    /// so the result does not depend on scheduling.
    pub fn property_cost(&self, resampled: &[ArrayView2<f64>]) -> Result<f64, EntropyError> {
        let p = self.property_count();
        if p == 0 || resampled.is_empty() {
            return Ok(0.0);
        }
        if let Some(bad) = resampled.iter().find(|t| t.ncols() != p) {
            return Err(EntropyError::PropertyCountMismatch {
                expected: p,
                found: bad.ncols(),
            });
        }
        let samples = resampled[0].nrows();
        if samples == 0 {
            return Ok(0.0);
        }
        let n = resampled.len();
        let terms: Vec<f64> = (0..samples)
            .into_par_iter()
            .map_init(
                || EntropyWorkspace::new(n, p),
                |ws, j| self.sample_entropy(resampled, j, ws),
            )
            .collect::<Result<_, _>>()?;
        Ok(terms.iter().sum::<f64>() / samples as f64)
    }
}

/// Common target of landmark `l` across subjects.
pub fn landmark_center(
    positions: &[&[Vec3]],
    landmark: usize,
    centering: LandmarkCentering,
    scratch: &mut Vec<f64>,
) -> Vec3 {
    let n = positions.len().max(1) as f64;
    let raw = match centering {
        LandmarkCentering::Mean => positions.iter().map(|p| p[landmark]).sum::<Vec3>() / n,
        LandmarkCentering::Median => {
            let mut center = Vec3::zeros();
            for axis in 0..3 {
                scratch.clear();
                scratch.extend(positions.iter().map(|p| p[landmark][axis]));
                center[axis] = median(scratch);
            }
            center
        }
    };
    let norm = raw.norm();
    if norm > 1e-12 { raw / norm } else { raw }
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    }
}

/// Mean squared distance of every landmark of every subject to its center.
pub fn landmark_cost(positions: &[&[Vec3]], centering: LandmarkCentering) -> f64 {
    let landmarks = positions.first().map_or(0, |p| p.len());
    if landmarks == 0 {
        return 0.0;
    }
    let mut scratch = Vec::with_capacity(positions.len());
    let total: f64 = (0..landmarks)
        .map(|l| {
            let center = landmark_center(positions, l, centering, &mut scratch);
            positions
                .iter()
                .map(|p| (p[l] - center).norm_squared())
                .sum::<f64>()
        })
        .sum();
    total / (positions.len() * landmarks) as f64
}

/// Mean distance of each landmark to its center, one entry per landmark.
pub fn landmark_distances(positions: &[&[Vec3]], centering: LandmarkCentering) -> Vec<f64> {
    let landmarks = positions.first().map_or(0, |p| p.len());
    let mut scratch = Vec::with_capacity(positions.len());
    (0..landmarks)
        .map(|l| {
            let center = landmark_center(positions, l, centering, &mut scratch);
            positions.iter().map(|p| (p[l] - center).norm()).sum::<f64>() / positions.len() as f64
        })
        .collect()
}
