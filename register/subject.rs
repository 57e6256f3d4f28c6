use crate::deform::{BasisTable, SpharmCoefficients, basis_size, deform_vertices};
use crate::sphere::{FlipValidator, SphereIndex, TriangleMesh, Vec3};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis, s};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A landmark as read from disk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LandmarkSpec {
    /// Index of a mesh vertex.
    Vertex(usize),
    /// Position on the original surface, or on the sphere when no surface is given.
    Point([f64; 3]),
}

/// Everything the engine needs to know about one subject.
#[derive(Debug, Clone)]
pub struct SubjectData {
    pub name: String,
    /// Spherical parameterization; projected onto the unit sphere on load.
    pub sphere: TriangleMesh,
    /// Original surface sharing the sphere's vertex indexing.
    pub surface: Option<TriangleMesh>,
    /// One column per property, one row per sphere vertex.
    pub properties: Array2<f64>,
    pub landmarks: Vec<LandmarkSpec>,
    pub initial_coefficients: Option<SpharmCoefficients>,
}

/// Summary statistics of one property of one subject, taken before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PropertyStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub sdev: f64,
}

impl PropertyStats {
    pub fn of(values: ArrayView1<f64>) -> Self {
        let n = values.len().max(1) as f64;
        let mean = values.sum() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let (min, max) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        Self {
            mean,
            min,
            max,
            sdev: var.sqrt(),
        }
    }

    /// `(x - mean) / sdev`; a constant property is only centered.
    #[inline]
    pub fn normalize(&self, x: f64) -> f64 {
        if self.sdev > 0.0 {
            (x - self.mean) / self.sdev
        } else {
            x - self.mean
        }
    }
}

/// Resolves landmark specs to vertex indices of the sphere.
///
/// Points are matched to the nearest vertex of the surface when one is given,
/// else to the nearest vertex of the sphere. The error carries the first
/// vertex index that is out of range.
pub fn anchor_landmarks(
    specs: &[LandmarkSpec],
    sphere: &TriangleMesh,
    surface: Option<&TriangleMesh>,
) -> Result<Vec<usize>, usize> {
    let reference = surface.unwrap_or(sphere);
    specs
        .iter()
        .map(|spec| match *spec {
            LandmarkSpec::Vertex(v) if v < sphere.vertex_count() => Ok(v),
            LandmarkSpec::Vertex(v) => Err(v),
            LandmarkSpec::Point(p) => Ok(reference.nearest_vertex(&Vec3::from(p))),
        })
        .collect()
}

/// Working state of one subject during a registration.
///
/// Coefficient matrices always have the width of the final degree and the
/// whole width is applied; the optimizer only moves the columns of the active
/// degree. `trial` buffers hold a proposal until the whole evaluation is known
/// to be flip-free. A fresh subject sits at zero coefficients with its
/// starting coefficients staged as the first trial.
pub(crate) struct Subject {
    pub name: String,
    pub base: Vec<Vec3>,
    pub triangles: Vec<[usize; 3]>,
    pub basis: Arc<BasisTable>,
    pub pole: [f64; 3],
    pub validator: FlipValidator,
    pub coefficients: Array2<f64>,
    pub best: Array2<f64>,
    pub trial_coefficients: Array2<f64>,
    pub deformed: Vec<Vec3>,
    pub trial: Vec<Vec3>,
    pub flip_flags: Vec<bool>,
    pub index: SphereIndex,
    pub properties: Array2<f64>,
    pub stats: Vec<PropertyStats>,
    pub landmark_vertices: Vec<usize>,
    pub landmark_positions: Vec<Vec3>,
    pub sample_cache: Vec<Option<usize>>,
    pub resampled: Array2<f64>,
    pub updated: bool,
}

impl Subject {
    pub fn new(
        name: String,
        sphere: TriangleMesh,
        properties: ArrayView2<f64>,
        landmark_vertices: Vec<usize>,
        initial: Array2<f64>,
        basis: Arc<BasisTable>,
        sample_count: usize,
    ) -> Self {
        let stats: Vec<PropertyStats> = properties
            .axis_iter(Axis(1))
            .map(PropertyStats::of)
            .collect();
        let mut normalized = properties.to_owned();
        for (mut column, stat) in normalized.axis_iter_mut(Axis(1)).zip(&stats) {
            column.mapv_inplace(|x| stat.normalize(x));
        }

        let TriangleMesh {
            vertices: base,
            triangles,
        } = sphere;
        let validator = FlipValidator::new(&base, &triangles);
        let index = SphereIndex::build(&base, &triangles);
        let pole: [f64; 3] = basis.frame().pole().into();
        let property_count = normalized.ncols();
        Self {
            name,
            deformed: base.clone(),
            trial: Vec::with_capacity(base.len()),
            flip_flags: vec![false; triangles.len()],
            base,
            triangles,
            basis,
            pole,
            validator,
            coefficients: Array2::zeros(initial.raw_dim()),
            best: initial.clone(),
            trial_coefficients: initial,
            index,
            properties: normalized,
            stats,
            landmark_positions: Vec::with_capacity(landmark_vertices.len()),
            landmark_vertices,
            sample_cache: vec![None; sample_count],
            resampled: Array2::zeros((sample_count, property_count)),
            updated: true,
        }
    }

    /// Copies a proposal for the first `degree` basis functions into the trial
    /// matrix and reports whether it differs from the current coefficients.
    pub fn stage(&mut self, proposal: &[f64], degree: usize) -> bool {
        let n = basis_size(degree);
        self.trial_coefficients.assign(&self.coefficients);
        let mut trial = self.trial_coefficients.slice_mut(s![.., ..n]);
        for (dst, &src) in trial.iter_mut().zip(proposal) {
            *dst = src;
        }
        self.updated = self.trial_coefficients != self.coefficients;
        self.updated
    }

    /// Deforms the base sphere with the trial coefficients and returns the
    /// number of flipped triangles.
    pub fn deform_trial(&mut self) -> usize {
        deform_vertices(
            &self.base,
            &self.basis,
            self.trial_coefficients.view(),
            self.basis.degree(),
            &mut self.trial,
        );
        self.validator.flipped(&self.trial, &mut self.flip_flags)
    }

    /// Makes the trial the current state and rebuilds the spatial index.
    pub fn commit(&mut self) {
        std::mem::swap(&mut self.deformed, &mut self.trial);
        std::mem::swap(&mut self.coefficients, &mut self.trial_coefficients);
        self.index = SphereIndex::build(&self.deformed, &self.triangles);
    }

    /// Appends the best coefficients of the first `degree` basis functions.
    pub fn extend_with_best(&self, degree: usize, out: &mut Vec<f64>) {
        out.extend(self.best.slice(s![.., ..basis_size(degree)]).iter());
    }

    pub fn coefficients_at(&self, degree: usize) -> SpharmCoefficients {
        let mut current = SpharmCoefficients::zeros(degree, self.pole);
        let n = basis_size(degree).min(self.coefficients.ncols());
        current
            .coefficients
            .slice_mut(s![.., ..n])
            .assign(&self.coefficients.slice(s![.., ..n]));
        current
    }

    pub fn deformed_mesh(&self) -> TriangleMesh {
        TriangleMesh {
            vertices: self.deformed.clone(),
            triangles: self.triangles.clone(),
        }
    }
}
