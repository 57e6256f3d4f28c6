use super::config::{ConfigError, OptimizerConfig, RegistrationSettings};
use super::entropy::{EntropyError, EntropyObjective, landmark_cost, landmark_distances};
use super::optimizer::{FiniteDifferenceBfgs, Minimizer, PatternSearch};
use super::resample::{landmark_positions, resample_properties};
use super::subject::{PropertyStats, Subject, SubjectData, anchor_landmarks};
use crate::deform::{BasisTable, CoefficientError, PoleFrame, SpharmCoefficients, basis_size};
use crate::sphere::{MeshError, TriangleMesh, Vec3, icosphere};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use ndarray::ArrayView2;
use rayon::prelude::*;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Cost reported for a proposal that flips a triangle.
pub const INVALID_COST: f64 = f64::MAX;

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("Invalid registration settings: {0}")]
    Config(#[from] ConfigError),
    #[error("Groupwise registration needs at least two subjects, got {0}.")]
    TooFewSubjects(usize),
    #[error("Nothing to optimize: no property weights were given and landmarks are disabled.")]
    NothingToOptimize,
    #[error("Property weight {index} is {value}; weights must be finite and non-negative.")]
    InvalidWeight { index: usize, value: f64 },
    #[error(
        "Subject '{subject}' has a {rows}x{cols} property table, expected {vertices}x{properties} (vertices x properties)."
    )]
    PropertyShape {
        subject: String,
        rows: usize,
        cols: usize,
        vertices: usize,
        properties: usize,
    },
    #[error("Subject '{subject}': the surface has {surface} vertices but the sphere has {sphere}.")]
    SurfaceMismatch {
        subject: String,
        surface: usize,
        sphere: usize,
    },
    #[error("Subject '{subject}' has {found} landmarks, but '{first}' has {expected}.")]
    LandmarkCount {
        subject: String,
        found: usize,
        first: String,
        expected: usize,
    },
    #[error("Landmarks are enabled but no subject has any.")]
    NoLandmarks,
    #[error("Subject '{subject}': landmark vertex {vertex} does not exist.")]
    LandmarkVertex { subject: String, vertex: usize },
    #[error("Subject '{subject}': {source}")]
    Mesh {
        subject: String,
        #[source]
        source: MeshError,
    },
    #[error("Subject '{subject}': the starting coefficients have an invalid pole {pole:?}.")]
    InvalidPole { subject: String, pole: [f64; 3] },
    #[error("Subject '{subject}': the starting coefficients flip {flips} triangles.")]
    InitialFlip { subject: String, flips: usize },
    #[error("Subject index {index} is out of range for {count} subjects.")]
    SubjectIndex { index: usize, count: usize },
    #[error("Expected {expected} output paths, got {found}.")]
    OutputCount { expected: usize, found: usize },
    #[error("Failed to build the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Entropy(#[from] EntropyError),
    #[error(transparent)]
    Coefficients(#[from] CoefficientError),
}

/// Outcome of one degree stage of [`GroupwiseRegistration::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct StageSummary {
    pub degree: usize,
    pub evaluations: usize,
    pub cost: f64,
    pub converged: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationSummary {
    pub initial_cost: f64,
    pub final_cost: f64,
    pub evaluations: usize,
    pub stages: Vec<StageSummary>,
}

fn create_progress_bar(len: u64, message: String, enabled: bool) -> ProgressBar {
    let draw_target = if enabled && std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(10)
    } else {
        ProgressDrawTarget::hidden()
    };
    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message);
    pb
}

/// Groupwise registration engine.
///
/// Construction loads every subject, resamples its properties at the starting
/// coefficients and scores that configuration; [`run`](Self::run) then
/// minimizes [`cost`](Self::cost) stage by stage from the initial to the final
/// harmonic degree.
pub struct GroupwiseRegistration {
    settings: RegistrationSettings,
    subjects: Vec<Subject>,
    samples: Vec<Vec3>,
    objective: EntropyObjective,
    pool: rayon::ThreadPool,
    active_degree: usize,
    initial_cost: f64,
    min_cost: f64,
    cost_history: Vec<f64>,
    history_stride: usize,
    evaluations: usize,
    progress: Option<ProgressBar>,
}

impl GroupwiseRegistration {
    pub fn new(
        subjects: Vec<SubjectData>,
        property_weights: Vec<f64>,
        settings: RegistrationSettings,
    ) -> Result<Self, RegistrationError> {
        settings.validate()?;
        validate_inputs(&subjects, &property_weights, &settings)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.threads)
            .build()?;
        let samples = icosphere(settings.sampling_level).vertices;
        log::info!(
            "Registering {} subjects on {} samples (degree {} to {}, {} properties)",
            subjects.len(),
            samples.len(),
            settings.initial_degree,
            settings.degree,
            property_weights.len()
        );

        let mut tables: Vec<(Vec<Vec3>, [f64; 3], Arc<BasisTable>)> = Vec::new();
        let mut prepared = Vec::with_capacity(subjects.len());
        for data in subjects {
            prepared.push(prepare_subject(data, &settings, samples.len(), &mut tables)?);
        }
        log::debug!("{} distinct basis tables", tables.len());

        let mut registration = Self {
            objective: EntropyObjective::new(&property_weights, settings.eigenvalue_floor),
            active_degree: settings.initial_degree,
            settings,
            subjects: prepared,
            samples,
            pool,
            initial_cost: INVALID_COST,
            min_cost: INVALID_COST,
            cost_history: Vec::new(),
            history_stride: 1,
            evaluations: 0,
            progress: None,
        };

        let flips: Vec<usize> = registration
            .pool
            .install(|| registration.subjects.par_iter_mut().map(Subject::deform_trial).collect());
        if let Some((s, &n)) = flips.iter().enumerate().find(|(_, n)| **n > 0) {
            return Err(RegistrationError::InitialFlip {
                subject: registration.subjects[s].name.clone(),
                flips: n,
            });
        }
        registration.commit_and_resample();
        let cost = registration.evaluate()?;
        for subject in &mut registration.subjects {
            subject.best.assign(&subject.coefficients);
        }
        registration.initial_cost = cost;
        registration.min_cost = cost;
        log::info!("Initial cost: {cost:.6}");
        Ok(registration)
    }

    pub fn subject_count(&self) -> usize {
        self.subjects.len()
    }

    pub fn subject_names(&self) -> impl Iterator<Item = &str> {
        self.subjects.iter().map(|s| s.name.as_str())
    }

    /// Harmonic degree whose coefficients [`cost`](Self::cost) currently takes.
    pub fn active_degree(&self) -> usize {
        self.active_degree
    }

    /// Moves to another degree stage. Coefficients above the previous degree
    /// start at zero; the current configuration and its cost are unchanged.
    pub fn set_active_degree(&mut self, degree: usize) {
        self.active_degree = degree.min(self.settings.degree);
    }

    /// Length of the vector accepted by [`cost`](Self::cost).
    pub fn parameter_count(&self) -> usize {
        self.subjects.len() * 3 * basis_size(self.active_degree)
    }

    /// Best coefficients of the active degree, subject-major, then x/y/z rows,
    /// then basis index.
    pub fn coefficient_vector(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.parameter_count());
        for subject in &self.subjects {
            subject.extend_with_best(self.active_degree, &mut out);
        }
        out
    }

    pub fn min_cost(&self) -> f64 {
        self.min_cost
    }

    pub fn initial_cost(&self) -> f64 {
        self.initial_cost
    }

    /// Best cost after every [`cost_history_stride`](Self::cost_history_stride)-th
    /// evaluation; never increases. Entry `k` belongs to evaluation
    /// `(k + 1) * stride`.
    pub fn cost_history(&self) -> &[f64] {
        &self.cost_history
    }

    pub fn cost_history_stride(&self) -> usize {
        self.history_stride
    }

    // Halves the history and the recording rate when the limit is reached.
    fn record_history(&mut self) {
        if self.evaluations % self.history_stride != 0 {
            return;
        }
        self.record_history();
        if self.cost_history.len() >= self.settings.history_limit {
            self.cost_history = self
                .cost_history
                .iter()
                .skip(1)
                .step_by(2)
                .copied()
                .collect();
            self.history_stride *= 2;
        }
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn property_stats(&self, subject: usize) -> Option<&[PropertyStats]> {
        self.subjects.get(subject).map(|s| s.stats.as_slice())
    }

    /// Mean distance of each landmark to its group center in the current
    /// configuration.
    pub fn landmark_distances(&self) -> Vec<f64> {
        let positions: Vec<&[Vec3]> = self
            .subjects
            .iter()
            .map(|s| s.landmark_positions.as_slice())
            .collect();
        landmark_distances(&positions, self.settings.landmark_centering)
    }

    /// Scores a coefficient vector of the active degree.
    ///
    /// All subjects whose coefficients changed are deformed into their trial
    /// buffers. If any of them flips a triangle the whole proposal is discarded
    /// and [`INVALID_COST`] is returned. Otherwise the trials become the
    /// current state, properties and landmarks are resampled and the group
    /// cost is computed. Strict improvements update the best coefficients.
    pub fn cost(&mut self, coeff: &[f64]) -> f64 {
        self.evaluations += 1;
        let cost = self.evaluate_proposal(coeff);
        if cost < self.min_cost {
            self.min_cost = cost;
            for subject in &mut self.subjects {
                subject.best.assign(&subject.coefficients);
            }
        }
        self.cost_history.push(self.min_cost);

        if self.evaluations % self.settings.status_step == 0 {
            log::debug!(
                "[{}] degree {} cost {:.6} best {:.6}",
                self.evaluations,
                self.active_degree,
                cost,
                self.min_cost
            );
        }
        if let Some(pb) = &self.progress {
            pb.inc(1);
            if self.evaluations % self.settings.status_step == 0 {
                pb.set_message(format!("best {:.6}", self.min_cost));
            }
        }
        cost
    }

    // Rejection is joint: one flipping subject invalidates the proposal for
    // the whole group and every subject keeps its current coefficients, since
    // the optimizer moves all subjects' coefficients as a single vector.
    fn evaluate_proposal(&mut self, coeff: &[f64]) -> f64 {
        let expected = self.parameter_count();
        if coeff.len() != expected {
            log::warn!(
                "Coefficient vector has {} entries, expected {}; proposal rejected",
                coeff.len(),
                expected
            );
            return INVALID_COST;
        }
        let per_subject = 3 * basis_size(self.active_degree);
        let degree = self.active_degree;
        let Self { pool, subjects, .. } = self;
        let flips: usize = pool.install(|| {
            subjects
                .par_iter_mut()
                .zip(coeff.par_chunks(per_subject))
                .map(|(subject, proposal)| {
                    if subject.stage(proposal, degree) {
                        subject.deform_trial()
                    } else {
                        0
                    }
                })
                .sum()
        });
        if flips > 0 {
            return INVALID_COST;
        }

        self.commit_and_resample();
        match self.evaluate() {
            Ok(cost) if cost.is_finite() => cost,
            Ok(cost) => {
                log::warn!("Non-finite cost {cost}; proposal rejected");
                INVALID_COST
            }
            Err(e) => {
                log::warn!("Cost evaluation failed: {e}; proposal rejected");
                INVALID_COST
            }
        }
    }

    // Commits the staged trials of updated subjects and refreshes their
    // resampled properties and landmark positions.
    fn commit_and_resample(&mut self) {
        let Self {
            pool,
            subjects,
            samples,
            ..
        } = self;
        let samples: &[Vec3] = samples;
        pool.install(|| {
            subjects
                .par_iter_mut()
                .filter(|s| s.updated)
                .for_each(|s| {
                    s.commit();
                    resample_properties(
                        &s.index,
                        &s.triangles,
                        &s.deformed,
                        s.properties.view(),
                        samples,
                        &mut s.sample_cache,
                        s.resampled.view_mut(),
                    );
                    landmark_positions(
                        &s.deformed,
                        &s.landmark_vertices,
                        &mut s.landmark_positions,
                    );
                    s.updated = false;
                })
        });
    }

    fn evaluate(&self) -> Result<f64, EntropyError> {
        let tables: Vec<ArrayView2<f64>> =
            self.subjects.iter().map(|s| s.resampled.view()).collect();
        let mut cost = self.pool.install(|| self.objective.property_cost(&tables))?;
        if self.settings.uses_landmarks() {
            let positions: Vec<&[Vec3]> = self
                .subjects
                .iter()
                .map(|s| s.landmark_positions.as_slice())
                .collect();
            cost += self.settings.landmark_weight
                * landmark_cost(&positions, self.settings.landmark_centering);
        }
        Ok(cost)
    }

    /// Returns every subject to its best coefficients.
    fn restore_best(&mut self) -> Result<f64, RegistrationError> {
        let full = self.settings.degree;
        let proposal: Vec<Vec<f64>> = self
            .subjects
            .iter()
            .map(|s| {
                let mut v = Vec::with_capacity(3 * basis_size(full));
                s.extend_with_best(full, &mut v);
                v
            })
            .collect();
        let Self { pool, subjects, .. } = self;
        let flips: usize = pool.install(|| {
            subjects
                .par_iter_mut()
                .zip(proposal.par_iter())
                .map(|(s, p)| if s.stage(p, full) { s.deform_trial() } else { 0 })
                .sum()
        });
        if flips > 0 {
            // Best coefficients were flip-free when they were scored.
            log::warn!(
                "Best coefficients flip {flips} triangles on restore; keeping the current state"
            );
        } else {
            self.commit_and_resample();
        }
        Ok(self.evaluate()?)
    }

    fn minimizer(&self) -> Box<dyn Minimizer> {
        match self.settings.optimizer {
            OptimizerConfig::PatternSearch { rho_begin, rho_end } => {
                Box::new(PatternSearch { rho_begin, rho_end })
            }
            OptimizerConfig::Bfgs {
                tolerance,
                gradient_step,
            } => Box::new(FiniteDifferenceBfgs {
                tolerance,
                gradient_step,
            }),
        }
    }

    /// Runs every degree stage from the initial to the final degree.
    pub fn run(&mut self) -> Result<RegistrationSummary, RegistrationError> {
        let minimizer = self.minimizer();
        let budget = self.settings.max_iterations;
        let mut stages = Vec::new();
        for degree in self.settings.initial_degree..=self.settings.degree {
            self.set_active_degree(degree);
            let start = self.coefficient_vector();
            log::info!(
                "Degree {degree}: optimizing {} coefficients, budget {budget} evaluations",
                start.len()
            );
            self.progress = Some(create_progress_bar(
                budget as u64,
                format!("degree {degree}"),
                self.settings.progress,
            ));
            let before = self.evaluations;
            let outcome = {
                let mut objective = |x: &[f64]| self.cost(x);
                minimizer.minimize(&start, budget, &mut objective)
            };
            if let Some(pb) = self.progress.take() {
                pb.finish_and_clear();
            }

            let restored = self.restore_best()?;
            log::info!(
                "Degree {degree} done after {} evaluations: cost {:.6} (best {:.6}){}",
                self.evaluations - before,
                restored,
                self.min_cost,
                if outcome.converged { "" } else { ", budget exhausted" }
            );
            stages.push(StageSummary {
                degree,
                evaluations: self.evaluations - before,
                cost: self.min_cost,
                converged: outcome.converged,
            });
        }
        Ok(RegistrationSummary {
            initial_cost: self.initial_cost,
            final_cost: self.min_cost,
            evaluations: self.evaluations,
            stages,
        })
    }

    /// Current coefficients of one subject at the final degree.
    pub fn coefficients(&self, subject: usize) -> Result<SpharmCoefficients, RegistrationError> {
        let s = self.subject(subject)?;
        Ok(s.coefficients_at(self.settings.degree))
    }

    pub fn save_coeff(&self, path: &Path, subject: usize) -> Result<(), RegistrationError> {
        self.coefficients(subject)?.save(path)?;
        Ok(())
    }

    pub fn save_all<P: AsRef<Path>>(&self, paths: &[P]) -> Result<(), RegistrationError> {
        if paths.len() != self.subjects.len() {
            return Err(RegistrationError::OutputCount {
                expected: self.subjects.len(),
                found: paths.len(),
            });
        }
        for (i, path) in paths.iter().enumerate() {
            self.save_coeff(path.as_ref(), i)?;
        }
        Ok(())
    }

    /// The deformed sphere of one subject in its current configuration.
    pub fn deformed_sphere(&self, subject: usize) -> Result<TriangleMesh, RegistrationError> {
        Ok(self.subject(subject)?.deformed_mesh())
    }

    fn subject(&self, index: usize) -> Result<&Subject, RegistrationError> {
        self.subjects.get(index).ok_or(RegistrationError::SubjectIndex {
            index,
            count: self.subjects.len(),
        })
    }
}

fn validate_inputs(
    subjects: &[SubjectData],
    weights: &[f64],
    settings: &RegistrationSettings,
) -> Result<(), RegistrationError> {
    if subjects.len() < 2 {
        return Err(RegistrationError::TooFewSubjects(subjects.len()));
    }
    if let Some((index, &value)) = weights
        .iter()
        .enumerate()
        .find(|(_, w)| !(w.is_finite() && **w >= 0.0))
    {
        return Err(RegistrationError::InvalidWeight { index, value });
    }
    if weights.is_empty() && !settings.uses_landmarks() {
        return Err(RegistrationError::NothingToOptimize);
    }

    for data in subjects {
        data.sphere
            .validate()
            .map_err(|source| RegistrationError::Mesh {
                subject: data.name.clone(),
                source,
            })?;
        let vertices = data.sphere.vertex_count();
        let (rows, cols) = data.properties.dim();
        if rows != vertices || cols != weights.len() {
            return Err(RegistrationError::PropertyShape {
                subject: data.name.clone(),
                rows,
                cols,
                vertices,
                properties: weights.len(),
            });
        }
        if let Some(surface) = &data.surface {
            if surface.vertex_count() != vertices {
                return Err(RegistrationError::SurfaceMismatch {
                    subject: data.name.clone(),
                    surface: surface.vertex_count(),
                    sphere: vertices,
                });
            }
        }
    }

    if settings.uses_landmarks() {
        let first = &subjects[0];
        if first.landmarks.is_empty() {
            return Err(RegistrationError::NoLandmarks);
        }
        if let Some(other) = subjects
            .iter()
            .find(|s| s.landmarks.len() != first.landmarks.len())
        {
            return Err(RegistrationError::LandmarkCount {
                subject: other.name.clone(),
                found: other.landmarks.len(),
                first: first.name.clone(),
                expected: first.landmarks.len(),
            });
        }
    }
    Ok(())
}

fn prepare_subject(
    data: SubjectData,
    settings: &RegistrationSettings,
    sample_count: usize,
    tables: &mut Vec<(Vec<Vec3>, [f64; 3], Arc<BasisTable>)>,
) -> Result<Subject, RegistrationError> {
    let SubjectData {
        name,
        sphere,
        surface,
        properties,
        landmarks,
        initial_coefficients,
    } = data;
    let sphere = sphere
        .into_unit_sphere()
        .map_err(|source| RegistrationError::Mesh {
            subject: name.clone(),
            source,
        })?;

    let landmark_vertices = if settings.uses_landmarks() {
        anchor_landmarks(&landmarks, &sphere, surface.as_ref()).map_err(|vertex| {
            RegistrationError::LandmarkVertex {
                subject: name.clone(),
                vertex,
            }
        })?
    } else {
        Vec::new()
    };

    let start = match initial_coefficients {
        Some(c) if c.degree != settings.degree => {
            log::warn!(
                "Subject '{name}': starting coefficients have degree {}, resized to {}",
                c.degree,
                settings.degree
            );
            c.resized(settings.degree)
        }
        Some(c) => c,
        None => SpharmCoefficients::zeros(settings.degree, settings.pole),
    };
    let frame = PoleFrame::new(Vec3::from(start.pole)).ok_or_else(|| {
        RegistrationError::InvalidPole {
            subject: name.clone(),
            pole: start.pole,
        }
    })?;

    let basis = match tables
        .iter()
        .find(|(v, p, _)| *p == start.pole && *v == sphere.vertices)
    {
        Some((_, _, table)) => Arc::clone(table),
        None => {
            let table = Arc::new(BasisTable::new(&sphere.vertices, settings.degree, frame));
            tables.push((sphere.vertices.clone(), start.pole, Arc::clone(&table)));
            table
        }
    };

    log::info!(
        "Loaded subject '{name}': {} vertices, {} triangles, {} landmarks",
        sphere.vertex_count(),
        sphere.triangle_count(),
        landmark_vertices.len()
    );
    Ok(Subject::new(
        name,
        sphere,
        properties.view(),
        landmark_vertices,
        start.coefficients,
        basis,
        sample_count,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::subject::LandmarkSpec;
    use ndarray::Array2;

    fn subject(name: &str, shift: f64) -> SubjectData {
        let sphere = icosphere(2);
        let properties = Array2::from_shape_fn((sphere.vertex_count(), 1), |(i, _)| {
            let v = sphere.vertices[i];
            (3.0 * v.z + shift).sin() + v.x
        });
        SubjectData {
            name: name.to_string(),
            sphere,
            surface: None,
            properties,
            landmarks: Vec::new(),
            initial_coefficients: None,
        }
    }

    fn settings() -> RegistrationSettings {
        RegistrationSettings {
            degree: 1,
            max_iterations: 10,
            sampling_level: 2,
            threads: 2,
            progress: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_rejects_single_subject() {
        let result = GroupwiseRegistration::new(vec![subject("a", 0.0)], vec![1.0], settings());
        assert!(matches!(result, Err(RegistrationError::TooFewSubjects(1))));
    }

    #[test]
    fn test_rejects_property_weight_mismatch() {
        let result = GroupwiseRegistration::new(
            vec![subject("a", 0.0), subject("b", 0.0)],
            vec![1.0, 1.0],
            settings(),
        );
        assert!(matches!(
            result,
            Err(RegistrationError::PropertyShape { cols: 1, properties: 2, .. })
        ));
    }

    #[test]
    fn test_rejects_landmark_count_mismatch() {
        let mut a = subject("a", 0.0);
        a.landmarks = vec![LandmarkSpec::Vertex(0)];
        let b = subject("b", 0.0);
        let settings = RegistrationSettings {
            landmark_weight: 1.0,
            ..settings()
        };
        let result = GroupwiseRegistration::new(vec![a, b], vec![1.0], settings);
        assert!(matches!(result, Err(RegistrationError::LandmarkCount { .. })));
    }

    #[test]
    fn test_cost_vector_layout_and_rejection() {
        let mut reg = GroupwiseRegistration::new(
            vec![subject("a", 0.0), subject("b", 0.4)],
            vec![1.0],
            RegistrationSettings {
                initial_degree: 1,
                ..settings()
            },
        )
        .unwrap();
        assert_eq!(reg.parameter_count(), 2 * 3 * 4);
        let start = reg.coefficient_vector();
        assert!(start.iter().all(|&c| c == 0.0));
        assert_eq!(reg.cost(&start).to_bits(), reg.initial_cost().to_bits());

        // Wrong length is rejected without touching the state.
        assert_eq!(reg.cost(&start[1..]), INVALID_COST);

        // A huge degree-one field folds the sphere.
        let mut wild = start.clone();
        wild[1] = 40.0;
        wild[6] = -35.0;
        assert_eq!(reg.cost(&wild), INVALID_COST);

        // Rejection is joint: a harmless move of "b" is dropped with it.
        wild[12 + 1] = 1e-3;
        assert_eq!(reg.cost(&wild), INVALID_COST);
        assert_eq!(reg.coefficient_vector(), start);
        assert_eq!(reg.cost_history().len(), 4);
        assert!(reg.cost_history().iter().all(|&c| c == reg.initial_cost()));
    }

    #[test]
    fn test_rejects_sphere_without_triangles() {
        let mut b = subject("b", 0.4);
        b.sphere.triangles.clear();
        let result = GroupwiseRegistration::new(vec![subject("a", 0.0), b], vec![1.0], settings());
        assert!(matches!(
            result,
            Err(RegistrationError::Mesh {
                ref subject,
                source: MeshError::NoTriangles
            }) if subject == "b"
        ));
    }

    #[test]
    fn test_cost_history_is_thinned_at_its_limit() {
        let mut reg = GroupwiseRegistration::new(
            vec![subject("a", 0.0), subject("b", 0.4)],
            vec![1.0],
            RegistrationSettings {
                history_limit: 4,
                ..settings()
            },
        )
        .unwrap();
        let start = reg.coefficient_vector();
        for k in 0..20 {
            let mut proposal = start.clone();
            proposal[1] = 1e-3 * k as f64;
            reg.cost(&proposal);
        }
        let history = reg.cost_history();
        assert!(history.len() < 4);
        assert_eq!(reg.cost_history_stride(), 8);
        assert_eq!(history.len(), 20 / reg.cost_history_stride());
        assert!(history.windows(2).all(|w| w[1] <= w[0]));
        assert!(history.iter().all(|&c| c <= reg.initial_cost()));
    }

    #[test]
    fn test_save_all_checks_path_count() {
        let reg = GroupwiseRegistration::new(
            vec![subject("a", 0.0), subject("b", 0.4)],
            vec![1.0],
            settings(),
        )
        .unwrap();
        let paths: Vec<&Path> = vec![Path::new("only-one.coeff")];
        assert!(matches!(
            reg.save_all(&paths),
            Err(RegistrationError::OutputCount {
                expected: 2,
                found: 1
            })
        ));
        assert!(reg.deformed_sphere(5).is_err());
    }
}
