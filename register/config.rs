use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Finest icosphere subdivision accepted for the sampling grid (655362 samples).
pub const MAX_SAMPLING_LEVEL: u32 = 8;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("The initial degree ({initial}) must not exceed the final degree ({degree}).")]
    DegreeOrder { initial: usize, degree: usize },
    #[error("The evaluation budget per degree stage must be positive.")]
    ZeroIterations,
    #[error("The status interval must be positive.")]
    ZeroStatusStep,
    #[error("The cost history must hold at least two entries, got {0}.")]
    HistoryLimit(usize),
    #[error("At least one worker thread is required.")]
    ZeroThreads,
    #[error("The landmark weight must be finite and non-negative, got {0}.")]
    LandmarkWeight(f64),
    #[error("The eigenvalue floor must be finite and positive, got {0}.")]
    EigenvalueFloor(f64),
    #[error("Sampling level {0} exceeds the supported maximum of {MAX_SAMPLING_LEVEL}.")]
    SamplingLevel(u32),
    #[error("The harmonic pole must be a finite non-zero vector, got {0:?}.")]
    Pole([f64; 3]),
    #[error(
        "Pattern search radii must satisfy rho_begin > rho_end > 0, got rho_begin={rho_begin}, rho_end={rho_end}."
    )]
    SearchRadius { rho_begin: f64, rho_end: f64 },
    #[error("BFGS tolerance and gradient step must be positive, got {tolerance} and {gradient_step}.")]
    BfgsParameters { tolerance: f64, gradient_step: f64 },
}

/// How landmark positions of all subjects are reduced to a common target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkCentering {
    /// Mean position, projected back onto the sphere.
    #[default]
    Mean,
    /// Coordinate-wise median, projected back onto the sphere.
    Median,
}

/// Derivative-free minimizer run over the concatenated coefficient vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum OptimizerConfig {
    /// Compass search with pattern moves; the step radius halves from
    /// `rho_begin` down to `rho_end`.
    PatternSearch { rho_begin: f64, rho_end: f64 },
    /// Quasi-Newton search on forward-difference gradients.
    Bfgs { tolerance: f64, gradient_step: f64 },
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig::PatternSearch {
            rho_begin: 0.02,
            rho_end: 1e-5,
        }
    }
}

/// Every tunable of a registration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationSettings {
    /// Final harmonic degree of the deformation fields.
    pub degree: usize,
    /// Degree of the first coarse-to-fine stage.
    pub initial_degree: usize,
    /// Cost evaluations allowed per degree stage.
    pub max_iterations: usize,
    /// Icosphere subdivision level of the sampling grid.
    pub sampling_level: u32,
    pub landmark_weight: f64,
    pub landmark_centering: LandmarkCentering,
    pub eigenvalue_floor: f64,
    pub optimizer: OptimizerConfig,
    /// A status line is logged every `status_step` evaluations.
    pub status_step: usize,
    /// Most entries kept in the cost history; once full, every other entry
    /// is dropped and recording continues at half the rate.
    pub history_limit: usize,
    pub threads: usize,
    pub pole: [f64; 3],
    /// Shows a progress bar when stderr is a terminal.
    pub progress: bool,
}

impl Default for RegistrationSettings {
    fn default() -> Self {
        Self {
            degree: 5,
            initial_degree: 0,
            max_iterations: 50_000,
            sampling_level: 3,
            landmark_weight: 0.0,
            landmark_centering: LandmarkCentering::default(),
            eigenvalue_floor: 1e-6,
            optimizer: OptimizerConfig::default(),
            status_step: 10,
            history_limit: 10_000,
            threads: num_cpus::get(),
            pole: [0.0, 0.0, 1.0],
            progress: true,
        }
    }
}

impl RegistrationSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_degree > self.degree {
            return Err(ConfigError::DegreeOrder {
                initial: self.initial_degree,
                degree: self.degree,
            });
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        if self.status_step == 0 {
            return Err(ConfigError::ZeroStatusStep);
        }
        if self.history_limit < 2 {
            return Err(ConfigError::HistoryLimit(self.history_limit));
        }
        if self.threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        if !(self.landmark_weight.is_finite() && self.landmark_weight >= 0.0) {
            return Err(ConfigError::LandmarkWeight(self.landmark_weight));
        }
        if !(self.eigenvalue_floor.is_finite() && self.eigenvalue_floor > 0.0) {
            return Err(ConfigError::EigenvalueFloor(self.eigenvalue_floor));
        }
        if self.sampling_level > MAX_SAMPLING_LEVEL {
            return Err(ConfigError::SamplingLevel(self.sampling_level));
        }
        let pole_norm2: f64 = self.pole.iter().map(|c| c * c).sum();
        if !(pole_norm2.is_finite() && pole_norm2 > 0.0) {
            return Err(ConfigError::Pole(self.pole));
        }
        match self.optimizer {
            OptimizerConfig::PatternSearch { rho_begin, rho_end } => {
                if !(rho_end > 0.0 && rho_begin > rho_end && rho_begin.is_finite()) {
                    return Err(ConfigError::SearchRadius { rho_begin, rho_end });
                }
            }
            OptimizerConfig::Bfgs {
                tolerance,
                gradient_step,
            } => {
                if !(tolerance > 0.0 && gradient_step > 0.0) {
                    return Err(ConfigError::BfgsParameters {
                        tolerance,
                        gradient_step,
                    });
                }
            }
        }
        Ok(())
    }

    /// Whether landmarks contribute to the cost at all.
    pub fn uses_landmarks(&self) -> bool {
        self.landmark_weight > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = RegistrationSettings::default();
        assert_eq!(settings.degree, 5);
        assert_eq!(settings.max_iterations, 50_000);
        assert_eq!(settings.status_step, 10);
        assert!(settings.validate().is_ok());
        assert!(!settings.uses_landmarks());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let settings: RegistrationSettings = toml::from_str(
            r#"
            degree = 2
            landmark_weight = 0.5
            landmark_centering = "median"

            [optimizer]
            method = "bfgs"
            tolerance = 1e-6
            gradient_step = 1e-4
            "#,
        )
        .unwrap();
        assert_eq!(settings.degree, 2);
        assert_eq!(settings.initial_degree, 0);
        assert_eq!(settings.landmark_centering, LandmarkCentering::Median);
        assert_eq!(
            settings.optimizer,
            OptimizerConfig::Bfgs {
                tolerance: 1e-6,
                gradient_step: 1e-4
            }
        );
        assert!(settings.uses_landmarks());
    }

    #[test]
    fn test_invalid_settings_fail_fast() {
        let mut settings = RegistrationSettings {
            initial_degree: 3,
            degree: 2,
            ..Default::default()
        };
        assert_eq!(
            settings.validate(),
            Err(ConfigError::DegreeOrder {
                initial: 3,
                degree: 2
            })
        );

        settings.initial_degree = 0;
        settings.optimizer = OptimizerConfig::PatternSearch {
            rho_begin: 1e-6,
            rho_end: 1e-3,
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::SearchRadius { .. })
        ));

        settings.optimizer = OptimizerConfig::default();
        settings.pole = [0.0; 3];
        assert_eq!(settings.validate(), Err(ConfigError::Pole([0.0; 3])));

        settings.pole = [0.0, 0.0, 1.0];
        settings.landmark_weight = -1.0;
        assert_eq!(settings.validate(), Err(ConfigError::LandmarkWeight(-1.0)));

        settings.landmark_weight = 0.0;
        settings.history_limit = 1;
        assert_eq!(settings.validate(), Err(ConfigError::HistoryLimit(1)));
    }
}
