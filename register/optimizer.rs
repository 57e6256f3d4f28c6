use ndarray::Array1;
use std::cell::{Cell, RefCell};
use wolfe_bfgs::{Bfgs, BfgsSolution};

/// Objective values at or above this are treated as infeasible by the
/// gradient-based search.
pub const INFEASIBLE_COST: f64 = 1e10;

/// Result of one minimization run.
#[derive(Debug, Clone, PartialEq)]
pub struct MinimizeOutcome {
    /// Best point seen.
    pub point: Vec<f64>,
    pub value: f64,
    pub evaluations: usize,
    /// False when the evaluation budget ran out first.
    pub converged: bool,
}

/// A derivative-free minimizer over a flat parameter vector.
///
/// `objective` may return `f64::MAX` (or any non-finite value) to reject a
/// point; such points are never accepted as improvements.
pub trait Minimizer {
    fn minimize(
        &self,
        start: &[f64],
        budget: usize,
        objective: &mut dyn FnMut(&[f64]) -> f64,
    ) -> MinimizeOutcome;
}

// Wraps the objective with an evaluation counter and best-point tracking.
struct Tracked<'a> {
    objective: &'a mut dyn FnMut(&[f64]) -> f64,
    budget: usize,
    evaluations: usize,
    best_point: Vec<f64>,
    best_value: f64,
}

impl<'a> Tracked<'a> {
    fn new(objective: &'a mut dyn FnMut(&[f64]) -> f64, budget: usize, start: &[f64]) -> Self {
        Self {
            objective,
            budget,
            evaluations: 0,
            best_point: start.to_vec(),
            best_value: f64::INFINITY,
        }
    }

    fn exhausted(&self) -> bool {
        self.evaluations >= self.budget
    }

    fn eval(&mut self, x: &[f64]) -> f64 {
        self.evaluations += 1;
        let value = (self.objective)(x);
        let value = if value.is_nan() { f64::MAX } else { value };
        if value < self.best_value {
            self.best_value = value;
            self.best_point.clear();
            self.best_point.extend_from_slice(x);
        }
        value
    }

    fn finish(self, converged: bool) -> MinimizeOutcome {
        MinimizeOutcome {
            point: self.best_point,
            value: self.best_value,
            evaluations: self.evaluations,
            converged,
        }
    }
}

/// Hooke-Jeeves pattern search.
///
/// Exploratory moves try `+rho` then `-rho` along every coordinate and keep a
/// move only if it strictly lowers the objective. A successful exploration is
/// followed by pattern moves along the improvement direction; a failed one
/// halves `rho`. The search stops when `rho` drops below `rho_end` or the
/// budget is spent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternSearch {
    pub rho_begin: f64,
    pub rho_end: f64,
}

impl PatternSearch {
    fn explore(&self, f: &mut Tracked, center: &mut [f64], value: &mut f64, rho: f64) {
        for i in 0..center.len() {
            for step in [rho, -rho] {
                if f.exhausted() {
                    return;
                }
                let original = center[i];
                center[i] = original + step;
                let trial = f.eval(center);
                if trial < *value {
                    *value = trial;
                    break;
                }
                center[i] = original;
            }
        }
    }
}

impl Minimizer for PatternSearch {
    fn minimize(
        &self,
        start: &[f64],
        budget: usize,
        objective: &mut dyn FnMut(&[f64]) -> f64,
    ) -> MinimizeOutcome {
        let mut f = Tracked::new(objective, budget, start);
        if start.is_empty() || budget == 0 {
            if budget > 0 {
                f.eval(start);
            }
            return f.finish(true);
        }

        let mut base = start.to_vec();
        let mut base_value = f.eval(&base);
        let mut rho = self.rho_begin;

        while rho >= self.rho_end && !f.exhausted() {
            let mut point = base.clone();
            let mut value = base_value;
            self.explore(&mut f, &mut point, &mut value, rho);
            if value >= base_value {
                rho *= 0.5;
                continue;
            }

            // Pattern moves: keep stepping along the improving direction.
            loop {
                let direction: Vec<f64> = point.iter().zip(&base).map(|(p, b)| p - b).collect();
                base.copy_from_slice(&point);
                base_value = value;
                if f.exhausted() {
                    break;
                }
                let mut probe: Vec<f64> = base.iter().zip(&direction).map(|(b, d)| b + d).collect();
                let mut probe_value = f.eval(&probe);
                self.explore(&mut f, &mut probe, &mut probe_value, rho);
                if probe_value < base_value {
                    point = probe;
                    value = probe_value;
                } else {
                    break;
                }
            }
        }

        let converged = rho < self.rho_end;
        f.finish(converged)
    }
}

/// Quasi-Newton search with forward-difference gradients.
///
/// Each gradient costs one evaluation per coordinate. Rejected points are
/// reported to the line search as [`INFEASIBLE_COST`]; a difference step that
/// lands on a rejected point falls back to a backward difference, or to a zero
/// component when both sides are rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FiniteDifferenceBfgs {
    pub tolerance: f64,
    pub gradient_step: f64,
}

fn feasible(value: f64) -> Option<f64> {
    (value.is_finite() && value < INFEASIBLE_COST).then_some(value)
}

impl Minimizer for FiniteDifferenceBfgs {
    fn minimize(
        &self,
        start: &[f64],
        budget: usize,
        objective: &mut dyn FnMut(&[f64]) -> f64,
    ) -> MinimizeOutcome {
        let tracked = RefCell::new(Tracked::new(objective, budget, start));
        let dim = start.len();
        if dim == 0 || budget == 0 {
            let mut f = tracked.into_inner();
            if budget > 0 {
                f.eval(start);
            }
            return f.finish(true);
        }

        let out_of_budget = Cell::new(false);
        let h = self.gradient_step;
        let cost_and_grad = |x: &Array1<f64>| -> (f64, Array1<f64>) {
            let mut f = tracked.borrow_mut();
            if f.exhausted() {
                // A zero gradient ends the run at the best point seen so far.
                out_of_budget.set(true);
                return (f.best_value.min(INFEASIBLE_COST), Array1::zeros(dim));
            }
            let mut point = x.to_vec();
            let Some(value) = feasible(f.eval(&point)) else {
                return (INFEASIBLE_COST, Array1::zeros(dim));
            };
            let mut grad = Array1::zeros(dim);
            for i in 0..dim {
                if f.exhausted() {
                    out_of_budget.set(true);
                    break;
                }
                let original = point[i];
                point[i] = original + h;
                let forward = feasible(f.eval(&point));
                grad[i] = match forward {
                    Some(fp) => (fp - value) / h,
                    None if !f.exhausted() => {
                        point[i] = original - h;
                        feasible(f.eval(&point)).map_or(0.0, |fm| (value - fm) / h)
                    }
                    None => 0.0,
                };
                point[i] = original;
            }
            (value, grad)
        };

        let iterations = (budget / (dim + 1)).max(1);
        let result = Bfgs::new(Array1::from_vec(start.to_vec()), cost_and_grad)
            .with_tolerance(self.tolerance)
            .with_max_iterations(iterations)
            .run();
        let converged = match result {
            Ok(BfgsSolution { iterations, .. }) => {
                log::debug!("BFGS finished after {iterations} iterations");
                !out_of_budget.get()
            }
            Err(e) => {
                log::warn!("BFGS stopped early: {e:?}; keeping the best point seen");
                false
            }
        };
        tracked.into_inner().finish(converged)
    }
}
