//! Scalar optimisation of an equilibrium property over the chemical-potential polytope.
//!
//! The search is seeded from the best point of a barycentric grid and refined with `argmin`'s
//! Nelder-Mead over softmax coordinates `w = softmax(z)`, `μ = Σ w_i v_i`. Every trial point is a convex
//! combination of vertices and therefore inside the polytope.

use super::orchestrator::{EquilibriumSolver, log_point_failure, solve_protocol};
use super::plan::Protocol;
use crate::bands::BandEdgeCache;
use crate::chempot::barycentric;
use crate::error::DefeqError;
use crate::solver::{AnnealQuenchModel, ChargeNeutralitySolver, Constraints};
use crate::types::{ChemicalPotentialPoint, DefectRecord, EquilibriumResult};
use argmin::core::{CostFunction, Executor, State, TerminationReason, TerminationStatus};
use argmin::solver::neldermead::NelderMead;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::fmt;
use tracing::{debug, info, instrument};

/// Added to seed weights before taking logarithms so zero weights map to finite coordinates.
const SEED_WEIGHT_FLOOR: f64 = 1e-3;

/// A built-in equilibrium property to optimise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum Target {
    ElectronConcentration,
    HoleConcentration,
    FermiLevel,
    /// Total concentration of a defect over its charge states.
    DefectTotal { defect: String },
    ChargeState { defect: String, charge: i32 },
}

impl Target {
    pub fn evaluate(&self, result: &EquilibriumResult) -> Option<f64> {
        match self {
            Target::ElectronConcentration => Some(result.electron_concentration),
            Target::HoleConcentration => Some(result.hole_concentration),
            Target::FermiLevel => Some(result.fermi_level),
            Target::DefectTotal { defect } => result.defect_total(defect),
            Target::ChargeState { defect, charge } => {
                result.charge_state_concentration(defect, *charge)
            }
        }
    }

    /// Concentrations span many decades and are compared on a log scale.
    fn is_concentration(&self) -> bool {
        !matches!(self, Target::FermiLevel)
    }

    fn validate(&self, defects: &[DefectRecord]) -> Result<(), DefeqError> {
        let (name, charge) = match self {
            Target::DefectTotal { defect } => (defect, None),
            Target::ChargeState { defect, charge } => (defect, Some(*charge)),
            _ => return Ok(()),
        };
        let record = defects
            .iter()
            .find(|d| d.name() == name.as_str())
            .ok_or_else(|| DefeqError::UnknownDefect(name.clone()))?;
        if let Some(q) = charge {
            if !record.charge_states().iter().any(|s| s.charge() == q) {
                return Err(DefeqError::InvalidConfiguration(format!(
                    "defect '{name}' has no charge state {q}"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::ElectronConcentration => write!(f, "electron concentration"),
            Target::HoleConcentration => write!(f, "hole concentration"),
            Target::FermiLevel => write!(f, "Fermi level"),
            Target::DefectTotal { defect } => write!(f, "[{defect}]"),
            Target::ChargeState { defect, charge } => write!(f, "[{defect}^{charge:+}]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Maximize,
    Minimize,
}

/// What an optimisation scores: a built-in target or any function of the result.
pub enum Objective<'f> {
    Target(Target),
    Custom(Box<dyn Fn(&EquilibriumResult) -> f64 + Send + Sync + 'f>),
}

impl<'f> Objective<'f> {
    pub fn custom(f: impl Fn(&EquilibriumResult) -> f64 + Send + Sync + 'f) -> Self {
        Objective::Custom(Box::new(f))
    }

    fn value(&self, result: &EquilibriumResult) -> f64 {
        match self {
            Objective::Target(target) => target.evaluate(result).unwrap_or(f64::NAN),
            Objective::Custom(f) => f(result),
        }
    }

    /// The quantity the simplex minimises.
    fn score(&self, result: &EquilibriumResult, direction: Direction) -> f64 {
        let raw = self.value(result);
        let scaled = match self {
            Objective::Target(target) if target.is_concentration() => {
                raw.max(f64::MIN_POSITIVE).ln()
            }
            _ => raw,
        };
        match direction {
            Direction::Minimize => scaled,
            Direction::Maximize => -scaled,
        }
    }
}

impl From<Target> for Objective<'_> {
    fn from(target: Target) -> Self {
        Objective::Target(target)
    }
}

impl fmt::Debug for Objective<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Objective::Target(target) => f.debug_tuple("Target").field(target).finish(),
            Objective::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Limits of the Nelder-Mead refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    pub max_iterations: u32,
    /// Standard deviation of the simplex scores at which the refinement stops.
    pub tolerance: f64,
    /// Initial simplex edge in softmax coordinates.
    pub initial_step: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-8,
            initial_step: 1.0,
        }
    }
}

/// The best point found by [`EquilibriumSolver::optimize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    /// Equilibrium at the optimum.
    pub result: EquilibriumResult,
    /// Objective value at the optimum.
    pub value: f64,
    /// Barycentric weights of the optimum over the polytope vertices.
    pub weights: Vec<f64>,
    /// Objective value at the best grid point.
    pub seed_value: f64,
    pub grid_points: usize,
    /// Solves performed by the refinement.
    pub evaluations: u32,
    pub converged: bool,
}

struct Candidate {
    score: f64,
    weights: Vec<f64>,
    result: EquilibriumResult,
}

/// The score of a softmax coordinate vector, remembering the best solve seen so far.
///
/// Failed solves score `+inf`. Point failures are logged and the search moves on; any other
/// error is kept and returned once the simplex stops.
#[derive(Clone, Copy)]
struct Refinement<'r, 'f> {
    neutrality: &'r ChargeNeutralitySolver<'r>,
    model: &'r AnnealQuenchModel<'r>,
    protocol: Protocol,
    constraints: &'r Constraints,
    vertices: &'r [ChemicalPotentialPoint],
    objective: &'r Objective<'f>,
    direction: Direction,
    cache: &'r RefCell<BandEdgeCache>,
    best: &'r RefCell<Candidate>,
    fatal: &'r RefCell<Option<DefeqError>>,
    evaluations: &'r Cell<u32>,
}

impl CostFunction for Refinement<'_, '_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, z: &Vec<f64>) -> Result<f64, argmin::core::Error> {
        self.evaluations.set(self.evaluations.get().saturating_add(1));
        let weights = softmax(z);
        let point = barycentric(self.vertices, &weights);
        let solved = solve_protocol(
            self.neutrality,
            self.model,
            self.protocol,
            &point,
            self.constraints,
            &mut self.cache.borrow_mut(),
        );
        let score = match solved {
            Ok(result) => {
                let score = self.objective.score(&result, self.direction);
                let mut best = self.best.borrow_mut();
                if score < best.score {
                    *best = Candidate {
                        score,
                        weights,
                        result,
                    };
                }
                score
            }
            Err(err) => {
                if err.is_point_failure() {
                    log_point_failure(&err, &self.protocol, &point);
                } else {
                    self.fatal.borrow_mut().get_or_insert(err);
                }
                f64::INFINITY
            }
        };
        Ok(if score.is_nan() { f64::INFINITY } else { score })
    }
}

impl EquilibriumSolver<'_> {
    /// Finds the chemical-potential point that maximises or minimises `objective` under
    /// `protocol`.
    ///
    /// Every grid point at `resolution` is solved in parallel and the best one seeds a
    /// Nelder-Mead refinement. Points that fail to solve score as infinitely bad. The returned
    /// optimum is never worse than the seed.
    ///
    /// # Errors
    ///
    /// Configuration errors as for a scan, `UnknownDefect` for a target naming an unknown defect,
    /// and the first point failure if no grid point could be solved.
    #[instrument(skip_all, fields(protocol = %protocol, direction = ?direction, resolution = resolution))]
    pub fn optimize<'f>(
        &self,
        objective: impl Into<Objective<'f>>,
        direction: Direction,
        protocol: Protocol,
        constraints: &Constraints,
        resolution: usize,
    ) -> Result<OptimizationOutcome, DefeqError> {
        let objective = objective.into();
        protocol.validate()?;
        constraints.validate(self.defects)?;
        self.validate_mobile()?;
        if let Objective::Target(target) = &objective {
            target.validate(self.defects)?;
        }

        let neutrality = self.neutrality();
        let model = self.anneal_model();
        let candidates: Vec<(Vec<f64>, ChemicalPotentialPoint)> =
            self.space.grid(resolution).with_weights().collect();
        let grid_points = candidates.len();

        let seeds = candidates
            .into_par_iter()
            .map_init(BandEdgeCache::new, |cache, (weights, point)| {
                match solve_protocol(&neutrality, &model, protocol, &point, constraints, cache) {
                    Ok(result) => Ok(Ok(Candidate {
                        score: objective.score(&result, direction),
                        weights,
                        result,
                    })),
                    Err(err) if err.is_point_failure() => {
                        log_point_failure(&err, &protocol, &point);
                        Ok(Err(err))
                    }
                    Err(err) => Err(err),
                }
            })
            .collect::<Result<Vec<_>, DefeqError>>()?;

        let mut first_failure = None;
        let mut seed: Option<Candidate> = None;
        for solved in seeds {
            match solved {
                Ok(candidate) if candidate.score.is_finite() => {
                    if seed.as_ref().is_none_or(|best| candidate.score < best.score) {
                        seed = Some(candidate);
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    first_failure.get_or_insert(err);
                }
            }
        }
        let Some(seed) = seed else {
            return Err(first_failure.unwrap_or_else(|| {
                DefeqError::NumericalInstability(
                    "objective is not finite at any grid point".to_string(),
                )
            }));
        };
        let seed_value = objective.value(&seed.result);
        debug!(seed_value, grid_points, "optimisation seeded from grid");

        let vertices = self.space.vertices();
        if vertices.len() < 2 {
            return Ok(OptimizationOutcome {
                value: seed_value,
                weights: seed.weights,
                result: seed.result,
                seed_value,
                grid_points,
                evaluations: 0,
                converged: true,
            });
        }

        let start: Vec<f64> = seed
            .weights
            .iter()
            .map(|w| (w + SEED_WEIGHT_FLOOR).ln())
            .collect();
        let mut simplex = vec![start.clone()];
        simplex.extend((0..start.len()).map(|i| {
            let mut vertex = start.clone();
            vertex[i] += self.optimizer.initial_step;
            vertex
        }));
        let solver = NelderMead::new(simplex)
            .with_sd_tolerance(self.optimizer.tolerance)
            .map_err(DefeqError::from_solver)?;

        let cache = RefCell::new(BandEdgeCache::new());
        let best = RefCell::new(seed);
        let fatal = RefCell::new(None);
        let evaluations = Cell::new(0);
        let refinement = Refinement {
            neutrality: &neutrality,
            model: &model,
            protocol,
            constraints,
            vertices,
            objective: &objective,
            direction,
            cache: &cache,
            best: &best,
            fatal: &fatal,
            evaluations: &evaluations,
        };
        let max_iterations = u64::from(self.optimizer.max_iterations);
        let outcome = Executor::new(refinement, solver)
            .configure(|state| state.max_iters(max_iterations))
            .run()
            .map_err(DefeqError::from_solver)?;
        let converged = matches!(
            outcome.state().get_termination_status(),
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
        );
        if let Some(err) = fatal.into_inner() {
            return Err(err);
        }

        let best = best.into_inner();
        let evaluations = evaluations.get();
        let value = objective.value(&best.result);
        info!(
            seed_value,
            value, evaluations, converged, "optimisation finished"
        );
        Ok(OptimizationOutcome {
            result: best.result,
            value,
            weights: best.weights,
            seed_value,
            grid_points,
            evaluations,
            converged,
        })
    }
}

fn softmax(z: &[f64]) -> Vec<f64> {
    let max = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = z.iter().map(|x| (x - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}
