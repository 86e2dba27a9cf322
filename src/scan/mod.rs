//! Scans and optimisations over temperatures, chemical potentials and constraint sets.
//!
//! The `EquilibriumSolver` runs a `ScanPlan` in parallel and returns `ScanResults` in plan order,
//! recording per-point failures instead of aborting. It can also search the chemical-potential
//! polytope for the point that maximises or minimises an equilibrium property.

mod optimize;
mod orchestrator;
mod plan;
mod results;

pub use optimize::{Direction, Objective, OptimizationOutcome, OptimizerSettings, Target};
pub use orchestrator::EquilibriumSolver;
pub use plan::{CancellationToken, PointSelection, Protocol, ScanPlan};
pub use results::{FailureKind, PointOutcome, ResultRow, ScanRecord, ScanResults};
