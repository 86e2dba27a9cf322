//! This module contains the solver components for defect and carrier equilibria.
//!
//! It includes the `ChargeNeutralitySolver` for single-temperature equilibria, the
//! `AnnealQuenchModel` for frozen-defect equilibria, the `Constraints` that pin concentrations
//! during a solve, and `SolverOptions` for configuring the root search.

mod anneal;
mod constraints;
mod neutrality;
mod options;

pub use anneal::{AnnealQuenchModel, AnnealQuenchResult, QuenchMode};
pub use constraints::Constraints;
pub use neutrality::ChargeNeutralitySolver;
pub use options::SolverOptions;
