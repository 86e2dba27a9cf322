//! Self-consistent Fermi level, defect and free-carrier concentrations of crystalline materials
//! containing point defects.
//!
//! Pre-computed defect formation-energy parameters are combined with the host's band description
//! to find the Fermi level at which the material is charge neutral, for any temperature and point
//! of the allowed chemical-potential region. On top of single solves the crate offers
//! two-temperature anneal/quench ("frozen defect") equilibria, parallel scans over temperatures,
//! chemical potentials and constraint sets, and optimisation of an equilibrium property over the
//! chemical-potential polytope.

pub mod bands;
pub mod chempot;
pub mod concentration;
pub mod elements;
pub mod error;
pub mod formation;
pub mod math;
pub mod scan;
pub mod solver;
pub mod system;
pub mod types;

pub use bands::{BandEdgeCache, BandEdges, BandGapModel, DensityOfStates, ElectronicBandParameters};
pub use chempot::{ChemicalPotentialSpace, Grid, Limit, Phase, WeightedGrid};
pub use concentration::{ChargeBalance, ConcentrationCalculator, SiteCompetition};
pub use elements::ElementMap;
pub use error::DefeqError;
pub use formation::FormationEnergyModel;
pub use scan::{
    CancellationToken, Direction, EquilibriumSolver, FailureKind, Objective, OptimizationOutcome,
    OptimizerSettings, PointOutcome, PointSelection, Protocol, ResultRow, ScanPlan, ScanRecord,
    ScanResults, Target,
};
pub use solver::{
    AnnealQuenchModel, AnnealQuenchResult, ChargeNeutralitySolver, Constraints, QuenchMode,
    SolverOptions,
};
pub use system::DefectSystem;
pub use types::{
    ChargeStateRecord, ChemicalPotentialPoint, ConstraintMetadata, DefectConcentration,
    DefectKind, DefectRecord, Degeneracy, DegeneracyScaling, EquilibriumResult,
    FixedConcentration, FixedOrigin,
};

use std::sync::OnceLock;

static EXAMPLE_SYSTEM: OnceLock<DefectSystem> = OnceLock::new();

/// A bundled ZnO-like defect system, useful for trying the library out and for tests.
pub fn example_system() -> &'static DefectSystem {
    EXAMPLE_SYSTEM.get_or_init(|| {
        const EXAMPLE_SYSTEM_TOML: &str = include_str!("../resources/example_system.toml");
        DefectSystem::load_from_str(EXAMPLE_SYSTEM_TOML)
            .expect("Failed to parse the embedded example system. This is a library bug.")
    })
}
