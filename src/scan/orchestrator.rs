//! The `EquilibriumSolver` ties a defect system to its chemical-potential polytope and runs
//! single solves, parallel scans and optimisations over it.

use super::optimize::OptimizerSettings;
use super::plan::{CancellationToken, PointSelection, Protocol, ScanPlan};
use super::results::{PointOutcome, ScanRecord, ScanResults};
use crate::bands::{BandEdgeCache, ElectronicBandParameters};
use crate::chempot::ChemicalPotentialSpace;
use crate::error::DefeqError;
use crate::solver::{
    AnnealQuenchModel, AnnealQuenchResult, ChargeNeutralitySolver, Constraints, QuenchMode,
    SolverOptions,
};
use crate::types::{ChemicalPotentialPoint, DefectRecord, EquilibriumResult};
use rayon::prelude::*;
use std::collections::BTreeSet;
use tracing::{error, info, instrument, warn};

/// Orchestrates equilibrium solves over temperatures, chemical potentials and constraint sets.
///
/// The solver borrows the defect records and band parameters and owns the chemical-potential
/// space. Every solve is independent, so scans are spread over the rayon thread pool with one
/// band-edge cache per worker.
#[derive(Debug, Clone)]
pub struct EquilibriumSolver<'a> {
    pub(super) defects: &'a [DefectRecord],
    pub(super) bands: &'a ElectronicBandParameters,
    pub(super) space: ChemicalPotentialSpace,
    pub(super) options: SolverOptions,
    pub(super) mobile: BTreeSet<String>,
    pub(super) quench_mode: QuenchMode,
    pub(super) optimizer: OptimizerSettings,
}

impl<'a> EquilibriumSolver<'a> {
    pub fn new(
        defects: &'a [DefectRecord],
        bands: &'a ElectronicBandParameters,
        space: ChemicalPotentialSpace,
    ) -> Self {
        Self {
            defects,
            bands,
            space,
            options: SolverOptions::default(),
            mobile: BTreeSet::new(),
            quench_mode: QuenchMode::default(),
            optimizer: OptimizerSettings::default(),
        }
    }

    pub fn with_options(mut self, options: SolverOptions) -> Self {
        self.options = options;
        self
    }

    /// Defects that re-equilibrate on quenching in anneal/quench protocols.
    pub fn with_mobile_defects<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mobile = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_quench_mode(mut self, mode: QuenchMode) -> Self {
        self.quench_mode = mode;
        self
    }

    pub fn with_optimizer_settings(mut self, settings: OptimizerSettings) -> Self {
        self.optimizer = settings;
        self
    }

    pub fn space(&self) -> &ChemicalPotentialSpace {
        &self.space
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    pub fn defects(&self) -> &'a [DefectRecord] {
        self.defects
    }

    /// Solves the equilibrium at one temperature and chemical-potential point.
    ///
    /// # Errors
    ///
    /// `DomainViolation` if `point` lies outside the polytope; otherwise any error of the
    /// neutrality solve.
    pub fn solve_point(
        &self,
        temperature: f64,
        point: &ChemicalPotentialPoint,
        constraints: &Constraints,
    ) -> Result<EquilibriumResult, DefeqError> {
        self.space.validate(point)?;
        self.neutrality().solve(temperature, point, constraints)
    }

    /// Runs an anneal/quench solve at one chemical-potential point.
    pub fn solve_anneal_quench(
        &self,
        anneal_temperature: f64,
        quench_temperature: f64,
        point: &ChemicalPotentialPoint,
        constraints: &Constraints,
    ) -> Result<AnnealQuenchResult, DefeqError> {
        self.space.validate(point)?;
        self.anneal_model().solve(
            anneal_temperature,
            quench_temperature,
            point,
            constraints,
        )
    }

    /// Runs every point of `plan`; see [`scan_with_cancellation`](Self::scan_with_cancellation).
    pub fn scan(&self, plan: &ScanPlan) -> Result<ScanResults, DefeqError> {
        self.scan_with_cancellation(plan, &CancellationToken::new())
    }

    /// Runs every (protocol, point, constraint set) combination of `plan` in parallel.
    ///
    /// Records come back in plan order. Non-convergence and numerical instability are recorded
    /// against their point and the scan carries on; points not yet started when `token` is
    /// cancelled are recorded as cancelled.
    ///
    /// # Errors
    ///
    /// Configuration errors (an empty plan, invalid temperatures, explicit points outside the
    /// polytope, constraints naming unknown defects, missing chemical potentials) abort the scan.
    #[instrument(skip_all, fields(protocols = plan.protocols.len()))]
    pub fn scan_with_cancellation(
        &self,
        plan: &ScanPlan,
        token: &CancellationToken,
    ) -> Result<ScanResults, DefeqError> {
        if plan.protocols.is_empty() {
            return Err(DefeqError::InvalidConfiguration(
                "scan plan has no protocols".to_string(),
            ));
        }
        for protocol in &plan.protocols {
            protocol.validate()?;
        }
        let points = self.plan_points(&plan.points)?;
        let unconstrained = [Constraints::new()];
        let constraint_sets: &[Constraints] = if plan.constraint_sets.is_empty() {
            &unconstrained
        } else {
            &plan.constraint_sets
        };
        for constraints in constraint_sets {
            constraints.validate(self.defects)?;
        }
        self.validate_mobile()?;

        let tasks: Vec<(Protocol, usize, usize)> = plan
            .protocols
            .iter()
            .flat_map(|protocol| {
                (0..points.len()).flat_map(move |point_index| {
                    (0..constraint_sets.len())
                        .map(move |constraint_index| (*protocol, point_index, constraint_index))
                })
            })
            .collect();

        let neutrality = self.neutrality();
        let model = self.anneal_model();
        let records = tasks
            .par_iter()
            .map_init(
                BandEdgeCache::new,
                |cache, &(protocol, point_index, constraint_index)| -> Result<ScanRecord, DefeqError> {
                    let point = &points[point_index];
                    let outcome = if token.is_cancelled() {
                        PointOutcome::Cancelled
                    } else {
                        let solved = solve_protocol(
                            &neutrality,
                            &model,
                            protocol,
                            point,
                            &constraint_sets[constraint_index],
                            cache,
                        );
                        if let Err(err) = &solved {
                            log_point_failure(err, &protocol, point);
                        }
                        PointOutcome::from_solve(solved)?
                    };
                    Ok(ScanRecord {
                        protocol,
                        point_index,
                        chemical_potentials: point.clone(),
                        constraint_index,
                        outcome,
                    })
                },
            )
            .collect::<Result<Vec<_>, DefeqError>>()?;

        let results = ScanResults { records };
        info!(
            total = results.len(),
            succeeded = results.succeeded(),
            failed = results.failed(),
            cancelled = results.cancelled(),
            "scan finished"
        );
        Ok(results)
    }

    pub(super) fn neutrality(&self) -> ChargeNeutralitySolver<'a> {
        ChargeNeutralitySolver::new(self.defects, self.bands).with_options(self.options)
    }

    pub(super) fn anneal_model(&self) -> AnnealQuenchModel<'a> {
        AnnealQuenchModel::new(self.neutrality())
            .with_mobile_defects(self.mobile.iter().cloned())
            .with_quench_mode(self.quench_mode)
    }

    pub(super) fn validate_mobile(&self) -> Result<(), DefeqError> {
        match self
            .mobile
            .iter()
            .find(|name| !self.defects.iter().any(|d| d.name() == name.as_str()))
        {
            Some(unknown) => Err(DefeqError::UnknownDefect(unknown.clone())),
            None => Ok(()),
        }
    }

    fn plan_points(
        &self,
        selection: &PointSelection,
    ) -> Result<Vec<ChemicalPotentialPoint>, DefeqError> {
        match selection {
            PointSelection::Vertices => Ok(self.space.vertices().to_vec()),
            PointSelection::Grid { resolution } => Ok(self.space.grid(*resolution).collect()),
            PointSelection::Explicit { points } => {
                for point in points {
                    self.space.validate(point)?;
                }
                Ok(points.clone())
            }
        }
    }
}

/// Solves one protocol at one point; anneal/quench protocols report the quench step.
pub(super) fn solve_protocol(
    neutrality: &ChargeNeutralitySolver<'_>,
    model: &AnnealQuenchModel<'_>,
    protocol: Protocol,
    point: &ChemicalPotentialPoint,
    constraints: &Constraints,
    cache: &mut BandEdgeCache,
) -> Result<EquilibriumResult, DefeqError> {
    match protocol {
        Protocol::Equilibrium { temperature } => {
            neutrality.solve_with_cache(temperature, point, constraints, cache)
        }
        Protocol::AnnealQuench {
            anneal_temperature,
            quench_temperature,
        } => model
            .solve_with_cache(
                anneal_temperature,
                quench_temperature,
                point,
                constraints,
                cache,
            )
            .map(|solved| solved.quench),
    }
}

pub(super) fn log_point_failure(
    err: &DefeqError,
    protocol: &Protocol,
    point: &ChemicalPotentialPoint,
) {
    match err {
        DefeqError::NonConvergence { .. } => warn!(
            protocol = %protocol,
            point = %point.label(),
            error = %err,
            "point did not converge"
        ),
        DefeqError::NumericalInstability(_) => error!(
            protocol = %protocol,
            point = %point.label(),
            error = %err,
            "numerical instability"
        ),
        _ => {}
    }
}
