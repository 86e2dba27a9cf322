//! Two-temperature "frozen defect" equilibria.
//!
//! Defects equilibrate at a high anneal (growth) temperature; on quenching to the operating
//! temperature the immobile ones keep their concentrations while carriers and mobile defects
//! re-equilibrate. This is two neutrality solves: an unconstrained one at the anneal temperature
//! and a constrained one at the quench temperature.

use super::constraints::Constraints;
use super::neutrality::ChargeNeutralitySolver;
use crate::bands::{BandEdgeCache, validate_temperature};
use crate::error::DefeqError;
use crate::types::{ChemicalPotentialPoint, EquilibriumResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// What is frozen in from the anneal step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuenchMode {
    /// Each frozen defect keeps its total; charge states redistribute at the quench temperature.
    #[default]
    FixTotals,
    /// Every charge state of a frozen defect keeps its anneal concentration.
    FixChargeStates,
}

/// Both steps of an anneal/quench solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnealQuenchResult {
    pub anneal: EquilibriumResult,
    pub quench: EquilibriumResult,
}

/// Anneal/quench protocol on top of a [`ChargeNeutralitySolver`].
#[derive(Debug, Clone)]
pub struct AnnealQuenchModel<'a> {
    solver: ChargeNeutralitySolver<'a>,
    mobile: BTreeSet<String>,
    mode: QuenchMode,
}

impl<'a> AnnealQuenchModel<'a> {
    /// Creates a model in which every defect is frozen at the quench step.
    pub fn new(solver: ChargeNeutralitySolver<'a>) -> Self {
        Self {
            solver,
            mobile: BTreeSet::new(),
            mode: QuenchMode::default(),
        }
    }

    /// Marks defects that re-equilibrate at the quench temperature.
    pub fn with_mobile_defects<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mobile = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_quench_mode(mut self, mode: QuenchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mobile_defects(&self) -> &BTreeSet<String> {
        &self.mobile
    }

    pub fn quench_mode(&self) -> QuenchMode {
        self.mode
    }

    /// Runs the anneal solve at `anneal_temperature` and the quench solve at
    /// `quench_temperature`.
    ///
    /// Caller constraints apply to both steps. Defects pinned by the caller stay pinned to the
    /// caller's values; every other defect not listed as mobile is frozen at its anneal
    /// concentration.
    ///
    /// # Errors
    ///
    /// `InvalidTemperaturePair` if the anneal temperature is below the quench temperature,
    /// `UnknownDefect` for an unknown mobile defect, and any error of either solve.
    pub fn solve(
        &self,
        anneal_temperature: f64,
        quench_temperature: f64,
        point: &ChemicalPotentialPoint,
        constraints: &Constraints,
    ) -> Result<AnnealQuenchResult, DefeqError> {
        let mut cache = BandEdgeCache::new();
        self.solve_with_cache(
            anneal_temperature,
            quench_temperature,
            point,
            constraints,
            &mut cache,
        )
    }

    /// As [`solve`](Self::solve), resolving band edges through a caller-owned cache.
    pub fn solve_with_cache(
        &self,
        anneal_temperature: f64,
        quench_temperature: f64,
        point: &ChemicalPotentialPoint,
        constraints: &Constraints,
        cache: &mut BandEdgeCache,
    ) -> Result<AnnealQuenchResult, DefeqError> {
        validate_temperature(anneal_temperature)?;
        validate_temperature(quench_temperature)?;
        if anneal_temperature < quench_temperature {
            return Err(DefeqError::InvalidTemperaturePair {
                anneal: anneal_temperature,
                quench: quench_temperature,
            });
        }
        let defects = self.solver.defects();
        if let Some(unknown) = self
            .mobile
            .iter()
            .find(|name| !defects.iter().any(|d| d.name() == name.as_str()))
        {
            return Err(DefeqError::UnknownDefect(unknown.clone()));
        }

        let anneal = self
            .solver
            .solve_with_cache(anneal_temperature, point, constraints, cache)?;

        let pinned_by_caller = constraints.pinned_defects();
        let mut quench_constraints = constraints.clone();
        for defect in defects {
            let name = defect.name();
            if self.mobile.contains(name) || pinned_by_caller.contains(name) {
                continue;
            }
            match self.mode {
                QuenchMode::FixTotals => {
                    let total = anneal.defect_total(name).unwrap_or(0.0);
                    quench_constraints.push_quenched(name, None, total);
                }
                QuenchMode::FixChargeStates => {
                    for row in anneal.defects.iter().filter(|row| row.defect == name) {
                        quench_constraints.push_quenched(
                            name,
                            Some(row.charge),
                            row.concentration,
                        );
                    }
                }
            }
        }
        debug!(
            anneal_temperature,
            quench_temperature,
            frozen = quench_constraints.fixed().len() - constraints.fixed().len(),
            "quenching with frozen defect concentrations"
        );

        let mut quench =
            self.solver
                .solve_with_cache(quench_temperature, point, &quench_constraints, cache)?;
        quench.constraints = quench_constraints.metadata(Some(anneal_temperature));

        Ok(AnnealQuenchResult { anneal, quench })
    }
}
