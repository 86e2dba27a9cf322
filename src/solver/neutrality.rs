//! This module implements the `ChargeNeutralitySolver`, which finds the self-consistent Fermi
//! level of a defective semiconductor.
//!
//! At a fixed temperature and chemical-potential point the net charge
//! `p - n + Σ q n_q + background` is a monotonically non-increasing function of the Fermi level,
//! so its zero is bracketed between the band edges and located with `argmin`'s Brent root
//! finder. Every solve is independent and borrows its inputs, which lets scans run solves in
//! parallel.

use super::constraints::Constraints;
use super::options::SolverOptions;
use crate::bands::{BandEdgeCache, BandEdges, ElectronicBandParameters};
use crate::concentration::ConcentrationCalculator;
use crate::error::DefeqError;
use crate::types::{ChemicalPotentialPoint, DefectRecord, EquilibriumResult};
use argmin::core::{CostFunction, Executor, State};
use argmin::solver::brent::BrentRoot;
use std::cell::RefCell;
use tracing::debug;

/// One evaluation of the net charge during the root search.
#[derive(Debug, Clone, Copy)]
struct ChargeSample {
    net: f64,
    /// `p + n + Σ|q| n_q + |background|`.
    scale: f64,
}

/// Net charge as a function of the Fermi level, in the form `argmin` minimises over.
#[derive(Clone, Copy)]
struct NetCharge<'s, 'a> {
    bands: &'s ElectronicBandParameters,
    edges: &'s BandEdges,
    calculator: &'s RefCell<ConcentrationCalculator<'a>>,
    background: f64,
}

impl NetCharge<'_, '_> {
    fn sample(&self, fermi_level: f64) -> Result<ChargeSample, DefeqError> {
        sample(
            self.bands,
            self.edges,
            &mut self.calculator.borrow_mut(),
            self.background,
            fermi_level,
        )
    }
}

impl CostFunction for NetCharge<'_, '_> {
    type Param = f64;
    type Output = f64;

    fn cost(&self, fermi_level: &f64) -> Result<f64, argmin::core::Error> {
        Ok(self.sample(*fermi_level)?.net)
    }
}

/// Solves for the Fermi level that makes a defect system charge neutral.
///
/// The solver holds borrowed defect records and band parameters; it is cheap to construct and
/// can be shared across threads.
#[derive(Debug, Clone)]
pub struct ChargeNeutralitySolver<'a> {
    defects: &'a [DefectRecord],
    bands: &'a ElectronicBandParameters,
    options: SolverOptions,
}

impl<'a> ChargeNeutralitySolver<'a> {
    /// Creates a new solver with default options.
    ///
    /// # Arguments
    ///
    /// * `defects` - The defect records whose charge states take part in the balance.
    /// * `bands` - VBM, band gap and density-of-states model of the host.
    pub fn new(defects: &'a [DefectRecord], bands: &'a ElectronicBandParameters) -> Self {
        Self {
            defects,
            bands,
            options: SolverOptions::default(),
        }
    }

    /// Configures the solver with custom options, consuming it and returning the updated solver.
    pub fn with_options(mut self, options: SolverOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    pub fn defects(&self) -> &'a [DefectRecord] {
        self.defects
    }

    pub fn bands(&self) -> &'a ElectronicBandParameters {
        self.bands
    }

    /// Solves for the charge-neutral Fermi level.
    ///
    /// # Arguments
    ///
    /// * `temperature` - Temperature in kelvin.
    /// * `point` - Relative chemical potentials of every element exchanged by the defects.
    /// * `constraints` - Pinned concentrations and background charge.
    ///
    /// # Returns
    ///
    /// The converged `EquilibriumResult`, or a `DefeqError`. `NonConvergence` is returned when
    /// the net charge does not change sign across the bracket or the iteration budget runs out;
    /// a bracket end is never reported as the answer unless it meets the tolerance itself.
    ///
    /// # Examples
    ///
    /// ```
    /// use defeq::{
    ///     BandGapModel, ChargeNeutralitySolver, ChargeStateRecord, ChemicalPotentialPoint,
    ///     Constraints, DefectKind, DefectRecord, DensityOfStates, ElectronicBandParameters,
    /// };
    ///
    /// let defects = vec![
    ///     DefectRecord::new("v_O", DefectKind::Vacancy { element: "O".into() })
    ///         .with_charge_state(ChargeStateRecord::new(2, 1.0, 4e22))
    ///         .with_charge_state(ChargeStateRecord::new(0, 2.5, 4e22)),
    ///     DefectRecord::new("v_Zn", DefectKind::Vacancy { element: "Zn".into() })
    ///         .with_charge_state(ChargeStateRecord::new(-2, 4.0, 4e22))
    ///         .with_charge_state(ChargeStateRecord::new(0, 3.0, 4e22)),
    /// ];
    /// let bands = ElectronicBandParameters::new(
    ///     0.0,
    ///     BandGapModel::Constant { gap: 3.3 },
    ///     DensityOfStates::EffectiveMass { electron_mass: 0.28, hole_mass: 0.6 },
    /// );
    /// let point = ChemicalPotentialPoint::new([("O", -1.0), ("Zn", -2.5)]);
    ///
    /// let solver = ChargeNeutralitySolver::new(&defects, &bands);
    /// let result = solver.solve(1000.0, &point, &Constraints::new()).unwrap();
    ///
    /// assert!(result.fermi_level > 0.0 && result.fermi_level < 3.3);
    /// assert!(result.relative_residual.abs() < 1e-8);
    /// ```
    pub fn solve(
        &self,
        temperature: f64,
        point: &ChemicalPotentialPoint,
        constraints: &Constraints,
    ) -> Result<EquilibriumResult, DefeqError> {
        let mut cache = BandEdgeCache::new();
        self.solve_with_cache(temperature, point, constraints, &mut cache)
    }

    /// As [`solve`](Self::solve), resolving band edges through a caller-owned cache.
    pub fn solve_with_cache(
        &self,
        temperature: f64,
        point: &ChemicalPotentialPoint,
        constraints: &Constraints,
        cache: &mut BandEdgeCache,
    ) -> Result<EquilibriumResult, DefeqError> {
        let edges = cache.edges(self.bands, temperature)?;
        let calculator = RefCell::new(self.calculator(&edges, point, constraints)?);
        let net_charge = NetCharge {
            bands: self.bands,
            edges: &edges,
            calculator: &calculator,
            background: constraints.background_charge(),
        };
        let padding = self.options.band_edge_padding.max(0.0);
        let bracket = (0.0 - padding, edges.band_gap + padding);
        let (fermi_level, ChargeSample { net, scale }, iterations) =
            self.find_root(&net_charge, bracket, temperature)?;

        let (electrons, holes) = self.bands.carrier_concentrations(&edges, fermi_level)?;
        let defects = calculator.borrow_mut().defect_concentrations(fermi_level)?;

        Ok(EquilibriumResult {
            temperature,
            chemical_potentials: point.clone(),
            fermi_level,
            band_gap: edges.band_gap,
            electron_concentration: electrons,
            hole_concentration: holes,
            defects,
            residual_charge: net,
            relative_residual: if scale > 0.0 { net / scale } else { 0.0 },
            iterations,
            constraints: constraints.metadata(None),
        })
    }

    /// Locates the zero of the net charge inside `bracket`.
    ///
    /// A bracket end is returned directly only if it meets the tolerance. Otherwise the ends must
    /// differ in sign, and the Brent iterate is accepted only if the tolerance holds there too; a
    /// net charge that jumps across zero collapses the bracket without satisfying it.
    fn find_root(
        &self,
        net_charge: &NetCharge<'_, '_>,
        bracket: (f64, f64),
        temperature: f64,
    ) -> Result<(f64, ChargeSample, u32), DefeqError> {
        let (lower, upper) = bracket;
        let at_lower = net_charge.sample(lower)?;
        let at_upper = net_charge.sample(upper)?;
        for (end, at_end) in [(lower, at_lower), (upper, at_upper)] {
            if self.options.accepts(at_end.net, at_end.scale) {
                return Ok((end, at_end, 0));
            }
        }
        if at_lower.net.signum() == at_upper.net.signum() {
            let closest = if at_lower.net.abs() <= at_upper.net.abs() {
                at_lower
            } else {
                at_upper
            };
            debug!(
                temperature,
                lower = at_lower.net,
                upper = at_upper.net,
                "net charge does not change sign across the bracket"
            );
            return Err(DefeqError::NonConvergence {
                residual: closest.net,
                bracket,
                iterations: 0,
            });
        }

        let solver = BrentRoot::new(lower, upper, self.options.fermi_tolerance);
        let max_iterations = u64::from(self.options.max_iterations);
        let outcome = Executor::new(*net_charge, solver)
            .configure(|state| state.max_iters(max_iterations))
            .run()
            .map_err(DefeqError::from_solver)?;
        let state = outcome.state();
        let iterations = u32::try_from(state.get_iter()).unwrap_or(u32::MAX);
        // Brent's costs are signed, so the "best" parameter is the most negative charge rather
        // than the root; the current iterate is the root estimate.
        let fermi_level = state.get_param().copied().unwrap_or(lower);
        let at_root = net_charge.sample(fermi_level)?;
        if !self.options.accepts(at_root.net, at_root.scale) {
            debug!(
                temperature,
                status = ?state.get_termination_status(),
                residual = at_root.net,
                "charge neutrality search stopped without converging"
            );
            return Err(DefeqError::NonConvergence {
                residual: at_root.net,
                bracket,
                iterations,
            });
        }
        Ok((fermi_level, at_root, iterations))
    }

    /// Net charge density (e cm^-3) at an arbitrary Fermi level, for diagnostics.
    pub fn net_charge(
        &self,
        temperature: f64,
        point: &ChemicalPotentialPoint,
        constraints: &Constraints,
        fermi_level: f64,
    ) -> Result<f64, DefeqError> {
        let edges = self.bands.edges_at(temperature)?;
        let mut calculator = self.calculator(&edges, point, constraints)?;
        let sample = sample(
            self.bands,
            &edges,
            &mut calculator,
            constraints.background_charge(),
            fermi_level,
        )?;
        Ok(sample.net)
    }

    fn calculator(
        &self,
        edges: &BandEdges,
        point: &ChemicalPotentialPoint,
        constraints: &Constraints,
    ) -> Result<ConcentrationCalculator<'a>, DefeqError> {
        ConcentrationCalculator::new(
            self.defects,
            point,
            edges,
            constraints,
            self.options.site_competition,
        )
    }
}

fn sample(
    bands: &ElectronicBandParameters,
    edges: &BandEdges,
    calculator: &mut ConcentrationCalculator<'_>,
    background: f64,
    fermi_level: f64,
) -> Result<ChargeSample, DefeqError> {
    let (electrons, holes) = bands.carrier_concentrations(edges, fermi_level)?;
    let defects = calculator.charge_balance(fermi_level)?;
    let net = holes - electrons + defects.net + background;
    if !net.is_finite() {
        return Err(DefeqError::NumericalInstability(format!(
            "net charge is not finite at E_F = {fermi_level} eV"
        )));
    }
    Ok(ChargeSample {
        net,
        scale: holes + electrons + defects.magnitude + background.abs(),
    })
}
