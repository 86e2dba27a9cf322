//! Formation energies of defect charge states.
//!
//! `E_f = E_ref + Σ_e Δ_e (μ_ref,e + μ_e) + q (E_VBM + E_F) + E_corr`
//!
//! The Fermi-level term is the only part that changes inside the neutrality root search, so the
//! model exposes the Fermi-independent part separately; the solver resolves it once per
//! temperature and chemical-potential point and then adds `q · E_F` per iteration.

use crate::error::DefeqError;
use crate::types::{ChargeStateRecord, ChemicalPotentialPoint, DefectRecord};

/// Evaluates formation energies at a fixed chemical-potential point and VBM.
#[derive(Debug, Clone, Copy)]
pub struct FormationEnergyModel<'a> {
    point: &'a ChemicalPotentialPoint,
    vbm: f64,
}

impl<'a> FormationEnergyModel<'a> {
    pub fn new(point: &'a ChemicalPotentialPoint, vbm: f64) -> Self {
        Self { point, vbm }
    }

    /// Formation energy (eV) of `state` at `fermi_level` (eV above the VBM).
    ///
    /// # Errors
    ///
    /// `MissingChemicalPotential` if the point lacks an element exchanged by the state, and
    /// `NumericalInstability` if the result is not finite.
    pub fn energy(
        &self,
        defect: &DefectRecord,
        state: &ChargeStateRecord,
        fermi_level: f64,
    ) -> Result<f64, DefeqError> {
        let energy = self.fermi_independent(defect, state)? + state.charge() as f64 * fermi_level;
        if energy.is_finite() {
            Ok(energy)
        } else {
            Err(DefeqError::NumericalInstability(format!(
                "formation energy of {} (q = {}) at E_F = {fermi_level} eV is not finite",
                defect.name(),
                state.charge()
            )))
        }
    }

    /// Formation energy at E_F = 0, i.e. everything except the `q · E_F` term.
    pub fn fermi_independent(
        &self,
        defect: &DefectRecord,
        state: &ChargeStateRecord,
    ) -> Result<f64, DefeqError> {
        let energy = state.reference_energy()
            + self.chemical_potential_term(defect, state)?
            + state.charge() as f64 * self.vbm
            + state.correction();
        if energy.is_finite() {
            Ok(energy)
        } else {
            Err(DefeqError::NumericalInstability(format!(
                "formation energy of {} (q = {}) is not finite",
                defect.name(),
                state.charge()
            )))
        }
    }

    /// `Σ_e Δ_e (μ_ref,e + μ_e)` for the elements exchanged by `state`.
    pub fn chemical_potential_term(
        &self,
        defect: &DefectRecord,
        state: &ChargeStateRecord,
    ) -> Result<f64, DefeqError> {
        state
            .stoichiometry_delta()
            .iter()
            .try_fold(0.0, |sum, (element, delta)| {
                let mu = self.point.get(element).ok_or_else(|| {
                    DefeqError::MissingChemicalPotential {
                        element: element.clone(),
                        defect: defect.name().to_string(),
                    }
                })?;
                let reference = state
                    .reference_potentials()
                    .get(element)
                    .copied()
                    .unwrap_or(0.0);
                Ok(sum + delta * (reference + mu))
            })
    }
}
