//! Electronic band description and free-carrier statistics.
//!
//! The host's valence band maximum sets the reference for the Fermi level, the band gap may vary
//! with temperature, and the free-carrier densities come either from parabolic effective-mass bands
//! or from a tabulated density of states integrated with Fermi-Dirac occupation.

use crate::error::DefeqError;
use crate::math::constants::{
    ANGSTROM3_TO_CM3, EFFECTIVE_DOS_300K_CM3, EFFECTIVE_DOS_REFERENCE_TEMPERATURE, thermal_energy,
};
use crate::math::fermi_dirac;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Band gap as a function of temperature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum BandGapModel {
    /// Temperature-independent gap (eV).
    Constant { gap: f64 },
    /// Varshni relation `Eg(T) = gap_0k - alpha T^2 / (T + beta)`.
    Varshni { gap_0k: f64, alpha: f64, beta: f64 },
    /// Piecewise-linear schedule of `[temperature, gap]` pairs in ascending temperature, clamped to
    /// the end values outside the tabulated range.
    Tabulated { points: Vec<[f64; 2]> },
}

impl BandGapModel {
    /// Band gap (eV) at `temperature` (K).
    pub fn at(&self, temperature: f64) -> Result<f64, DefeqError> {
        let gap = match self {
            BandGapModel::Constant { gap } => *gap,
            BandGapModel::Varshni {
                gap_0k,
                alpha,
                beta,
            } => gap_0k - alpha * temperature * temperature / (temperature + beta),
            BandGapModel::Tabulated { points } => interpolate(points, temperature)?,
        };
        if !gap.is_finite() || gap <= 0.0 {
            return Err(DefeqError::InvalidConfiguration(format!(
                "band gap at {temperature} K is {gap} eV; it must be positive"
            )));
        }
        Ok(gap)
    }
}

fn interpolate(points: &[[f64; 2]], temperature: f64) -> Result<f64, DefeqError> {
    let (first, last) = match (points.first(), points.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => {
            return Err(DefeqError::InvalidConfiguration(
                "tabulated band gap needs at least one point".to_string(),
            ));
        }
    };
    if points.windows(2).any(|w| w[1][0] <= w[0][0]) {
        return Err(DefeqError::InvalidConfiguration(
            "tabulated band gap temperatures must be strictly increasing".to_string(),
        ));
    }
    if temperature <= first[0] {
        return Ok(first[1]);
    }
    if temperature >= last[0] {
        return Ok(last[1]);
    }
    let upper = points.partition_point(|p| p[0] < temperature);
    let [t0, g0] = points[upper - 1];
    let [t1, g1] = points[upper];
    Ok(g0 + (g1 - g0) * (temperature - t0) / (t1 - t0))
}

/// Source of free-carrier densities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum DensityOfStates {
    /// Parabolic bands with density-of-states effective masses in units of the electron mass.
    EffectiveMass { electron_mass: f64, hole_mass: f64 },
    /// Total density of states (states/eV per cell, spin summed) sampled on an ascending energy grid
    /// sharing the VBM's energy reference, for a cell of `volume` Å^3.
    Tabulated {
        energies: Vec<f64>,
        states: Vec<f64>,
        volume: f64,
    },
}

/// States below this value (states/eV per cell) are treated as the gap when locating band edges in
/// a tabulated density of states.
const DOS_EDGE_THRESHOLD: f64 = 1e-3;

/// Valence band maximum, band gap and carrier model of the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectronicBandParameters {
    /// VBM eigenvalue (eV) used as the Fermi-level reference in formation energies.
    pub vbm: f64,
    pub band_gap: BandGapModel,
    pub density_of_states: DensityOfStates,
}

/// Band edges resolved for a single temperature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandEdges {
    pub temperature: f64,
    /// kT in eV.
    pub thermal_energy: f64,
    pub vbm: f64,
    pub band_gap: f64,
    tabulated: Option<TabulatedEdges>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TabulatedEdges {
    /// Last grid index belonging to the valence band.
    vbm_index: usize,
    /// First grid index belonging to the conduction band.
    cbm_index: usize,
    /// Rigid shift applied to conduction states so the gap follows `band_gap`.
    conduction_shift: f64,
}

impl ElectronicBandParameters {
    pub fn new(vbm: f64, band_gap: BandGapModel, density_of_states: DensityOfStates) -> Self {
        Self {
            vbm,
            band_gap,
            density_of_states,
        }
    }

    /// Checks the band description once, before any solving.
    pub fn validate(&self) -> Result<(), DefeqError> {
        if !self.vbm.is_finite() {
            return Err(DefeqError::InvalidConfiguration(
                "VBM must be finite".to_string(),
            ));
        }
        match &self.density_of_states {
            DensityOfStates::EffectiveMass {
                electron_mass,
                hole_mass,
            } => {
                if !(*electron_mass > 0.0 && *hole_mass > 0.0) {
                    return Err(DefeqError::InvalidConfiguration(
                        "effective masses must be positive".to_string(),
                    ));
                }
            }
            DensityOfStates::Tabulated {
                energies,
                states,
                volume,
            } => {
                if energies.len() != states.len() || energies.len() < 2 {
                    return Err(DefeqError::InvalidConfiguration(
                        "tabulated DOS needs matching energy and state arrays of length >= 2"
                            .to_string(),
                    ));
                }
                if energies.windows(2).any(|w| w[1] <= w[0]) {
                    return Err(DefeqError::InvalidConfiguration(
                        "tabulated DOS energies must be strictly increasing".to_string(),
                    ));
                }
                if states.iter().any(|s| !(*s >= 0.0)) || !(*volume > 0.0) {
                    return Err(DefeqError::InvalidConfiguration(
                        "tabulated DOS states must be non-negative and the volume positive"
                            .to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Resolves the temperature-dependent band edges.
    ///
    /// The band description is validated first, so a malformed density-of-states table is
    /// reported here rather than surfacing as missing carriers.
    pub fn edges_at(&self, temperature: f64) -> Result<BandEdges, DefeqError> {
        validate_temperature(temperature)?;
        self.validate()?;
        let band_gap = self.band_gap.at(temperature)?;
        let tabulated = match &self.density_of_states {
            DensityOfStates::EffectiveMass { .. } => None,
            DensityOfStates::Tabulated {
                energies, states, ..
            } => Some(self.tabulated_edges(energies, states, band_gap)?),
        };
        Ok(BandEdges {
            temperature,
            thermal_energy: thermal_energy(temperature),
            vbm: self.vbm,
            band_gap,
            tabulated,
        })
    }

    fn tabulated_edges(
        &self,
        energies: &[f64],
        states: &[f64],
        band_gap: f64,
    ) -> Result<TabulatedEdges, DefeqError> {
        let vbm_index = energies
            .iter()
            .rposition(|e| *e <= self.vbm + 1e-6)
            .ok_or_else(|| {
                DefeqError::InvalidConfiguration("tabulated DOS starts above the VBM".to_string())
            })?;
        let cbm_index = (vbm_index + 1..energies.len())
            .find(|&i| energies[i] > self.vbm && states[i] > DOS_EDGE_THRESHOLD)
            .ok_or_else(|| {
                DefeqError::InvalidConfiguration(
                    "tabulated DOS has no conduction states above the VBM".to_string(),
                )
            })?;
        Ok(TabulatedEdges {
            vbm_index,
            cbm_index,
            conduction_shift: self.vbm + band_gap - energies[cbm_index],
        })
    }

    /// Free electron and hole densities (cm^-3) at `fermi_level` (eV above the VBM).
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` if `edges` were resolved for a different density-of-states model,
    /// for instance a tabulated DOS evaluated with edges that carry no table positions.
    pub fn carrier_concentrations(
        &self,
        edges: &BandEdges,
        fermi_level: f64,
    ) -> Result<(f64, f64), DefeqError> {
        let kt = edges.thermal_energy;
        let carriers = match (&self.density_of_states, edges.tabulated) {
            (
                DensityOfStates::Tabulated {
                    energies,
                    states,
                    volume,
                },
                Some(tab),
            ) => {
                let absolute_fermi = edges.vbm + fermi_level;
                let to_cm3 = 1.0 / (volume * ANGSTROM3_TO_CM3);
                let holes: f64 = (0..=tab.vbm_index)
                    .map(|i| {
                        states[i]
                            * bin_width(energies, i)
                            * fermi_dirac::occupation((absolute_fermi - energies[i]) / kt)
                    })
                    .sum();
                let electrons: f64 = (tab.cbm_index..energies.len())
                    .map(|i| {
                        let energy = energies[i] + tab.conduction_shift;
                        states[i]
                            * bin_width(energies, i)
                            * fermi_dirac::occupation((energy - absolute_fermi) / kt)
                    })
                    .sum();
                (electrons * to_cm3, holes * to_cm3)
            }
            (
                DensityOfStates::EffectiveMass {
                    electron_mass,
                    hole_mass,
                },
                None,
            ) => {
                let thermal = (edges.temperature / EFFECTIVE_DOS_REFERENCE_TEMPERATURE).powf(1.5);
                let nc = EFFECTIVE_DOS_300K_CM3 * electron_mass.powf(1.5) * thermal;
                let nv = EFFECTIVE_DOS_300K_CM3 * hole_mass.powf(1.5) * thermal;
                let electrons = nc * fermi_dirac::half_integral((fermi_level - edges.band_gap) / kt);
                let holes = nv * fermi_dirac::half_integral(-fermi_level / kt);
                (electrons, holes)
            }
            (DensityOfStates::Tabulated { .. }, None) => {
                return Err(DefeqError::InvalidConfiguration(
                    "band edges carry no tabulated DOS positions; resolve them with the same band parameters"
                        .to_string(),
                ));
            }
            (DensityOfStates::EffectiveMass { .. }, Some(_)) => {
                return Err(DefeqError::InvalidConfiguration(
                    "band edges were resolved for a tabulated DOS but the bands use effective masses"
                        .to_string(),
                ));
            }
        };
        Ok(carriers)
    }
}

#[inline]
fn bin_width(energies: &[f64], i: usize) -> f64 {
    let lower = energies[i.saturating_sub(1)];
    let upper = energies[(i + 1).min(energies.len() - 1)];
    0.5 * (upper - lower)
}

/// Rejects temperatures that are not strictly positive and finite.
pub fn validate_temperature(temperature: f64) -> Result<(), DefeqError> {
    if temperature.is_finite() && temperature > 0.0 {
        Ok(())
    } else {
        Err(DefeqError::InvalidTemperature(temperature))
    }
}

/// Band edges memoised by temperature for the lifetime of one scan or one worker.
///
/// The cache is an ordinary value owned by its user; parallel workers each hold their own copy
/// rather than sharing one behind a lock.
#[derive(Debug, Default, Clone)]
pub struct BandEdgeCache {
    entries: HashMap<u64, BandEdges>,
}

impl BandEdgeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edges(
        &mut self,
        bands: &ElectronicBandParameters,
        temperature: f64,
    ) -> Result<BandEdges, DefeqError> {
        let key = temperature.to_bits();
        if let Some(edges) = self.entries.get(&key) {
            return Ok(*edges);
        }
        let edges = bands.edges_at(temperature)?;
        self.entries.insert(key, edges);
        Ok(edges)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
