//! This module defines the core data records consumed and produced by the defeq library.
//!
//! Defect records and their charge states arrive pre-computed from upstream parsing: reference
//! energies, stoichiometry changes, electrostatic corrections, degeneracies and site densities.
//! They are immutable once built; the solver only ever borrows them. Results are plain owned
//! values assembled once per solve.

use crate::elements::{ElementMap, deserialize_element_map, deserialize_optional_element_map};
use crate::math::constants::ANGSTROM3_TO_CM3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The closed set of point-defect kinds.
///
/// Every kind shares the same capability set (stoichiometry change, degeneracy, site density),
/// carried by its charge states; the kind itself only fixes which atoms are exchanged with the
/// chemical reservoirs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DefectKind {
    /// A host atom of `element` removed from its site.
    Vacancy { element: String },
    /// A host atom of `removed` replaced by an atom of `added`.
    Substitution { added: String, removed: String },
    /// An extra atom of `element` placed on an interstitial site.
    Interstitial { element: String },
}

impl DefectKind {
    /// Atoms transferred to the chemical reservoirs when the defect forms.
    ///
    /// Positive entries are atoms removed from the host (vacancy element, substituted host atom);
    /// negative entries are atoms taken from a reservoir (interstitial, substituting species).
    pub fn stoichiometry_delta(&self) -> ElementMap {
        let mut delta = ElementMap::new();
        match self {
            DefectKind::Vacancy { element } => {
                delta.insert(element.clone(), 1.0);
            }
            DefectKind::Interstitial { element } => {
                delta.insert(element.clone(), -1.0);
            }
            DefectKind::Substitution { added, removed } => {
                *delta.entry(removed.clone()).or_insert(0.0) += 1.0;
                *delta.entry(added.clone()).or_insert(0.0) -= 1.0;
                delta.retain(|_, n| *n != 0.0);
            }
        }
        delta
    }

    /// Elements named by the kind.
    pub fn elements(&self) -> Vec<&str> {
        match self {
            DefectKind::Vacancy { element } | DefectKind::Interstitial { element } => {
                vec![element.as_str()]
            }
            DefectKind::Substitution { added, removed } => vec![added.as_str(), removed.as_str()],
        }
    }
}

/// Optional temperature dependence of a degeneracy factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum DegeneracyScaling {
    /// `g(T) = g · (T / reference_temperature)^exponent`.
    PowerLaw {
        reference_temperature: f64,
        exponent: f64,
    },
    /// `g(T) = g · exp(entropy_kb)`, a formation entropy in units of k_B.
    Entropic { entropy_kb: f64 },
}

/// Statistical weight of a charge state: orientational × spin, optionally temperature dependent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Degeneracy {
    #[serde(default = "unit")]
    orientational: f64,
    #[serde(default = "unit")]
    spin: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scaling: Option<DegeneracyScaling>,
}

fn unit() -> f64 {
    1.0
}

impl Default for Degeneracy {
    fn default() -> Self {
        Self {
            orientational: 1.0,
            spin: 1.0,
            scaling: None,
        }
    }
}

impl Degeneracy {
    pub fn new(orientational: f64, spin: f64) -> Self {
        Self {
            orientational,
            spin,
            scaling: None,
        }
    }

    pub fn with_scaling(self, scaling: DegeneracyScaling) -> Self {
        Self {
            scaling: Some(scaling),
            ..self
        }
    }

    pub fn orientational(&self) -> f64 {
        self.orientational
    }

    pub fn spin(&self) -> f64 {
        self.spin
    }

    pub fn scaling(&self) -> Option<DegeneracyScaling> {
        self.scaling
    }

    /// Natural log of the degeneracy at `temperature`.
    ///
    /// Working in log space keeps entropic factors from overflowing; the result is NaN or `-inf`
    /// when the underlying factor is not strictly positive, which callers treat as a numerical
    /// instability.
    pub fn ln_at(&self, temperature: f64) -> f64 {
        let base = (self.orientational * self.spin).ln();
        match self.scaling {
            None => base,
            Some(DegeneracyScaling::PowerLaw {
                reference_temperature,
                exponent,
            }) => base + exponent * (temperature / reference_temperature).ln(),
            Some(DegeneracyScaling::Entropic { entropy_kb }) => base + entropy_kb,
        }
    }

    /// The degeneracy factor at `temperature`.
    pub fn at(&self, temperature: f64) -> f64 {
        self.ln_at(temperature).exp()
    }
}

/// One charge state of a defect, with every quantity needed to evaluate its formation energy and
/// equilibrium concentration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeStateRecord {
    charge: i32,
    /// Formation energy at E_F = 0 (VBM reference excluded), with all chemical potentials at their
    /// references. In practice the corrected defect/bulk supercell energy difference.
    reference_energy: f64,
    /// Reference (elemental) energies added to the relative chemical potentials.
    #[serde(default, deserialize_with = "deserialize_element_map")]
    reference_potentials: ElementMap,
    /// Atoms transferred to the reservoirs (positive when removed from the host). `None` defers to
    /// the defect kind; an explicit empty map means no atoms are exchanged.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_element_map"
    )]
    stoichiometry_delta: Option<ElementMap>,
    #[serde(default)]
    correction: f64,
    #[serde(default)]
    degeneracy: Degeneracy,
    /// Equivalent lattice sites per cm^3.
    site_density: f64,
}

impl ChargeStateRecord {
    pub fn new(charge: i32, reference_energy: f64, site_density: f64) -> Self {
        Self {
            charge,
            reference_energy,
            reference_potentials: ElementMap::new(),
            stoichiometry_delta: None,
            correction: 0.0,
            degeneracy: Degeneracy::default(),
            site_density,
        }
    }

    /// Site density (cm^-3) from a per-cell multiplicity and the cell volume in Å^3.
    pub fn site_density_from_cell(multiplicity: f64, volume_angstrom3: f64) -> f64 {
        multiplicity / (volume_angstrom3 * ANGSTROM3_TO_CM3)
    }

    /// Sets the exchanged atoms explicitly. An empty `delta` is kept as "no exchange" and is not
    /// replaced by the defect kind's default.
    pub fn with_stoichiometry<I, S>(self, delta: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            stoichiometry_delta: Some(delta.into_iter().map(|(e, n)| (e.into(), n)).collect()),
            ..self
        }
    }

    pub fn with_reference_potentials<I, S>(self, references: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            reference_potentials: references.into_iter().map(|(e, n)| (e.into(), n)).collect(),
            ..self
        }
    }

    pub fn with_degeneracy(self, degeneracy: Degeneracy) -> Self {
        Self { degeneracy, ..self }
    }

    /// Returns a copy of this record carrying a different electrostatic correction.
    pub fn with_correction(&self, correction: f64) -> Self {
        Self {
            correction,
            ..self.clone()
        }
    }

    pub fn charge(&self) -> i32 {
        self.charge
    }

    pub fn reference_energy(&self) -> f64 {
        self.reference_energy
    }

    pub fn reference_potentials(&self) -> &ElementMap {
        &self.reference_potentials
    }

    /// Exchanged atoms, empty when none were set.
    pub fn stoichiometry_delta(&self) -> &ElementMap {
        static NO_EXCHANGE: ElementMap = ElementMap::new();
        self.stoichiometry_delta.as_ref().unwrap_or(&NO_EXCHANGE)
    }

    /// The stoichiometry set on this record, or `None` when it defers to the defect kind.
    pub fn explicit_stoichiometry(&self) -> Option<&ElementMap> {
        self.stoichiometry_delta.as_ref()
    }

    pub fn correction(&self) -> f64 {
        self.correction
    }

    pub fn degeneracy(&self) -> &Degeneracy {
        &self.degeneracy
    }

    pub fn site_density(&self) -> f64 {
        self.site_density
    }
}

/// A point defect and all of its charge states.
///
/// `name` is the defect's identity and is kept stable across serialization. Defects that carry the
/// same `site_group` compete for one pool of lattice sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectRecord {
    name: String,
    kind: DefectKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    site_group: Option<String>,
    charge_states: Vec<ChargeStateRecord>,
}

impl DefectRecord {
    pub fn new(name: impl Into<String>, kind: DefectKind) -> Self {
        Self {
            name: name.into(),
            kind,
            site_group: None,
            charge_states: Vec::new(),
        }
    }

    pub fn with_site_group(self, group: impl Into<String>) -> Self {
        Self {
            site_group: Some(group.into()),
            ..self
        }
    }

    /// Adds a charge state. A charge state whose stoichiometry was never set takes the one implied
    /// by the defect kind; an explicitly empty one is kept as is.
    pub fn with_charge_state(mut self, state: ChargeStateRecord) -> Self {
        let state = if state.stoichiometry_delta.is_none() {
            state.with_stoichiometry(self.kind.stoichiometry_delta())
        } else {
            state
        };
        self.charge_states.push(state);
        self
    }

    /// Fills in kind-derived stoichiometry for any charge state that lacks it.
    pub(crate) fn with_default_stoichiometry(self) -> Self {
        let Self {
            name,
            kind,
            site_group,
            charge_states,
        } = self;
        charge_states.into_iter().fold(
            Self {
                name,
                kind,
                site_group,
                charge_states: Vec::new(),
            },
            |record, state| record.with_charge_state(state),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &DefectKind {
        &self.kind
    }

    pub fn site_group(&self) -> Option<&str> {
        self.site_group.as_deref()
    }

    pub fn charge_states(&self) -> &[ChargeStateRecord] {
        &self.charge_states
    }
}

/// A set of relative chemical potentials (eV), one per element, referenced to the elemental phases.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChemicalPotentialPoint {
    #[serde(deserialize_with = "deserialize_element_map")]
    potentials: ElementMap,
}

impl ChemicalPotentialPoint {
    pub fn new<I, S>(potentials: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            potentials: potentials.into_iter().map(|(e, mu)| (e.into(), mu)).collect(),
        }
    }

    pub fn get(&self, element: &str) -> Option<f64> {
        self.potentials.get(element).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.potentials.iter().map(|(e, mu)| (e.as_str(), *mu))
    }

    pub fn len(&self) -> usize {
        self.potentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.potentials.is_empty()
    }

    /// A compact `El=μ` label, e.g. `O=-1.2000 Zn=0.0000`.
    pub fn label(&self) -> String {
        self.potentials
            .iter()
            .map(|(e, mu)| format!("{e}={mu:.4}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Concentration of one (defect, charge) pair in a solved equilibrium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectConcentration {
    pub defect: String,
    pub charge: i32,
    /// Formation energy (eV) at the solved Fermi level.
    pub formation_energy: f64,
    /// Number density (cm^-3).
    pub concentration: f64,
}

/// Where a pinned concentration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixedOrigin {
    /// Supplied by the caller.
    User,
    /// Frozen in from the anneal step of an anneal/quench solve.
    Quenched,
}

/// A concentration that was held fixed during a solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedConcentration {
    pub defect: String,
    /// `None` when the defect total is pinned; `Some(q)` when a single charge state is pinned.
    pub charge: Option<i32>,
    pub concentration: f64,
    pub origin: FixedOrigin,
}

/// Constraints that were active for a solve.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConstraintMetadata {
    pub fixed: Vec<FixedConcentration>,
    /// Anneal temperature (K) when the result is the quench step of an anneal/quench solve.
    pub anneal_temperature: Option<f64>,
    /// Fixed background charge density (e cm^-3), e.g. an effective dopant concentration.
    pub background_charge: f64,
}

/// The self-consistent equilibrium at one temperature and chemical-potential point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquilibriumResult {
    /// Temperature (K) at which the Fermi level was solved.
    pub temperature: f64,
    pub chemical_potentials: ChemicalPotentialPoint,
    /// Fermi level (eV) relative to the VBM.
    pub fermi_level: f64,
    /// Band gap (eV) at `temperature`.
    pub band_gap: f64,
    /// Free electron density (cm^-3).
    pub electron_concentration: f64,
    /// Free hole density (cm^-3).
    pub hole_concentration: f64,
    pub defects: Vec<DefectConcentration>,
    /// Net charge density (e cm^-3) left at the solved Fermi level.
    pub residual_charge: f64,
    /// `residual_charge` divided by the sum of the magnitudes of all charge contributions.
    pub relative_residual: f64,
    pub iterations: u32,
    pub constraints: ConstraintMetadata,
}

impl EquilibriumResult {
    /// Total concentration of a defect summed over its charge states, if present.
    pub fn defect_total(&self, defect: &str) -> Option<f64> {
        let mut states = self.defects.iter().filter(|d| d.defect == defect).peekable();
        states.peek()?;
        Some(states.map(|d| d.concentration).sum())
    }

    /// Concentration of a single charge state, if present.
    pub fn charge_state_concentration(&self, defect: &str, charge: i32) -> Option<f64> {
        self.defects
            .iter()
            .find(|d| d.defect == defect && d.charge == charge)
            .map(|d| d.concentration)
    }

    /// Net charge density carried by defects (e cm^-3).
    pub fn total_defect_charge(&self) -> f64 {
        self.defects
            .iter()
            .map(|d| d.charge as f64 * d.concentration)
            .sum()
    }

    /// Total concentration per defect, in result order.
    pub fn defect_totals(&self) -> BTreeMap<&str, f64> {
        let mut totals = BTreeMap::new();
        for d in &self.defects {
            *totals.entry(d.defect.as_str()).or_insert(0.0) += d.concentration;
        }
        totals
    }
}
