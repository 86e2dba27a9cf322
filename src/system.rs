//! This module provides the `DefectSystem` input bundle and utilities for loading it from TOML or
//! JSON files.
//!
//! A system file carries everything an equilibrium calculation consumes: the host's band
//! description, the host and competing phases that bound the chemical potentials, optional solver
//! options, and the defect records with their charge states. Element keys in every map accept
//! either chemical symbols or atomic numbers.

use crate::bands::ElectronicBandParameters;
use crate::chempot::{ChemicalPotentialSpace, Phase};
use crate::elements::{ElementMap, deserialize_element_map, is_element_symbol};
use crate::error::DefeqError;
use crate::scan::EquilibriumSolver;
use crate::solver::SolverOptions;
use crate::types::DefectRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

/// A validated defect system: band parameters, phase data and defect records.
///
/// Loading always validates; a `DefectSystem` obtained from [`load_from_file`](Self::load_from_file)
/// or [`load_from_str`](Self::load_from_str) has unique defect names, at least one charge state
/// per defect, well-formed band parameters and a chemical potential for every element its defects
/// exchange with a reservoir.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectSystem {
    /// Optional label for reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub bands: ElectronicBandParameters,
    pub host: Phase,
    #[serde(default)]
    pub competing_phases: Vec<Phase>,
    /// Elements spanning the chemical-potential space. Defaults to those of the phases.
    #[serde(default)]
    pub elements: Vec<String>,
    /// Lower bounds (eV) for elements absent from the host, such as dopants.
    #[serde(default, deserialize_with = "deserialize_element_map")]
    pub lower_bounds: ElementMap,
    #[serde(default)]
    pub solver: SolverOptions,
    pub defects: Vec<DefectRecord>,
}

impl DefectSystem {
    /// Loads a system from a file, choosing JSON for a `.json` extension and TOML otherwise.
    ///
    /// # Errors
    ///
    /// Returns `DefeqError::IoError` if the file cannot be read, a deserialization error for
    /// malformed content, and any validation error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use defeq::DefectSystem;
    /// use std::path::Path;
    ///
    /// let system = DefectSystem::load_from_file(Path::new("zno.toml")).unwrap();
    /// ```
    pub fn load_from_file(path: &Path) -> Result<Self, DefeqError> {
        let content = std::fs::read_to_string(path).map_err(|io_error| DefeqError::IoError {
            path: path.to_path_buf(),
            source: io_error,
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::load_from_json_str(&content)
        } else {
            Self::load_from_str(&content)
        }
    }

    /// Parses and validates a system from a TOML string.
    pub fn load_from_str(toml_str: &str) -> Result<Self, DefeqError> {
        let system: Self = toml::from_str(toml_str)?;
        system.validated()
    }

    /// Parses and validates a system from a JSON string.
    pub fn load_from_json_str(json: &str) -> Result<Self, DefeqError> {
        let system: Self = serde_json::from_str(json)?;
        system.validated()
    }

    pub fn to_json_string(&self) -> Result<String, DefeqError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Elements the chemical-potential space is built over.
    pub fn chemical_elements(&self) -> Vec<String> {
        if !self.elements.is_empty() {
            let mut elements = self.elements.clone();
            elements.sort();
            elements.dedup();
            return elements;
        }
        let elements: BTreeSet<&String> = self
            .host
            .composition
            .keys()
            .chain(self.competing_phases.iter().flat_map(|p| p.composition.keys()))
            .collect();
        elements.into_iter().cloned().collect()
    }

    pub fn chemical_potential_space(&self) -> Result<ChemicalPotentialSpace, DefeqError> {
        ChemicalPotentialSpace::new(
            &self.elements,
            self.host.clone(),
            self.competing_phases.clone(),
            self.lower_bounds.clone(),
        )
    }

    /// An orchestrator over this system using the system's solver options.
    pub fn equilibrium_solver(&self) -> Result<EquilibriumSolver<'_>, DefeqError> {
        Ok(
            EquilibriumSolver::new(&self.defects, &self.bands, self.chemical_potential_space()?)
                .with_options(self.solver),
        )
    }

    /// Checks the system and fills kind-derived stoichiometry into charge states that lack it.
    pub fn validated(self) -> Result<Self, DefeqError> {
        if self.defects.is_empty() {
            return Err(DefeqError::NoDefects);
        }
        self.bands.validate()?;

        let elements = self.chemical_elements();
        let mut names = HashSet::new();
        for defect in &self.defects {
            if !names.insert(defect.name()) {
                return Err(DefeqError::DuplicateDefect(defect.name().to_string()));
            }
            validate_defect(defect, &elements)?;
        }

        let defects = self
            .defects
            .into_iter()
            .map(DefectRecord::with_default_stoichiometry)
            .collect();
        Ok(Self { defects, ..self })
    }
}

fn validate_defect(defect: &DefectRecord, elements: &[String]) -> Result<(), DefeqError> {
    let name = defect.name();
    if defect.charge_states().is_empty() {
        return Err(DefeqError::NoChargeStates(name.to_string()));
    }
    for element in defect.kind().elements() {
        if !is_element_symbol(element) {
            return Err(DefeqError::UnknownElement(element.to_string()));
        }
    }

    let mut charges = HashSet::new();
    for state in defect.charge_states() {
        if !charges.insert(state.charge()) {
            return Err(DefeqError::InvalidConfiguration(format!(
                "defect '{name}' lists charge state {} more than once",
                state.charge()
            )));
        }
        if !state.reference_energy().is_finite() || !state.correction().is_finite() {
            return Err(DefeqError::InvalidConfiguration(format!(
                "defect '{name}' charge {} has a non-finite energy",
                state.charge()
            )));
        }
        if !(state.site_density() > 0.0 && state.site_density().is_finite()) {
            return Err(DefeqError::InvalidConfiguration(format!(
                "defect '{name}' charge {} needs a positive site density",
                state.charge()
            )));
        }
        let exchanged = state
            .explicit_stoichiometry()
            .cloned()
            .unwrap_or_else(|| defect.kind().stoichiometry_delta());
        if let Some(element) = exchanged
            .iter()
            .find(|(element, delta)| **delta != 0.0 && !elements.contains(*element))
            .map(|(element, _)| element)
        {
            return Err(DefeqError::MissingChemicalPotential {
                element: element.clone(),
                defect: name.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bands::{BandGapModel, DensityOfStates};
    use crate::types::{ChargeStateRecord, DefectKind};

    const MINIMAL: &str = r#"
        name = "ZnO"

        [bands]
        vbm = 0.0
        band_gap = { model = "constant", gap = 3.4 }
        density_of_states = { model = "effective_mass", electron_mass = 0.24, hole_mass = 0.59 }

        [host]
        name = "ZnO"
        composition = { Zn = 1.0, "8" = 1.0 }
        formation_energy = -3.6

        [[defects]]
        name = "v_O"
        kind = { type = "vacancy", element = "O" }

        [[defects.charge_states]]
        charge = 2
        reference_energy = 0.2
        site_density = 4.2e22

        [[defects.charge_states]]
        charge = 0
        reference_energy = 4.6
        site_density = 4.2e22
    "#;

    #[test]
    fn test_load_from_str_applies_defaults() {
        let system = DefectSystem::load_from_str(MINIMAL).unwrap();
        assert_eq!(system.name.as_deref(), Some("ZnO"));
        assert_eq!(system.host.composition.get("O"), Some(&1.0));
        assert_eq!(system.solver, SolverOptions::default());
        let state = &system.defects[0].charge_states()[0];
        assert_eq!(state.stoichiometry_delta().get("O"), Some(&1.0));
        assert_eq!(system.chemical_elements(), vec!["O", "Zn"]);
    }

    #[test]
    fn test_json_round_trip() {
        let system = DefectSystem::load_from_str(MINIMAL).unwrap();
        let json = system.to_json_string().unwrap();
        let parsed = DefectSystem::load_from_json_str(&json).unwrap();
        assert_eq!(parsed, system);
    }

    fn system_with(defects: Vec<DefectRecord>) -> DefectSystem {
        DefectSystem {
            name: None,
            bands: ElectronicBandParameters::new(
                0.0,
                BandGapModel::Constant { gap: 3.4 },
                DensityOfStates::EffectiveMass {
                    electron_mass: 0.24,
                    hole_mass: 0.59,
                },
            ),
            host: Phase::new("ZnO", [("Zn", 1.0), ("O", 1.0)], -3.6),
            competing_phases: Vec::new(),
            elements: Vec::new(),
            lower_bounds: ElementMap::new(),
            solver: SolverOptions::default(),
            defects,
        }
    }

    fn vacancy(name: &str, element: &str) -> DefectRecord {
        DefectRecord::new(
            name,
            DefectKind::Vacancy {
                element: element.into(),
            },
        )
        .with_charge_state(ChargeStateRecord::new(0, 2.0, 4.2e22))
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            system_with(Vec::new()).validated(),
            Err(DefeqError::NoDefects)
        ));
        assert!(matches!(
            system_with(vec![vacancy("v_O", "O"), vacancy("v_O", "O")]).validated(),
            Err(DefeqError::DuplicateDefect(name)) if name == "v_O"
        ));
        assert!(matches!(
            system_with(vec![DefectRecord::new(
                "v_O",
                DefectKind::Vacancy {
                    element: "O".into()
                }
            )])
            .validated(),
            Err(DefeqError::NoChargeStates(_))
        ));
        assert!(matches!(
            system_with(vec![vacancy("v_S", "S")]).validated(),
            Err(DefeqError::MissingChemicalPotential { element, .. }) if element == "S"
        ));
        assert!(matches!(
            system_with(vec![vacancy("v_Q", "Qq")]).validated(),
            Err(DefeqError::UnknownElement(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_element_keys() {
        let broken = MINIMAL.replace("Zn = 1.0", "Xx = 1.0");
        assert!(matches!(
            DefectSystem::load_from_str(&broken),
            Err(DefeqError::TomlDeserialization(_))
        ));
    }

    #[test]
    fn test_equilibrium_solver_uses_system_options() {
        let mut system = DefectSystem::load_from_str(MINIMAL).unwrap();
        system.solver.max_iterations = 17;
        let solver = system.equilibrium_solver().unwrap();
        assert_eq!(solver.options().max_iterations, 17);
        assert_eq!(solver.space().vertices().len(), 2);
    }
}
