//! Pinned concentrations and background charge for constrained neutrality solves.

use crate::error::DefeqError;
use crate::types::{ConstraintMetadata, DefectRecord, FixedConcentration, FixedOrigin};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Concentrations held fixed while the Fermi level is solved.
///
/// A defect can be pinned either as a total (redistributed over its charge states with relative
/// Boltzmann weights at the solve temperature) or state by state. Every other defect
/// equilibrates freely. `background_charge` adds a fixed charge density, e.g. an effective
/// shallow-dopant concentration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default)]
    fixed: Vec<FixedConcentration>,
    #[serde(default)]
    background_charge: f64,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the total concentration (cm^-3) of `defect`.
    pub fn fix_total(mut self, defect: impl Into<String>, concentration: f64) -> Self {
        self.fixed.push(FixedConcentration {
            defect: defect.into(),
            charge: None,
            concentration,
            origin: FixedOrigin::User,
        });
        self
    }

    /// Pins the concentration (cm^-3) of a single charge state.
    pub fn fix_charge_state(
        mut self,
        defect: impl Into<String>,
        charge: i32,
        concentration: f64,
    ) -> Self {
        self.fixed.push(FixedConcentration {
            defect: defect.into(),
            charge: Some(charge),
            concentration,
            origin: FixedOrigin::User,
        });
        self
    }

    /// Sets the background charge density (e cm^-3).
    pub fn with_background_charge(mut self, background_charge: f64) -> Self {
        self.background_charge = background_charge;
        self
    }

    pub(crate) fn push_quenched(&mut self, defect: &str, charge: Option<i32>, concentration: f64) {
        self.fixed.push(FixedConcentration {
            defect: defect.to_string(),
            charge,
            concentration,
            origin: FixedOrigin::Quenched,
        });
    }

    pub fn fixed(&self) -> &[FixedConcentration] {
        &self.fixed
    }

    pub fn background_charge(&self) -> f64 {
        self.background_charge
    }

    pub fn is_empty(&self) -> bool {
        self.fixed.is_empty() && self.background_charge == 0.0
    }

    /// Names of defects with at least one pinned concentration.
    pub fn pinned_defects(&self) -> BTreeSet<&str> {
        self.fixed.iter().map(|f| f.defect.as_str()).collect()
    }

    /// Checks every pin against the defect set.
    ///
    /// # Errors
    ///
    /// `UnknownDefect` for a name outside `defects`; `InvalidConfiguration` for an unknown charge
    /// state, a negative or non-finite value, a non-finite background, or a defect pinned twice.
    pub fn validate(&self, defects: &[DefectRecord]) -> Result<(), DefeqError> {
        if !self.background_charge.is_finite() {
            return Err(DefeqError::InvalidConfiguration(format!(
                "background charge must be finite, got {}",
                self.background_charge
            )));
        }
        let mut seen: BTreeSet<(&str, Option<i32>)> = BTreeSet::new();
        for fixed in &self.fixed {
            let defect = defects
                .iter()
                .find(|d| d.name() == fixed.defect)
                .ok_or_else(|| DefeqError::UnknownDefect(fixed.defect.clone()))?;
            if let Some(charge) = fixed.charge {
                if !defect.charge_states().iter().any(|s| s.charge() == charge) {
                    return Err(DefeqError::InvalidConfiguration(format!(
                        "defect '{}' has no charge state {charge:+}",
                        fixed.defect
                    )));
                }
            }
            if !(fixed.concentration.is_finite() && fixed.concentration >= 0.0) {
                return Err(DefeqError::InvalidConfiguration(format!(
                    "pinned concentration of '{}' must be finite and non-negative, got {}",
                    fixed.defect, fixed.concentration
                )));
            }
            let conflicting = seen.contains(&(fixed.defect.as_str(), fixed.charge))
                || (fixed.charge.is_none()
                    && seen.iter().any(|(name, _)| *name == fixed.defect))
                || seen.contains(&(fixed.defect.as_str(), None));
            if conflicting {
                return Err(DefeqError::InvalidConfiguration(format!(
                    "defect '{}' is pinned more than once",
                    fixed.defect
                )));
            }
            seen.insert((fixed.defect.as_str(), fixed.charge));
        }
        Ok(())
    }

    /// Metadata describing these constraints on a result.
    pub fn metadata(&self, anneal_temperature: Option<f64>) -> ConstraintMetadata {
        ConstraintMetadata {
            fixed: self.fixed.clone(),
            anneal_temperature,
            background_charge: self.background_charge,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChargeStateRecord, DefectKind};

    fn defects() -> Vec<DefectRecord> {
        vec![
            DefectRecord::new(
                "v_O",
                DefectKind::Vacancy {
                    element: "O".into(),
                },
            )
            .with_charge_state(ChargeStateRecord::new(0, 2.0, 1e22))
            .with_charge_state(ChargeStateRecord::new(2, 1.0, 1e22)),
        ]
    }

    #[test]
    fn test_valid_constraints_pass() {
        let constraints = Constraints::new()
            .fix_charge_state("v_O", 2, 1e15)
            .fix_charge_state("v_O", 0, 1e14)
            .with_background_charge(-1e16);
        assert!(constraints.validate(&defects()).is_ok());
        assert_eq!(constraints.pinned_defects().len(), 1);
    }

    #[test]
    fn test_unknown_defect_is_rejected() {
        let constraints = Constraints::new().fix_total("v_Zn", 1e15);
        assert!(matches!(
            constraints.validate(&defects()),
            Err(DefeqError::UnknownDefect(name)) if name == "v_Zn"
        ));
    }

    #[test]
    fn test_unknown_charge_state_is_rejected() {
        let constraints = Constraints::new().fix_charge_state("v_O", 1, 1e15);
        assert!(matches!(
            constraints.validate(&defects()),
            Err(DefeqError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_total_and_state_pins_conflict() {
        let constraints = Constraints::new()
            .fix_charge_state("v_O", 2, 1e15)
            .fix_total("v_O", 1e16);
        assert!(constraints.validate(&defects()).is_err());

        let reversed = Constraints::new()
            .fix_total("v_O", 1e16)
            .fix_charge_state("v_O", 2, 1e15);
        assert!(reversed.validate(&defects()).is_err());
    }

    #[test]
    fn test_negative_concentration_is_rejected() {
        let constraints = Constraints::new().fix_total("v_O", -1.0);
        assert!(constraints.validate(&defects()).is_err());
    }
}
