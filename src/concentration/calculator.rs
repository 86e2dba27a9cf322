use super::normalization::{SiteCompetition, SitePool};
use crate::bands::BandEdges;
use crate::error::DefeqError;
use crate::formation::FormationEnergyModel;
use crate::math::log_sum_exp_indexed;
use crate::solver::Constraints;
use crate::types::{ChemicalPotentialPoint, DefectConcentration, DefectRecord};
use std::collections::BTreeMap;
use std::ops::Range;

/// Pinned occupations may exceed the available sites by this much before it is an error.
const SITE_OVERFILL_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
struct PreparedState {
    charge: i32,
    /// Formation energy at E_F = 0.
    base_energy: f64,
    ln_degeneracy: f64,
    site_density: f64,
    ln_site_density: f64,
    pinned: Option<f64>,
}

#[derive(Debug, Clone)]
struct Family {
    states: Range<usize>,
    members: Vec<usize>,
    fixed_total: Option<f64>,
}

/// Net and absolute defect charge densities (e cm^-3) at one Fermi level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChargeBalance {
    /// `Σ q n_q`.
    pub net: f64,
    /// `Σ |q| n_q`.
    pub magnitude: f64,
}

/// Turns formation energies into defect number densities at a fixed temperature and
/// chemical-potential point.
///
/// Construction resolves everything that does not depend on the Fermi level (formation energies
/// at E_F = 0, log degeneracies, pinned concentrations and site pools) into flat tables; each
/// evaluation then costs one multiply-add per charge state plus the pool normalisation, and
/// reuses internal buffers.
#[derive(Debug, Clone)]
pub struct ConcentrationCalculator<'a> {
    defects: &'a [DefectRecord],
    states: Vec<PreparedState>,
    families: Vec<Family>,
    pools: Vec<SitePool>,
    thermal_energy: f64,
    ln_values: Vec<f64>,
    concentrations: Vec<f64>,
}

impl<'a> ConcentrationCalculator<'a> {
    /// Prepares the calculator for one temperature (through `edges`) and chemical-potential point.
    ///
    /// Defects without a `site_group` are treated as dilute; defects sharing a group are
    /// normalised with `strategy`.
    ///
    /// # Errors
    ///
    /// Configuration errors for missing chemical potentials or invalid constraints, and
    /// `NumericalInstability` for non-finite formation energies or degeneracies that are not
    /// strictly positive.
    pub fn new(
        defects: &'a [DefectRecord],
        point: &ChemicalPotentialPoint,
        edges: &BandEdges,
        constraints: &Constraints,
        strategy: SiteCompetition,
    ) -> Result<Self, DefeqError> {
        if defects.is_empty() {
            return Err(DefeqError::NoDefects);
        }
        constraints.validate(defects)?;

        let model = FormationEnergyModel::new(point, edges.vbm);
        let mut states = Vec::new();
        let mut families = Vec::with_capacity(defects.len());

        for defect in defects {
            if defect.charge_states().is_empty() {
                return Err(DefeqError::NoChargeStates(defect.name().to_string()));
            }
            let start = states.len();
            for state in defect.charge_states() {
                let ln_degeneracy = state.degeneracy().ln_at(edges.temperature);
                if !ln_degeneracy.is_finite() {
                    return Err(DefeqError::NumericalInstability(format!(
                        "degeneracy of {} (q = {}) at {} K is not strictly positive",
                        defect.name(),
                        state.charge(),
                        edges.temperature
                    )));
                }
                if !(state.site_density().is_finite() && state.site_density() > 0.0) {
                    return Err(DefeqError::InvalidConfiguration(format!(
                        "site density of {} (q = {}) must be positive",
                        defect.name(),
                        state.charge()
                    )));
                }
                let pinned = constraints
                    .fixed()
                    .iter()
                    .find(|f| f.defect == defect.name() && f.charge == Some(state.charge()))
                    .map(|f| f.concentration);
                states.push(PreparedState {
                    charge: state.charge(),
                    base_energy: model.fermi_independent(defect, state)?,
                    ln_degeneracy,
                    site_density: state.site_density(),
                    ln_site_density: state.site_density().ln(),
                    pinned,
                });
            }
            let fixed_total = constraints
                .fixed()
                .iter()
                .find(|f| f.defect == defect.name() && f.charge.is_none())
                .map(|f| f.concentration);
            families.push(Family {
                states: start..states.len(),
                members: (start..states.len()).collect(),
                fixed_total,
            });
        }

        let pools = build_pools(defects, &states, &families, strategy);
        let n_states = states.len();
        Ok(Self {
            defects,
            states,
            families,
            pools,
            thermal_energy: edges.thermal_energy,
            ln_values: vec![0.0; n_states],
            concentrations: vec![0.0; n_states],
        })
    }

    pub fn defects(&self) -> &'a [DefectRecord] {
        self.defects
    }

    /// Number densities (cm^-3) of every charge state at `fermi_level`, flattened in defect order
    /// and then charge-state order.
    ///
    /// # Errors
    ///
    /// `NumericalInstability` if any concentration comes out negative or non-finite, and
    /// `InvalidConfiguration` if pinned concentrations fill more sites than a pool has.
    pub fn concentrations(&mut self, fermi_level: f64) -> Result<&[f64], DefeqError> {
        let Self {
            defects,
            states,
            families,
            pools,
            thermal_energy,
            ln_values,
            concentrations,
        } = self;
        let kt = *thermal_energy;

        for (ln_value, state) in ln_values.iter_mut().zip(states.iter()) {
            *ln_value =
                state.ln_degeneracy - (state.base_energy + state.charge as f64 * fermi_level) / kt;
            if ln_value.is_nan() {
                return Err(DefeqError::NumericalInstability(format!(
                    "Boltzmann weight is NaN at E_F = {fermi_level} eV"
                )));
            }
        }

        for family in families.iter() {
            match family.fixed_total {
                Some(total) => {
                    // Relative weights m_q w_q with m_q the site density.
                    for &i in &family.members {
                        ln_values[i] += states[i].ln_site_density;
                    }
                    let ln_norm = log_sum_exp_indexed(ln_values, &family.members);
                    for &i in &family.members {
                        concentrations[i] = if total == 0.0 {
                            0.0
                        } else {
                            total * (ln_values[i] - ln_norm).exp()
                        };
                    }
                }
                None => {
                    for i in family.states.clone() {
                        if let Some(pinned) = states[i].pinned {
                            concentrations[i] = pinned;
                        }
                    }
                }
            }
        }

        for pool in pools.iter() {
            let occupied: f64 = pool
                .pinned
                .iter()
                .map(|&i| concentrations[i] / states[i].site_density)
                .sum();
            let available = 1.0 - occupied;
            if available < -SITE_OVERFILL_TOLERANCE {
                return Err(DefeqError::InvalidConfiguration(format!(
                    "pinned concentrations occupy {occupied:.6} of the sites in '{}'",
                    pool.label
                )));
            }
            pool.normalise(ln_values, available.max(0.0));
            for &i in &pool.free {
                concentrations[i] = states[i].site_density * ln_values[i].exp();
            }
        }

        if let Some(i) = concentrations
            .iter()
            .position(|n| !(n.is_finite() && *n >= 0.0))
        {
            let (name, charge) = locate(defects, families, states, i);
            return Err(DefeqError::NumericalInstability(format!(
                "concentration of {name} (q = {charge}) is {} at E_F = {fermi_level} eV",
                concentrations[i]
            )));
        }
        Ok(concentrations.as_slice())
    }

    /// Net and absolute defect charge at `fermi_level`.
    pub fn charge_balance(&mut self, fermi_level: f64) -> Result<ChargeBalance, DefeqError> {
        self.concentrations(fermi_level)?;
        let (net, magnitude) = self
            .states
            .iter()
            .zip(&self.concentrations)
            .fold((0.0, 0.0), |(net, magnitude), (state, n)| {
                let q = state.charge as f64;
                (net + q * n, magnitude + q.abs() * n)
            });
        Ok(ChargeBalance { net, magnitude })
    }

    /// Per (defect, charge) concentrations and formation energies at `fermi_level`.
    pub fn defect_concentrations(
        &mut self,
        fermi_level: f64,
    ) -> Result<Vec<DefectConcentration>, DefeqError> {
        self.concentrations(fermi_level)?;
        let mut results = Vec::with_capacity(self.states.len());
        for (defect, family) in self.defects.iter().zip(&self.families) {
            for i in family.states.clone() {
                let state = &self.states[i];
                results.push(DefectConcentration {
                    defect: defect.name().to_string(),
                    charge: state.charge,
                    formation_energy: state.base_energy + state.charge as f64 * fermi_level,
                    concentration: self.concentrations[i],
                });
            }
        }
        Ok(results)
    }

    /// Total concentration of each defect at `fermi_level`, in defect order.
    pub fn defect_totals(&mut self, fermi_level: f64) -> Result<Vec<f64>, DefeqError> {
        self.concentrations(fermi_level)?;
        Ok(self
            .families
            .iter()
            .map(|family| self.concentrations[family.states.clone()].iter().sum())
            .collect())
    }
}

fn build_pools(
    defects: &[DefectRecord],
    states: &[PreparedState],
    families: &[Family],
    strategy: SiteCompetition,
) -> Vec<SitePool> {
    let mut grouped: BTreeMap<&str, SitePool> = BTreeMap::new();
    let mut isolated = Vec::new();

    for (defect, family) in defects.iter().zip(families) {
        let (free, pinned): (Vec<usize>, Vec<usize>) = family
            .states
            .clone()
            .partition(|&i| family.fixed_total.is_none() && states[i].pinned.is_none());
        match defect.site_group() {
            Some(group) => grouped
                .entry(group)
                .or_insert_with(|| SitePool::new(group.to_string(), strategy))
                .push_family(free, pinned),
            None => {
                let mut pool = SitePool::new(defect.name().to_string(), SiteCompetition::Dilute);
                pool.push_family(free, pinned);
                isolated.push(pool);
            }
        }
    }

    grouped.into_values().chain(isolated).collect()
}

fn locate<'d>(
    defects: &'d [DefectRecord],
    families: &[Family],
    states: &[PreparedState],
    index: usize,
) -> (&'d str, i32) {
    let name = families
        .iter()
        .position(|f| f.states.contains(&index))
        .map_or("?", |f| defects[f].name());
    (name, states[index].charge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bands::{BandGapModel, DensityOfStates, ElectronicBandParameters};
    use crate::math::constants::thermal_energy;
    use crate::types::{ChargeStateRecord, Degeneracy, DefectKind};
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    const SITES: f64 = 1e22;

    fn edges(temperature: f64) -> BandEdges {
        ElectronicBandParameters::new(
            0.0,
            BandGapModel::Constant { gap: 2.0 },
            DensityOfStates::EffectiveMass {
                electron_mass: 1.0,
                hole_mass: 1.0,
            },
        )
        .edges_at(temperature)
        .unwrap()
    }

    fn vacancy(name: &str, states: &[(i32, f64)]) -> DefectRecord {
        states.iter().fold(
            DefectRecord::new(
                name,
                DefectKind::Vacancy {
                    element: "O".into(),
                },
            ),
            |record, &(q, e)| record.with_charge_state(ChargeStateRecord::new(q, e, SITES)),
        )
    }

    fn point() -> ChemicalPotentialPoint {
        ChemicalPotentialPoint::new([("O", 0.0)])
    }

    #[test]
    fn test_dilute_concentration_is_boltzmann() {
        let defects = vec![vacancy("v_O", &[(0, 1.0)])];
        let edges = edges(1000.0);
        let mut calc = ConcentrationCalculator::new(
            &defects,
            &point(),
            &edges,
            &Constraints::new(),
            SiteCompetition::Global,
        )
        .unwrap();
        let n = calc.concentrations(0.5).unwrap()[0];
        assert_relative_eq!(
            n,
            SITES * (-1.0 / thermal_energy(1000.0)).exp(),
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_degeneracy_scales_concentration() {
        let defects = vec![
            DefectRecord::new(
                "v_O",
                DefectKind::Vacancy {
                    element: "O".into(),
                },
            )
            .with_charge_state(
                ChargeStateRecord::new(1, 1.0, SITES).with_degeneracy(Degeneracy::new(2.0, 2.0)),
            ),
        ];
        let edges = edges(800.0);
        let mut calc = ConcentrationCalculator::new(
            &defects,
            &point(),
            &edges,
            &Constraints::new(),
            SiteCompetition::Global,
        )
        .unwrap();
        let expected = 4.0 * SITES * (-(1.0 + 0.3) / thermal_energy(800.0)).exp();
        assert_relative_eq!(
            calc.concentrations(0.3).unwrap()[0],
            expected,
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_site_group_competition_bounds_occupation() {
        let defects = vec![
            vacancy("v_O", &[(0, -1.0)]).with_site_group("O"),
            DefectRecord::new(
                "F_O",
                DefectKind::Substitution {
                    added: "F".into(),
                    removed: "O".into(),
                },
            )
            .with_site_group("O")
            .with_charge_state(ChargeStateRecord::new(1, -1.0, SITES)),
        ];
        let point = ChemicalPotentialPoint::new([("O", 0.0), ("F", 0.0)]);
        let edges = edges(1000.0);
        let mut calc = ConcentrationCalculator::new(
            &defects,
            &point,
            &edges,
            &Constraints::new(),
            SiteCompetition::Global,
        )
        .unwrap();
        let totals = calc.defect_totals(0.0).unwrap();
        assert!(totals.iter().sum::<f64>() <= SITES * (1.0 + 1e-12));
        assert_relative_eq!(totals[0], totals[1], max_relative = 1e-12);
    }

    #[test]
    fn test_fixed_total_is_redistributed_by_relative_weights() {
        let defects = vec![vacancy("v_O", &[(0, 1.0), (2, 0.5)])];
        let edges = edges(600.0);
        let constraints = Constraints::new().fix_total("v_O", 1e16);
        let mut calc = ConcentrationCalculator::new(
            &defects,
            &point(),
            &edges,
            &constraints,
            SiteCompetition::Global,
        )
        .unwrap();
        let fermi_level = 0.25;
        let n = calc.concentrations(fermi_level).unwrap().to_vec();
        assert_relative_eq!(n[0] + n[1], 1e16, max_relative = 1e-12);
        let kt = thermal_energy(600.0);
        let ratio = (-(0.5 + 2.0 * fermi_level - 1.0) / kt).exp();
        assert_relative_eq!(n[1] / n[0], ratio, max_relative = 1e-9);
    }

    #[test]
    fn test_pinned_charge_state_is_frozen() {
        let defects = vec![vacancy("v_O", &[(0, 1.0), (2, 0.5)])];
        let edges = edges(600.0);
        let constraints = Constraints::new().fix_charge_state("v_O", 2, 3e15);
        let mut calc = ConcentrationCalculator::new(
            &defects,
            &point(),
            &edges,
            &constraints,
            SiteCompetition::Global,
        )
        .unwrap();
        assert_eq!(calc.concentrations(0.1).unwrap()[1], 3e15);
        assert_eq!(calc.concentrations(1.9).unwrap()[1], 3e15);
        let balance = calc.charge_balance(1.9).unwrap();
        assert!(balance.net >= 6e15);
    }

    #[test]
    fn test_overfilled_pool_is_rejected() {
        let defects = vec![vacancy("v_O", &[(0, 1.0)])];
        let edges = edges(600.0);
        let constraints = Constraints::new().fix_total("v_O", 2.0 * SITES);
        let mut calc = ConcentrationCalculator::new(
            &defects,
            &point(),
            &edges,
            &constraints,
            SiteCompetition::Global,
        )
        .unwrap();
        assert!(matches!(
            calc.concentrations(0.0),
            Err(DefeqError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_non_positive_degeneracy_is_an_instability() {
        let defects = vec![
            DefectRecord::new(
                "v_O",
                DefectKind::Vacancy {
                    element: "O".into(),
                },
            )
            .with_charge_state(
                ChargeStateRecord::new(0, 1.0, SITES).with_degeneracy(Degeneracy::new(-1.0, 1.0)),
            ),
        ];
        let result = ConcentrationCalculator::new(
            &defects,
            &point(),
            &edges(300.0),
            &Constraints::new(),
            SiteCompetition::Global,
        );
        assert!(matches!(result, Err(DefeqError::NumericalInstability(_))));
    }

    #[test]
    fn test_formation_energies_are_reported_at_the_fermi_level() {
        let defects = vec![vacancy("v_O", &[(2, 0.5)])];
        let edges = edges(300.0);
        let mut calc = ConcentrationCalculator::new(
            &defects,
            &point(),
            &edges,
            &Constraints::new(),
            SiteCompetition::Global,
        )
        .unwrap();
        let rows = calc.defect_concentrations(0.4).unwrap();
        assert_eq!(rows.len(), 1);
        assert_relative_eq!(rows[0].formation_energy, 1.3, epsilon = 1e-12);
    }

    /// Three defects competing for the O sublattice, one of them with a pinned total.
    fn oxygen_sublattice(energies: [f64; 4]) -> Vec<DefectRecord> {
        vec![
            vacancy("v_O", &[(0, energies[0]), (2, energies[1])]).with_site_group("O"),
            DefectRecord::new(
                "F_O",
                DefectKind::Substitution {
                    added: "F".into(),
                    removed: "O".into(),
                },
            )
            .with_site_group("O")
            .with_charge_state(ChargeStateRecord::new(1, energies[2], SITES))
            .with_charge_state(ChargeStateRecord::new(0, energies[2] + 0.4, SITES)),
            DefectRecord::new(
                "N_O",
                DefectKind::Substitution {
                    added: "N".into(),
                    removed: "O".into(),
                },
            )
            .with_site_group("O")
            .with_charge_state(ChargeStateRecord::new(-1, energies[3], SITES)),
        ]
    }

    proptest! {
        #[test]
        fn prop_grouped_occupation_stays_below_one_site(
            energies in prop::array::uniform4(-3.0f64..3.0),
            pinned_fraction in 0.0f64..0.5,
            fermi_level in -1.0f64..3.0,
            temperature in 100.0f64..2000.0,
            strategy in prop_oneof![
                Just(SiteCompetition::Dilute),
                Just(SiteCompetition::Global),
                Just(SiteCompetition::PerDefect),
            ],
        ) {
            let defects = oxygen_sublattice(energies);
            let point = ChemicalPotentialPoint::new([("O", 0.0), ("F", -0.5), ("N", -1.0)]);
            let constraints = Constraints::new().fix_total("N_O", pinned_fraction * SITES);
            let mut calc = ConcentrationCalculator::new(
                &defects,
                &point,
                &edges(temperature),
                &constraints,
                strategy,
            )
            .unwrap();

            let n = calc.concentrations(fermi_level).unwrap();
            prop_assert!(n.iter().all(|v| v.is_finite() && *v >= 0.0));
            let occupation: f64 = n.iter().map(|v| v / SITES).sum();
            prop_assert!(occupation <= 1.0 + 1e-9, "occupation {occupation}");

            let totals = calc.defect_totals(fermi_level).unwrap();
            let pinned = pinned_fraction * SITES;
            prop_assert!((totals[2] - pinned).abs() <= 1e-9 * SITES);
        }
    }
}
