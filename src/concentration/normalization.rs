//! Site-competition normalisation of Boltzmann weights.
//!
//! Defects sharing a `site_group` draw from one pool of lattice sites. Given the log Boltzmann
//! weights `ln w_q = ln g_q - E_f,q / kT` of the free charge states in a pool, a strategy turns
//! them into per-site occupation probabilities `p_q` whose pool total never exceeds the fraction
//! of sites left over by pinned defects.

use crate::math::{log1p_exp, log_add_exp, log_sum_exp_indexed};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How competing defects on a shared site pool are normalised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteCompetition {
    /// Plain Boltzmann occupations; the pool is only rescaled if it would overfill.
    Dilute,
    /// `p_q = w_q / (1 + Σ_pool w)`: every state in the pool competes for the same free sites.
    #[default]
    Global,
    /// `p_q = w_q / (1 + Σ_family w)` per defect, followed by pool saturation.
    PerDefect,
}

/// Free charge states of one site pool, grouped by defect.
#[derive(Debug, Clone)]
pub(crate) struct SitePool {
    /// Site group name, or the defect name for an ungrouped defect.
    pub label: String,
    pub strategy: SiteCompetition,
    /// Indices of free states, one list per defect in the pool.
    pub families: Vec<Vec<usize>>,
    /// Flattened `families`.
    pub free: Vec<usize>,
    /// Indices of pinned states whose occupation is subtracted from the available sites.
    pub pinned: Vec<usize>,
}

impl SitePool {
    pub fn new(label: String, strategy: SiteCompetition) -> Self {
        Self {
            label,
            strategy,
            families: Vec::new(),
            free: Vec::new(),
            pinned: Vec::new(),
        }
    }

    pub fn push_family(&mut self, free: Vec<usize>, pinned: impl IntoIterator<Item = usize>) {
        self.free.extend_from_slice(&free);
        self.pinned.extend(pinned);
        if !free.is_empty() {
            self.families.push(free);
        }
    }

    /// Overwrites `ln_values[i]` (a log Boltzmann weight) with the log occupation probability for
    /// every free state `i` of the pool.
    ///
    /// `available` is the fraction of sites in `[0, 1]` not already taken by pinned states.
    pub fn normalise(&self, ln_values: &mut [f64], available: f64) {
        if self.free.is_empty() {
            return;
        }
        if available <= 0.0 {
            for &i in &self.free {
                ln_values[i] = f64::NEG_INFINITY;
            }
            return;
        }
        let ln_available = available.ln();
        let dilute_total = log_sum_exp_indexed(ln_values, &self.free);
        if dilute_total > ln_available {
            debug!(
                pool = %self.label,
                occupation = dilute_total.exp(),
                available,
                "site pool beyond the dilute limit; occupations saturated"
            );
        }

        match self.strategy {
            SiteCompetition::Dilute => {
                let shift = (dilute_total - ln_available).max(0.0);
                for &i in &self.free {
                    ln_values[i] -= shift;
                }
            }
            SiteCompetition::Global => {
                let shift = log1p_exp(dilute_total) - ln_available;
                for &i in &self.free {
                    ln_values[i] -= shift;
                }
            }
            SiteCompetition::PerDefect => {
                let mut total = f64::NEG_INFINITY;
                for family in &self.families {
                    let family_total = log_sum_exp_indexed(ln_values, family);
                    let shift = log1p_exp(family_total);
                    for &i in family {
                        ln_values[i] -= shift;
                    }
                    total = log_add_exp(total, family_total - shift);
                }
                let shift = (total - ln_available).max(0.0);
                if shift > 0.0 {
                    for &i in &self.free {
                        ln_values[i] -= shift;
                    }
                }
            }
        }
    }
}
