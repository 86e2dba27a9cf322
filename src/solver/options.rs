//! This module defines configuration options for the charge-neutrality solver.
//!
//! It provides the `SolverOptions` struct, which controls the convergence criteria, the iteration
//! budget and the Fermi-level bracket of the root search, together with the site-competition
//! strategy used when converting formation energies into concentrations.

use crate::concentration::SiteCompetition;
use serde::{Deserialize, Serialize};

/// Configuration parameters for the charge-neutrality solver.
///
/// A solve is converged when the net charge density at the candidate Fermi level satisfies
/// either tolerance. The relative test compares against the sum of the magnitudes of every charge
/// contribution, which keeps the criterion meaningful from heavily compensated to nearly intrinsic
/// material.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Absolute tolerance on the net charge density (e cm^-3).
    pub absolute_tolerance: f64,
    /// Tolerance on the net charge relative to `p + n + Σ|q| n_q + |background|`.
    pub relative_tolerance: f64,
    /// Maximum number of root-search iterations.
    ///
    /// If convergence is not achieved within this limit the solve fails with
    /// `NonConvergence` rather than returning the last estimate.
    pub max_iterations: u32,
    /// Smallest Fermi-level bracket width (eV) the root search may reach.
    pub fermi_tolerance: f64,
    /// Extends the search bracket beyond the band edges by this much (eV) on both sides.
    ///
    /// The default of zero confines the Fermi level to the gap.
    pub band_edge_padding: f64,
    /// How defects sharing a site group compete for lattice sites.
    pub site_competition: SiteCompetition,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            absolute_tolerance: 1.0e-6,
            relative_tolerance: 1.0e-10,
            max_iterations: 200,
            fermi_tolerance: 1.0e-14,
            band_edge_padding: 0.0,
            site_competition: SiteCompetition::Global,
        }
    }
}

impl SolverOptions {
    /// `true` if a net charge `net` over total magnitude `scale` meets either tolerance.
    pub fn accepts(&self, net: f64, scale: f64) -> bool {
        net.abs() <= self.absolute_tolerance
            || (scale > 0.0 && net.abs() <= self.relative_tolerance * scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acceptance_uses_either_tolerance() {
        let options = SolverOptions::default();
        assert!(options.accepts(1e-7, 0.0));
        assert!(options.accepts(1e5, 1e16));
        assert!(!options.accepts(1e8, 1e16));
        assert!(!options.accepts(1.0, 0.0));
    }

    #[test]
    fn test_partial_options_deserialize_over_defaults() {
        let options: SolverOptions = toml::from_str("max_iterations = 50").unwrap();
        assert_eq!(options.max_iterations, 50);
        assert_eq!(options.site_competition, SiteCompetition::Global);
        assert_eq!(options.band_edge_padding, 0.0);
    }
}
