//! Defect concentrations from formation energies.
//!
//! In the dilute limit `n_q = N_sites,q · g_q(T) · exp(-E_f,q / kT)`. Everything is accumulated
//! as log weights and exponentiated only after site-competition normalisation, so extreme
//! formation energies underflow to zero instead of overflowing.

mod calculator;
mod normalization;

pub use calculator::{ChargeBalance, ConcentrationCalculator};
pub use normalization::SiteCompetition;
