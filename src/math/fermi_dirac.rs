//! Fermi-Dirac statistics helpers.
//!
//! Provides the occupation function and the normalised complete Fermi-Dirac integral of order
//! one half, which together give free-carrier densities for both parabolic and tabulated bands.

use std::f64::consts::PI;

/// Fermi-Dirac occupation of a level `x = (E - E_F) / kT` reduced energies above the Fermi level.
///
/// Evaluated through `tanh` so that neither tail overflows.
#[inline]
pub fn occupation(x: f64) -> f64 {
    0.5 * (1.0 - (0.5 * x).tanh())
}

/// Normalised Fermi-Dirac integral of order 1/2, `F_1/2(eta) = 2/sqrt(pi) ∫ sqrt(e) / (1 + exp(e - eta)) de`.
///
/// Uses the Bednarczyk approximation (relative error below 0.4 % over the full real line), which
/// reduces to `exp(eta)` in the non-degenerate limit and to `4/(3 sqrt(pi)) eta^(3/2)` deep in the
/// degenerate regime. The result is monotonically increasing in `eta` and never overflows for the
/// reduced energies that occur inside a band-gap bracket.
#[inline]
pub fn half_integral(eta: f64) -> f64 {
    if eta < -40.0 {
        return eta.exp();
    }
    let nu = eta.powi(4)
        + 50.0
        + 33.6 * eta * (1.0 - 0.68 * (-0.17 * (eta + 1.0).powi(2)).exp());
    let tail = 3.0 * PI.sqrt() / 4.0 * nu.powf(-0.375);
    1.0 / ((-eta).exp() + tail)
}
