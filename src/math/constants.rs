//! This module defines the physical constants and unit conversions used throughout the defeq library.
//!
//! Energies are carried in electron volts, temperatures in kelvin and number densities in cm^-3.

/// Boltzmann constant in eV/K.
///
/// Used to form the thermal energy kT that scales every Boltzmann factor and Fermi-Dirac
/// occupation in the library.
pub const BOLTZMANN_EV_PER_K: f64 = 8.617_333_262e-5;

/// Conversion factor from cubic angstroms to cubic centimetres.
///
/// Supercell and primitive-cell volumes arrive in Å^3; site densities and carrier
/// concentrations are reported per cm^3.
pub const ANGSTROM3_TO_CM3: f64 = 1.0e-24;

/// Effective density of states of a parabolic band with unit effective mass at 300 K, in cm^-3.
///
/// N = 2 (2π m* kT / h^2)^(3/2); the value scales as (m*)^(3/2) (T / 300 K)^(3/2).
pub const EFFECTIVE_DOS_300K_CM3: f64 = 2.509_4e19;

/// Reference temperature for [`EFFECTIVE_DOS_300K_CM3`].
pub const EFFECTIVE_DOS_REFERENCE_TEMPERATURE: f64 = 300.0;

/// Tolerance for geometric comparisons of chemical potentials, in eV. Comparisons against an
/// energy `E` scale it by `1 + |E|`.
pub const CHEMICAL_POTENTIAL_TOLERANCE: f64 = 1e-8;

/// Thermal energy kT in eV at the given temperature.
#[inline]
pub fn thermal_energy(temperature: f64) -> f64 {
    BOLTZMANN_EV_PER_K * temperature
}
