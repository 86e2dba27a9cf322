//! This module provides the numerical infrastructure for the defeq library.
//!
//! It collects physical constants, Fermi-Dirac statistics and the log-space summation helpers used
//! by the concentration model.

/// Physical constants and unit conversions.
pub mod constants;

/// Fermi-Dirac occupation and the order one-half Fermi-Dirac integral.
pub mod fermi_dirac;

/// Numerically stable `ln(Σ exp(x_i))`; returns `-inf` for an empty slice.
#[inline]
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// `ln(Σ exp(values[i]))` over the listed indices only.
#[inline]
pub fn log_sum_exp_indexed(values: &[f64], indices: &[usize]) -> f64 {
    let max = indices
        .iter()
        .map(|&i| values[i])
        .fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY || max == f64::INFINITY {
        return max;
    }
    max + indices
        .iter()
        .map(|&i| (values[i] - max).exp())
        .sum::<f64>()
        .ln()
}

/// `ln(exp(a) + exp(b))`.
#[inline]
pub fn log_add_exp(a: f64, b: f64) -> f64 {
    let max = a.max(b);
    if max == f64::NEG_INFINITY {
        return max;
    }
    max + ((a - max).exp() + (b - max).exp()).ln()
}

/// `ln(1 + exp(x))` without overflow for large `x`.
#[inline]
pub fn log1p_exp(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}
