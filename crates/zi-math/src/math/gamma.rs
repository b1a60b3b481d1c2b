//! Gamma distribution utilities for positive-magnitude models.
//!
//! # Parameterization
//!
//! Two parameterizations are supported:
//! - **rate**: `Gamma(α, β)` with shape `α > 0` and rate `β > 0`, density
//!   `f(t) = β^α / Γ(α) * t^(α-1) * e^(-βt)`;
//! - **mean/dispersion** (GLM form): mean `μ > 0` and dispersion `φ > 0`,
//!   equivalent to `α = 1/φ`, `β = 1/(φ μ)`, so `Var[T] = φ μ²`.

use super::stable::log_gamma;

/// Log of the Gamma distribution PDF at t.
///
/// Uses rate parameterization: `f(t) = β^α / Γ(α) * t^(α-1) * e^(-βt)`
///
/// # Arguments
/// * `t` - The value at which to evaluate (t >= 0)
/// * `alpha` - Shape parameter (α > 0)
/// * `beta` - Rate parameter (β > 0)
///
/// # Returns
/// * `log f(t | α, β)` or appropriate boundary value
pub fn gamma_log_pdf(t: f64, alpha: f64, beta: f64) -> f64 {
    // NaN propagation
    if t.is_nan() || alpha.is_nan() || beta.is_nan() {
        return f64::NAN;
    }

    // Parameter validation
    if alpha <= 0.0 || beta <= 0.0 {
        return f64::NAN;
    }

    // Domain check
    if t < 0.0 {
        return f64::NEG_INFINITY;
    }

    // Special case: t = 0
    if t == 0.0 {
        if alpha < 1.0 {
            // Density diverges to +∞
            return f64::INFINITY;
        } else if alpha == 1.0 {
            // Exponential case: f(0) = β
            return beta.ln();
        } else {
            // alpha > 1: f(0) = 0
            return f64::NEG_INFINITY;
        }
    }

    // General case: log f(t) = α*log(β) - log(Γ(α)) + (α-1)*log(t) - β*t
    alpha * beta.ln() - log_gamma(alpha) + (alpha - 1.0) * t.ln() - beta * t
}

/// Log density of a Gamma response with mean `mu` and dispersion `phi`.
pub fn gamma_log_pdf_mean(y: f64, mu: f64, phi: f64) -> f64 {
    if mu.is_nan() || phi.is_nan() || mu <= 0.0 || phi <= 0.0 {
        return f64::NAN;
    }
    let shape = 1.0 / phi;
    gamma_log_pdf(y, shape, shape / mu)
}

/// Unit deviance `d(y, μ) = 2[(y - μ)/μ - ln(y/μ)]` of the Gamma family.
///
/// Defined for `y > 0`; a zero response has infinite deviance.
pub fn gamma_unit_deviance(y: f64, mu: f64) -> f64 {
    if y.is_nan() || mu.is_nan() || mu <= 0.0 || y < 0.0 {
        return f64::NAN;
    }
    if y == 0.0 {
        return f64::INFINITY;
    }
    2.0 * ((y - mu) / mu - (y / mu).ln())
}

/// Total Gamma log-likelihood under fitted means and a shared dispersion.
///
/// Returns NaN when the slices differ in length.
pub fn gamma_log_likelihood(y: &[f64], mu: &[f64], phi: f64) -> f64 {
    if y.len() != mu.len() {
        return f64::NAN;
    }
    y.iter()
        .zip(mu)
        .map(|(&yi, &mi)| gamma_log_pdf_mean(yi, mi, phi))
        .sum()
}

/// Mean of Gamma(α, β).
///
/// E[T] = α / β
pub fn gamma_mean(alpha: f64, beta: f64) -> f64 {
    if alpha.is_nan() || beta.is_nan() || alpha <= 0.0 || beta <= 0.0 {
        return f64::NAN;
    }
    alpha / beta
}
