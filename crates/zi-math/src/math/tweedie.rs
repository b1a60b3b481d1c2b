//! Tweedie (compound Poisson–Gamma) densities and deviances.
//!
//! A Tweedie response with mean `μ`, dispersion `φ` and variance power `p`
//! has `Var[Y] = φ μ^p`. For `1 < p < 2` it is a Poisson sum of Gamma
//! variables:
//! - `N ~ Poisson(λ)`, `λ = μ^(2-p) / (φ (2-p))`
//! - `Y = Σ_{i=1..N} X_i`, `X_i ~ Gamma(α = (2-p)/(p-1), scale = φ (p-1) μ^(p-1))`
//!
//! so `P(Y = 0) = e^(-λ)` is a genuine point mass while `Y > 0` is continuous.
//!
//! The positive part has no closed form. It is evaluated with the series
//! of Dunn & Smyth (2005):
//!
//! `f(y) = (1/y) · W(y, φ, p) · exp((y θ - κ(θ)) / φ)`
//!
//! with `θ = μ^(1-p)/(1-p)`, `κ(θ) = μ^(2-p)/(2-p)` and
//! `W = Σ_{j≥1} z^j / (j! Γ(-j a))`, `a = (2-p)/(1-p) < 0`. Terms are summed
//! in the log domain outward from the largest term until they fall
//! [`SERIES_DROP`] nats below it.
//!
//! Boundary powers: `p = 1` is the over-dispersed Poisson (mass on the
//! lattice `y/φ ∈ ℕ`) and `p = 2` is the Gamma family (no mass at zero).

use serde::{Deserialize, Serialize};

use super::gamma::{gamma_log_pdf_mean, gamma_unit_deviance};
use super::stable::{log_factorial, log_gamma, log_sum_exp, y_log_y_over_mu};

/// Terms smaller than the largest by this many nats are dropped.
pub const SERIES_DROP: f64 = 37.0;

/// Hard cap on series terms evaluated on each side of the peak.
pub const SERIES_MAX_TERMS: usize = 20_000;

/// Tolerance for treating `y/φ` as an integer at `p = 1`.
const LATTICE_TOL: f64 = 1e-9;

/// Validated Tweedie parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TweedieParams {
    /// Mean μ > 0.
    pub mu: f64,
    /// Dispersion φ > 0.
    pub phi: f64,
    /// Variance power p ∈ [1, 2].
    pub power: f64,
}

impl TweedieParams {
    /// Create parameters, returning None when any is out of range.
    pub fn new(mu: f64, phi: f64, power: f64) -> Option<Self> {
        if !is_valid(mu, phi, power) {
            return None;
        }
        Some(Self { mu, phi, power })
    }

    /// Var[Y] = φ μ^p.
    pub fn variance(&self) -> f64 {
        self.phi * self.mu.powf(self.power)
    }

    /// P(Y = 0); zero at p = 2.
    pub fn zero_probability(&self) -> f64 {
        tweedie_zero_probability(self.mu, self.phi, self.power)
    }

    /// Log density (or log mass at zero) of `y`.
    pub fn log_density(&self, y: f64) -> f64 {
        tweedie_log_density(y, self.mu, self.phi, self.power)
    }
}

fn is_valid(mu: f64, phi: f64, power: f64) -> bool {
    mu.is_finite()
        && phi.is_finite()
        && power.is_finite()
        && mu > 0.0
        && phi > 0.0
        && (1.0..=2.0).contains(&power)
}

/// Probability of an exact zero, `exp(-μ^(2-p) / (φ (2-p)))` for p < 2.
pub fn tweedie_zero_probability(mu: f64, phi: f64, power: f64) -> f64 {
    if !is_valid(mu, phi, power) {
        return f64::NAN;
    }
    if power == 2.0 {
        return 0.0;
    }
    (-poisson_rate(mu, phi, power)).exp()
}

fn poisson_rate(mu: f64, phi: f64, power: f64) -> f64 {
    mu.powf(2.0 - power) / (phi * (2.0 - power))
}

/// Log density of a Tweedie response.
///
/// For `y = 0` this is the log point mass. Returns NaN for invalid
/// parameters and -inf for negative `y`.
pub fn tweedie_log_density(y: f64, mu: f64, phi: f64, power: f64) -> f64 {
    if y.is_nan() || !is_valid(mu, phi, power) {
        return f64::NAN;
    }
    if y < 0.0 {
        return f64::NEG_INFINITY;
    }
    if power == 1.0 {
        return overdispersed_poisson_log_mass(y, mu, phi);
    }
    if power == 2.0 {
        if y == 0.0 {
            return f64::NEG_INFINITY;
        }
        return gamma_log_pdf_mean(y, mu, phi);
    }
    if y == 0.0 {
        return -poisson_rate(mu, phi, power);
    }

    let theta = mu.powf(1.0 - power) / (1.0 - power);
    let kappa = mu.powf(2.0 - power) / (2.0 - power);
    -y.ln() + log_series_w(y, phi, power) + (y * theta - kappa) / phi
}

fn overdispersed_poisson_log_mass(y: f64, mu: f64, phi: f64) -> f64 {
    let k = y / phi;
    if (k - k.round()).abs() > LATTICE_TOL {
        return f64::NEG_INFINITY;
    }
    let k = k.round();
    let lambda = mu / phi;
    k * lambda.ln() - lambda - log_factorial(k)
}

/// log W(y, φ, p) for 1 < p < 2 and y > 0.
fn log_series_w(y: f64, phi: f64, power: f64) -> f64 {
    let a = (2.0 - power) / (1.0 - power);
    let log_z = -a * y.ln() + a * (power - 1.0).ln()
        - (1.0 - a) * phi.ln()
        - (2.0 - power).ln();
    let log_term = |j: f64| j * log_z - log_gamma(j + 1.0) - log_gamma(-j * a);

    let j_peak = (y.powf(2.0 - power) / (phi * (2.0 - power))).round().max(1.0);
    let peak = log_term(j_peak);
    let cutoff = peak - SERIES_DROP;

    let mut terms = vec![peak];
    let mut j = j_peak + 1.0;
    for _ in 0..SERIES_MAX_TERMS {
        let t = log_term(j);
        terms.push(t);
        if t < cutoff {
            break;
        }
        j += 1.0;
    }
    let mut j = j_peak - 1.0;
    for _ in 0..SERIES_MAX_TERMS {
        if j < 1.0 {
            break;
        }
        let t = log_term(j);
        terms.push(t);
        if t < cutoff {
            break;
        }
        j -= 1.0;
    }
    log_sum_exp(&terms)
}

/// Tweedie unit deviance `d(y, μ)`.
///
/// Closed form for `1 < p < 2`:
/// `2 [ y^(2-p)/((1-p)(2-p)) - y μ^(1-p)/(1-p) + μ^(2-p)/(2-p) ]`,
/// with the Poisson and Gamma deviances at the endpoints.
pub fn tweedie_unit_deviance(y: f64, mu: f64, power: f64) -> f64 {
    if y.is_nan() || mu.is_nan() || power.is_nan() || y < 0.0 || mu <= 0.0 {
        return f64::NAN;
    }
    if !(1.0..=2.0).contains(&power) {
        return f64::NAN;
    }
    if power == 1.0 {
        return 2.0 * (y_log_y_over_mu(y, mu) - (y - mu));
    }
    if power == 2.0 {
        return gamma_unit_deviance(y, mu);
    }
    let one_p = 1.0 - power;
    let two_p = 2.0 - power;
    2.0 * (y.powf(two_p) / (one_p * two_p) - y * mu.powf(one_p) / one_p + mu.powf(two_p) / two_p)
}

/// Total log-likelihood of a response vector under fitted means.
///
/// Returns NaN when the slices differ in length.
pub fn tweedie_log_likelihood(y: &[f64], mu: &[f64], phi: f64, power: f64) -> f64 {
    if y.len() != mu.len() {
        return f64::NAN;
    }
    y.iter()
        .zip(mu)
        .map(|(&yi, &mi)| tweedie_log_density(yi, mi, phi, power))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
        if a.is_nan() || b.is_nan() {
            return false;
        }
        (a - b).abs() <= tol
    }

    /// Midpoint-rule mass of the positive part plus the zero mass.
    fn total_mass(mu: f64, phi: f64, power: f64) -> f64 {
        let n = 50_000;
        let hi = mu * 40.0 + 50.0;
        let h = hi / n as f64;
        let positive: f64 = (0..n)
            .map(|i| {
                let y = (i as f64 + 0.5) * h;
                tweedie_log_density(y, mu, phi, power).exp() * h
            })
            .sum();
        positive + tweedie_zero_probability(mu, phi, power)
    }

    #[test]
    fn density_golden_value() {
        // Reference computed from the Dunn–Smyth series at (y=1, μ=1, φ=1, p=1.5).
        let got = tweedie_log_density(1.0, 1.0, 1.0, 1.5);
        assert!(approx_eq(got, -1.028_615_220_3, 1e-6), "got {}", got);
    }

    #[test]
    fn density_integrates_to_one() {
        for (mu, phi, p) in [(2.0, 1.0, 1.5), (0.5, 2.0, 1.2)] {
            let mass = total_mass(mu, phi, p);
            assert!(approx_eq(mass, 1.0, 1e-4), "mass({}, {}, {}) = {}", mu, phi, p, mass);
        }
    }

    #[test]
    fn zero_mass_matches_poisson_rate() {
        let (mu, phi, p): (f64, f64, f64) = (2.0, 1.0, 1.5);
        let lambda = mu.powf(2.0 - p) / (phi * (2.0 - p));
        assert!(approx_eq(tweedie_zero_probability(mu, phi, p), (-lambda).exp(), 1e-12));
        assert!(approx_eq(tweedie_log_density(0.0, mu, phi, p), -lambda, 1e-12));
    }

    #[test]
    fn gamma_endpoint_has_no_zero_mass() {
        assert_eq!(tweedie_zero_probability(2.0, 1.0, 2.0), 0.0);
        assert_eq!(tweedie_log_density(0.0, 2.0, 1.0, 2.0), f64::NEG_INFINITY);
        assert!(tweedie_log_density(1.5, 2.0, 1.0, 2.0).is_finite());
    }

    #[test]
    fn poisson_endpoint_lives_on_lattice() {
        // Poisson(3) mass at 2: 9/2 e^-3
        let expected = (4.5f64).ln() - 3.0;
        assert!(approx_eq(tweedie_log_density(2.0, 3.0, 1.0, 1.0), expected, 1e-10));
        assert_eq!(tweedie_log_density(2.5, 3.0, 1.0, 1.0), f64::NEG_INFINITY);
    }

    #[test]
    fn deviance_zero_at_mean_and_positive_elsewhere() {
        for p in [1.0, 1.3, 1.7, 2.0] {
            assert!(approx_eq(tweedie_unit_deviance(2.0, 2.0, p), 0.0, 1e-10), "p={}", p);
            assert!(tweedie_unit_deviance(3.0, 2.0, p) > 0.0, "p={}", p);
        }
        // Zero response: d(0, μ) = 2 μ^(2-p)/(2-p)
        let d = tweedie_unit_deviance(0.0, 2.0, 1.5);
        assert!(approx_eq(d, 2.0 * 2.0f64.powf(0.5) / 0.5, 1e-12));
    }

    #[test]
    fn invalid_parameters() {
        assert!(TweedieParams::new(1.0, 1.0, 2.5).is_none());
        assert!(TweedieParams::new(0.0, 1.0, 1.5).is_none());
        assert!(TweedieParams::new(1.0, -1.0, 1.5).is_none());
        assert!(tweedie_log_density(1.0, 1.0, 1.0, 0.5).is_nan());
        assert_eq!(tweedie_log_density(-1.0, 1.0, 1.0, 1.5), f64::NEG_INFINITY);
    }

    #[test]
    fn params_variance() {
        let params = TweedieParams::new(2.0, 0.5, 1.5).unwrap();
        assert!(approx_eq(params.variance(), 0.5 * 2.0f64.powf(1.5), 1e-12));
        assert!(approx_eq(params.log_density(0.0), -params.mu.powf(0.5) / (0.5 * 0.5), 1e-12));
    }
}
