//! Bernoulli likelihood terms for presence/absence responses.
//!
//! A presence label `y ∈ {0, 1}` with success probability `p` has
//! `log P(y | p) = y·ln p + (1 - y)·ln(1 - p)`. The binomial GLM deviance
//! is twice the log-likelihood gap to the saturated model, which for a
//! 0/1 response reduces to `-2·log P(y | p)`.

/// Log-probability of a 0/1 outcome under Bernoulli(p).
///
/// `y` is treated as a success when it is strictly positive. Returns NaN
/// for `p` outside [0, 1] and -inf for impossible outcomes (p = 0, y = 1).
pub fn bernoulli_log_pmf(y: f64, p: f64) -> f64 {
    if y.is_nan() || p.is_nan() || !(0.0..=1.0).contains(&p) {
        return f64::NAN;
    }
    if y > 0.0 {
        if p == 0.0 {
            f64::NEG_INFINITY
        } else {
            p.ln()
        }
    } else if p == 1.0 {
        f64::NEG_INFINITY
    } else {
        (-p).ln_1p()
    }
}

/// Unit deviance `d(y, mu)` for a 0/1 response.
pub fn bernoulli_unit_deviance(y: f64, mu: f64) -> f64 {
    let ll = bernoulli_log_pmf(y, mu);
    if ll.is_nan() {
        return f64::NAN;
    }
    -2.0 * ll
}

/// Total Bernoulli log-likelihood of labels under fitted probabilities.
///
/// Returns NaN when the slices differ in length.
pub fn bernoulli_log_likelihood(y: &[f64], mu: &[f64]) -> f64 {
    if y.len() != mu.len() {
        return f64::NAN;
    }
    y.iter()
        .zip(mu)
        .map(|(&yi, &mi)| bernoulli_log_pmf(yi, mi))
        .sum()
}
