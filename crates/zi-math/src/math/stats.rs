//! Agreement statistics between predicted and observed series.

/// Arithmetic mean; None for empty input.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Pearson correlation coefficient.
///
/// Returns None when the slices differ in length, hold fewer than two
/// points, contain non-finite values, or either side has zero variance
/// (the coefficient is undefined there, e.g. for a constant prediction).
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    if x.iter().chain(y).any(|v| !v.is_finite()) {
        return None;
    }
    let mx = mean(x)?;
    let my = mean(y)?;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (&a, &b) in x.iter().zip(y) {
        let dx = a - mx;
        let dy = b - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    Some((sxy / (sxx.sqrt() * syy.sqrt())).clamp(-1.0, 1.0))
}

/// Root mean squared error; None for empty or mismatched input.
pub fn rmse(predicted: &[f64], observed: &[f64]) -> Option<f64> {
    if predicted.len() != observed.len() || predicted.is_empty() {
        return None;
    }
    let sse: f64 = predicted
        .iter()
        .zip(observed)
        .map(|(p, o)| (p - o) * (p - o))
        .sum();
    Some((sse / predicted.len() as f64).sqrt())
}

/// Mean absolute error; None for empty or mismatched input.
pub fn mae(predicted: &[f64], observed: &[f64]) -> Option<f64> {
    if predicted.len() != observed.len() || predicted.is_empty() {
        return None;
    }
    let sae: f64 = predicted
        .iter()
        .zip(observed)
        .map(|(p, o)| (p - o).abs())
        .sum();
    Some(sae / predicted.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn correlation_of_linear_relation_is_one() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [3.0, 5.0, 7.0, 9.0];
        assert!(approx_eq(pearson_correlation(&x, &y).unwrap(), 1.0, 1e-12));
        let neg = [9.0, 7.0, 5.0, 3.0];
        assert!(approx_eq(pearson_correlation(&x, &neg).unwrap(), -1.0, 1e-12));
    }

    #[test]
    fn correlation_known_value() {
        let x = [1.0, 2.0, 3.0];
        let y = [1.0, 3.0, 2.0];
        // sxy = 1, sxx = 2, syy = 2
        assert!(approx_eq(pearson_correlation(&x, &y).unwrap(), 0.5, 1e-12));
    }

    #[test]
    fn correlation_undefined_cases() {
        assert!(pearson_correlation(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_none());
        assert!(pearson_correlation(&[1.0], &[1.0]).is_none());
        assert!(pearson_correlation(&[1.0, 2.0], &[1.0]).is_none());
        assert!(pearson_correlation(&[1.0, f64::NAN], &[1.0, 2.0]).is_none());
    }

    #[test]
    fn error_metrics() {
        let p = [1.0, 2.0, 3.0];
        let o = [1.0, 4.0, 0.0];
        assert!(approx_eq(rmse(&p, &o).unwrap(), (13.0f64 / 3.0).sqrt(), 1e-12));
        assert!(approx_eq(mae(&p, &o).unwrap(), 5.0 / 3.0, 1e-12));
        assert!(rmse(&[], &[]).is_none());
        assert!(mae(&[1.0], &[]).is_none());
    }

    #[test]
    fn mean_basic() {
        assert_eq!(mean(&[]), None);
        assert!(approx_eq(mean(&[5.2, 3.1]).unwrap(), 4.15, 1e-12));
    }
}
