//! Single-distribution fitter: Tweedie GLM with log link.
//!
//! The variance power is either fixed or chosen by profile likelihood over a
//! grid. For each candidate power the mean model is fitted by IRLS and the
//! dispersion is set to its maximum-likelihood value by golden-section search
//! on `ln phi`. The candidate with the largest finite log-likelihood wins;
//! exact ties go to the smallest power.
//!
//! Endpoints: at `p = 1` the likelihood is Poisson with `phi = 1`, which is
//! `-inf` for non-integer responses. At `p = 2` it is Gamma, which is `-inf`
//! when any response is zero, so that candidate is skipped without fitting.

use serde::{Deserialize, Serialize};

use zi_common::{Error, Result, StructuredError};
use zi_math::tweedie::tweedie_log_likelihood;

use crate::data::{Covariates, ObservationSeries};
use crate::engine::{
    EngineFit, Family, FitBudget, FitRequest, FittedSubModel, FittingEngine, ModelFormula,
    ModelSummary,
};
use crate::logging::{event_names, LogContext, Stage};

pub const MODEL_NAME: &str = "tweedie";

/// Half-width of the `ln phi` search bracket around the Pearson estimate.
const LOG_PHI_HALF_WIDTH: f64 = 7.0;

/// Distance in `ln phi` from a bracket end that counts as hitting it.
const EDGE_TOL: f64 = 1e-6;

const GOLDEN_ITERATIONS: usize = 200;
const GOLDEN_TOL: f64 = 1e-10;

/// How the variance power is chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerSpec {
    Fixed(f64),
    Profile(Vec<f64>),
}

impl PowerSpec {
    /// `{1.0, 1.1, ..., 2.0}`.
    pub fn default_grid() -> Vec<f64> {
        power_grid(1.0, 2.0, 0.1)
    }

    /// Candidate powers in ascending order.
    fn candidates(&self) -> Vec<f64> {
        match self {
            PowerSpec::Fixed(p) => vec![*p],
            PowerSpec::Profile(grid) => {
                let mut grid = grid.clone();
                grid.sort_by(f64::total_cmp);
                grid
            }
        }
    }
}

impl Default for PowerSpec {
    fn default() -> Self {
        PowerSpec::Profile(PowerSpec::default_grid())
    }
}

/// Evenly spaced grid from `start` to `end` inclusive.
///
/// Points are rounded to 10 decimals so `1.0 + 3 * 0.1` is exactly `1.3`.
/// Returns an empty grid for a non-positive step or `end < start`.
pub fn power_grid(start: f64, end: f64, step: f64) -> Vec<f64> {
    if step.is_nan() || step <= 0.0 || !start.is_finite() || !end.is_finite() || end < start {
        return Vec::new();
    }
    let count = ((end - start) / step + 1e-9).floor() as usize + 1;
    (0..count)
        .map(|i| ((start + i as f64 * step) * 1e10).round() / 1e10)
        .collect()
}

/// One evaluated candidate power.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilePoint {
    pub power: f64,
    /// Maximised log-likelihood, absent when not finite or not fitted.
    pub log_likelihood: Option<f64>,
    pub phi: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StructuredError>,
}

/// Serializable view of a Tweedie fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TweedieSummary {
    pub model: String,
    pub power: f64,
    pub phi: f64,
    pub log_likelihood: f64,
    pub profiled: bool,
    pub profile: Vec<ProfilePoint>,
    pub fit: ModelSummary,
}

/// Selected Tweedie model.
#[derive(Debug)]
pub struct TweedieFit {
    power: f64,
    phi: f64,
    log_likelihood: f64,
    profiled: bool,
    profile: Vec<ProfilePoint>,
    model: Box<dyn FittedSubModel>,
    fitted_values: Vec<f64>,
}

impl TweedieFit {
    pub fn power(&self) -> f64 {
        self.power
    }

    pub fn phi(&self) -> f64 {
        self.phi
    }

    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn profile(&self) -> &[ProfilePoint] {
        &self.profile
    }

    pub fn fitted_values(&self) -> &[f64] {
        &self.fitted_values
    }

    pub fn model(&self) -> &dyn FittedSubModel {
        self.model.as_ref()
    }

    pub fn predict(&self, covariates: &Covariates) -> Result<f64> {
        self.model.predict(covariates)
    }

    pub fn summary(&self) -> TweedieSummary {
        TweedieSummary {
            model: MODEL_NAME.to_string(),
            power: self.power,
            phi: self.phi,
            log_likelihood: self.log_likelihood,
            profiled: self.profiled,
            profile: self.profile.clone(),
            fit: self.model.summary().clone(),
        }
    }
}

struct Candidate {
    fit: EngineFit,
    phi: f64,
    log_likelihood: f64,
}

/// Fits Tweedie models through a [`FittingEngine`].
pub struct TweedieFitter<'e> {
    engine: &'e dyn FittingEngine,
}

impl<'e> TweedieFitter<'e> {
    pub fn new(engine: &'e dyn FittingEngine) -> Self {
        TweedieFitter { engine }
    }

    pub fn fit(
        &self,
        series: &ObservationSeries,
        formula: &ModelFormula,
        power: &PowerSpec,
        budget: FitBudget,
        log: &LogContext,
    ) -> Result<TweedieFit> {
        let candidates = power.candidates();
        if candidates.is_empty() {
            return Err(Error::Config("tweedie power grid is empty".to_string()));
        }
        if let Some(bad) = candidates.iter().find(|p| !(1.0..=2.0).contains(*p)) {
            return Err(Error::Config(format!(
                "tweedie power {} outside [1, 2]",
                bad
            )));
        }
        let fixed = matches!(power, PowerSpec::Fixed(_));
        let y = series.values();
        let has_zero = y.iter().any(|&v| v == 0.0);

        crate::log_event!(
            log,
            INFO,
            event_names::FIT_STARTED,
            Stage::Fit,
            "fitting tweedie model",
            model = MODEL_NAME,
            rows = series.len() as u64,
            candidates = candidates.len() as u64
        );

        let mut profile = Vec::with_capacity(candidates.len());
        let mut best: Option<(usize, Candidate)> = None;
        for &p in &candidates {
            let point = if p == 2.0 && has_zero {
                let err = Error::fit_failure(
                    MODEL_NAME,
                    "p = 2 is the Gamma likelihood, undefined for zero responses",
                );
                if fixed {
                    return Err(err);
                }
                ProfilePoint {
                    power: p,
                    log_likelihood: None,
                    phi: None,
                    error: Some(StructuredError::from(&err)),
                }
            } else {
                match self.evaluate(series, &y, formula, p, budget, log) {
                    Ok(candidate) => {
                        let ll = candidate.log_likelihood;
                        let point = ProfilePoint {
                            power: p,
                            log_likelihood: ll.is_finite().then_some(ll),
                            phi: Some(candidate.phi),
                            error: None,
                        };
                        let better = ll.is_finite()
                            && best.as_ref().map_or(true, |(_, b)| ll > b.log_likelihood);
                        if better {
                            best = Some((profile.len(), candidate));
                        }
                        point
                    }
                    Err(e @ Error::FitTimeout { .. }) => return Err(e),
                    Err(e) if fixed => return Err(e),
                    Err(e) => ProfilePoint {
                        power: p,
                        log_likelihood: None,
                        phi: None,
                        error: Some(StructuredError::from(&e)),
                    },
                }
            };
            crate::log_event!(
                log,
                DEBUG,
                event_names::PROFILE_CANDIDATE,
                Stage::Profile,
                "power candidate evaluated",
                model = MODEL_NAME,
                power = p,
                log_likelihood = point.log_likelihood.unwrap_or(f64::NEG_INFINITY),
                failed = point.error.is_some()
            );
            profile.push(point);
        }

        let (selected, chosen) = best.ok_or_else(|| {
            Error::fit_failure(
                MODEL_NAME,
                format!(
                    "no candidate power has a finite log-likelihood (tried {})",
                    candidates
                        .iter()
                        .map(|p| format!("{:.2}", p))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            )
        })?;
        let selected_power = profile[selected].power;

        crate::log_event!(
            log,
            INFO,
            event_names::PROFILE_SELECTED,
            Stage::Profile,
            "variance power selected",
            model = MODEL_NAME,
            power = selected_power,
            phi = chosen.phi,
            log_likelihood = chosen.log_likelihood
        );

        Ok(TweedieFit {
            power: selected_power,
            phi: chosen.phi,
            log_likelihood: chosen.log_likelihood,
            profiled: !fixed,
            profile,
            fitted_values: chosen.fit.fitted_values,
            model: chosen.fit.model,
        })
    }

    /// Fit the mean at power `p` and maximise the likelihood over `phi`.
    fn evaluate(
        &self,
        series: &ObservationSeries,
        y: &[f64],
        formula: &ModelFormula,
        p: f64,
        budget: FitBudget,
        log: &LogContext,
    ) -> Result<Candidate> {
        let fit = self.engine.fit(&FitRequest {
            model_name: MODEL_NAME,
            formula,
            family: Family::Tweedie { power: p },
            rows: series.rows(),
            response: y,
            budget,
            log,
        })?;
        let mu = &fit.fitted_values;

        let (phi, log_likelihood) = if p == 1.0 {
            (1.0, tweedie_log_likelihood(y, mu, 1.0, 1.0))
        } else {
            let pearson = fit.model.summary().dispersion;
            let center = if pearson.is_finite() && pearson > 0.0 {
                pearson.ln()
            } else {
                0.0
            };
            let (lo, hi) = (center - LOG_PHI_HALF_WIDTH, center + LOG_PHI_HALF_WIDTH);
            let log_phi = golden_section_max(|lp| tweedie_log_likelihood(y, mu, lp.exp(), p), lo, hi);
            let phi = log_phi.exp();
            if at_bracket_edge(log_phi, lo, hi) {
                crate::log_event!(
                    log,
                    WARN,
                    event_names::PROFILE_PHI_AT_BOUND,
                    Stage::Profile,
                    "dispersion optimum is on the search bracket edge; the likelihood may be unbounded",
                    model = MODEL_NAME,
                    power = p,
                    phi = phi
                );
            }
            (phi, tweedie_log_likelihood(y, mu, phi, p))
        };

        Ok(Candidate {
            fit,
            phi,
            log_likelihood,
        })
    }
}

fn at_bracket_edge(x: f64, lo: f64, hi: f64) -> bool {
    x - lo < EDGE_TOL || hi - x < EDGE_TOL
}

/// Maximiser of a unimodal function on `[lo, hi]`.
///
/// NaN values are treated as `-inf`.
fn golden_section_max<F: Fn(f64) -> f64>(f: F, lo: f64, hi: f64) -> f64 {
    let inv_phi = (5f64.sqrt() - 1.0) / 2.0;
    let eval = |x: f64| {
        let v = f(x);
        if v.is_nan() {
            f64::NEG_INFINITY
        } else {
            v
        }
    };
    let (mut a, mut b) = (lo, hi);
    let mut c = b - inv_phi * (b - a);
    let mut d = a + inv_phi * (b - a);
    let mut fc = eval(c);
    let mut fd = eval(d);
    for _ in 0..GOLDEN_ITERATIONS {
        if (b - a).abs() < GOLDEN_TOL {
            break;
        }
        if fc >= fd {
            b = d;
            d = c;
            fd = fc;
            c = b - inv_phi * (b - a);
            fc = eval(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + inv_phi * (b - a);
            fd = eval(d);
        }
    }
    (a + b) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{build_series, CovariateValue, Observation};
    use crate::engine::IrlsEngine;

    fn series(values: &[f64]) -> ObservationSeries {
        build_series(
            values
                .iter()
                .enumerate()
                .map(|(i, &v)| Observation::new(i as i64, v).with("t", CovariateValue::Numeric(i as f64)))
                .collect(),
        )
        .unwrap()
    }

    fn fit(values: &[f64], power: PowerSpec) -> Result<TweedieFit> {
        let engine = IrlsEngine::default();
        TweedieFitter::new(&engine).fit(
            &series(values),
            &ModelFormula::intercept_only(),
            &power,
            FitBudget::unlimited(),
            &LogContext::detached(),
        )
    }

    const ZERO_HEAVY: [f64; 12] = [0.0, 0.0, 5.2, 0.0, 3.1, 0.0, 1.7, 0.0, 0.0, 4.4, 2.2, 0.0];

    #[test]
    fn default_grid_is_exact() {
        let grid = PowerSpec::default_grid();
        assert_eq!(grid.len(), 11);
        assert_eq!(grid[0], 1.0);
        assert_eq!(grid[3], 1.3);
        assert_eq!(grid[10], 2.0);
        assert!(power_grid(1.0, 2.0, 0.0).is_empty());
        assert!(power_grid(2.0, 1.0, 0.1).is_empty());
        assert_eq!(power_grid(1.2, 1.2, 0.1), vec![1.2]);
    }

    #[test]
    fn profile_picks_interior_power_for_zero_inflated_data() {
        let fit = fit(&ZERO_HEAVY, PowerSpec::default()).unwrap();
        assert!(fit.power() > 1.0 && fit.power() < 2.0, "p = {}", fit.power());
        assert!(fit.phi() > 0.0);
        assert_eq!(fit.profile().len(), 11);

        // Poisson is -inf on non-integer data; Gamma is skipped with zeros.
        assert_eq!(fit.profile()[0].log_likelihood, None);
        let last = &fit.profile()[10];
        assert_eq!(last.log_likelihood, None);
        assert!(last.error.is_some());

        let best = fit
            .profile()
            .iter()
            .filter_map(|p| p.log_likelihood)
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(best, fit.log_likelihood());
        let mean = ZERO_HEAVY.iter().sum::<f64>() / ZERO_HEAVY.len() as f64;
        let m = fit.predict(&series(&ZERO_HEAVY).rows()[0].covariates).unwrap();
        assert!((m - mean).abs() < 1e-6);
    }

    #[test]
    fn profile_is_deterministic() {
        let a = fit(&ZERO_HEAVY, PowerSpec::default()).unwrap();
        let b = fit(&ZERO_HEAVY, PowerSpec::default()).unwrap();
        assert_eq!(a.power(), b.power());
        assert_eq!(a.log_likelihood(), b.log_likelihood());
        assert_eq!(a.profile(), b.profile());
    }

    #[test]
    fn ties_resolve_to_smallest_power() {
        // Identical candidates give identical likelihoods.
        let fit = fit(&ZERO_HEAVY, PowerSpec::Profile(vec![1.5, 1.5, 1.5])).unwrap();
        assert_eq!(fit.power(), 1.5);
        let fit2 = self::fit(&ZERO_HEAVY, PowerSpec::Profile(vec![1.4, 1.4])).unwrap();
        assert_eq!(fit2.power(), 1.4);
    }

    #[test]
    fn poisson_endpoint_on_counts() {
        let counts = [0.0, 2.0, 1.0, 0.0, 3.0, 1.0];
        let fit = fit(&counts, PowerSpec::Fixed(1.0)).unwrap();
        assert_eq!(fit.phi(), 1.0);
        assert!(fit.log_likelihood().is_finite());
        assert!(!fit.summary().profiled);
    }

    #[test]
    fn gamma_endpoint_with_zeros_fails_when_fixed() {
        assert!(matches!(
            fit(&ZERO_HEAVY, PowerSpec::Fixed(2.0)),
            Err(Error::FitFailure { .. })
        ));
        assert!(fit(&[1.0, 2.5, 0.7], PowerSpec::Fixed(2.0)).is_ok());
    }

    #[test]
    fn all_candidates_non_finite_is_a_fit_failure() {
        // Non-integer data with zeros: p = 1 is -inf and p = 2 is skipped.
        match fit(&ZERO_HEAVY, PowerSpec::Profile(vec![1.0, 2.0])) {
            Err(Error::FitFailure { model, reason }) => {
                assert_eq!(model, MODEL_NAME);
                assert!(reason.contains("finite"));
            }
            other => panic!("expected fit failure, got {:?}", other),
        }
    }

    #[test]
    fn invalid_powers_are_config_errors() {
        assert!(matches!(fit(&ZERO_HEAVY, PowerSpec::Fixed(2.5)), Err(Error::Config(_))));
        assert!(matches!(fit(&ZERO_HEAVY, PowerSpec::Profile(vec![])), Err(Error::Config(_))));
    }

    #[test]
    fn golden_section_finds_quadratic_peak() {
        let x = golden_section_max(|x| -(x - 1.25).powi(2), -5.0, 5.0);
        assert!((x - 1.25).abs() < 1e-6);
        assert!(!at_bracket_edge(x, -5.0, 5.0));
    }

    #[test]
    fn monotone_objective_lands_on_bracket_edge() {
        let up = golden_section_max(|x| x, -7.0, 7.0);
        assert!(at_bracket_edge(up, -7.0, 7.0), "{}", up);
        let down = golden_section_max(|x| -x, -7.0, 7.0);
        assert!(at_bracket_edge(down, -7.0, 7.0), "{}", down);
    }

    #[test]
    fn single_positive_row_still_fits() {
        // A perfect fit has no dispersion optimum inside the bracket.
        let fit = fit(&[4.0], PowerSpec::Fixed(1.5)).unwrap();
        assert!(fit.log_likelihood().is_finite());
        assert!(fit.phi() > 0.0 && fit.phi() < 1e-2, "phi = {}", fit.phi());
    }
}
