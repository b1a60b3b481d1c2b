//! Penalized iteratively reweighted least squares.
//!
//! For fixed smoothing parameters each step solves
//! `(X'WX + S) beta = X'Wz` by Cholesky factorisation, with working response
//! `z = eta + (y - mu) / mu'(eta)` and weights `W = mu'(eta)^2 / V(mu)`.
//! Smoothing parameters are chosen per penalized term by coordinate search
//! over a fixed grid, minimising the GCV score `n D / (n - edf)^2`.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};

use zi_common::{Error, Result};

use super::design::{DesignSpec, PenaltyBlock};
use super::family::Family;
use super::{
    Coefficient, EngineFit, FitBudget, FitRequest, FittedSubModel, FittingEngine, ModelSummary,
    SmoothingParam,
};
use crate::data::Covariates;
use crate::logging::{event_names, LogContext, Stage};

/// Step-halving attempts after a non-finite deviance.
const MAX_HALVINGS: usize = 30;

/// Smallest allowed ratio between Cholesky pivots before the system counts
/// as rank deficient.
const PIVOT_RATIO: f64 = 1e-7;

/// Tuning for [`IrlsEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrlsOptions {
    pub max_iterations: usize,
    /// Relative change in penalized deviance that counts as converged.
    pub tolerance: f64,
    /// Candidate smoothing parameters for every penalized term.
    pub smoothing_grid: Vec<f64>,
    /// Coordinate-search sweeps over the penalized terms.
    pub gcv_sweeps: usize,
}

impl Default for IrlsOptions {
    fn default() -> Self {
        IrlsOptions {
            max_iterations: 100,
            tolerance: 1e-8,
            smoothing_grid: vec![1e-3, 1e-2, 0.1, 1.0, 10.0, 100.0, 1e3, 1e4],
            gcv_sweeps: 2,
        }
    }
}

/// Built-in GLM backend.
#[derive(Debug, Clone, Default)]
pub struct IrlsEngine {
    options: IrlsOptions,
}

impl IrlsEngine {
    pub fn new(options: IrlsOptions) -> Self {
        IrlsEngine { options }
    }

    pub fn options(&self) -> &IrlsOptions {
        &self.options
    }
}

/// Outcome of one penalized IRLS run at fixed smoothing parameters.
#[derive(Debug, Clone)]
struct PirlsFit {
    beta: DVector<f64>,
    mu: Vec<f64>,
    deviance: f64,
    edf: f64,
    iterations: usize,
}

/// Inputs shared by every IRLS run of one request.
struct Problem<'a> {
    x: &'a DMatrix<f64>,
    y: &'a [f64],
    family: Family,
    penalties: &'a [PenaltyBlock],
    model: &'a str,
    budget: FitBudget,
    log: &'a LogContext,
}

impl FittingEngine for IrlsEngine {
    fn name(&self) -> &'static str {
        "irls"
    }

    fn fit(&self, request: &FitRequest<'_>) -> Result<EngineFit> {
        let model = request.model_name;
        let rows = request.rows;
        let y = request.response;
        if rows.is_empty() {
            return Err(Error::fit_failure(model, "no rows to fit"));
        }
        if rows.len() != y.len() {
            return Err(Error::fit_failure(
                model,
                format!("{} responses for {} rows", y.len(), rows.len()),
            ));
        }
        for (i, &yi) in y.iter().enumerate() {
            request
                .family
                .check_response(yi)
                .map_err(|reason| Error::validation(Some(i), reason))?;
        }

        let design = DesignSpec::fit(request.formula, rows)?;
        let x = design.matrix(rows)?;
        let problem = Problem {
            x: &x,
            y,
            family: request.family,
            penalties: design.penalties(),
            model,
            budget: request.budget,
            log: request.log,
        };

        let lambdas = self.select_smoothing(&problem)?;
        let fit = self.pirls(&problem, &lambdas)?;

        let dispersion = if request.family.fixed_dispersion() {
            1.0
        } else {
            pearson_dispersion(request.family, y, &fit.mu, fit.edf)
        };
        let summary = ModelSummary {
            family: request.family.to_string(),
            link: request.family.link_name().to_string(),
            formula: request.formula.to_string(),
            coefficients: design
                .column_names()
                .into_iter()
                .zip(fit.beta.iter())
                .map(|(name, &estimate)| Coefficient { name, estimate })
                .collect(),
            deviance: fit.deviance,
            edf: fit.edf,
            dispersion,
            iterations: fit.iterations,
            converged: true,
            n: rows.len(),
            smoothing: design
                .penalties()
                .iter()
                .zip(&lambdas)
                .map(|(p, &lambda)| SmoothingParam {
                    term: p.term.clone(),
                    lambda,
                })
                .collect(),
            aliased: design.aliased().to_vec(),
        };

        Ok(EngineFit {
            fitted_values: fit.mu.clone(),
            model: Box::new(IrlsModel {
                name: model.to_string(),
                family: request.family,
                beta: fit.beta.iter().copied().collect(),
                design,
                summary,
            }),
        })
    }
}

impl IrlsEngine {
    /// Coordinate search for one smoothing parameter per penalized term.
    ///
    /// Every term starts at the middle of the grid. Within a term the first
    /// grid value with the lowest GCV score wins. Candidates whose fit fails
    /// are skipped; a timeout ends the search.
    fn select_smoothing(&self, problem: &Problem<'_>) -> Result<Vec<f64>> {
        let blocks = problem.penalties.len();
        let grid: &[f64] = if self.options.smoothing_grid.is_empty() {
            &[1.0]
        } else {
            &self.options.smoothing_grid
        };
        let mut lambdas = vec![grid[grid.len() / 2]; blocks];
        if blocks == 0 {
            return Ok(lambdas);
        }

        let n = problem.y.len() as f64;
        for _ in 0..self.options.gcv_sweeps {
            for b in 0..blocks {
                let mut best: Option<(f64, f64)> = None;
                for &lambda in grid {
                    let mut trial = lambdas.clone();
                    trial[b] = lambda;
                    let fit = match self.pirls(problem, &trial) {
                        Ok(fit) => fit,
                        Err(e @ Error::FitTimeout { .. }) => return Err(e),
                        Err(_) => continue,
                    };
                    let score = gcv_score(n, fit.deviance, fit.edf);
                    if best.map_or(true, |(s, _)| score < s) {
                        best = Some((score, lambda));
                    }
                }
                if let Some((score, lambda)) = best {
                    lambdas[b] = lambda;
                    crate::log_event!(
                        problem.log,
                        DEBUG,
                        event_names::FIT_SMOOTHING,
                        Stage::Fit,
                        "smoothing parameter selected",
                        model = problem.model,
                        term = problem.penalties[b].term.as_str(),
                        lambda = lambda,
                        gcv = score
                    );
                }
            }
        }
        Ok(lambdas)
    }

    fn pirls(&self, problem: &Problem<'_>, lambdas: &[f64]) -> Result<PirlsFit> {
        let x = problem.x;
        let y = problem.y;
        let family = problem.family;
        let model = problem.model;
        let s = penalty_matrix(x.ncols(), problem.penalties, lambdas);

        let mut mu: Vec<f64> = y.iter().map(|&yi| family.initial_mu(yi)).collect();
        let mut eta: Vec<f64> = mu.iter().map(|&m| family.link(m)).collect();
        let mut pdev_old = deviance(family, y, &mu);
        let mut beta_old: Option<DVector<f64>> = None;

        for iteration in 1..=self.options.max_iterations {
            problem.budget.check(model)?;

            let (xtwx, xtwz) = weighted_cross_products(x, y, family, &eta, &mu);
            let chol = factorize(&xtwx + &s).ok_or_else(|| {
                Error::fit_failure(model, "penalized normal equations are singular")
            })?;
            let mut beta = chol.solve(&xtwz);
            let mut state = evaluate(x, y, family, &s, &beta);

            let mut halvings = 0;
            while !state.penalized.is_finite() {
                match &beta_old {
                    Some(old) if halvings < MAX_HALVINGS => {
                        beta = (&beta + old) * 0.5;
                        state = evaluate(x, y, family, &s, &beta);
                        halvings += 1;
                    }
                    _ => {
                        return Err(Error::fit_failure(
                            model,
                            format!("deviance is not finite at iteration {}", iteration),
                        ))
                    }
                }
            }

            eta = state.eta;
            mu = state.mu;
            crate::log_event!(
                problem.log,
                DEBUG,
                event_names::FIT_ITERATION,
                Stage::Fit,
                "IRLS step",
                model = model,
                iteration = iteration as u64,
                deviance = state.penalized
            );

            let converged =
                (state.penalized - pdev_old).abs() / (state.penalized.abs() + 0.1) < self.options.tolerance;
            pdev_old = state.penalized;
            if converged {
                let edf = effective_df(x, y, family, &eta, &mu, &s).ok_or_else(|| {
                    Error::fit_failure(model, "cannot compute effective degrees of freedom")
                })?;
                return Ok(PirlsFit {
                    beta,
                    mu,
                    deviance: state.deviance,
                    edf,
                    iterations: iteration,
                });
            }
            beta_old = Some(beta);
        }

        Err(Error::fit_failure(
            model,
            format!("did not converge in {} iterations", self.options.max_iterations),
        ))
    }
}

struct StepState {
    eta: Vec<f64>,
    mu: Vec<f64>,
    deviance: f64,
    penalized: f64,
}

fn evaluate(
    x: &DMatrix<f64>,
    y: &[f64],
    family: Family,
    s: &DMatrix<f64>,
    beta: &DVector<f64>,
) -> StepState {
    let eta_v = x * beta;
    let eta: Vec<f64> = eta_v.iter().copied().collect();
    let mu: Vec<f64> = eta.iter().map(|&e| family.inverse_link(e)).collect();
    let dev = deviance(family, y, &mu);
    let penalty = beta.dot(&(s * beta));
    let penalized = if beta.iter().all(|b| b.is_finite()) {
        dev + penalty
    } else {
        f64::NAN
    };
    StepState {
        eta,
        mu,
        deviance: dev,
        penalized,
    }
}

fn deviance(family: Family, y: &[f64], mu: &[f64]) -> f64 {
    y.iter()
        .zip(mu)
        .map(|(&yi, &mi)| family.unit_deviance(yi, mi))
        .sum()
}

fn working_weights(family: Family, eta: &[f64], mu: &[f64]) -> Vec<f64> {
    eta.iter()
        .zip(mu)
        .map(|(&e, &m)| {
            let d = family.mu_eta(e);
            d * d / family.variance(m)
        })
        .collect()
}

/// `X'WX` and `X'Wz` at the current iterate.
fn weighted_cross_products(
    x: &DMatrix<f64>,
    y: &[f64],
    family: Family,
    eta: &[f64],
    mu: &[f64],
) -> (DMatrix<f64>, DVector<f64>) {
    let w = working_weights(family, eta, mu);
    let z = DVector::from_iterator(
        y.len(),
        (0..y.len()).map(|i| eta[i] + (y[i] - mu[i]) / family.mu_eta(eta[i])),
    );
    let wx = DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| x[(i, j)] * w[i]);
    let xtwx = x.transpose() * &wx;
    let xtwz = wx.transpose() * z;
    (xtwx, xtwz)
}

/// `tr((X'WX + S)^-1 X'WX)`.
fn effective_df(
    x: &DMatrix<f64>,
    y: &[f64],
    family: Family,
    eta: &[f64],
    mu: &[f64],
    s: &DMatrix<f64>,
) -> Option<f64> {
    let (xtwx, _) = weighted_cross_products(x, y, family, eta, mu);
    let chol = factorize(&xtwx + s)?;
    Some(chol.solve(&xtwx).trace())
}

/// Cholesky factor of a symmetric system, or None when it is singular.
fn factorize(a: DMatrix<f64>) -> Option<Cholesky<f64, Dyn>> {
    let chol = a.cholesky()?;
    let diag = chol.l_dirty().diagonal();
    let max = diag.max();
    let min = diag.min();
    if !min.is_finite() || min <= 0.0 || min < PIVOT_RATIO * max {
        return None;
    }
    Some(chol)
}

fn penalty_matrix(p: usize, penalties: &[PenaltyBlock], lambdas: &[f64]) -> DMatrix<f64> {
    let mut s = DMatrix::zeros(p, p);
    for (block, &lambda) in penalties.iter().zip(lambdas) {
        let w = block.width();
        let mut view = s.view_mut((block.offset, block.offset), (w, w));
        view += &block.matrix * lambda;
    }
    s
}

fn gcv_score(n: f64, deviance: f64, edf: f64) -> f64 {
    let resid_df = n - edf;
    if resid_df <= 0.0 {
        return f64::INFINITY;
    }
    n * deviance / (resid_df * resid_df)
}

/// Pearson estimate `sum (y - mu)^2 / V(mu) / max(n - edf, 1)`.
fn pearson_dispersion(family: Family, y: &[f64], mu: &[f64], edf: f64) -> f64 {
    let chi2: f64 = y
        .iter()
        .zip(mu)
        .map(|(&yi, &mi)| (yi - mi).powi(2) / family.variance(mi))
        .sum();
    chi2 / (y.len() as f64 - edf).max(1.0)
}

/// A model fitted by [`IrlsEngine`].
#[derive(Debug, Clone)]
pub struct IrlsModel {
    name: String,
    family: Family,
    design: DesignSpec,
    beta: Vec<f64>,
    summary: ModelSummary,
}

impl IrlsModel {
    pub fn family(&self) -> Family {
        self.family
    }

    /// Linear predictor for one covariate set.
    pub fn linear_predictor(&self, covariates: &Covariates) -> Result<f64> {
        let row = self.design.row(covariates).map_err(|reason| Error::Prediction {
            model: self.name.clone(),
            row: None,
            reason,
        })?;
        Ok(row.iter().zip(&self.beta).map(|(x, b)| x * b).sum())
    }
}

impl FittedSubModel for IrlsModel {
    fn predict(&self, covariates: &Covariates) -> Result<f64> {
        let mu = self.family.inverse_link(self.linear_predictor(covariates)?);
        if !mu.is_finite() {
            return Err(Error::Prediction {
                model: self.name.clone(),
                row: None,
                reason: format!("predicted mean is not finite ({})", mu),
            });
        }
        Ok(mu)
    }

    fn summary(&self) -> &ModelSummary {
        &self.summary
    }
}
