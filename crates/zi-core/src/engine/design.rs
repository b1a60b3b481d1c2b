//! Design matrices for model formulas.
//!
//! A [`DesignSpec`] is learned from the training rows once (centres, factor
//! levels, spline knots, group labels) and then maps any covariate set to a
//! design row. Column 0 is always the intercept.

use nalgebra::DMatrix;
use std::collections::BTreeSet;

use zi_common::{Error, Result};

use super::formula::{ModelFormula, Term};
use crate::data::{CovariateValue, Covariates, Observation};

/// Quadratic penalty on one contiguous block of coefficients.
#[derive(Debug, Clone)]
pub struct PenaltyBlock {
    /// Term label, e.g. `s(time)`.
    pub term: String,
    pub offset: usize,
    pub matrix: DMatrix<f64>,
}

impl PenaltyBlock {
    pub fn width(&self) -> usize {
        self.matrix.nrows()
    }
}

#[derive(Debug, Clone)]
enum Basis {
    Linear { center: f64 },
    Factor { baseline: String, levels: Vec<String> },
    Smooth(SplineBasis),
    Random { groups: Vec<String> },
}

#[derive(Debug, Clone)]
struct Block {
    term: Term,
    basis: Basis,
    offset: usize,
    width: usize,
}

/// Learned mapping from covariates to design rows.
#[derive(Debug, Clone)]
pub struct DesignSpec {
    blocks: Vec<Block>,
    penalties: Vec<PenaltyBlock>,
    aliased: Vec<String>,
    ncols: usize,
}

impl DesignSpec {
    /// Learn the design from training rows.
    ///
    /// Terms whose covariate is constant over the training rows carry no
    /// information and are dropped; they are listed in [`aliased`](Self::aliased).
    pub fn fit(formula: &ModelFormula, rows: &[Observation]) -> Result<DesignSpec> {
        let mut blocks = Vec::new();
        let mut penalties = Vec::new();
        let mut aliased = Vec::new();
        let mut offset = 1;

        for term in formula.terms() {
            let var = term.var();
            let basis = match term {
                Term::Linear { .. } => {
                    let xs = numeric_column(var, rows)?;
                    if is_constant(&xs) {
                        aliased.push(term.to_string());
                        continue;
                    }
                    Basis::Linear {
                        center: xs.iter().sum::<f64>() / xs.len() as f64,
                    }
                }
                Term::Factor { .. } => {
                    let levels = level_set(var, rows)?;
                    if levels.len() < 2 {
                        aliased.push(term.to_string());
                        continue;
                    }
                    // First sorted level is the baseline.
                    let mut levels = levels.into_iter();
                    let baseline = levels.next().unwrap_or_default();
                    Basis::Factor {
                        baseline,
                        levels: levels.collect(),
                    }
                }
                Term::Smooth { k, .. } => {
                    let xs = numeric_column(var, rows)?;
                    if is_constant(&xs) {
                        aliased.push(term.to_string());
                        continue;
                    }
                    Basis::Smooth(SplineBasis::fit(&xs, *k))
                }
                Term::Random { .. } => Basis::Random {
                    groups: level_set(var, rows)?.into_iter().collect(),
                },
            };

            let width = match &basis {
                Basis::Linear { .. } => 1,
                Basis::Factor { levels, .. } => levels.len(),
                Basis::Smooth(spline) => spline.width(),
                Basis::Random { groups } => groups.len(),
            };
            match &basis {
                Basis::Smooth(spline) => penalties.push(PenaltyBlock {
                    term: term.to_string(),
                    offset,
                    matrix: spline.penalty(),
                }),
                Basis::Random { .. } => penalties.push(PenaltyBlock {
                    term: term.to_string(),
                    offset,
                    matrix: DMatrix::identity(width, width),
                }),
                _ => {}
            }
            blocks.push(Block {
                term: term.clone(),
                basis,
                offset,
                width,
            });
            offset += width;
        }

        Ok(DesignSpec {
            blocks,
            penalties,
            aliased,
            ncols: offset,
        })
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn penalties(&self) -> &[PenaltyBlock] {
        &self.penalties
    }

    /// Terms dropped because their covariate was constant.
    pub fn aliased(&self) -> &[String] {
        &self.aliased
    }

    pub fn column_names(&self) -> Vec<String> {
        let mut names = vec!["(Intercept)".to_string()];
        for block in &self.blocks {
            let label = block.term.to_string();
            match &block.basis {
                Basis::Linear { .. } => names.push(label),
                Basis::Factor { levels, .. } => {
                    names.extend(levels.iter().map(|l| format!("{}{}", label, l)))
                }
                Basis::Smooth(spline) => {
                    names.extend((1..=spline.width()).map(|j| format!("{}.{}", label, j)))
                }
                Basis::Random { groups } => {
                    names.extend(groups.iter().map(|g| format!("{}{}", label, g)))
                }
            }
        }
        names
    }

    /// Design row for one covariate set.
    ///
    /// The error string explains why the covariates fall outside what the
    /// design was learned on.
    pub fn row(&self, covariates: &Covariates) -> std::result::Result<Vec<f64>, String> {
        let mut row = vec![0.0; self.ncols];
        row[0] = 1.0;
        for block in &self.blocks {
            let var = block.term.var();
            let cell = covariates
                .get(var)
                .ok_or_else(|| format!("missing covariate '{}'", var))?;
            let out = &mut row[block.offset..block.offset + block.width];
            match &block.basis {
                Basis::Linear { center } => {
                    out[0] = numeric_cell(var, cell)? - center;
                }
                Basis::Factor { baseline, levels } => {
                    let key = cell.level_key();
                    match levels.binary_search(&key) {
                        Ok(j) => out[j] = 1.0,
                        Err(_) if key == *baseline => {}
                        Err(_) => {
                            return Err(format!("level '{}' of factor({}) not seen in fitting", key, var))
                        }
                    }
                }
                Basis::Smooth(spline) => {
                    let x = numeric_cell(var, cell)?;
                    spline.fill(x, out).map_err(|e| format!("s({}): {}", var, e))?;
                }
                Basis::Random { groups } => {
                    // Unseen groups predict at the population level.
                    if let Ok(j) = groups.binary_search(&cell.level_key()) {
                        out[j] = 1.0;
                    }
                }
            }
        }
        Ok(row)
    }

    /// Design matrix for training rows. Errors name the offending row.
    pub fn matrix(&self, rows: &[Observation]) -> Result<DMatrix<f64>> {
        let mut x = DMatrix::zeros(rows.len(), self.ncols);
        for (i, obs) in rows.iter().enumerate() {
            let row = self
                .row(&obs.covariates)
                .map_err(|reason| Error::validation(Some(i), reason))?;
            for (j, v) in row.into_iter().enumerate() {
                x[(i, j)] = v;
            }
        }
        Ok(x)
    }
}

fn numeric_cell(var: &str, cell: &CovariateValue) -> std::result::Result<f64, String> {
    cell.as_numeric().ok_or_else(|| {
        format!(
            "covariate '{}' is categorical ('{}'); use factor({}) or re({})",
            var, cell, var, var
        )
    })
}

fn numeric_column(var: &str, rows: &[Observation]) -> Result<Vec<f64>> {
    rows.iter()
        .enumerate()
        .map(|(i, obs)| {
            let cell = obs
                .covariates
                .get(var)
                .ok_or_else(|| Error::validation(Some(i), format!("missing covariate '{}'", var)))?;
            numeric_cell(var, cell).map_err(|reason| Error::validation(Some(i), reason))
        })
        .collect()
}

fn level_set(var: &str, rows: &[Observation]) -> Result<BTreeSet<String>> {
    rows.iter()
        .enumerate()
        .map(|(i, obs)| {
            obs.covariates
                .get(var)
                .map(CovariateValue::level_key)
                .ok_or_else(|| Error::validation(Some(i), format!("missing covariate '{}'", var)))
        })
        .collect()
}

fn is_constant(xs: &[f64]) -> bool {
    match xs.first() {
        Some(first) => xs.iter().all(|x| x == first),
        None => true,
    }
}

/// Cubic B-spline basis on equally spaced knots with a second-difference
/// penalty.
///
/// Columns are centred on their training means and the last one is dropped,
/// so the smooth is identifiable next to the intercept.
#[derive(Debug, Clone)]
struct SplineBasis {
    lo: f64,
    hi: f64,
    k: usize,
    knots: Vec<f64>,
    means: Vec<f64>,
}

impl SplineBasis {
    fn fit(xs: &[f64], k: usize) -> SplineBasis {
        let lo = xs.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let dx = (hi - lo) / (k - 3) as f64;
        // Three extra knots on each side of the data range.
        let knots = (0..k + 4).map(|j| lo + (j as f64 - 3.0) * dx).collect();

        let mut basis = SplineBasis {
            lo,
            hi,
            k,
            knots,
            means: vec![0.0; k],
        };
        let mut sums = vec![0.0; k];
        for &x in xs {
            for (s, b) in sums.iter_mut().zip(basis.raw(x)) {
                *s += b;
            }
        }
        basis.means = sums.into_iter().map(|s| s / xs.len() as f64).collect();
        basis
    }

    fn width(&self) -> usize {
        self.k - 1
    }

    /// Uncentred basis values via the Cox-de Boor recursion.
    fn raw(&self, x: f64) -> Vec<f64> {
        let mut b = self.cox_de_boor(x, 3);
        b.truncate(self.k);
        b
    }

    /// First derivative of the uncentred basis at `x`.
    fn slope(&self, x: f64) -> Vec<f64> {
        let dx = self.knots[1] - self.knots[0];
        let b = self.cox_de_boor(x, 2);
        (0..self.k).map(|j| (b[j] - b[j + 1]) / dx).collect()
    }

    /// B-spline values of degree `degree`, one per knot interval.
    fn cox_de_boor(&self, x: f64, degree: usize) -> Vec<f64> {
        let t = &self.knots;
        let dx = t[1] - t[0];
        let last = self.k - 1;
        // x == hi belongs to the last interior interval.
        let span = ((((x - self.lo) / dx).floor() as i64) + 3).clamp(3, last as i64) as usize;

        let mut b = vec![0.0; t.len() - 1];
        b[span] = 1.0;
        for d in 1..=degree {
            for j in 0..t.len() - 1 - d {
                let left = (x - t[j]) / (t[j + d] - t[j]) * b[j];
                let right = (t[j + d + 1] - x) / (t[j + d + 1] - t[j + 1]) * b[j + 1];
                b[j] = left + right;
            }
        }
        b
    }

    /// Centred basis row. Outside `[lo, hi]` each column continues along its
    /// tangent at the nearest boundary.
    fn fill(&self, x: f64, out: &mut [f64]) -> std::result::Result<(), String> {
        if !x.is_finite() {
            return Err(format!("value {} is not finite", x));
        }
        let edge = x.clamp(self.lo, self.hi);
        let mut raw = self.raw(edge);
        if x != edge {
            for (r, s) in raw.iter_mut().zip(self.slope(edge)) {
                *r += (x - edge) * s;
            }
        }
        for (j, slot) in out.iter_mut().enumerate() {
            *slot = raw[j] - self.means[j];
        }
        Ok(())
    }

    /// `D'D` for second differences, restricted to the kept columns.
    fn penalty(&self) -> DMatrix<f64> {
        let k = self.k;
        let mut d = DMatrix::zeros(k - 2, k);
        for r in 0..k - 2 {
            d[(r, r)] = 1.0;
            d[(r, r + 1)] = -2.0;
            d[(r, r + 2)] = 1.0;
        }
        let full = d.transpose() * d;
        full.view((0, 0), (k - 1, k - 1)).clone_owned()
    }
}
