//! Model formulas.
//!
//! A formula is a `+`-separated list of terms with an implicit intercept:
//!
//! ```text
//! time + factor(site) + s(temp, k=8) + re(station)
//! ```
//!
//! An optional response prefix (`value ~` or just `~`) is accepted and
//! ignored; the response is always the measured value. A lone `1` means
//! intercept only.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Default spline basis dimension for `s(x)`.
pub const DEFAULT_BASIS_SIZE: usize = 10;

/// Smallest basis that still has one cubic segment.
pub const MIN_BASIS_SIZE: usize = 4;

pub const MAX_BASIS_SIZE: usize = 40;

/// Errors raised while parsing a formula.
#[derive(Debug, Error, PartialEq)]
pub enum FormulaError {
    #[error("formula is empty")]
    Empty,

    #[error("empty term at position {0}")]
    EmptyTerm(usize),

    #[error("cannot parse term '{0}'")]
    BadTerm(String),

    #[error("basis size k={k} for s({var}) must be between {min} and {max}")]
    BasisSize {
        var: String,
        k: usize,
        min: usize,
        max: usize,
    },

    #[error("duplicate term '{0}'")]
    Duplicate(String),

    #[error("term pattern failed to compile: {0}")]
    Pattern(String),
}

impl From<FormulaError> for zi_common::Error {
    fn from(err: FormulaError) -> Self {
        zi_common::Error::Formula(err.to_string())
    }
}

/// One right-hand-side term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Term {
    /// Numeric covariate entering linearly.
    Linear { var: String },
    /// Categorical covariate with treatment contrasts.
    Factor { var: String },
    /// Penalized cubic regression spline.
    Smooth { var: String, k: usize },
    /// Ridge-penalized group intercepts.
    Random { var: String },
}

impl Term {
    pub fn var(&self) -> &str {
        match self {
            Term::Linear { var }
            | Term::Factor { var }
            | Term::Smooth { var, .. }
            | Term::Random { var } => var,
        }
    }

    pub fn is_penalized(&self) -> bool {
        matches!(self, Term::Smooth { .. } | Term::Random { .. })
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Linear { var } => write!(f, "{}", var),
            Term::Factor { var } => write!(f, "factor({})", var),
            Term::Smooth { var, k } if *k == DEFAULT_BASIS_SIZE => write!(f, "s({})", var),
            Term::Smooth { var, k } => write!(f, "s({}, k={})", var, k),
            Term::Random { var } => write!(f, "re({})", var),
        }
    }
}

/// Which predictor family a formula belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictorKind {
    /// Only linear and factor terms.
    Linear,
    /// At least one smooth term, no random effects.
    Smooth,
    /// At least one random-intercept term.
    Mixed,
}

/// Parsed right-hand side of a model formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFormula {
    terms: Vec<Term>,
}

fn term_pattern() -> Result<&'static Regex, FormulaError> {
    static PATTERN: OnceLock<Result<Regex, String>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"^(?:(factor|re)\(\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\)|s\(\s*([A-Za-z_][A-Za-z0-9_.]*)\s*(?:,\s*k\s*=\s*(\d+)\s*)?\)|([A-Za-z_][A-Za-z0-9_.]*))$",
            )
            .map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(|e| FormulaError::Pattern(e.clone()))
}

impl ModelFormula {
    /// Intercept-only formula.
    pub fn intercept_only() -> Self {
        ModelFormula { terms: Vec::new() }
    }

    pub fn parse(text: &str) -> Result<Self, FormulaError> {
        let rhs = match text.split_once('~') {
            Some((_, rhs)) => rhs,
            None => text,
        };
        let rhs = rhs.trim();
        if rhs.is_empty() {
            return Err(FormulaError::Empty);
        }

        let pattern = term_pattern()?;
        let mut terms: Vec<Term> = Vec::new();
        for (pos, raw) in rhs.split('+').enumerate() {
            let raw = raw.trim();
            if raw.is_empty() {
                return Err(FormulaError::EmptyTerm(pos));
            }
            if raw == "1" {
                continue;
            }
            let caps = pattern
                .captures(raw)
                .ok_or_else(|| FormulaError::BadTerm(raw.to_string()))?;

            let term = if let (Some(kind), Some(var)) = (caps.get(1), caps.get(2)) {
                let var = var.as_str().to_string();
                if kind.as_str() == "factor" {
                    Term::Factor { var }
                } else {
                    Term::Random { var }
                }
            } else if let Some(var) = caps.get(3) {
                let var = var.as_str().to_string();
                let k = match caps.get(4) {
                    Some(k) => k
                        .as_str()
                        .parse::<usize>()
                        .map_err(|_| FormulaError::BadTerm(raw.to_string()))?,
                    None => DEFAULT_BASIS_SIZE,
                };
                if !(MIN_BASIS_SIZE..=MAX_BASIS_SIZE).contains(&k) {
                    return Err(FormulaError::BasisSize {
                        var,
                        k,
                        min: MIN_BASIS_SIZE,
                        max: MAX_BASIS_SIZE,
                    });
                }
                Term::Smooth { var, k }
            } else if let Some(var) = caps.get(5) {
                Term::Linear {
                    var: var.as_str().to_string(),
                }
            } else {
                return Err(FormulaError::BadTerm(raw.to_string()));
            };

            // One term per covariate: x and s(x) together are not identifiable.
            if let Some(existing) = terms.iter().find(|t| t.var() == term.var()) {
                return Err(FormulaError::Duplicate(format!("{} / {}", existing, term)));
            }
            terms.push(term);
        }

        Ok(ModelFormula { terms })
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Covariate names the formula reads.
    pub fn variables(&self) -> Vec<&str> {
        self.terms.iter().map(Term::var).collect()
    }

    pub fn kind(&self) -> PredictorKind {
        if self.terms.iter().any(|t| matches!(t, Term::Random { .. })) {
            PredictorKind::Mixed
        } else if self.terms.iter().any(|t| matches!(t, Term::Smooth { .. })) {
            PredictorKind::Smooth
        } else {
            PredictorKind::Linear
        }
    }
}

impl std::str::FromStr for ModelFormula {
    type Err = FormulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelFormula::parse(s)
    }
}

impl fmt::Display for ModelFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return write!(f, "1");
        }
        let parts: Vec<String> = self.terms.iter().map(Term::to_string).collect();
        write!(f, "{}", parts.join(" + "))
    }
}
