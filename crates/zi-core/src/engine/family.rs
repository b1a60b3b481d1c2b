//! Response families and link functions for the GLM engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use zi_math::bernoulli::bernoulli_unit_deviance;
use zi_math::gamma::gamma_unit_deviance;
use zi_math::logistic;
use zi_math::tweedie::tweedie_unit_deviance;

/// Smallest fitted probability distance from 0 or 1.
const PROB_EPS: f64 = 10.0 * f64::EPSILON;

/// Linear predictors are clamped here before exponentiating.
const ETA_MAX: f64 = 700.0;

/// Sigmoid link for the presence model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinomialLink {
    #[default]
    Logit,
    Cloglog,
}

impl std::str::FromStr for BinomialLink {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "logit" => Ok(BinomialLink::Logit),
            "cloglog" => Ok(BinomialLink::Cloglog),
            _ => Err(format!("unknown binomial link: {} (expected logit or cloglog)", s)),
        }
    }
}

impl fmt::Display for BinomialLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinomialLink::Logit => write!(f, "logit"),
            BinomialLink::Cloglog => write!(f, "cloglog"),
        }
    }
}

/// Exponential-dispersion family with its link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum Family {
    Binomial { link: BinomialLink },
    /// Gamma with log link.
    Gamma,
    /// Tweedie with log link and variance `mu^power`.
    Tweedie { power: f64 },
}

impl Family {
    pub fn name(&self) -> &'static str {
        match self {
            Family::Binomial { .. } => "binomial",
            Family::Gamma => "gamma",
            Family::Tweedie { .. } => "tweedie",
        }
    }

    pub fn link_name(&self) -> &'static str {
        match self {
            Family::Binomial {
                link: BinomialLink::Logit,
            } => "logit",
            Family::Binomial {
                link: BinomialLink::Cloglog,
            } => "cloglog",
            Family::Gamma | Family::Tweedie { .. } => "log",
        }
    }

    /// Binomial dispersion is fixed at 1; the others are estimated.
    pub fn fixed_dispersion(&self) -> bool {
        matches!(self, Family::Binomial { .. })
    }

    pub fn link(&self, mu: f64) -> f64 {
        match self {
            Family::Binomial { link } => {
                let mu = mu.clamp(PROB_EPS, 1.0 - PROB_EPS);
                match link {
                    BinomialLink::Logit => (mu / (1.0 - mu)).ln(),
                    BinomialLink::Cloglog => (-(-mu).ln_1p()).ln(),
                }
            }
            Family::Gamma | Family::Tweedie { .. } => mu.ln(),
        }
    }

    pub fn inverse_link(&self, eta: f64) -> f64 {
        match self {
            Family::Binomial { link } => {
                let mu = match link {
                    BinomialLink::Logit => logistic(eta),
                    BinomialLink::Cloglog => -(-eta.min(ETA_MAX).exp()).exp_m1(),
                };
                mu.clamp(PROB_EPS, 1.0 - PROB_EPS)
            }
            Family::Gamma | Family::Tweedie { .. } => eta.min(ETA_MAX).exp(),
        }
    }

    /// Derivative `dmu/deta`, floored away from zero.
    pub fn mu_eta(&self, eta: f64) -> f64 {
        let d = match self {
            Family::Binomial {
                link: BinomialLink::Logit,
            } => {
                let mu = logistic(eta);
                mu * (1.0 - mu)
            }
            Family::Binomial {
                link: BinomialLink::Cloglog,
            } => {
                let eta = eta.min(ETA_MAX);
                (eta - eta.exp()).exp()
            }
            Family::Gamma | Family::Tweedie { .. } => eta.min(ETA_MAX).exp(),
        };
        d.max(f64::EPSILON)
    }

    /// Variance function `V(mu)`.
    pub fn variance(&self, mu: f64) -> f64 {
        match self {
            Family::Binomial { .. } => mu * (1.0 - mu),
            Family::Gamma => mu * mu,
            Family::Tweedie { power } => mu.powf(*power),
        }
    }

    pub fn unit_deviance(&self, y: f64, mu: f64) -> f64 {
        match self {
            Family::Binomial { .. } => bernoulli_unit_deviance(y, mu),
            Family::Gamma => gamma_unit_deviance(y, mu),
            Family::Tweedie { power } => tweedie_unit_deviance(y, mu, *power),
        }
    }

    /// IRLS starting mean for one response.
    pub fn initial_mu(&self, y: f64) -> f64 {
        match self {
            Family::Binomial { .. } => (y + 0.5) / 2.0,
            Family::Gamma => y,
            Family::Tweedie { .. } => {
                if y == 0.0 {
                    y + 0.1
                } else {
                    y
                }
            }
        }
    }

    /// Check a response against the family's support.
    pub fn check_response(&self, y: f64) -> Result<(), String> {
        let ok = match self {
            Family::Binomial { .. } => y == 0.0 || y == 1.0,
            Family::Gamma => y.is_finite() && y > 0.0,
            Family::Tweedie { .. } => y.is_finite() && y >= 0.0,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("response {} outside the support of the {} family", y, self.name()))
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::Tweedie { power } => write!(f, "tweedie(p={:.2}, link=log)", power),
            other => write!(f, "{}(link={})", other.name(), other.link_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIT: Family = Family::Binomial {
        link: BinomialLink::Logit,
    };
    const CLOGLOG: Family = Family::Binomial {
        link: BinomialLink::Cloglog,
    };

    #[test]
    fn links_invert() {
        for family in [LOGIT, CLOGLOG, Family::Gamma, Family::Tweedie { power: 1.5 }] {
            for mu in [0.1, 0.4, 0.9] {
                let back = family.inverse_link(family.link(mu));
                assert!((back - mu).abs() < 1e-12, "{} mu={}", family, mu);
            }
        }
    }

    #[test]
    fn mu_eta_matches_finite_difference() {
        let h = 1e-6;
        for family in [LOGIT, CLOGLOG, Family::Gamma] {
            for eta in [-2.0, 0.0, 1.3] {
                let fd = (family.inverse_link(eta + h) - family.inverse_link(eta - h)) / (2.0 * h);
                assert!((family.mu_eta(eta) - fd).abs() < 1e-6, "{} eta={}", family, eta);
            }
        }
    }

    #[test]
    fn probabilities_stay_inside_unit_interval() {
        assert!(LOGIT.inverse_link(-1e4) > 0.0);
        assert!(LOGIT.inverse_link(1e4) < 1.0);
        assert!(CLOGLOG.inverse_link(1e4) < 1.0);
        assert!(CLOGLOG.mu_eta(1e4) > 0.0);
    }

    #[test]
    fn response_support() {
        assert!(LOGIT.check_response(1.0).is_ok());
        assert!(LOGIT.check_response(0.5).is_err());
        assert!(Family::Gamma.check_response(0.0).is_err());
        assert!(Family::Tweedie { power: 1.3 }.check_response(0.0).is_ok());
    }

    #[test]
    fn names() {
        assert_eq!(CLOGLOG.link_name(), "cloglog");
        assert_eq!(Family::Gamma.to_string(), "gamma(link=log)");
        assert_eq!("CLOGLOG".parse::<BinomialLink>(), Ok(BinomialLink::Cloglog));
        assert!(LOGIT.fixed_dispersion());
        assert!(!Family::Gamma.fixed_dispersion());
    }
}
