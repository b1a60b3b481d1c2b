//! Typed configuration sections.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};

use zi_common::Result;

use super::ConfigError;
use crate::compare::CandidateKind;
use crate::data::DataColumns;
use crate::engine::{BinomialLink, IrlsOptions, ModelFormula};
use crate::hurdle::{FailurePolicy, HurdleSpec, HurdleVariant};
use crate::tweedie::{power_grid, PowerSpec};

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub data: DataSettings,
    pub presence: PresenceSettings,
    pub magnitude: MagnitudeSettings,
    pub variants: VariantSettings,
    pub tweedie: TweedieSettings,
    pub engine: EngineSettings,
    pub run: RunSettings,
    pub compare: CompareSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataSettings {
    pub time_column: String,
    pub value_column: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        let cols = DataColumns::default();
        DataSettings {
            time_column: cols.time_column,
            value_column: cols.value_column,
        }
    }
}

impl DataSettings {
    pub fn columns(&self) -> DataColumns {
        DataColumns {
            time_column: self.time_column.clone(),
            value_column: self.value_column.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PresenceSettings {
    pub link: BinomialLink,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MagnitudeSettings {
    /// Fewest present rows the magnitude model accepts.
    pub min_rows: usize,
}

impl Default for MagnitudeSettings {
    fn default() -> Self {
        MagnitudeSettings { min_rows: 1 }
    }
}

/// Presence and magnitude formulas of one hurdle variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantFormulas {
    pub presence: String,
    pub magnitude: String,
}

impl VariantFormulas {
    fn both(formula: &str) -> Self {
        VariantFormulas {
            presence: formula.to_string(),
            magnitude: formula.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VariantSettings {
    pub linear: VariantFormulas,
    pub smooth: VariantFormulas,
    pub mixed: VariantFormulas,
}

impl Default for VariantSettings {
    fn default() -> Self {
        VariantSettings {
            linear: VariantFormulas::both("time"),
            smooth: VariantFormulas::both("s(time)"),
            mixed: VariantFormulas::both("time + re(group)"),
        }
    }
}

impl VariantSettings {
    pub fn formulas(&self, variant: HurdleVariant) -> &VariantFormulas {
        match variant {
            HurdleVariant::Linear => &self.linear,
            HurdleVariant::Smooth => &self.smooth,
            HurdleVariant::Mixed => &self.mixed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TweedieSettings {
    pub formula: String,
    /// Fixed variance power; profiled over the grid when absent.
    pub power: Option<f64>,
    pub grid_start: f64,
    pub grid_end: f64,
    pub grid_step: f64,
}

impl Default for TweedieSettings {
    fn default() -> Self {
        TweedieSettings {
            formula: "time".to_string(),
            power: None,
            grid_start: 1.0,
            grid_end: 2.0,
            grid_step: 0.1,
        }
    }
}

impl TweedieSettings {
    pub fn power_spec(&self) -> PowerSpec {
        match self.power {
            Some(p) => PowerSpec::Fixed(p),
            None => PowerSpec::Profile(power_grid(self.grid_start, self.grid_end, self.grid_step)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Wall-clock budget for all fits of one run.
    pub timeout_seconds: Option<f64>,
    pub smoothing_grid: Vec<f64>,
    pub gcv_sweeps: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let irls = IrlsOptions::default();
        EngineSettings {
            max_iterations: irls.max_iterations,
            tolerance: irls.tolerance,
            timeout_seconds: None,
            smoothing_grid: irls.smoothing_grid,
            gcv_sweeps: irls.gcv_sweeps,
        }
    }
}

impl EngineSettings {
    pub fn irls_options(&self) -> IrlsOptions {
        IrlsOptions {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            smoothing_grid: self.smoothing_grid.clone(),
            gcv_sweeps: self.gcv_sweeps,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunSettings {
    /// Fit presence and magnitude parts on two threads.
    pub parallel: bool,
    pub on_prediction_error: FailurePolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompareSettings {
    /// Models to compare. When absent every candidate whose covariates the
    /// data provides is entered.
    pub candidates: Option<Vec<CandidateKind>>,
    /// Share of rows held out for scoring; 0 scores on the training rows.
    pub holdout_fraction: f64,
    pub seed: u64,
}

impl Default for CompareSettings {
    fn default() -> Self {
        CompareSettings {
            candidates: None,
            holdout_fraction: 0.0,
            seed: 42,
        }
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        message: message.into(),
    }
}

impl Settings {
    /// Semantic checks that serde cannot express.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.data.time_column.trim().is_empty() {
            return Err(invalid("data.time_column", "must not be empty"));
        }
        if self.data.value_column.trim().is_empty() {
            return Err(invalid("data.value_column", "must not be empty"));
        }
        if self.data.time_column == self.data.value_column {
            return Err(invalid("data.value_column", "must differ from data.time_column"));
        }
        if self.magnitude.min_rows == 0 {
            return Err(invalid("magnitude.min_rows", "must be at least 1"));
        }

        for variant in HurdleVariant::ALL {
            let formulas = self.variants.formulas(variant);
            for (part, text) in [("presence", &formulas.presence), ("magnitude", &formulas.magnitude)] {
                ModelFormula::parse(text).map_err(|e| {
                    invalid(&format!("variants.{}.{}", variant, part), e.to_string())
                })?;
            }
        }
        ModelFormula::parse(&self.tweedie.formula)
            .map_err(|e| invalid("tweedie.formula", e.to_string()))?;

        let in_unit = |v: f64| (1.0..=2.0).contains(&v);
        if let Some(p) = self.tweedie.power {
            if !in_unit(p) {
                return Err(invalid("tweedie.power", format!("{} outside [1, 2]", p)));
            }
        }
        if !in_unit(self.tweedie.grid_start) || !in_unit(self.tweedie.grid_end) {
            return Err(invalid("tweedie.grid_start", "grid must lie within [1, 2]"));
        }
        if self.tweedie.grid_start > self.tweedie.grid_end {
            return Err(invalid("tweedie.grid_end", "must not be below grid_start"));
        }
        if !(self.tweedie.grid_step.is_finite() && self.tweedie.grid_step > 0.0) {
            return Err(invalid("tweedie.grid_step", "must be positive"));
        }

        if self.engine.max_iterations == 0 {
            return Err(invalid("engine.max_iterations", "must be at least 1"));
        }
        if !(self.engine.tolerance.is_finite() && self.engine.tolerance > 0.0) {
            return Err(invalid("engine.tolerance", "must be positive"));
        }
        if let Some(t) = self.engine.timeout_seconds {
            if !(t.is_finite() && t > 0.0) {
                return Err(invalid("engine.timeout_seconds", "must be positive"));
            }
        }
        if self.engine.smoothing_grid.is_empty() {
            return Err(invalid("engine.smoothing_grid", "must not be empty"));
        }
        if self
            .engine
            .smoothing_grid
            .iter()
            .any(|l| !(l.is_finite() && *l > 0.0))
        {
            return Err(invalid("engine.smoothing_grid", "values must be positive"));
        }
        if self.engine.gcv_sweeps == 0 {
            return Err(invalid("engine.gcv_sweeps", "must be at least 1"));
        }

        if let Some(candidates) = &self.compare.candidates {
            if candidates.is_empty() {
                return Err(invalid("compare.candidates", "must name at least one model"));
            }
            for (i, c) in candidates.iter().enumerate() {
                if candidates[..i].contains(c) {
                    return Err(invalid("compare.candidates", format!("'{}' listed twice", c)));
                }
            }
        }
        if !(0.0..1.0).contains(&self.compare.holdout_fraction) {
            return Err(invalid("compare.holdout_fraction", "must be in [0, 1)"));
        }
        Ok(())
    }

    /// Parsed hurdle specification for one variant.
    pub fn hurdle_spec(&self, variant: HurdleVariant) -> Result<HurdleSpec> {
        let formulas = self.variants.formulas(variant);
        Ok(HurdleSpec {
            variant,
            presence_formula: ModelFormula::parse(&formulas.presence)?,
            magnitude_formula: ModelFormula::parse(&formulas.magnitude)?,
            link: self.presence.link,
            min_present_rows: self.magnitude.min_rows,
            parallel: self.run.parallel,
        })
    }

    pub fn tweedie_formula(&self) -> Result<ModelFormula> {
        Ok(ModelFormula::parse(&self.tweedie.formula)?)
    }

    /// Covariate names a candidate's formulas read.
    pub fn candidate_variables(&self, candidate: CandidateKind) -> Result<Vec<String>> {
        let texts: Vec<&str> = match candidate.hurdle_variant() {
            Some(variant) => {
                let formulas = self.variants.formulas(variant);
                vec![formulas.presence.as_str(), formulas.magnitude.as_str()]
            }
            None => vec![self.tweedie.formula.as_str()],
        };
        let mut vars = Vec::new();
        for text in texts {
            for var in ModelFormula::parse(text)?.variables() {
                if !vars.iter().any(|v| v == var) {
                    vars.push(var.to_string());
                }
            }
        }
        Ok(vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.engine.max_iterations, 100);
        assert_eq!(settings.compare.seed, 42);
        assert_eq!(settings.compare.candidates, None);
        assert_eq!(settings.tweedie.power_spec(), PowerSpec::default());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [data]
            time_column = "year"

            [variants.smooth]
            presence = "s(year, k=6)"
            magnitude = "s(year)"

            [run]
            on_prediction_error = "skip"
            "#,
        )
        .unwrap();
        assert_eq!(settings.data.time_column, "year");
        assert_eq!(settings.data.value_column, "value");
        assert_eq!(settings.variants.smooth.presence, "s(year, k=6)");
        assert_eq!(settings.variants.linear.presence, "time");
        assert_eq!(settings.run.on_prediction_error, FailurePolicy::Skip);
        settings.validate().unwrap();

        let spec = settings.hurdle_spec(HurdleVariant::Smooth).unwrap();
        assert_eq!(spec.presence_formula.to_string(), "s(year, k=6)");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Settings>("[engine]\nmax_iter = 5\n").is_err());
        assert!(toml::from_str::<Settings>("[presence]\nlink = \"probit\"\n").is_err());
    }

    #[test]
    fn semantic_errors_name_the_field() {
        let mut s = Settings::default();
        s.tweedie.grid_end = 2.5;
        assert!(matches!(s.validate(), Err(ConfigError::Invalid { field, .. }) if field == "tweedie.grid_start"));

        let mut s = Settings::default();
        s.variants.mixed.magnitude = "time +".into();
        assert!(matches!(s.validate(), Err(ConfigError::Invalid { field, .. }) if field == "variants.mixed.magnitude"));

        let mut s = Settings::default();
        s.compare.holdout_fraction = 1.0;
        assert!(s.validate().is_err());

        let mut s = Settings::default();
        s.compare.candidates = Some(vec![CandidateKind::Tweedie, CandidateKind::Tweedie]);
        assert!(s.validate().is_err());

        let mut s = Settings::default();
        s.compare.candidates = Some(Vec::new());
        assert!(s.validate().is_err());

        let mut s = Settings::default();
        s.engine.smoothing_grid = vec![1.0, -1.0];
        assert!(s.validate().is_err());
    }

    #[test]
    fn candidate_variables_cover_both_parts() {
        let mut s = Settings::default();
        s.variants.mixed.magnitude = "s(time) + re(site)".into();
        assert_eq!(
            s.candidate_variables(CandidateKind::HurdleMixed).unwrap(),
            vec!["time", "group", "site"]
        );
        assert_eq!(s.candidate_variables(CandidateKind::Tweedie).unwrap(), vec!["time"]);
    }

    #[test]
    fn fixed_power_spec() {
        let mut s = TweedieSettings::default();
        s.power = Some(1.6);
        assert_eq!(s.power_spec(), PowerSpec::Fixed(1.6));
    }
}
