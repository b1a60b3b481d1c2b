//! Magnitude sub-model: mean of the positive values.

use zi_common::{Error, Result};

use crate::data::ObservationSeries;
use crate::engine::{EngineFit, Family, FitBudget, FitRequest, FittingEngine, ModelFormula};
use crate::logging::{event_names, LogContext, Stage};

/// Fits a Gamma GLM with log link to the present rows only.
pub struct MagnitudeFitter<'e> {
    engine: &'e dyn FittingEngine,
    min_rows: usize,
}

impl<'e> MagnitudeFitter<'e> {
    pub fn new(engine: &'e dyn FittingEngine, min_rows: usize) -> Self {
        MagnitudeFitter {
            engine,
            min_rows: min_rows.max(1),
        }
    }

    /// Fit on the rows of `series` with `value > 0`.
    ///
    /// Fails with `FitFailure` when fewer than `min_rows` rows are present.
    pub fn fit(
        &self,
        model_name: &str,
        series: &ObservationSeries,
        formula: &ModelFormula,
        budget: FitBudget,
        log: &LogContext,
    ) -> Result<EngineFit> {
        let present = series.present_only();
        let series_rows: Vec<usize> = series
            .rows()
            .iter()
            .enumerate()
            .filter(|(_, o)| o.is_present())
            .map(|(i, _)| i)
            .collect();
        let series_row = |i: usize| series_rows.get(i).copied().unwrap_or(i);
        if present.is_empty() {
            return Err(Error::fit_failure(model_name, "no rows with value > 0"));
        }
        if present.len() < self.min_rows {
            return Err(Error::fit_failure(
                model_name,
                format!(
                    "{} rows with value > 0, at least {} required",
                    present.len(),
                    self.min_rows
                ),
            ));
        }
        if let Some(row) = present.rows().iter().position(|o| o.value == 0.0) {
            return Err(Error::validation(
                Some(series_row(row)),
                format!("{}: magnitude training rows must all have value > 0", model_name),
            ));
        }

        let values = present.values();
        crate::log_event!(
            log,
            INFO,
            event_names::FIT_STARTED,
            Stage::Fit,
            "fitting magnitude model",
            model = model_name,
            rows = present.len() as u64
        );
        let fit = self
            .engine
            .fit(&FitRequest {
                model_name,
                formula,
                family: Family::Gamma,
                rows: present.rows(),
                response: &values,
                budget,
                log,
            })
            .map_err(|e| super::attribute_error(e, model_name, series_row))?;
        crate::log_event!(
            log,
            INFO,
            event_names::FIT_FINISHED,
            Stage::Fit,
            "magnitude model fitted",
            model = model_name,
            iterations = fit.model.summary().iterations as u64,
            dispersion = fit.model.summary().dispersion
        );
        Ok(fit)
    }
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
                .map(|(i, &v)| Observation::new(i as i64, v))
                .collect(),
        )
        .unwrap()
    }

    fn fit(values: &[f64], min_rows: usize) -> Result<EngineFit> {
        let engine = IrlsEngine::default();
        MagnitudeFitter::new(&engine, min_rows).fit(
            "magnitude",
            &series(values),
            &ModelFormula::intercept_only(),
            FitBudget::unlimited(),
            &LogContext::detached(),
        )
    }

    #[test]
    fn trains_on_present_rows_only() {
        let fit = fit(&[0.0, 0.0, 5.2, 0.0, 3.1], 1).unwrap();
        assert_eq!(fit.model.summary().n, 2);
        assert_eq!(fit.fitted_values.len(), 2);
        let m = fit.model.predict(&Default::default()).unwrap();
        assert!((m - 4.15).abs() < 1e-8);
    }

    #[test]
    fn all_zero_series_is_a_fit_failure() {
        match fit(&[0.0, 0.0, 0.0], 1) {
            Err(Error::FitFailure { model, reason }) => {
                assert_eq!(model, "magnitude");
                assert!(reason.contains("no rows with value > 0"));
            }
            other => panic!("expected fit failure, got {:?}", other),
        }
    }

    #[test]
    fn min_rows_is_enforced() {
        assert!(matches!(fit(&[0.0, 1.0, 2.0], 3), Err(Error::FitFailure { .. })));
        assert!(fit(&[0.0, 1.0, 2.0], 2).is_ok());
    }

    #[test]
    fn engine_errors_point_at_series_rows() {
        // Row 3 lacks `x`; it is the second present row.
        let series = build_series(
            [0.0, 2.0, 0.0, 3.0, 4.0]
                .iter()
                .enumerate()
                .map(|(i, &v)| {
                    let obs = Observation::new(i as i64, v);
                    if i == 3 {
                        obs
                    } else {
                        obs.with("x", CovariateValue::Numeric(i as f64))
                    }
                })
                .collect(),
        )
        .unwrap();
        let engine = IrlsEngine::default();
        let err = MagnitudeFitter::new(&engine, 1)
            .fit(
                "hurdle-linear/magnitude",
                &series,
                &ModelFormula::parse("x").unwrap(),
                FitBudget::unlimited(),
                &LogContext::detached(),
            )
            .unwrap_err();
        match err {
            Error::Validation { row, message } => {
                assert_eq!(row, Some(3));
                assert_eq!(message, "hurdle-linear/magnitude: missing covariate 'x'");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
