//! Presence Indicator Builder.
//!
//! Turns raw observations into a validated [`ObservationSeries`]. This is
//! the only gate between input and fitting: a negative or non-finite value
//! is rejected here, naming its input row, before any model sees the data.

use zi_common::{Error, Result};

use super::observation::{Observation, ObservationSeries};

/// Validate observations and order them by time.
///
/// Row indices in errors refer to the position in `observations`. The sort
/// is stable, so rows sharing a time index keep their input order.
pub fn build_series(observations: Vec<Observation>) -> Result<ObservationSeries> {
    for (row, obs) in observations.iter().enumerate() {
        if !obs.value.is_finite() {
            return Err(Error::validation(
                Some(row),
                format!("value must be finite, got {}", obs.value),
            ));
        }
        if obs.value < 0.0 {
            return Err(Error::validation(
                Some(row),
                format!("value must be non-negative, got {}", obs.value),
            ));
        }
        for (name, cov) in &obs.covariates {
            if let Some(v) = cov.as_numeric() {
                if !v.is_finite() {
                    return Err(Error::validation(
                        Some(row),
                        format!("covariate '{}' must be finite, got {}", name, v),
                    ));
                }
            }
        }
    }

    let mut rows = observations;
    rows.sort_by_key(|o| o.time_index);
    Ok(ObservationSeries::from_validated(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CovariateValue;

    #[test]
    fn negative_value_names_row() {
        let obs = vec![
            Observation::new(0, 0.0),
            Observation::new(1, 2.0),
            Observation::new(2, -1.0),
        ];
        match build_series(obs) {
            Err(Error::Validation { row, message }) => {
                assert_eq!(row, Some(2));
                assert!(message.contains("-1"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn non_finite_values_rejected() {
        assert!(build_series(vec![Observation::new(0, f64::NAN)]).is_err());
        assert!(build_series(vec![Observation::new(0, f64::INFINITY)]).is_err());
        let bad_cov = Observation::new(0, 1.0).with("x", CovariateValue::Numeric(f64::NAN));
        assert!(matches!(
            build_series(vec![bad_cov]),
            Err(Error::Validation { row: Some(0), .. })
        ));
    }

    #[test]
    fn sorted_by_time_stably() {
        let obs = vec![
            Observation::new(3, 1.0),
            Observation::new(1, 2.0),
            Observation::new(3, 3.0),
            Observation::new(2, 0.0),
        ];
        let series = build_series(obs).unwrap();
        let times: Vec<i64> = series.rows().iter().map(|o| o.time_index).collect();
        assert_eq!(times, vec![1, 2, 3, 3]);
        assert_eq!(series.values(), vec![2.0, 0.0, 1.0, 3.0]);
    }

    #[test]
    fn zero_is_valid_and_absent() {
        let series = build_series(vec![Observation::new(0, 0.0)]).unwrap();
        assert_eq!(series.presence_labels(), vec![0.0]);
    }
}
