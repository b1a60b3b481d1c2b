//! Presence sub-model: probability that a row has a positive value.

use zi_common::Result;

use crate::data::ObservationSeries;
use crate::engine::{
    BinomialLink, EngineFit, Family, FitBudget, FitRequest, FittingEngine, ModelFormula,
};
use crate::logging::{event_names, LogContext, Stage};

/// Fits a binomial GLM to the presence labels of every row.
pub struct PresenceFitter<'e> {
    engine: &'e dyn FittingEngine,
    link: BinomialLink,
}

impl<'e> PresenceFitter<'e> {
    pub fn new(engine: &'e dyn FittingEngine, link: BinomialLink) -> Self {
        PresenceFitter { engine, link }
    }

    pub fn fit(
        &self,
        model_name: &str,
        series: &ObservationSeries,
        formula: &ModelFormula,
        budget: FitBudget,
        log: &LogContext,
    ) -> Result<EngineFit> {
        let labels = series.presence_labels();
        crate::log_event!(
            log,
            INFO,
            event_names::FIT_STARTED,
            Stage::Fit,
            "fitting presence model",
            model = model_name,
            rows = series.len() as u64,
            present = series.present_count() as u64,
            link = self.link.to_string().as_str()
        );
        let fit = self
            .engine
            .fit(&FitRequest {
                model_name,
                formula,
                family: Family::Binomial { link: self.link },
                rows: series.rows(),
                response: &labels,
                budget,
                log,
            })
            .map_err(|e| super::attribute_error(e, model_name, |i| i))?;
        crate::log_event!(
            log,
            INFO,
            event_names::FIT_FINISHED,
            Stage::Fit,
            "presence model fitted",
            model = model_name,
            iterations = fit.model.summary().iterations as u64,
            deviance = fit.model.summary().deviance
        );
        Ok(fit)
    }
}
