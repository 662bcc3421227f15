//! Specialized sub-agents
//!
//! Each agent wraps one data collaborator, applies deterministic
//! classification rules, asks the LLM for a short narrative only, and
//! returns a schema-valid result. The public `run` methods never fail:
//! every error path collapses to the documented safe default plus an
//! `error` progress event.

pub mod news;
pub mod quant;
pub mod technical;

pub use news::NewsAgent;
pub use quant::QuantAgent;
pub use technical::TechnicalAgent;

pub const NEWS_AGENT: &str = "News Sentiment Agent";
pub const TECHNICAL_AGENT: &str = "Technical Analysis Agent";
pub const QUANT_AGENT: &str = "Quantitative Metrics Agent";

/// Last present value of a sparse indicator series.
pub(crate) fn last_value(series: &[Option<f64>]) -> Option<f64> {
    series.last().copied().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_value_skips_nothing_but_unwraps_tail() {
        assert_eq!(last_value(&[Some(1.0), Some(2.0)]), Some(2.0));
        assert_eq!(last_value(&[Some(1.0), None]), None);
        assert_eq!(last_value(&[]), None);
    }
}
