//! Quantitative metrics agent
//!
//! Converts fraction-scaled return and risk statistics into the
//! percent-scaled report shape and buckets risk from volatility and
//! drawdown with fixed cutoffs. The LLM writes a two-paragraph
//! narrative: risk summary, then risk/reward assessment.

use crate::data::{MarketData, QuantSnapshot};
use crate::llm::{ChatMessage, LanguageModel};
use crate::models::{QuantReport, ReturnMetrics, RiskLevel, RiskMetrics};
use crate::progress::{ProgressBus, ProgressKind};
use std::sync::Arc;
use tracing::warn;

use super::QUANT_AGENT;

const SYSTEM_PROMPT: &str = "You are a Quantitative Analysis Agent specializing in crypto markets.
Your task is to interpret statistical return and risk metrics.

You will receive computed metrics and a risk classification.
Explain what they say about the risk profile in plain language.

Be objective and quantitative. Do not make price predictions.
Do not contradict the risk classification you are given.";

/// Risk bucketing cutoffs, applied to fraction-scaled annualized
/// volatility and absolute max drawdown.
#[derive(Debug, Clone, Copy)]
pub struct QuantThresholds {
    pub extreme_volatility: f64,
    pub extreme_drawdown: f64,
    pub high_volatility: f64,
    pub high_drawdown: f64,
    pub moderate_volatility: f64,
    pub moderate_drawdown: f64,
}

impl Default for QuantThresholds {
    fn default() -> Self {
        Self {
            extreme_volatility: 1.0,
            extreme_drawdown: 0.5,
            high_volatility: 0.6,
            high_drawdown: 0.3,
            moderate_volatility: 0.3,
            moderate_drawdown: 0.15,
        }
    }
}

pub struct QuantAgent {
    llm: Arc<dyn LanguageModel>,
    data: Arc<dyn MarketData>,
    thresholds: QuantThresholds,
}

impl QuantAgent {
    pub fn new(llm: Arc<dyn LanguageModel>, data: Arc<dyn MarketData>) -> Self {
        Self {
            llm,
            data,
            thresholds: QuantThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: QuantThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Run the quantitative analysis. Never fails: any error path
    /// collapses to the moderate-risk default plus an `error` event.
    pub async fn run(&self, symbol: &str, days: u32, bus: &mut ProgressBus) -> QuantReport {
        match self.analyze(symbol, days, bus).await {
            Ok(report) => {
                bus.emit(
                    ProgressKind::AgentComplete,
                    QUANT_AGENT,
                    "Quantitative analysis complete",
                    None,
                );
                report
            }
            Err(e) => {
                warn!(symbol, error = %e, "Quant agent failed");
                bus.emit(ProgressKind::Error, QUANT_AGENT, format!("Error: {}", e), None);
                QuantReport::fallback(format!("Error in quantitative analysis: {}", e))
            }
        }
    }

    async fn analyze(
        &self,
        symbol: &str,
        days: u32,
        bus: &mut ProgressBus,
    ) -> crate::Result<QuantReport> {
        bus.emit(
            ProgressKind::Thinking,
            QUANT_AGENT,
            format!("Fetching quantitative metrics for {}...", symbol),
            None,
        );

        let snapshot = self.data.quant_metrics(symbol, days).await?;

        bus.emit(
            ProgressKind::ToolResult,
            QUANT_AGENT,
            "Retrieved return and risk statistics",
            None,
        );

        bus.emit(
            ProgressKind::Thinking,
            QUANT_AGENT,
            "Classifying risk profile...",
            None,
        );

        let risk_level = self.classify_risk(&snapshot);
        let return_metrics = to_return_metrics(&snapshot);
        let risk_metrics = to_risk_metrics(&snapshot);

        bus.emit(
            ProgressKind::Thinking,
            QUANT_AGENT,
            "Generating risk summary...",
            None,
        );

        let prompt = format!(
            "Analyze the following quantitative metrics for {} over {} days:\n\n\
             Return metrics:\n\
             - Total return: {:+.2}%\n\
             - Annualized return: {:+.2}%\n\
             - Best day: {:+.2}%, worst day: {:+.2}%\n\n\
             Risk metrics:\n\
             - Annualized volatility: {:.2}%\n\
             - Sharpe ratio: {:.2}, Sortino ratio: {:.2}\n\
             - Max drawdown: {:.2}%\n\
             - VaR(95): {:.2}%, CVaR(95): {:.2}%\n\n\
             Risk level: {}\n\n\
             Provide:\n\
             1. A 2-3 sentence risk summary\n\
             2. A brief risk/reward assessment\n\n\
             Separate the two with a blank line. Focus on risk management implications.\n\
             Be objective and quantitative. Do not make price predictions.",
            symbol,
            days,
            return_metrics.total_return,
            return_metrics.annualized_return,
            return_metrics.best_day,
            return_metrics.worst_day,
            risk_metrics.volatility,
            risk_metrics.sharpe_ratio,
            risk_metrics.sortino_ratio,
            risk_metrics.max_drawdown,
            risk_metrics.var_95,
            risk_metrics.cvar_95,
            risk_level,
        );

        let reply = self
            .llm
            .complete(&[ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)])
            .await?;

        let (risk_summary, risk_reward_assessment) = split_narrative(&reply);

        Ok(QuantReport {
            risk_summary,
            risk_level,
            return_metrics,
            risk_metrics,
            risk_reward_assessment,
        })
    }

    /// Worst of the volatility and drawdown buckets wins.
    fn classify_risk(&self, snapshot: &QuantSnapshot) -> RiskLevel {
        let volatility = snapshot.returns.annualized_volatility;
        let drawdown = snapshot.risk.max_drawdown.abs();
        let t = &self.thresholds;

        if volatility > t.extreme_volatility || drawdown > t.extreme_drawdown {
            RiskLevel::Extreme
        } else if volatility > t.high_volatility || drawdown > t.high_drawdown {
            RiskLevel::High
        } else if volatility > t.moderate_volatility || drawdown > t.moderate_drawdown {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }
}

fn to_return_metrics(snapshot: &QuantSnapshot) -> ReturnMetrics {
    ReturnMetrics {
        total_return: snapshot.performance.total_return * 100.0,
        annualized_return: snapshot.returns.annualized_return * 100.0,
        daily_avg_return: snapshot.returns.daily_mean * 100.0,
        best_day: snapshot.performance.best_day * 100.0,
        worst_day: snapshot.performance.worst_day * 100.0,
    }
}

fn to_risk_metrics(snapshot: &QuantSnapshot) -> RiskMetrics {
    RiskMetrics {
        volatility: snapshot.returns.annualized_volatility * 100.0,
        sharpe_ratio: snapshot.risk.sharpe_ratio,
        sortino_ratio: snapshot.risk.sortino_ratio,
        max_drawdown: snapshot.risk.max_drawdown * 100.0,
        var_95: snapshot.risk.var_95 * 100.0,
        cvar_95: snapshot.risk.cvar_95 * 100.0,
    }
}

/// First paragraph is the risk summary, second the risk/reward
/// assessment. A single-paragraph reply still yields both fields.
fn split_narrative(reply: &str) -> (String, String) {
    let mut paragraphs = reply.trim().split("\n\n");
    let summary = paragraphs.next().unwrap_or_default().trim().to_string();
    let assessment = paragraphs
        .next()
        .map(|p| p.trim().to_string())
        .unwrap_or_else(|| "See risk summary above.".to_string());
    (summary, assessment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{PerformanceStats, ReturnStats, RiskStats, StaticMarketData};
    use crate::llm::ScriptedLlm;

    fn snapshot(volatility: f64, drawdown: f64, sharpe: f64) -> QuantSnapshot {
        QuantSnapshot {
            returns: ReturnStats {
                daily_mean: 0.002,
                daily_std: 0.03,
                annualized_return: 0.5,
                annualized_volatility: volatility,
            },
            risk: RiskStats {
                sharpe_ratio: sharpe,
                sortino_ratio: sharpe * 1.2,
                max_drawdown: drawdown,
                calmar_ratio: 1.0,
                var_95: -0.04,
                cvar_95: -0.06,
            },
            performance: PerformanceStats {
                total_return: 0.25,
                best_day: 0.08,
                worst_day: -0.09,
                positive_days_pct: 0.55,
            },
        }
    }

    fn agent(data: StaticMarketData) -> QuantAgent {
        QuantAgent::new(
            Arc::new(ScriptedLlm::new(vec!["Volatility is elevated."])),
            Arc::new(data),
        )
    }

    #[tokio::test]
    async fn buckets_risk_from_volatility_and_drawdown() {
        let cases = [
            (0.2, -0.1, RiskLevel::Low),
            (0.4, -0.1, RiskLevel::Moderate),
            (0.2, -0.2, RiskLevel::Moderate),
            (0.7, -0.1, RiskLevel::High),
            (0.2, -0.35, RiskLevel::High),
            (1.2, -0.1, RiskLevel::Extreme),
            (0.2, -0.6, RiskLevel::Extreme),
        ];

        for (volatility, drawdown, expected) in cases {
            let data = StaticMarketData::new().with_quant(snapshot(volatility, drawdown, 1.0));
            let mut bus = ProgressBus::new(None);
            let report = agent(data).run("BTC", 30, &mut bus).await;
            assert_eq!(report.risk_level, expected, "vol={} dd={}", volatility, drawdown);
        }
    }

    #[tokio::test]
    async fn metrics_are_percent_scaled() {
        let data = StaticMarketData::new().with_quant(snapshot(0.45, -0.22, 1.1));
        let mut bus = ProgressBus::new(None);
        let report = agent(data).run("BTC", 30, &mut bus).await;

        assert!((report.return_metrics.total_return - 25.0).abs() < 1e-9);
        assert!((report.risk_metrics.volatility - 45.0).abs() < 1e-9);
        assert!((report.risk_metrics.max_drawdown - -22.0).abs() < 1e-9);
        assert!((report.risk_metrics.var_95 - -4.0).abs() < 1e-9);
        assert_eq!(report.risk_metrics.sharpe_ratio, 1.1);
        assert_eq!(report.risk_summary, "Volatility is elevated.");
        assert_eq!(report.risk_reward_assessment, "See risk summary above.");
    }

    #[tokio::test]
    async fn splits_two_paragraph_narrative() {
        let data = StaticMarketData::new().with_quant(snapshot(0.45, -0.22, 1.1));
        let agent = QuantAgent::new(
            Arc::new(ScriptedLlm::new(vec![
                "Risk is moderate overall.\n\nSharpe above 1 suggests decent compensation.",
            ])),
            Arc::new(data),
        );

        let mut bus = ProgressBus::new(None);
        let report = agent.run("BTC", 30, &mut bus).await;
        assert_eq!(report.risk_summary, "Risk is moderate overall.");
        assert_eq!(
            report.risk_reward_assessment,
            "Sharpe above 1 suggests decent compensation."
        );
    }

    #[tokio::test]
    async fn data_source_error_collapses_to_moderate_default() {
        let mut bus = ProgressBus::new(None);
        let report = agent(StaticMarketData::new()).run("BTC", 30, &mut bus).await;

        assert_eq!(report.risk_level, RiskLevel::Moderate);
        assert_eq!(report.risk_reward_assessment, "Unable to assess risk/reward");
        assert_eq!(report.risk_metrics.volatility, 0.0);
        assert!(bus.events().iter().any(|e| e.kind == ProgressKind::Error));
    }

    #[tokio::test]
    async fn llm_failure_collapses_to_moderate_default() {
        let data = StaticMarketData::new().with_quant(snapshot(0.45, -0.22, 1.1));
        let agent = QuantAgent::new(Arc::new(crate::llm::FailingLlm), Arc::new(data));

        let mut bus = ProgressBus::new(None);
        let report = agent.run("BTC", 30, &mut bus).await;
        assert_eq!(report.risk_level, RiskLevel::Moderate);
    }
}
