//! Technical analysis agent
//!
//! Reads precomputed indicator series (RSI, MACD, EMA crossover,
//! Bollinger bands), votes each into a bullish/bearish/neutral signal
//! with fixed cutoffs, and derives the overall trend from the vote
//! margin. The LLM writes the narrative only.

use crate::data::{MarketData, TaSnapshot};
use crate::error::AgentError;
use crate::llm::{ChatMessage, LanguageModel};
use crate::models::{
    IndicatorSignal, KeyLevel, LevelKind, LevelStrength, Signal, TechnicalReport, Trend,
};
use crate::progress::{ProgressBus, ProgressKind};
use std::sync::Arc;
use tracing::warn;

use super::{last_value, TECHNICAL_AGENT};

const SYSTEM_PROMPT: &str = "You are a Technical Analysis Agent specializing in crypto markets.
Your task is to interpret computed technical indicators and describe the price structure.

You will receive indicator readings that have already been classified.
Summarize what they collectively say about trend, momentum, and key levels.

Be objective. Do not make price predictions. Do not contradict the
classified signals you are given.";

/// Bars considered when deriving support/resistance levels.
const KEY_LEVEL_WINDOW: usize = 20;

/// Indicator cutoffs. Conventional defaults; adjust here, not inline.
#[derive(Debug, Clone, Copy)]
pub struct TechnicalThresholds {
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
}

impl Default for TechnicalThresholds {
    fn default() -> Self {
        Self {
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
        }
    }
}

pub struct TechnicalAgent {
    llm: Arc<dyn LanguageModel>,
    data: Arc<dyn MarketData>,
    thresholds: TechnicalThresholds,
}

impl TechnicalAgent {
    pub fn new(llm: Arc<dyn LanguageModel>, data: Arc<dyn MarketData>) -> Self {
        Self {
            llm,
            data,
            thresholds: TechnicalThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: TechnicalThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Run the technical analysis. Never fails: any error path collapses
    /// to the neutral default plus an `error` event.
    pub async fn run(&self, symbol: &str, days: u32, bus: &mut ProgressBus) -> TechnicalReport {
        match self.analyze(symbol, days, bus).await {
            Ok(report) => {
                bus.emit(
                    ProgressKind::AgentComplete,
                    TECHNICAL_AGENT,
                    "Technical analysis complete",
                    None,
                );
                report
            }
            Err(e) => {
                warn!(symbol, error = %e, "Technical agent failed");
                bus.emit(
                    ProgressKind::Error,
                    TECHNICAL_AGENT,
                    format!("Error: {}", e),
                    None,
                );
                TechnicalReport::fallback(format!("Error in technical analysis: {}", e))
            }
        }
    }

    async fn analyze(
        &self,
        symbol: &str,
        days: u32,
        bus: &mut ProgressBus,
    ) -> crate::Result<TechnicalReport> {
        bus.emit(
            ProgressKind::Thinking,
            TECHNICAL_AGENT,
            format!("Fetching OHLCV data and indicators for {}...", symbol),
            None,
        );

        let snapshot = self.data.ta_indicators(symbol, days).await?;

        let closes: Vec<f64> = snapshot.ohlcv.close.iter().copied().flatten().collect();
        let current_price = *closes
            .last()
            .ok_or_else(|| AgentError::NoData("no price data available".to_string()))?;
        let first_price = closes[0];
        let price_change_pct = if first_price != 0.0 {
            (current_price - first_price) / first_price * 100.0
        } else {
            0.0
        };

        bus.emit(
            ProgressKind::ToolResult,
            TECHNICAL_AGENT,
            format!("Retrieved {} price bars", closes.len()),
            None,
        );

        bus.emit(
            ProgressKind::Thinking,
            TECHNICAL_AGENT,
            "Evaluating indicator signals...",
            None,
        );

        let indicator_signals = self.classify_indicators(&snapshot, current_price);
        let key_levels = key_levels(&snapshot);
        let overall_trend = derive_trend(&indicator_signals);

        bus.emit(
            ProgressKind::Thinking,
            TECHNICAL_AGENT,
            "Generating trend summary...",
            None,
        );

        let signal_lines = indicator_signals
            .iter()
            .map(|s| format!("- {} = {:.2}: {} ({})", s.indicator, s.value, s.signal, s.description))
            .collect::<Vec<_>>()
            .join("\n");

        let level_lines = key_levels
            .iter()
            .map(|l| format!("- {} at {:.2}", l.kind, l.price))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Summarize the technical picture for {}:\n\n\
             Current price: {:.2}\n\
             Price change over window: {:.2}%\n\
             Overall trend: {}\n\n\
             Indicator signals:\n{}\n\n\
             Key levels:\n{}\n\n\
             Provide a 2-3 sentence summary of the trend, momentum, and price structure.\n\
             Be factual and consistent with the signals above. Do not make price predictions.",
            symbol, current_price, price_change_pct, overall_trend, signal_lines, level_lines,
        );

        let reply = self
            .llm
            .complete(&[ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)])
            .await?;

        Ok(TechnicalReport {
            trend_summary: reply.trim().to_string(),
            overall_trend,
            key_levels,
            indicator_signals,
            current_price,
            price_change_pct,
        })
    }

    /// One vote per available indicator. Missing series cast no vote.
    fn classify_indicators(
        &self,
        snapshot: &TaSnapshot,
        current_price: f64,
    ) -> Vec<IndicatorSignal> {
        let mut signals = Vec::new();
        let indicators = &snapshot.indicators;

        if let Some(rsi) = last_value(&indicators.rsi) {
            let (signal, description) = if rsi > self.thresholds.rsi_overbought {
                (Signal::Bearish, "overbought")
            } else if rsi < self.thresholds.rsi_oversold {
                (Signal::Bullish, "oversold")
            } else {
                (Signal::Neutral, "in neutral range")
            };
            signals.push(IndicatorSignal {
                indicator: "RSI".to_string(),
                value: rsi,
                signal,
                description: description.to_string(),
            });
        }

        if let (Some(macd), Some(signal_line)) = (
            last_value(&indicators.macd.macd),
            last_value(&indicators.macd.signal),
        ) {
            let (signal, description) = if macd > signal_line {
                (Signal::Bullish, "MACD above signal line")
            } else {
                (Signal::Bearish, "MACD below signal line")
            };
            signals.push(IndicatorSignal {
                indicator: "MACD".to_string(),
                value: macd,
                signal,
                description: description.to_string(),
            });
        }

        let ema20 = indicators.ema.get("20").and_then(|s| last_value(s));
        let ema50 = indicators.ema.get("50").and_then(|s| last_value(s));
        if let (Some(ema20), Some(ema50)) = (ema20, ema50) {
            let (signal, description) = if ema20 > ema50 {
                (Signal::Bullish, "EMA20 above EMA50")
            } else {
                (Signal::Bearish, "EMA20 below EMA50")
            };
            signals.push(IndicatorSignal {
                indicator: "EMA crossover".to_string(),
                value: ema20,
                signal,
                description: description.to_string(),
            });
        }

        if let (Some(upper), Some(lower)) = (
            last_value(&indicators.bbands.upper),
            last_value(&indicators.bbands.lower),
        ) {
            let (signal, description) = if current_price > upper {
                (Signal::Bearish, "price above upper band")
            } else if current_price < lower {
                (Signal::Bullish, "price below lower band")
            } else {
                (Signal::Neutral, "price within bands")
            };
            signals.push(IndicatorSignal {
                indicator: "Bollinger Bands".to_string(),
                value: current_price,
                signal,
                description: description.to_string(),
            });
        }

        signals
    }
}

/// Nearest structural levels: highest high and lowest low of the
/// trailing window.
fn key_levels(snapshot: &TaSnapshot) -> Vec<KeyLevel> {
    let mut levels = Vec::new();

    let highs: Vec<f64> = snapshot.ohlcv.high.iter().copied().flatten().collect();
    let lows: Vec<f64> = snapshot.ohlcv.low.iter().copied().flatten().collect();

    let window_high = highs
        .iter()
        .rev()
        .take(KEY_LEVEL_WINDOW)
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    let window_low = lows
        .iter()
        .rev()
        .take(KEY_LEVEL_WINDOW)
        .copied()
        .fold(f64::INFINITY, f64::min);

    if window_high.is_finite() {
        levels.push(KeyLevel {
            kind: LevelKind::Resistance,
            price: window_high,
            strength: LevelStrength::Strong,
        });
    }
    if window_low.is_finite() {
        levels.push(KeyLevel {
            kind: LevelKind::Support,
            price: window_low,
            strength: LevelStrength::Strong,
        });
    }

    levels
}

/// Trend from the vote margin: a lead of at least two signals declares
/// a direction, no signals is neutral, anything else is mixed.
fn derive_trend(signals: &[IndicatorSignal]) -> Trend {
    if signals.is_empty() {
        return Trend::Neutral;
    }

    let bullish = signals.iter().filter(|s| s.signal == Signal::Bullish).count();
    let bearish = signals.iter().filter(|s| s.signal == Signal::Bearish).count();

    if bullish > bearish + 1 {
        Trend::Bullish
    } else if bearish > bullish + 1 {
        Trend::Bearish
    } else {
        Trend::Mixed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{BandSeries, IndicatorSet, MacdSeries, OhlcvSeries, StaticMarketData};
    use crate::llm::ScriptedLlm;
    use std::collections::HashMap;

    fn series(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    fn bullish_snapshot() -> TaSnapshot {
        let mut ema = HashMap::new();
        ema.insert("20".to_string(), series(&[105.0]));
        ema.insert("50".to_string(), series(&[100.0]));

        TaSnapshot {
            ohlcv: OhlcvSeries {
                timestamp: vec![],
                open: series(&[100.0, 102.0, 104.0]),
                high: series(&[103.0, 106.0, 109.0]),
                low: series(&[98.0, 101.0, 103.0]),
                close: series(&[100.0, 104.0, 108.0]),
                volume: series(&[1000.0, 1100.0, 1200.0]),
            },
            indicators: IndicatorSet {
                ema,
                macd: MacdSeries {
                    macd: series(&[2.0]),
                    signal: series(&[1.0]),
                    hist: series(&[1.0]),
                },
                rsi: series(&[25.0]),
                bbands: BandSeries {
                    mid: series(&[104.0]),
                    upper: series(&[115.0]),
                    lower: series(&[95.0]),
                },
            },
        }
    }

    fn agent(data: StaticMarketData) -> TechnicalAgent {
        TechnicalAgent::new(
            Arc::new(ScriptedLlm::new(vec!["Uptrend with strong momentum."])),
            Arc::new(data),
        )
    }

    #[tokio::test]
    async fn bullish_majority_makes_a_bullish_trend() {
        let data = StaticMarketData::new().with_ta(bullish_snapshot());
        let mut bus = ProgressBus::new(None);
        let report = agent(data).run("BTC", 30, &mut bus).await;

        assert_eq!(report.overall_trend, Trend::Bullish);
        assert_eq!(report.indicator_signals.len(), 4);
        assert_eq!(report.current_price, 108.0);
        assert!((report.price_change_pct - 8.0).abs() < 1e-9);
        assert_eq!(report.trend_summary, "Uptrend with strong momentum.");
    }

    #[tokio::test]
    async fn key_levels_bracket_the_trailing_window() {
        let data = StaticMarketData::new().with_ta(bullish_snapshot());
        let mut bus = ProgressBus::new(None);
        let report = agent(data).run("BTC", 30, &mut bus).await;

        let resistance = report
            .key_levels
            .iter()
            .find(|l| l.kind == LevelKind::Resistance)
            .unwrap();
        let support = report
            .key_levels
            .iter()
            .find(|l| l.kind == LevelKind::Support)
            .unwrap();
        assert_eq!(resistance.price, 109.0);
        assert_eq!(support.price, 98.0);
    }

    #[tokio::test]
    async fn overbought_rsi_votes_bearish() {
        let mut snapshot = bullish_snapshot();
        snapshot.indicators.rsi = series(&[75.0]);

        let data = StaticMarketData::new().with_ta(snapshot);
        let mut bus = ProgressBus::new(None);
        let report = agent(data).run("BTC", 30, &mut bus).await;

        let rsi = report
            .indicator_signals
            .iter()
            .find(|s| s.indicator == "RSI")
            .unwrap();
        assert_eq!(rsi.signal, Signal::Bearish);
        // 2 bullish vs 1 bearish no longer clears the two-vote margin.
        assert_eq!(report.overall_trend, Trend::Mixed);
    }

    #[tokio::test]
    async fn balanced_votes_yield_mixed_trend() {
        let mut snapshot = bullish_snapshot();
        // RSI neutral, MACD bearish, EMA bullish, bands neutral.
        snapshot.indicators.rsi = series(&[50.0]);
        snapshot.indicators.macd.macd = series(&[0.5]);
        snapshot.indicators.macd.signal = series(&[1.0]);

        let data = StaticMarketData::new().with_ta(snapshot);
        let mut bus = ProgressBus::new(None);
        let report = agent(data).run("BTC", 30, &mut bus).await;
        assert_eq!(report.overall_trend, Trend::Mixed);
    }

    #[tokio::test]
    async fn missing_series_cast_no_vote() {
        let mut snapshot = bullish_snapshot();
        snapshot.indicators = IndicatorSet::default();

        let data = StaticMarketData::new().with_ta(snapshot);
        let mut bus = ProgressBus::new(None);
        let report = agent(data).run("BTC", 30, &mut bus).await;

        assert!(report.indicator_signals.is_empty());
        assert_eq!(report.overall_trend, Trend::Neutral);
    }

    #[tokio::test]
    async fn no_price_data_collapses_to_neutral_default() {
        let mut snapshot = bullish_snapshot();
        snapshot.ohlcv.close = vec![];

        let data = StaticMarketData::new().with_ta(snapshot);
        let mut bus = ProgressBus::new(None);
        let report = agent(data).run("BTC", 30, &mut bus).await;

        assert_eq!(report.overall_trend, Trend::Neutral);
        assert_eq!(report.current_price, 0.0);
        assert!(report
            .trend_summary
            .starts_with("Error in technical analysis:"));
        assert!(bus.events().iter().any(|e| e.kind == ProgressKind::Error));
    }

    #[tokio::test]
    async fn data_source_error_collapses_to_neutral_default() {
        let mut bus = ProgressBus::new(None);
        let report = agent(StaticMarketData::new()).run("BTC", 30, &mut bus).await;
        assert_eq!(report.overall_trend, Trend::Neutral);
        assert_eq!(report.price_change_pct, 0.0);
    }
}
