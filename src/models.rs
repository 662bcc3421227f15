//! Core data models for the analysis pipeline
//!
//! Every agent has schema-validated inputs and outputs. Bounded numeric
//! fields are clamped at construction so no out-of-range value can leave
//! a sub-agent, regardless of what the LLM produced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventSentiment {
    Positive,
    Negative,
    Neutral,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
    Mixed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Extreme,
}

impl RiskLevel {
    /// Canonicalize a free-text risk label. Case-insensitive; anything
    /// outside the four known labels is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "low" => Some(RiskLevel::Low),
            "moderate" => Some(RiskLevel::Moderate),
            "high" => Some(RiskLevel::High),
            "extreme" => Some(RiskLevel::Extreme),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl Recommendation {
    /// Canonicalize a free-text recommendation label ("Strong Buy" →
    /// `StrongBuy`). Case- and space-insensitive; anything outside the
    /// five known labels is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().replace(' ', "_").as_str() {
            "strong_buy" => Some(Recommendation::StrongBuy),
            "buy" => Some(Recommendation::Buy),
            "hold" => Some(Recommendation::Hold),
            "sell" => Some(Recommendation::Sell),
            "strong_sell" => Some(Recommendation::StrongSell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LevelKind {
    Support,
    Resistance,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LevelStrength {
    Strong,
    Moderate,
    Weak,
}

//
// ================= Request =================
//

/// Analysis request accepted at the API boundary.
/// Immutable once validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub symbol: String,
    #[serde(default = "default_days")]
    pub days: u32,
    #[serde(default = "default_true")]
    pub include_news: bool,
    #[serde(default = "default_true")]
    pub include_technical: bool,
    #[serde(default = "default_true")]
    pub include_quant: bool,
}

fn default_days() -> u32 {
    30
}

fn default_true() -> bool {
    true
}

pub const MIN_LOOKBACK_DAYS: u32 = 7;
pub const MAX_LOOKBACK_DAYS: u32 = 365;

impl AnalysisRequest {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            days: default_days(),
            include_news: true,
            include_technical: true,
            include_quant: true,
        }
    }

    /// Boundary validation: symbol must be non-empty, lookback window
    /// must fall within [7, 365] days.
    pub fn validate(&self) -> crate::Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(crate::error::AgentError::InvalidRequest(
                "symbol must not be empty".to_string(),
            ));
        }
        if self.days < MIN_LOOKBACK_DAYS || self.days > MAX_LOOKBACK_DAYS {
            return Err(crate::error::AgentError::InvalidRequest(format!(
                "days must be within [{}, {}], got {}",
                MIN_LOOKBACK_DAYS, MAX_LOOKBACK_DAYS, self.days
            )));
        }
        Ok(())
    }
}

//
// ================= News Agent Output =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsEvent {
    pub title: String,
    pub sentiment: EventSentiment,
    pub sentiment_score: f64,
    pub source: Option<String>,
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsReport {
    pub sentiment_summary: String,
    pub avg_sentiment_score: f64,
    pub overall_sentiment: Sentiment,
    pub top_events: Vec<NewsEvent>,
    pub news_count: usize,
}

impl NewsReport {
    /// Safe default returned on any failure path: neutral, zero score,
    /// the reason recorded as the summary.
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            sentiment_summary: reason.into(),
            avg_sentiment_score: 0.0,
            overall_sentiment: Sentiment::Neutral,
            top_events: vec![],
            news_count: 0,
        }
    }
}

//
// ================= Technical Agent Output =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSignal {
    pub indicator: String,
    pub value: f64,
    pub signal: Signal,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyLevel {
    pub kind: LevelKind,
    pub price: f64,
    pub strength: LevelStrength,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalReport {
    pub trend_summary: String,
    pub overall_trend: Trend,
    pub key_levels: Vec<KeyLevel>,
    pub indicator_signals: Vec<IndicatorSignal>,
    pub current_price: f64,
    pub price_change_pct: f64,
}

impl TechnicalReport {
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            trend_summary: reason.into(),
            overall_trend: Trend::Neutral,
            key_levels: vec![],
            indicator_signals: vec![],
            current_price: 0.0,
            price_change_pct: 0.0,
        }
    }
}

//
// ================= Quant Agent Output =================
//

/// Return-related metrics, all percent-scaled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReturnMetrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub daily_avg_return: f64,
    pub best_day: f64,
    pub worst_day: f64,
}

/// Risk-related metrics. Volatility, drawdown, VaR and CVaR are
/// percent-scaled; Sharpe and Sortino are unitless ratios.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    pub var_95: f64,
    pub cvar_95: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantReport {
    pub risk_summary: String,
    pub risk_level: RiskLevel,
    pub return_metrics: ReturnMetrics,
    pub risk_metrics: RiskMetrics,
    pub risk_reward_assessment: String,
}

impl QuantReport {
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            risk_summary: reason.into(),
            risk_level: RiskLevel::Moderate,
            return_metrics: ReturnMetrics::default(),
            risk_metrics: RiskMetrics::default(),
            risk_reward_assessment: "Unable to assess risk/reward".to_string(),
        }
    }
}

//
// ================= Reasoning Trace =================
//

/// Single reasoning step from an agent. Append-only; the full sequence
/// is returned in the final output as an audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thought {
    pub agent: String,
    pub thought: String,
    pub timestamp: DateTime<Utc>,
}

impl Thought {
    pub fn new(agent: impl Into<String>, thought: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            thought: thought.into(),
            timestamp: Utc::now(),
        }
    }
}

//
// ================= Final Result =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalAnalysis {
    pub final_analysis: String,
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub risk_level: RiskLevel,

    pub news_analysis: Option<NewsReport>,
    pub technical_analysis: Option<TechnicalReport>,
    pub quant_analysis: Option<QuantReport>,

    pub thought_process: Vec<Thought>,

    pub symbol: String,
    pub analysis_timestamp: DateTime<Utc>,
}

impl FinalAnalysis {
    /// Degraded output produced when the orchestrator itself fails.
    /// The session still completes with this instead of propagating.
    pub fn degraded(symbol: impl Into<String>, reason: &str, thoughts: Vec<Thought>) -> Self {
        Self {
            final_analysis: format!("Error during analysis: {}", reason),
            recommendation: Recommendation::Hold,
            confidence: 0.0,
            risk_level: RiskLevel::Moderate,
            news_analysis: None,
            technical_analysis: None,
            quant_analysis: None,
            thought_process: thoughts,
            symbol: symbol.into(),
            analysis_timestamp: Utc::now(),
        }
    }
}

//
// ================= Helpers =================
//

/// Force a numeric value into a declared valid range rather than
/// rejecting it.
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        return min;
    }
    value.clamp(min, max)
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Sentiment::Bullish => "bullish",
            Sentiment::Bearish => "bearish",
            Sentiment::Neutral => "neutral",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Trend::Bullish => "bullish",
            Trend::Bearish => "bearish",
            Trend::Neutral => "neutral",
            Trend::Mixed => "mixed",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Signal::Bullish => "bullish",
            Signal::Bearish => "bearish",
            Signal::Neutral => "neutral",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
            RiskLevel::Extreme => "extreme",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Recommendation::StrongBuy => "strong_buy",
            Recommendation::Buy => "buy",
            Recommendation::Hold => "hold",
            Recommendation::Sell => "sell",
            Recommendation::StrongSell => "strong_sell",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for LevelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LevelKind::Support => "support",
            LevelKind::Resistance => "resistance",
        };
        write!(f, "{}", s)
    }
}
