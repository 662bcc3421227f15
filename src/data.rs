//! Market data collaborator boundary
//!
//! The core never fetches or caches raw data itself; it consumes a
//! `MarketData` trait whose production implementation is an HTTP client
//! against the data service. Any `{error: ...}` body or transport
//! failure is surfaced as "no data" and recovered by the sub-agents.

use crate::error::AgentError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use tracing::warn;

//
// ================= Raw shapes =================
//

/// One news article with per-headline sentiment, as delivered by the
/// data service. Sentiment label is free text here; the news agent
/// validates it against the closed vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawArticle {
    pub title: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub sentiment_score: Option<f64>,
}

/// Column-oriented OHLCV series. Missing values are `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OhlcvSeries {
    #[serde(default)]
    pub timestamp: Vec<String>,
    #[serde(default)]
    pub open: Vec<Option<f64>>,
    #[serde(default)]
    pub high: Vec<Option<f64>>,
    #[serde(default)]
    pub low: Vec<Option<f64>>,
    #[serde(default)]
    pub close: Vec<Option<f64>>,
    #[serde(default)]
    pub volume: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MacdSeries {
    #[serde(default)]
    pub macd: Vec<Option<f64>>,
    #[serde(default)]
    pub signal: Vec<Option<f64>>,
    #[serde(default)]
    pub hist: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BandSeries {
    #[serde(default)]
    pub mid: Vec<Option<f64>>,
    #[serde(default)]
    pub upper: Vec<Option<f64>>,
    #[serde(default)]
    pub lower: Vec<Option<f64>>,
}

/// Computed indicator series keyed the way the data service emits them
/// (EMA keyed by period, e.g. "20", "50").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorSet {
    #[serde(default)]
    pub ema: HashMap<String, Vec<Option<f64>>>,
    #[serde(default)]
    pub macd: MacdSeries,
    #[serde(default)]
    pub rsi: Vec<Option<f64>>,
    #[serde(default)]
    pub bbands: BandSeries,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaSnapshot {
    pub ohlcv: OhlcvSeries,
    pub indicators: IndicatorSet,
}

/// Return statistics, fraction-scaled (0.05 = 5%).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReturnStats {
    #[serde(default)]
    pub daily_mean: f64,
    #[serde(default)]
    pub daily_std: f64,
    #[serde(default)]
    pub annualized_return: f64,
    #[serde(default)]
    pub annualized_volatility: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskStats {
    #[serde(default)]
    pub sharpe_ratio: f64,
    #[serde(default)]
    pub sortino_ratio: f64,
    #[serde(default)]
    pub max_drawdown: f64,
    #[serde(default)]
    pub calmar_ratio: f64,
    #[serde(default)]
    pub var_95: f64,
    #[serde(default)]
    pub cvar_95: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceStats {
    #[serde(default)]
    pub total_return: f64,
    #[serde(default)]
    pub best_day: f64,
    #[serde(default)]
    pub worst_day: f64,
    #[serde(default)]
    pub positive_days_pct: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuantSnapshot {
    #[serde(default)]
    pub returns: ReturnStats,
    #[serde(default)]
    pub risk: RiskStats,
    #[serde(default)]
    pub performance: PerformanceStats,
}

//
// ================= Trait =================
//

/// Data collaborator contract. Implementations own caching and rate
/// limiting; the core only ever sees fresh data or an error.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn latest_news(&self, limit: usize) -> crate::Result<Vec<RawArticle>>;
    async fn ta_indicators(&self, symbol: &str, days: u32) -> crate::Result<TaSnapshot>;
    async fn quant_metrics(&self, symbol: &str, days: u32) -> crate::Result<QuantSnapshot>;
}

//
// ================= HTTP implementation =================
//

/// HTTP client against the market-data service.
pub struct HttpMarketData {
    client: Client,
    base_url: String,
}

impl HttpMarketData {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_env() -> Option<Self> {
        let base_url = env::var("MARKET_DATA_BASE_URL").ok()?;
        Some(Self::new(base_url))
    }

    async fn get_json(&self, path: &str) -> crate::Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let response = self.client.get(&url).send().await.map_err(|e| {
            AgentError::Data(format!("Market data request failed for {}: {}", path, e))
        })?;

        let status = response.status();
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| AgentError::Data(format!("Invalid JSON response: {}", e)))?;

        if !status.is_success() {
            return Err(AgentError::Data(format!(
                "Market data service returned {} for {}: {}",
                status, path, body
            )));
        }

        // The service reports soft failures as an "error" field in a
        // 200 body; callers treat those the same as missing data.
        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Err(AgentError::NoData(error.to_string()));
        }

        Ok(body)
    }
}

#[async_trait]
impl MarketData for HttpMarketData {
    async fn latest_news(&self, limit: usize) -> crate::Result<Vec<RawArticle>> {
        let body = self.get_json(&format!("/api/news?limit={}", limit)).await?;

        let articles = body
            .get("articles")
            .cloned()
            .unwrap_or(Value::Array(vec![]));

        serde_json::from_value(articles)
            .map_err(|e| AgentError::Data(format!("Malformed news payload: {}", e)))
    }

    async fn ta_indicators(&self, symbol: &str, days: u32) -> crate::Result<TaSnapshot> {
        let body = self
            .get_json(&format!("/api/technical/{}?days={}", symbol, days))
            .await?;

        serde_json::from_value(body)
            .map_err(|e| AgentError::Data(format!("Malformed technical payload: {}", e)))
    }

    async fn quant_metrics(&self, symbol: &str, days: u32) -> crate::Result<QuantSnapshot> {
        let body = self
            .get_json(&format!("/api/quant/{}?days={}", symbol, days))
            .await?;

        let metrics = body.get("metrics").cloned().unwrap_or_else(|| {
            warn!(symbol, "Quant payload missing metrics object");
            Value::Object(Default::default())
        });

        serde_json::from_value(metrics)
            .map_err(|e| AgentError::Data(format!("Malformed quant payload: {}", e)))
    }
}

//
// ================= Static stub =================
//

/// In-memory data source for development & testing. Any unset slice
/// behaves as "no data available".
#[derive(Default)]
pub struct StaticMarketData {
    pub news: Option<Vec<RawArticle>>,
    pub ta: Option<TaSnapshot>,
    pub quant: Option<QuantSnapshot>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_news(mut self, news: Vec<RawArticle>) -> Self {
        self.news = Some(news);
        self
    }

    pub fn with_ta(mut self, ta: TaSnapshot) -> Self {
        self.ta = Some(ta);
        self
    }

    pub fn with_quant(mut self, quant: QuantSnapshot) -> Self {
        self.quant = Some(quant);
        self
    }
}

#[async_trait]
impl MarketData for StaticMarketData {
    async fn latest_news(&self, limit: usize) -> crate::Result<Vec<RawArticle>> {
        match &self.news {
            Some(news) => Ok(news.iter().take(limit).cloned().collect()),
            None => Err(AgentError::NoData("no news feed configured".to_string())),
        }
    }

    async fn ta_indicators(&self, _symbol: &str, _days: u32) -> crate::Result<TaSnapshot> {
        self.ta
            .clone()
            .ok_or_else(|| AgentError::NoData("no OHLCV data configured".to_string()))
    }

    async fn quant_metrics(&self, _symbol: &str, _days: u32) -> crate::Result<QuantSnapshot> {
        self.quant
            .clone()
            .ok_or_else(|| AgentError::NoData("no quant metrics configured".to_string()))
    }
}
