//! News sentiment agent
//!
//! Fetches headlines with per-article sentiment scores, buckets the
//! aggregate deterministically, and asks the LLM for a short summary
//! of the themes. The LLM never originates the classification.

use crate::data::{MarketData, RawArticle};
use crate::llm::{ChatMessage, LanguageModel};
use crate::models::{clamp, EventSentiment, NewsEvent, NewsReport, Sentiment};
use crate::progress::{ProgressBus, ProgressKind};
use std::sync::Arc;
use tracing::warn;

use super::NEWS_AGENT;

const SYSTEM_PROMPT: &str = "You are a News Sentiment Analysis Agent specializing in crypto markets.
Your task is to analyze recent news and provide a sentiment assessment.

Given a list of news articles with their sentiment scores, you must:
1. Summarize the key themes and events
2. Highlight the most impactful news stories
3. Provide a concise natural language summary

Be objective and factual. Focus on market-moving events.
When the news is mixed, acknowledge uncertainty.";

/// Number of articles requested from the feed.
const FETCH_LIMIT: usize = 20;
/// Headlines included in the LLM context.
const CONTEXT_LIMIT: usize = 15;
/// Events surfaced in the report, ranked by impact.
const TOP_EVENTS: usize = 5;

/// Policy constants for sentiment bucketing. The cutoffs are stable
/// for a given input but carry no derivation; adjust here, not inline.
#[derive(Debug, Clone, Copy)]
pub struct NewsThresholds {
    pub bullish_score: f64,
    pub bearish_score: f64,
}

impl Default for NewsThresholds {
    fn default() -> Self {
        Self {
            bullish_score: 0.15,
            bearish_score: -0.15,
        }
    }
}

pub struct NewsAgent {
    llm: Arc<dyn LanguageModel>,
    data: Arc<dyn MarketData>,
    thresholds: NewsThresholds,
}

impl NewsAgent {
    pub fn new(llm: Arc<dyn LanguageModel>, data: Arc<dyn MarketData>) -> Self {
        Self {
            llm,
            data,
            thresholds: NewsThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: NewsThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Run the news sentiment analysis. Never fails: any error path
    /// collapses to the neutral default plus an `error` event.
    pub async fn run(&self, symbol: &str, bus: &mut ProgressBus) -> NewsReport {
        match self.analyze(symbol, bus).await {
            Ok(report) => {
                bus.emit(
                    ProgressKind::AgentComplete,
                    NEWS_AGENT,
                    "News sentiment analysis complete",
                    None,
                );
                report
            }
            Err(e) => {
                warn!(symbol, error = %e, "News agent failed");
                bus.emit(ProgressKind::Error, NEWS_AGENT, format!("Error: {}", e), None);
                NewsReport::fallback(format!("Error analyzing news: {}", e))
            }
        }
    }

    async fn analyze(&self, symbol: &str, bus: &mut ProgressBus) -> crate::Result<NewsReport> {
        bus.emit(
            ProgressKind::Thinking,
            NEWS_AGENT,
            format!("Fetching news for {}...", symbol),
            None,
        );

        let articles = self.data.latest_news(FETCH_LIMIT).await?;
        if articles.is_empty() {
            return Err(crate::error::AgentError::NoData(
                "no news articles available".to_string(),
            ));
        }

        bus.emit(
            ProgressKind::ToolResult,
            NEWS_AGENT,
            format!("Retrieved {} news articles", articles.len()),
            None,
        );

        bus.emit(
            ProgressKind::Thinking,
            NEWS_AGENT,
            "Calculating aggregate sentiment...",
            None,
        );

        let scores: Vec<f64> = articles.iter().filter_map(|a| a.sentiment_score).collect();
        let avg_score = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
        let avg_score = clamp(avg_score, -1.0, 1.0);

        let overall_sentiment = if avg_score > self.thresholds.bullish_score {
            Sentiment::Bullish
        } else if avg_score < self.thresholds.bearish_score {
            Sentiment::Bearish
        } else {
            Sentiment::Neutral
        };

        let top_events = rank_events(&articles);

        bus.emit(
            ProgressKind::Thinking,
            NEWS_AGENT,
            "Generating sentiment summary...",
            None,
        );

        let context = articles
            .iter()
            .take(CONTEXT_LIMIT)
            .map(|a| {
                format!(
                    "- {} (Sentiment: {}, Score: {:.2})",
                    a.title,
                    a.sentiment.as_deref().unwrap_or("neutral"),
                    a.sentiment_score.unwrap_or(0.0)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Analyze the following news articles and provide a concise sentiment summary for {}:\n\n\
             {}\n\n\
             Aggregate statistics:\n\
             - Total articles: {}\n\
             - Average sentiment score: {:.3}\n\
             - Overall sentiment: {}\n\n\
             Provide a 2-3 sentence summary of the market sentiment, key themes, and potential market impact.\n\
             Focus on being factual and objective. Do not make price predictions.",
            symbol,
            context,
            articles.len(),
            avg_score,
            overall_sentiment,
        );

        let reply = self
            .llm
            .complete(&[ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)])
            .await?;

        Ok(NewsReport {
            sentiment_summary: reply.trim().to_string(),
            avg_sentiment_score: avg_score,
            overall_sentiment,
            top_events,
            news_count: articles.len(),
        })
    }
}

/// Top events by absolute sentiment score (most impactful first), with
/// labels validated against the closed vocabulary and scores clamped.
fn rank_events(articles: &[RawArticle]) -> Vec<NewsEvent> {
    let mut sorted: Vec<&RawArticle> = articles.iter().collect();
    sorted.sort_by(|a, b| {
        let left = a.sentiment_score.unwrap_or(0.0).abs();
        let right = b.sentiment_score.unwrap_or(0.0).abs();
        right.partial_cmp(&left).unwrap_or(std::cmp::Ordering::Equal)
    });

    sorted
        .into_iter()
        .take(TOP_EVENTS)
        .map(|a| NewsEvent {
            title: a.title.clone(),
            sentiment: match a.sentiment.as_deref() {
                Some("positive") => EventSentiment::Positive,
                Some("negative") => EventSentiment::Negative,
                _ => EventSentiment::Neutral,
            },
            sentiment_score: clamp(a.sentiment_score.unwrap_or(0.0), -1.0, 1.0),
            source: a.source.clone(),
            published_at: a.published_at.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StaticMarketData;
    use crate::llm::ScriptedLlm;
    use crate::progress::ProgressBus;

    fn article(title: &str, sentiment: &str, score: f64) -> RawArticle {
        RawArticle {
            title: title.to_string(),
            source: Some("TestWire".to_string()),
            published_at: None,
            sentiment: Some(sentiment.to_string()),
            sentiment_score: Some(score),
        }
    }

    fn agent(data: StaticMarketData) -> NewsAgent {
        NewsAgent::new(
            Arc::new(ScriptedLlm::new(vec!["Sentiment looks constructive."])),
            Arc::new(data),
        )
    }

    #[tokio::test]
    async fn classifies_bullish_above_threshold() {
        let data = StaticMarketData::new().with_news(vec![
            article("ETF inflows", "positive", 0.8),
            article("Adoption grows", "positive", 0.4),
        ]);

        let mut bus = ProgressBus::new(None);
        let report = agent(data).run("BTC", &mut bus).await;

        assert_eq!(report.overall_sentiment, Sentiment::Bullish);
        assert_eq!(report.news_count, 2);
        assert_eq!(report.sentiment_summary, "Sentiment looks constructive.");
        assert!(bus
            .events()
            .iter()
            .any(|e| e.kind == ProgressKind::AgentComplete));
    }

    #[tokio::test]
    async fn classifies_neutral_inside_band() {
        let data = StaticMarketData::new().with_news(vec![
            article("Quiet day", "neutral", 0.1),
            article("Mixed signals", "negative", -0.1),
        ]);

        let mut bus = ProgressBus::new(None);
        let report = agent(data).run("BTC", &mut bus).await;
        assert_eq!(report.overall_sentiment, Sentiment::Neutral);
    }

    #[tokio::test]
    async fn collaborator_error_yields_neutral_default_and_error_event() {
        // Scenario: the news feed is down.
        let mut bus = ProgressBus::new(None);
        let report = agent(StaticMarketData::new()).run("BTC", &mut bus).await;

        assert_eq!(report.overall_sentiment, Sentiment::Neutral);
        assert_eq!(report.avg_sentiment_score, 0.0);
        assert_eq!(report.news_count, 0);
        assert!(report.top_events.is_empty());
        assert!(bus.events().iter().any(|e| e.kind == ProgressKind::Error));
    }

    #[tokio::test]
    async fn llm_failure_collapses_to_default() {
        let data = StaticMarketData::new().with_news(vec![article("Big move", "positive", 0.9)]);
        let agent = NewsAgent::new(Arc::new(crate::llm::FailingLlm), Arc::new(data));

        let mut bus = ProgressBus::new(None);
        let report = agent.run("BTC", &mut bus).await;
        assert_eq!(report.overall_sentiment, Sentiment::Neutral);
        assert!(bus.events().iter().any(|e| e.kind == ProgressKind::Error));
    }

    #[tokio::test]
    async fn ranks_events_by_impact_and_clamps_scores() {
        let data = StaticMarketData::new().with_news(vec![
            article("mild", "positive", 0.1),
            article("huge crash", "negative", -2.5),
            article("solid gain", "positive", 0.7),
        ]);

        let mut bus = ProgressBus::new(None);
        let report = agent(data).run("BTC", &mut bus).await;

        assert_eq!(report.top_events[0].title, "huge crash");
        assert_eq!(report.top_events[0].sentiment_score, -1.0);
        assert!(report.avg_sentiment_score >= -1.0);
    }

    #[tokio::test]
    async fn unknown_sentiment_label_falls_back_to_neutral() {
        let data =
            StaticMarketData::new().with_news(vec![article("weird label", "euphoric", 0.9)]);

        let mut bus = ProgressBus::new(None);
        let report = agent(data).run("BTC", &mut bus).await;
        assert_eq!(report.top_events[0].sentiment, EventSentiment::Neutral);
    }
}
