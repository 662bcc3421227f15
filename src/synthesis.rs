//! Final synthesis
//!
//! Builds a context block from whichever agent reports were gathered,
//! asks the LLM for a single four-field JSON object, and canonicalizes
//! whatever comes back. A reply that is not JSON at all still produces
//! a usable result: the raw text becomes the narrative and every
//! structured field takes its safe default.

use crate::llm::{ChatMessage, LanguageModel};
use crate::models::{
    clamp, FinalAnalysis, NewsReport, QuantReport, Recommendation, RiskLevel, TechnicalReport,
    Thought,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

pub const SYNTHESIS_SYSTEM_PROMPT: &str = "You are the Master Orchestrator Agent for crypto analysis.
You coordinate specialized agents to provide comprehensive market analysis.

Your role is to:
1. Call the appropriate sub-agents based on the user's request
2. Synthesize their findings into a unified analysis
3. Provide a clear recommendation with confidence level

Available agents:
- News Sentiment Agent: Analyzes recent news and market sentiment
- Technical Analysis Agent: Analyzes price patterns and technical indicators
- Quantitative Metrics Agent: Analyzes risk metrics and returns

Guidelines:
- Be objective and balanced in your final analysis
- Acknowledge uncertainty when signals conflict
- Never make price predictions - focus on risk/reward assessment
- Clearly explain your reasoning
- Provide actionable insights

Recommendation scale:
- strong_buy: Multiple strong bullish signals, favorable risk/reward
- buy: Bullish signals outweigh bearish, acceptable risk
- hold: Mixed signals or insufficient data, maintain position
- sell: Bearish signals outweigh bullish, elevated risk
- strong_sell: Multiple strong bearish signals, unfavorable risk/reward";

/// Agent reports gathered during one session. Absent entries simply do
/// not appear in the synthesis context.
#[derive(Debug, Clone, Default)]
pub struct GatheredResults {
    pub news: Option<NewsReport>,
    pub technical: Option<TechnicalReport>,
    pub quant: Option<QuantReport>,
}

/// Raw shape the LLM is asked to produce. Fields are canonicalized
/// after parsing; nothing here is trusted as-is.
#[derive(Debug, Deserialize)]
struct SynthesisReply {
    final_analysis: String,
    recommendation: String,
    confidence: f64,
    risk_level: String,
}

pub async fn synthesize(
    llm: &dyn LanguageModel,
    symbol: &str,
    results: &GatheredResults,
    thoughts: Vec<Thought>,
) -> crate::Result<FinalAnalysis> {
    let context = build_context(results);
    let prompt = synthesis_prompt(symbol, &context);

    let reply = llm
        .complete(&[
            ChatMessage::system(SYNTHESIS_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ])
        .await?;

    Ok(parse_reply(&reply, symbol, results, thoughts))
}

fn synthesis_prompt(symbol: &str, context: &str) -> String {
    format!(
        "Based on the following analysis from specialized agents, provide a comprehensive \
         final analysis for {}.\n\n\
         {}\n\n\
         Respond with ONLY valid JSON matching this exact structure (no markdown, no extra text):\n\
         {{\n\
             \"final_analysis\": \"Your comprehensive 3-5 paragraph analysis here. Synthesize all findings.\",\n\
             \"recommendation\": \"buy\",\n\
             \"confidence\": 0.75,\n\
             \"risk_level\": \"moderate\"\n\
         }}\n\n\
         Rules:\n\
         - final_analysis: 3-5 paragraphs synthesizing all findings. Use \\n for newlines.\n\
         - recommendation: MUST be one of: \"strong_buy\", \"buy\", \"hold\", \"sell\", \"strong_sell\"\n\
         - confidence: Float between 0.0 and 1.0\n\
         - risk_level: MUST be one of: \"low\", \"moderate\", \"high\", \"extreme\"\n\n\
         Be objective, acknowledge uncertainty where signals conflict, and focus on risk/reward assessment.\n\
         Do NOT make specific price predictions. Return ONLY the JSON object.",
        symbol, context,
    )
}

/// One block per gathered report. An empty result set yields an empty
/// context; synthesis still runs.
fn build_context(results: &GatheredResults) -> String {
    let mut parts = Vec::new();

    if let Some(news) = &results.news {
        let events = news
            .top_events
            .iter()
            .take(3)
            .map(|e| format!("  - {} ({:?}, {:.2})", e.title, e.sentiment, e.sentiment_score))
            .collect::<Vec<_>>()
            .join("\n");
        parts.push(format!(
            "NEWS SENTIMENT ANALYSIS:\n\
             - Overall Sentiment: {}\n\
             - Sentiment Score: {:.2}\n\
             - Articles Analyzed: {}\n\
             - Summary: {}\n\
             Top Events:\n{}",
            news.overall_sentiment,
            news.avg_sentiment_score,
            news.news_count,
            news.sentiment_summary,
            events,
        ));
    }

    if let Some(technical) = &results.technical {
        let signals = technical
            .indicator_signals
            .iter()
            .map(|s| format!("  - {}: {} ({})", s.indicator, s.signal, s.description))
            .collect::<Vec<_>>()
            .join("\n");
        let levels = technical
            .key_levels
            .iter()
            .map(|l| format!("  - {}: ${:.2} ({:?})", l.kind, l.price, l.strength))
            .collect::<Vec<_>>()
            .join("\n");
        parts.push(format!(
            "TECHNICAL ANALYSIS:\n\
             - Overall Trend: {}\n\
             - Current Price: ${:.2}\n\
             - Price Change: {:+.2}%\n\
             - Summary: {}\n\
             Indicator Signals:\n{}\n\
             Key Levels:\n{}",
            technical.overall_trend,
            technical.current_price,
            technical.price_change_pct,
            technical.trend_summary,
            signals,
            levels,
        ));
    }

    if let Some(quant) = &results.quant {
        parts.push(format!(
            "QUANTITATIVE ANALYSIS:\n\
             - Risk Level: {}\n\
             - Summary: {}\n\
             Return Metrics:\n\
             \x20 - Total Return: {:+.2}%\n\
             \x20 - Annualized Return: {:+.2}%\n\
             \x20 - Best Day: {:+.2}%\n\
             \x20 - Worst Day: {:+.2}%\n\
             Risk Metrics:\n\
             \x20 - Volatility: {:.2}%\n\
             \x20 - Sharpe Ratio: {:.2}\n\
             \x20 - Sortino Ratio: {:.2}\n\
             \x20 - Max Drawdown: {:.2}%\n\
             \x20 - VaR (95%): {:.2}%\n\
             Risk/Reward Assessment: {}",
            quant.risk_level,
            quant.risk_summary,
            quant.return_metrics.total_return,
            quant.return_metrics.annualized_return,
            quant.return_metrics.best_day,
            quant.return_metrics.worst_day,
            quant.risk_metrics.volatility,
            quant.risk_metrics.sharpe_ratio,
            quant.risk_metrics.sortino_ratio,
            quant.risk_metrics.max_drawdown,
            quant.risk_metrics.var_95,
            quant.risk_reward_assessment,
        ));
    }

    parts.join("\n\n")
}

/// Canonicalize the reply into a schema-valid FinalAnalysis. Every
/// failure mode has a defined output; this function cannot fail.
fn parse_reply(
    reply: &str,
    symbol: &str,
    results: &GatheredResults,
    thoughts: Vec<Thought>,
) -> FinalAnalysis {
    let cleaned = strip_code_fences(reply.trim());

    let mut final_analysis = reply.trim().to_string();
    let mut recommendation = Recommendation::Hold;
    let mut confidence = 0.5;
    let mut risk_level = None;

    match serde_json::from_str::<SynthesisReply>(cleaned) {
        Ok(parsed) => {
            final_analysis = parsed.final_analysis;
            if let Some(r) = Recommendation::parse(&parsed.recommendation) {
                recommendation = r;
            }
            confidence = clamp(parsed.confidence, 0.0, 1.0);
            risk_level = RiskLevel::parse(&parsed.risk_level);
            info!(%recommendation, confidence, "Parsed synthesis reply");
        }
        Err(e) => {
            warn!(error = %e, "Synthesis reply was not valid JSON, using raw text");
        }
    }

    // When the model supplied no usable risk level, defer to the quant
    // classification if one was gathered.
    let risk_level = risk_level
        .or(results.quant.as_ref().map(|q| q.risk_level))
        .unwrap_or(RiskLevel::Moderate);

    FinalAnalysis {
        final_analysis,
        recommendation,
        confidence,
        risk_level,
        news_analysis: results.news.clone(),
        technical_analysis: results.technical.clone(),
        quant_analysis: results.quant.clone(),
        thought_process: thoughts,
        symbol: symbol.to_string(),
        analysis_timestamp: Utc::now(),
    }
}

/// Drop a leading ```/```json line and a trailing ``` line if present.
fn strip_code_fences(text: &str) -> &str {
    let mut out = text;
    if out.starts_with("```") {
        out = out.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
    }
    if let Some(stripped) = out.trim_end().strip_suffix("```") {
        out = stripped;
    }
    out.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;
    use crate::models::{RiskLevel, Sentiment};

    fn news_report() -> NewsReport {
        NewsReport {
            sentiment_summary: "Broadly positive coverage.".to_string(),
            avg_sentiment_score: 0.4,
            overall_sentiment: Sentiment::Bullish,
            top_events: vec![],
            news_count: 12,
        }
    }

    fn quant_report(risk_level: RiskLevel) -> QuantReport {
        let mut report = QuantReport::fallback("placeholder");
        report.risk_level = risk_level;
        report
    }

    #[tokio::test]
    async fn well_formed_reply_is_canonicalized() {
        let llm = ScriptedLlm::new(vec![
            r#"{"final_analysis": "Signals align.", "recommendation": "Strong Buy", "confidence": 1.7, "risk_level": "HIGH"}"#,
        ]);
        let results = GatheredResults {
            news: Some(news_report()),
            ..Default::default()
        };

        let analysis = synthesize(&llm, "BTC", &results, vec![]).await.unwrap();
        assert_eq!(analysis.final_analysis, "Signals align.");
        assert_eq!(analysis.recommendation, Recommendation::StrongBuy);
        assert_eq!(analysis.confidence, 1.0);
        assert_eq!(analysis.risk_level, RiskLevel::High);
        assert!(analysis.news_analysis.is_some());
        assert!(analysis.technical_analysis.is_none());
    }

    #[tokio::test]
    async fn fenced_reply_is_unwrapped() {
        let llm = ScriptedLlm::new(vec![
            "```json\n{\"final_analysis\": \"ok\", \"recommendation\": \"sell\", \"confidence\": 0.6, \"risk_level\": \"low\"}\n```",
        ]);

        let analysis = synthesize(&llm, "BTC", &GatheredResults::default(), vec![])
            .await
            .unwrap();
        assert_eq!(analysis.recommendation, Recommendation::Sell);
        assert_eq!(analysis.risk_level, RiskLevel::Low);
    }

    #[tokio::test]
    async fn prose_reply_becomes_narrative_with_defaults() {
        let llm = ScriptedLlm::new(vec!["The market looks uncertain right now."]);

        let analysis = synthesize(&llm, "BTC", &GatheredResults::default(), vec![])
            .await
            .unwrap();
        assert_eq!(
            analysis.final_analysis,
            "The market looks uncertain right now."
        );
        assert_eq!(analysis.recommendation, Recommendation::Hold);
        assert_eq!(analysis.confidence, 0.5);
        assert_eq!(analysis.risk_level, RiskLevel::Moderate);
    }

    #[tokio::test]
    async fn missing_risk_level_defers_to_quant() {
        let llm = ScriptedLlm::new(vec![
            r#"{"final_analysis": "ok", "recommendation": "hold", "confidence": 0.5, "risk_level": "medium"}"#,
        ]);
        let results = GatheredResults {
            quant: Some(quant_report(RiskLevel::Extreme)),
            ..Default::default()
        };

        let analysis = synthesize(&llm, "BTC", &results, vec![]).await.unwrap();
        assert_eq!(analysis.risk_level, RiskLevel::Extreme);
    }

    #[tokio::test]
    async fn invalid_recommendation_falls_back_to_hold() {
        let llm = ScriptedLlm::new(vec![
            r#"{"final_analysis": "ok", "recommendation": "moon", "confidence": -2.0, "risk_level": "low"}"#,
        ]);

        let analysis = synthesize(&llm, "BTC", &GatheredResults::default(), vec![])
            .await
            .unwrap();
        assert_eq!(analysis.recommendation, Recommendation::Hold);
        assert_eq!(analysis.confidence, 0.0);
    }

    #[test]
    fn context_includes_only_gathered_reports() {
        let results = GatheredResults {
            news: Some(news_report()),
            ..Default::default()
        };
        let context = build_context(&results);
        assert!(context.contains("NEWS SENTIMENT ANALYSIS"));
        assert!(!context.contains("TECHNICAL ANALYSIS"));
        assert!(!context.contains("QUANTITATIVE ANALYSIS"));
    }

    #[test]
    fn fence_stripping_handles_bare_and_tagged_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
    }
}
