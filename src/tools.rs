//! Agent tool adapter
//!
//! Maps free-text action tokens from the reasoning loop onto a closed
//! set of agent identifiers, then dispatches over the enum. Unknown
//! tokens survive as `Unrecognized` so the loop can observe the error
//! instead of branching on raw strings at each call site.

use crate::agents::{NewsAgent, QuantAgent, TechnicalAgent};
use crate::agents::{NEWS_AGENT, QUANT_AGENT, TECHNICAL_AGENT};
use crate::data::MarketData;
use crate::llm::LanguageModel;
use crate::models::{NewsReport, QuantReport, TechnicalReport};
use crate::progress::ProgressBus;
use serde_json::{json, Value};
use std::sync::Arc;

const STOP_KEYWORD: &str = "stop";

/// The three dispatchable sub-agents. Closed set; anything else the
/// loop produces stays a string and never reaches dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentId {
    News,
    Technical,
    Quant,
}

impl AgentId {
    /// Accepts the canonical action tokens plus the short aliases the
    /// model tends to emit. Case-insensitive.
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_lowercase().as_str() {
            "news_sentiment" | "news" => Some(AgentId::News),
            "technical_analysis" | "technical" => Some(AgentId::Technical),
            "quantitative_metrics" | "quantitative_analysis" | "quant" => Some(AgentId::Quant),
            _ => None,
        }
    }

    /// Token advertised to the model in the loop prompt.
    pub fn token(&self) -> &'static str {
        match self {
            AgentId::News => "news_sentiment",
            AgentId::Technical => "technical_analysis",
            AgentId::Quant => "quantitative_metrics",
        }
    }

    /// Display name used in progress events and thoughts.
    pub fn display_name(&self) -> &'static str {
        match self {
            AgentId::News => NEWS_AGENT,
            AgentId::Technical => TECHNICAL_AGENT,
            AgentId::Quant => QUANT_AGENT,
        }
    }

    pub const ALL: [AgentId; 3] = [AgentId::News, AgentId::Technical, AgentId::Quant];
}

/// Outcome of parsing one loop reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionToken {
    Stop,
    Agent(AgentId),
    Unrecognized(String),
}

/// First line matching `Action: <token>` wins; a reply without one is
/// an implicit stop. A token containing the stop keyword anywhere is an
/// explicit stop.
pub fn extract_action(reply: &str) -> Option<ActionToken> {
    for line in reply.lines() {
        let trimmed = line.trim();
        let lower = trimmed.to_lowercase();
        if let Some(rest) = lower.strip_prefix("action:") {
            let token = rest.trim();
            if token.is_empty() {
                continue;
            }
            if token.contains(STOP_KEYWORD) {
                return Some(ActionToken::Stop);
            }
            return Some(match AgentId::parse(token) {
                Some(id) => ActionToken::Agent(id),
                None => ActionToken::Unrecognized(token.to_string()),
            });
        }
    }
    None
}

/// Typed result of one sub-agent invocation, paired with the JSON
/// observation fed back into the loop.
#[derive(Debug, Clone)]
pub enum AgentResult {
    News(NewsReport),
    Technical(TechnicalReport),
    Quant(QuantReport),
}

impl AgentResult {
    pub fn agent_id(&self) -> AgentId {
        match self {
            AgentResult::News(_) => AgentId::News,
            AgentResult::Technical(_) => AgentId::Technical,
            AgentResult::Quant(_) => AgentId::Quant,
        }
    }

    /// Observation envelope: always carries a `status` field so the
    /// model sees a uniform shape regardless of which agent ran.
    pub fn observation(&self) -> Value {
        let payload = match self {
            AgentResult::News(report) => serde_json::to_value(report),
            AgentResult::Technical(report) => serde_json::to_value(report),
            AgentResult::Quant(report) => serde_json::to_value(report),
        }
        .unwrap_or(Value::Null);

        json!({
            "status": "success",
            "agent": self.agent_id().token(),
            "result": payload,
        })
    }
}

/// Observation for an agent that was disabled by the request toggles.
pub fn skipped_observation(id: AgentId) -> Value {
    json!({
        "status": "skipped",
        "agent": id.token(),
        "message": "agent disabled for this request",
    })
}

/// Observation for an agent the loop already ran this session.
pub fn already_executed_observation(id: AgentId) -> Value {
    json!({
        "status": "already_executed",
        "agent": id.token(),
        "message": "agent result already gathered; choose another action or stop",
    })
}

/// Observation for a token outside the known vocabulary.
pub fn unknown_agent_observation(token: &str) -> Value {
    json!({
        "status": "error",
        "message": "unknown agent",
        "token": token,
    })
}

/// Owns the three sub-agents and dispatches a parsed `AgentId` to the
/// right one. Each invocation is infallible; dedup belongs to the
/// session, not here.
pub struct Toolbox {
    news: NewsAgent,
    technical: TechnicalAgent,
    quant: QuantAgent,
}

impl Toolbox {
    pub fn new(llm: Arc<dyn LanguageModel>, data: Arc<dyn MarketData>) -> Self {
        Self {
            news: NewsAgent::new(Arc::clone(&llm), Arc::clone(&data)),
            technical: TechnicalAgent::new(Arc::clone(&llm), Arc::clone(&data)),
            quant: QuantAgent::new(llm, data),
        }
    }

    pub async fn invoke(
        &self,
        id: AgentId,
        symbol: &str,
        days: u32,
        bus: &mut ProgressBus,
    ) -> AgentResult {
        match id {
            AgentId::News => AgentResult::News(self.news.run(symbol, bus).await),
            AgentId::Technical => {
                AgentResult::Technical(self.technical.run(symbol, days, bus).await)
            }
            AgentId::Quant => AgentResult::Quant(self.quant.run(symbol, days, bus).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_tokens_and_aliases() {
        assert_eq!(AgentId::parse("news_sentiment"), Some(AgentId::News));
        assert_eq!(AgentId::parse("NEWS"), Some(AgentId::News));
        assert_eq!(AgentId::parse("technical_analysis"), Some(AgentId::Technical));
        assert_eq!(AgentId::parse("quantitative_metrics"), Some(AgentId::Quant));
        assert_eq!(AgentId::parse(" quant "), Some(AgentId::Quant));
        assert_eq!(AgentId::parse("sentiment_news"), None);
        assert_eq!(AgentId::parse(""), None);
    }

    #[test]
    fn extracts_first_action_line_case_insensitively() {
        let reply = "Thought: I should check the news first.\n\
                     ACTION: news_sentiment\n\
                     Action: technical_analysis";
        assert_eq!(
            extract_action(reply),
            Some(ActionToken::Agent(AgentId::News))
        );
    }

    #[test]
    fn stop_keyword_anywhere_in_token_stops() {
        assert_eq!(extract_action("Action: STOP"), Some(ActionToken::Stop));
        assert_eq!(
            extract_action("Action: stop_and_synthesize"),
            Some(ActionToken::Stop)
        );
    }

    #[test]
    fn unknown_token_is_preserved() {
        assert_eq!(
            extract_action("Action: moon_forecast"),
            Some(ActionToken::Unrecognized("moon_forecast".to_string()))
        );
    }

    #[test]
    fn reply_without_action_line_yields_none() {
        assert_eq!(extract_action("I am not sure what to do next."), None);
        assert_eq!(extract_action(""), None);
    }

    #[test]
    fn observation_envelopes_carry_status() {
        let result = AgentResult::News(NewsReport::fallback("nothing to report"));
        let obs = result.observation();
        assert_eq!(obs["status"], "success");
        assert_eq!(obs["agent"], "news_sentiment");
        assert!(obs["result"]["sentiment_summary"].is_string());

        assert_eq!(skipped_observation(AgentId::Quant)["status"], "skipped");
        assert_eq!(
            already_executed_observation(AgentId::Technical)["status"],
            "already_executed"
        );

        let unknown = unknown_agent_observation("moon_forecast");
        assert_eq!(unknown["status"], "error");
        assert_eq!(unknown["message"], "unknown agent");
    }
}
