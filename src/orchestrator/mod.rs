//! Orchestration controller
//!
//! Runs the reasoning loop: ask the model what to do, parse the action
//! line, dispatch at most once per agent, feed the observation back,
//! and synthesize when the model stops or the iteration cap is hit.
//! The outer `run` is infallible; a session always ends in a
//! schema-valid result, degraded if necessary.

use crate::llm::{ChatMessage, LanguageModel};
use crate::models::{AnalysisRequest, FinalAnalysis, Thought};
use crate::progress::{ProgressBus, ProgressKind};
use crate::synthesis::{self, GatheredResults};
use crate::tools::{
    already_executed_observation, extract_action, skipped_observation, unknown_agent_observation,
    ActionToken, AgentId, AgentResult, Toolbox,
};
use crate::data::MarketData;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

pub const ORCHESTRATOR: &str = "Orchestrator";

/// Hard cap on reasoning iterations. The loop also halts on an explicit
/// stop action or any reply without a parseable action line.
pub const MAX_ITERATIONS: usize = 10;

/// Conversation turns kept in the loop context. The system instruction
/// and the initial task turn are always preserved; older turns beyond
/// the cap are dropped oldest-first.
pub const MAX_HISTORY_TURNS: usize = 24;

const REACT_SYSTEM_PROMPT: &str = "You are the Master Orchestrator Agent for crypto analysis.
You coordinate specialized agents by choosing one action per turn.

Available actions:
- news_sentiment: Analyze recent news and market sentiment
- technical_analysis: Analyze price patterns and technical indicators
- quantitative_metrics: Analyze risk metrics and returns
- STOP: Finish gathering and produce the final analysis

Respond in exactly this format:
Thought: <your reasoning about what to do next>
Action: <one action token from the list above>

Rules:
- Invoke each agent at most once; when you have what you need, reply with Action: STOP
- Only request agents that are enabled for this task
- Do not make price predictions";

/// Lifecycle of one analysis session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Planning,
    Iterating,
    Synthesizing,
    Done,
    Failed,
}

struct Session {
    history: Vec<ChatMessage>,
    executed: HashSet<AgentId>,
    results: GatheredResults,
    thoughts: Vec<Thought>,
    phase: Phase,
}

impl Session {
    fn new() -> Self {
        Self {
            history: Vec::new(),
            executed: HashSet::new(),
            results: GatheredResults::default(),
            thoughts: Vec::new(),
            phase: Phase::Planning,
        }
    }
}

pub struct Orchestrator {
    llm: Arc<dyn LanguageModel>,
    toolbox: Toolbox,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LanguageModel>, data: Arc<dyn MarketData>) -> Self {
        let toolbox = Toolbox::new(Arc::clone(&llm), data);
        Self { llm, toolbox }
    }

    /// Run one full analysis session. Never fails: any error escaping
    /// the loop or synthesis yields the degraded hold result with the
    /// error recorded in the reasoning trace.
    pub async fn run(&self, request: &AnalysisRequest, bus: &mut ProgressBus) -> FinalAnalysis {
        let mut session = Session::new();

        match self.execute(request, &mut session, bus).await {
            Ok(analysis) => {
                set_phase(&mut session, Phase::Done);
                bus.emit(
                    ProgressKind::Final,
                    ORCHESTRATOR,
                    "Analysis complete",
                    Some(json!({
                        "recommendation": analysis.recommendation,
                        "confidence": analysis.confidence,
                    })),
                );
                analysis
            }
            Err(e) => {
                set_phase(&mut session, Phase::Failed);
                warn!(symbol = %request.symbol, error = %e, "Session failed, returning degraded result");
                bus.emit(ProgressKind::Error, ORCHESTRATOR, format!("Error: {}", e), None);

                let mut thoughts = session.thoughts;
                thoughts.push(Thought::new(ORCHESTRATOR, format!("Error: {}", e)));
                FinalAnalysis::degraded(request.symbol.as_str(), &e.to_string(), thoughts)
            }
        }
    }

    async fn execute(
        &self,
        request: &AnalysisRequest,
        session: &mut Session,
        bus: &mut ProgressBus,
    ) -> crate::Result<FinalAnalysis> {
        request.validate()?;

        self.record_thought(
            session,
            bus,
            format!("Starting analysis for {}", request.symbol),
        );

        let enabled: Vec<&str> = AgentId::ALL
            .iter()
            .filter(|id| agent_enabled(request, **id))
            .map(|id| id.token())
            .collect();
        self.record_thought(
            session,
            bus,
            format!("Planning with {} available agents: {}", enabled.len(), enabled.join(", ")),
        );

        session.history.push(ChatMessage::system(REACT_SYSTEM_PROMPT));
        session.history.push(ChatMessage::user(format!(
            "Analyze {} over a {}-day window.\n\
             Enabled agents: {}.\n\
             Gather what you need, then stop.",
            request.symbol,
            request.days,
            if enabled.is_empty() { "none".to_string() } else { enabled.join(", ") },
        )));

        set_phase(session, Phase::Iterating);
        self.reasoning_loop(request, session, bus).await?;

        set_phase(session, Phase::Synthesizing);
        self.record_thought(session, bus, "Synthesizing results from all agents...");
        bus.emit(
            ProgressKind::Thinking,
            ORCHESTRATOR,
            "Generating final analysis...",
            None,
        );

        let mut analysis = synthesis::synthesize(
            self.llm.as_ref(),
            &request.symbol,
            &session.results,
            session.thoughts.clone(),
        )
        .await?;

        let summary = Thought::new(
            ORCHESTRATOR,
            format!(
                "Final recommendation: {} (confidence: {:.0}%)",
                analysis.recommendation,
                analysis.confidence * 100.0
            ),
        );
        analysis.thought_process.push(summary.clone());
        session.thoughts.push(summary);

        Ok(analysis)
    }

    async fn reasoning_loop(
        &self,
        request: &AnalysisRequest,
        session: &mut Session,
        bus: &mut ProgressBus,
    ) -> crate::Result<()> {
        for iteration in 1..=MAX_ITERATIONS {
            let reply = self.llm.complete(&session.history).await?;
            self.record_thought(session, bus, reply.trim().to_string());
            session.history.push(ChatMessage::assistant(reply.clone()));

            let observation = match extract_action(&reply) {
                None => {
                    info!(iteration, "No action line in reply, stopping loop");
                    break;
                }
                Some(ActionToken::Stop) => {
                    info!(iteration, "Explicit stop action");
                    break;
                }
                Some(ActionToken::Agent(id)) if !agent_enabled(request, id) => {
                    skipped_observation(id)
                }
                Some(ActionToken::Agent(id)) if session.executed.contains(&id) => {
                    already_executed_observation(id)
                }
                Some(ActionToken::Agent(id)) => {
                    bus.emit(
                        ProgressKind::ToolCall,
                        ORCHESTRATOR,
                        format!("Invoking {}", id.display_name()),
                        Some(json!({"agent": id.token()})),
                    );

                    let result = self
                        .toolbox
                        .invoke(id, &request.symbol, request.days, bus)
                        .await;
                    session.executed.insert(id);

                    let observation = result.observation();
                    self.store_result(session, result);
                    observation
                }
                Some(ActionToken::Unrecognized(token)) => {
                    warn!(token = %token, "Model requested unknown agent");
                    unknown_agent_observation(&token)
                }
            };

            session
                .history
                .push(ChatMessage::user(format!("Observation: {}", observation)));
            trim_history(&mut session.history);
        }

        Ok(())
    }

    fn store_result(&self, session: &mut Session, result: AgentResult) {
        match result {
            AgentResult::News(report) => {
                session.thoughts.push(Thought::new(
                    AgentId::News.display_name(),
                    format!(
                        "Overall sentiment: {}, Score: {:.2}",
                        report.overall_sentiment, report.avg_sentiment_score
                    ),
                ));
                session.results.news = Some(report);
            }
            AgentResult::Technical(report) => {
                session.thoughts.push(Thought::new(
                    AgentId::Technical.display_name(),
                    format!(
                        "Overall trend: {}, Price: ${:.2}",
                        report.overall_trend, report.current_price
                    ),
                ));
                session.results.technical = Some(report);
            }
            AgentResult::Quant(report) => {
                session.thoughts.push(Thought::new(
                    AgentId::Quant.display_name(),
                    format!(
                        "Risk level: {}, Sharpe: {:.2}",
                        report.risk_level, report.risk_metrics.sharpe_ratio
                    ),
                ));
                session.results.quant = Some(report);
            }
        }
    }

    fn record_thought(&self, session: &mut Session, bus: &mut ProgressBus, thought: impl Into<String>) {
        let thought = thought.into();
        session.thoughts.push(Thought::new(ORCHESTRATOR, thought.clone()));
        bus.emit(ProgressKind::Thinking, ORCHESTRATOR, thought, None);
    }
}

fn set_phase(session: &mut Session, phase: Phase) {
    tracing::debug!(from = ?session.phase, to = ?phase, "phase transition");
    session.phase = phase;
}

fn agent_enabled(request: &AnalysisRequest, id: AgentId) -> bool {
    match id {
        AgentId::News => request.include_news,
        AgentId::Technical => request.include_technical,
        AgentId::Quant => request.include_quant,
    }
}

/// Drop the oldest loop turns past the cap, always keeping the system
/// instruction and the initial task turn at the front.
fn trim_history(history: &mut Vec<ChatMessage>) {
    while history.len() > MAX_HISTORY_TURNS {
        history.remove(2);
    }
}
