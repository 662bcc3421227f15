//! REST + WebSocket API for the analysis orchestrator
//!
//! Thin routing layer: validation and response wrapping here, all
//! semantics in the orchestrator. The WebSocket endpoint bridges the
//! synchronous progress observer onto the socket via an unbounded
//! channel, so the analysis task never blocks on a slow client.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::{NEWS_AGENT, QUANT_AGENT, TECHNICAL_AGENT};
use crate::models::AnalysisRequest;
use crate::orchestrator::Orchestrator;
use crate::progress::{ProgressBus, ProgressObserver};

/// How long the bridge waits on the event channel before re-checking
/// whether the analysis task has finished.
const BRIDGE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct AnalyzeParams {
    pub days: Option<u32>,
    pub include_news: Option<bool>,
    pub include_technical: Option<bool>,
    pub include_quant: Option<bool>,
}

impl AnalyzeParams {
    fn into_request(self, symbol: String) -> AnalysisRequest {
        let mut request = AnalysisRequest::new(symbol);
        if let Some(days) = self.days {
            request.days = days;
        }
        if let Some(v) = self.include_news {
            request.include_news = v;
        }
        if let Some(v) = self.include_technical {
            request.include_technical = v;
        }
        if let Some(v) = self.include_quant {
            request.include_quant = v;
        }
        request
    }
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "agents": [NEWS_AGENT, TECHNICAL_AGENT, QUANT_AGENT],
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// =============================
/// Analysis Endpoints
/// =============================

async fn analyze(
    State(state): State<ApiState>,
    Json(request): Json<AnalysisRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(symbol = %request.symbol, days = request.days, "Received analysis request");

    if let Err(e) = request.validate() {
        return (StatusCode::BAD_REQUEST, Json(ApiResponse::error(e.to_string())));
    }

    let mut bus = ProgressBus::new(None);
    let analysis = state.orchestrator.run(&request, &mut bus).await;

    (StatusCode::OK, Json(ApiResponse::success(analysis)))
}

async fn analyze_symbol(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(params): Query<AnalyzeParams>,
) -> (StatusCode, Json<ApiResponse>) {
    let request = params.into_request(symbol);
    analyze(State(state), Json(request)).await
}

/// =============================
/// WebSocket Streaming Bridge
/// =============================

/// Outbound half of a streaming connection. Seam for tests; the
/// production implementation is the socket itself.
#[async_trait]
trait MessageSink {
    async fn send_json(&mut self, message: Value) -> crate::Result<()>;
}

#[async_trait]
impl MessageSink for WebSocket {
    async fn send_json(&mut self, message: Value) -> crate::Result<()> {
        self.send(Message::Text(message.to_string()))
            .await
            .map_err(|e| {
                crate::error::AgentError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
            })
    }
}

async fn ws_analyze(ws: WebSocketUpgrade, State(state): State<ApiState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: ApiState) {
    // One request at a time per connection; each analysis runs to its
    // terminal message before the next request is read.
    while let Some(Ok(message)) = socket.recv().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let request: AnalysisRequest = match serde_json::from_str(&text) {
            Ok(request) => request,
            Err(e) => {
                let _ = socket
                    .send_json(json!({"type": "error", "message": format!("invalid request: {}", e)}))
                    .await;
                continue;
            }
        };

        if let Err(e) = request.validate() {
            let _ = socket
                .send_json(json!({"type": "error", "message": e.to_string()}))
                .await;
            continue;
        }

        let session_id = Uuid::new_v4();
        info!(%session_id, symbol = %request.symbol, "Starting streamed analysis");

        if stream_analysis(Arc::clone(&state.orchestrator), request, &mut socket)
            .await
            .is_err()
        {
            // Client went away mid-stream; drop the connection.
            break;
        }
    }
}

/// Runs the analysis as a spawned task, forwarding every progress
/// event over the channel in emission order, then exactly one terminal
/// message. Events emitted while the sink is busy are buffered by the
/// unbounded channel, never dropped.
async fn stream_analysis(
    orchestrator: Arc<Orchestrator>,
    request: AnalysisRequest,
    sink: &mut impl MessageSink,
) -> crate::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let observer: ProgressObserver = Arc::new(move |event| {
        let _ = tx.send(event);
    });

    let handle = tokio::spawn(async move {
        let mut bus = ProgressBus::new(Some(observer));
        orchestrator.run(&request, &mut bus).await
    });

    while !handle.is_finished() {
        match timeout(BRIDGE_POLL_INTERVAL, rx.recv()).await {
            Ok(Some(event)) => sink.send_json(serde_json::to_value(&event)?).await?,
            Ok(None) => break,
            Err(_) => continue,
        }
    }

    let result = handle.await;

    // The task is done and its sender dropped; drain whatever is still
    // buffered before the terminal message.
    while let Ok(event) = rx.try_recv() {
        sink.send_json(serde_json::to_value(&event)?).await?;
    }

    match result {
        Ok(analysis) => {
            sink.send_json(json!({
                "type": "complete",
                "data": analysis,
                "message": "Analysis complete",
            }))
            .await?
        }
        Err(e) => {
            warn!(error = %e, "Analysis task panicked");
            sink.send_json(json!({"type": "error", "message": format!("analysis task failed: {}", e)}))
                .await?
        }
    }

    Ok(())
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/analyze", post(analyze))
        .route("/api/analyze/:symbol", get(analyze_symbol))
        .route("/ws/analyze", get(ws_analyze))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API server listening on http://0.0.0.0:{}", port);
    info!("WebSocket: ws://127.0.0.1:{}/ws/analyze", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{RawArticle, StaticMarketData};
    use crate::llm::ScriptedLlm;

    struct VecSink {
        messages: Vec<Value>,
    }

    #[async_trait]
    impl MessageSink for VecSink {
        async fn send_json(&mut self, message: Value) -> crate::Result<()> {
            self.messages.push(message);
            Ok(())
        }
    }

    fn test_orchestrator() -> Arc<Orchestrator> {
        let data = StaticMarketData::new().with_news(vec![RawArticle {
            title: "Upgrade ships on schedule".to_string(),
            source: None,
            published_at: None,
            sentiment: Some("positive".to_string()),
            sentiment_score: Some(0.6),
        }]);
        let llm = ScriptedLlm::new(vec![
            "Thought: start with news.\nAction: news_sentiment",
            "Thought: enough.\nAction: STOP",
            r#"{"final_analysis": "Coverage is positive.", "recommendation": "buy", "confidence": 0.7, "risk_level": "low"}"#,
        ]);
        Arc::new(Orchestrator::new(Arc::new(llm), Arc::new(data)))
    }

    #[tokio::test]
    async fn bridge_forwards_all_events_then_one_terminal_message() {
        let mut request = AnalysisRequest::new("BTC");
        request.include_technical = false;
        request.include_quant = false;

        let mut sink = VecSink { messages: vec![] };
        stream_analysis(test_orchestrator(), request, &mut sink)
            .await
            .unwrap();

        let terminal_count = sink
            .messages
            .iter()
            .filter(|m| m["type"] == "complete" || m["type"] == "error")
            .count();
        assert_eq!(terminal_count, 1);

        let last = sink.messages.last().unwrap();
        assert_eq!(last["type"], "complete");
        assert_eq!(last["data"]["recommendation"], "buy");

        // Every progress event made it across, in emission order.
        let kinds: Vec<&str> = sink.messages[..sink.messages.len() - 1]
            .iter()
            .map(|m| m["type"].as_str().unwrap())
            .collect();
        assert_eq!(kinds.first(), Some(&"thinking"));
        assert!(kinds.contains(&"tool_call"));
        assert!(kinds.contains(&"agent_complete"));
        assert!(kinds.contains(&"final"));
    }

    #[tokio::test]
    async fn bridge_completes_even_when_session_degrades() {
        let data = StaticMarketData::new();
        let llm = crate::llm::FailingLlm;
        let orchestrator = Arc::new(Orchestrator::new(Arc::new(llm), Arc::new(data)));

        let mut sink = VecSink { messages: vec![] };
        stream_analysis(orchestrator, AnalysisRequest::new("BTC"), &mut sink)
            .await
            .unwrap();

        // A failed session still terminates with `complete`, carrying
        // the degraded hold result.
        let last = sink.messages.last().unwrap();
        assert_eq!(last["type"], "complete");
        assert_eq!(last["data"]["recommendation"], "hold");
        assert_eq!(last["data"]["confidence"], 0.0);
    }

    #[test]
    fn response_wrapper_shapes() {
        let ok = ApiResponse::success(json!({"x": 1}));
        assert!(ok.success);
        assert!(ok.error.is_none());
        assert_eq!(ok.data.unwrap()["x"], 1);

        let err = ApiResponse::error("boom".to_string());
        assert!(!err.success);
        assert_eq!(err.error.as_deref(), Some("boom"));
    }

    #[test]
    fn query_params_override_request_defaults() {
        let params = AnalyzeParams {
            days: Some(90),
            include_news: Some(false),
            include_technical: None,
            include_quant: Some(true),
        };
        let request = params.into_request("ETH".to_string());
        assert_eq!(request.symbol, "ETH");
        assert_eq!(request.days, 90);
        assert!(!request.include_news);
        assert!(request.include_technical);
    }
}
