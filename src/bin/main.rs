//! One-shot CLI analysis: progress goes to stderr via tracing, the
//! final analysis JSON to stdout.

use market_sentinel::config::Config;
use market_sentinel::data::{HttpMarketData, MarketData, StaticMarketData};
use market_sentinel::llm::GroqClient;
use market_sentinel::models::AnalysisRequest;
use market_sentinel::orchestrator::Orchestrator;
use market_sentinel::progress::{ProgressBus, ProgressObserver};
use std::sync::Arc;
use tracing::warn;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    dotenv::dotenv().ok();

    let mut args = std::env::args().skip(1);
    let symbol = args.next().unwrap_or_else(|| "BTC".to_string());
    let days: u32 = args.next().and_then(|d| d.parse().ok()).unwrap_or(30);

    let config = Config::from_env();
    if !config.groq_configured() {
        warn!("GROQ_API_KEY not set; LLM calls will fail and the session will degrade");
    }

    let mut llm = GroqClient::new(config.groq_api_key.clone());
    if let Some(model) = &config.groq_model {
        llm = llm.with_model(model.clone());
    }

    let data: Arc<dyn MarketData> = match HttpMarketData::from_env() {
        Some(client) => Arc::new(client),
        None => {
            warn!("MARKET_DATA_BASE_URL not set; agents will report no data");
            Arc::new(StaticMarketData::new())
        }
    };

    let orchestrator = Orchestrator::new(Arc::new(llm), data);

    let mut request = AnalysisRequest::new(symbol);
    request.days = days;

    let observer: ProgressObserver = Arc::new(|event| {
        eprintln!("[{}] {}: {}", event.timestamp.format("%H:%M:%S"), event.agent, event.message);
    });
    let mut bus = ProgressBus::new(Some(observer));

    let analysis = orchestrator.run(&request, &mut bus).await;

    println!("{}", serde_json::to_string_pretty(&analysis)?);

    Ok(())
}
