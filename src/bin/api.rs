use market_sentinel::api::start_server;
use market_sentinel::config::Config;
use market_sentinel::data::{HttpMarketData, MarketData, StaticMarketData};
use market_sentinel::llm::GroqClient;
use market_sentinel::orchestrator::Orchestrator;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    dotenv::dotenv().ok();

    let config = Config::from_env();

    if !config.groq_configured() {
        warn!("GROQ_API_KEY not set; LLM calls will fail and sessions will degrade");
    }

    info!("Market Sentinel - API Server");
    info!("Port: {}", config.port);

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

    let orchestrator = Arc::new(Orchestrator::new(Arc::new(llm), data));

    info!("Orchestrator initialized");
    start_server(orchestrator, config.port).await?;

    Ok(())
}
