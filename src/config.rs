//! Environment configuration
//!
//! All external settings are collected once at startup and injected
//! into constructors; nothing reads the environment lazily at call
//! sites.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub groq_api_key: String,
    pub groq_model: Option<String>,
    pub market_data_base_url: Option<String>,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        let groq_api_key = env::var("GROQ_API_KEY").unwrap_or_default();
        let groq_model = env::var("GROQ_MODEL").ok();
        let market_data_base_url = env::var("MARKET_DATA_BASE_URL").ok();

        let port = env::var("PORT")
            .or_else(|_| env::var("API_PORT"))
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        Self {
            groq_api_key,
            groq_model,
            market_data_base_url,
            port,
        }
    }

    pub fn groq_configured(&self) -> bool {
        !self.groq_api_key.is_empty()
    }
}
