use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub gateway_base_url: String,
    pub gateway_token: String,
    pub openai_api_key: String,
    pub openai_model: String,
    /// Jitter bounds for pacing between external calls, in milliseconds.
    pub pace_min_ms: u64,
    pub pace_max_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            gateway_base_url: env::var("GATEWAY_BASE_URL")
                .context("GATEWAY_BASE_URL must be set")?,
            gateway_token: env::var("GATEWAY_TOKEN").context("GATEWAY_TOKEN must be set")?,
            openai_api_key: env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?,
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            pace_min_ms: env::var("PACE_MIN_MS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()
                .context("PACE_MIN_MS must be a valid number")?,
            pace_max_ms: env::var("PACE_MAX_MS")
                .unwrap_or_else(|_| "6000".to_string())
                .parse()
                .context("PACE_MAX_MS must be a valid number")?,
        })
    }
}
