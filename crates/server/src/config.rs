// Server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. Without a database URL the server runs on the in-memory
// store; without an AI API key the assistant degrades to its fallback
// reply.

use std::net::SocketAddr;

/// Core server configuration.
///
/// Constructed via [`ServerConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// PostgreSQL connection string; in-memory store when absent.
    pub database_url: Option<String>,
    /// Base URL of the OpenAI-compatible completion endpoint.
    pub ai_base_url: String,
    /// API key for the completion endpoint; assistant is unavailable
    /// without one.
    pub ai_api_key: Option<String>,
    /// Model name sent with completion requests.
    pub ai_model: String,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `palaver_server=debug`).
    pub log_filter: String,
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `PALAVER_HOST` | `0.0.0.0` |
    /// | `PALAVER_PORT` | `3001` |
    /// | `PALAVER_DATABASE_URL` | *(none — in-memory store)* |
    /// | `PALAVER_AI_BASE_URL` | `https://api.openai.com/v1` |
    /// | `PALAVER_AI_API_KEY` | *(none — assistant unavailable)* |
    /// | `PALAVER_AI_MODEL` | `gpt-3.5-turbo` |
    /// | `PALAVER_CORS_ORIGINS` | *(none — dev default)* |
    /// | `PALAVER_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("PALAVER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("PALAVER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3001);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let database_url = env("PALAVER_DATABASE_URL").ok();

        let ai_base_url = env("PALAVER_AI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".into());
        let ai_api_key = env("PALAVER_AI_API_KEY").ok();
        let ai_model = env("PALAVER_AI_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".into());

        let cors_origins = env("PALAVER_CORS_ORIGINS").ok();

        let log_filter = env("PALAVER_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self {
            listen_addr,
            database_url,
            ai_base_url,
            ai_api_key,
            ai_model,
            cors_origins,
            log_filter,
        }
    }
}
