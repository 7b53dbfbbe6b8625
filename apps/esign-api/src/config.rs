//! Server configuration from environment variables

use esign_core::EngineConfig;

/// Server settings, read once at startup
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub port: u16,
    /// SQLite URL; defaults to a file in the platform data directory
    pub database_url: Option<String>,
    /// Base URL signing links are issued under
    pub signing_base_url: String,
    pub email_from: String,
    /// Without a key, signing emails are logged instead of sent
    pub resend_api_key: Option<String>,
    pub log_json: bool,
    pub engine: EngineConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            database_url: None,
            signing_base_url: "http://localhost:3001".to_string(),
            email_from: "signatures@localhost".to_string(),
            resend_api_key: None,
            log_json: false,
            engine: EngineConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Load from the process environment (after `.env` has been applied)
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            port: non_empty("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            database_url: non_empty("DATABASE_URL"),
            signing_base_url: non_empty("SIGNING_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.signing_base_url),
            email_from: non_empty("EMAIL_FROM").unwrap_or(defaults.email_from),
            resend_api_key: non_empty("RESEND_API_KEY"),
            log_json: non_empty("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
            engine: EngineConfig::from_vars(&var),
        }
    }
}
