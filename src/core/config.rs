//! Runtime settings, read from the environment (and `.env`) once at startup.

use di::{inject, injectable};
use log::warn;
use std::sync::OnceLock;
use std::time::Duration;

const DEV_JWT_SECRET: &str = "prometeo-development-secret";

/// Upper bound for `SESSION_TTL_HOURS`: one year.
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 365;

/// Settings shared by every collaborator.
///
/// Every field has a default so the server runs without any environment set.
#[derive(Debug, Clone)]
pub struct Settings {
    /// TCP address to bind.
    pub bind_address: String,
    /// sqlx SQLite URL.
    pub database_url: String,
    /// Origins allowed by CORS.
    pub allowed_origins: Vec<String>,
    /// Base URL of the Ollama-compatible generator.
    pub ollama_url: String,
    /// Model identifier sent with every generation request.
    pub model_name: String,
    /// Primary (live) quote source.
    pub quote_api_url: String,
    pub quote_api_key: Option<String>,
    /// Historical fallback quote source.
    pub fallback_quote_url: String,
    /// Timeout applied to quote lookups and to connecting to the generator.
    pub http_timeout: Duration,
    /// Longest silence tolerated from the generator, per response and per streamed chunk.
    pub generation_timeout: Duration,
    /// HS256 key used to sign session tokens.
    pub jwt_secret: String,
    /// Session lifetime, within `1..=MAX_SESSION_TTL_HOURS`.
    pub session_ttl_hours: i64,
    /// Language the generator is asked to answer in.
    pub response_language: String,
}

#[injectable]
impl Settings {
    #[inject]
    pub fn create() -> Settings {
        Settings::from_env()
    }
}

impl Settings {
    pub fn from_env() -> Settings {
        dotenvy::dotenv().ok();

        Settings {
            bind_address: env_or("BIND_ADDRESS", "0.0.0.0:8000"),
            database_url: env_or("DATABASE_URL", "sqlite://prometeo.db?mode=rwc"),
            allowed_origins: env_or("ALLOWED_ORIGINS", "http://localhost:8001")
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_owned)
                .collect(),
            ollama_url: env_or("OLLAMA_URL", "http://localhost:11434"),
            model_name: env_or("MODEL_NAME", "prometheus"),
            quote_api_url: env_or("QUOTE_API_URL", "https://api.api-ninjas.com/v1/stockprice"),
            quote_api_key: std::env::var("QUOTE_API_KEY").ok(),
            fallback_quote_url: env_or(
                "FALLBACK_QUOTE_URL",
                "https://query1.finance.yahoo.com/v8/finance/chart",
            ),
            http_timeout: Duration::from_secs(parse_env("HTTP_TIMEOUT_SECS", 5)),
            generation_timeout: Duration::from_secs(parse_env("GENERATION_TIMEOUT_SECS", 120)),
            jwt_secret: jwt_secret_from_env().to_owned(),
            session_ttl_hours: session_ttl(parse_env("SESSION_TTL_HOURS", 24)),
            response_language: env_or("RESPONSE_LANGUAGE", "español"),
        }
    }
}

/// Signing key for session tokens, read once per process.
///
/// Shared by [`Settings`] and the request extractor, which has no access to the
/// service provider.
pub fn jwt_secret_from_env() -> &'static str {
    static SECRET: OnceLock<String> = OnceLock::new();

    SECRET.get_or_init(|| match std::env::var("JWT_SECRET") {
        Ok(secret) if !secret.is_empty() => secret,
        _ => {
            warn!("JWT_SECRET is not set, using the development secret");
            DEV_JWT_SECRET.to_owned()
        }
    })
}

fn session_ttl(hours: i64) -> i64 {
    let clamped = hours.clamp(1, MAX_SESSION_TTL_HOURS);
    if clamped != hours {
        warn!("SESSION_TTL_HOURS={hours} is out of range, using {clamped}");
    }
    clamped
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwt_secret_is_read_once() {
        let first = jwt_secret_from_env();
        let second = jwt_secret_from_env();

        assert!(!first.is_empty());
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn test_session_ttl_is_clamped() {
        assert_eq!(session_ttl(24), 24);
        assert_eq!(session_ttl(0), 1);
        assert_eq!(session_ttl(-5), 1);
        assert_eq!(session_ttl(i64::MAX), MAX_SESSION_TTL_HOURS);
    }
}
