//! Runtime configuration, read from the environment.
//!
//! A `.env` file in the working directory is loaded first (if present) with
//! [`dotenvy`]; real environment variables always win over it.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Placeholder key shipped in sample `.env` files; treated as "no key".
pub const PLACEHOLDER_API_KEY: &str = "your_gemini_api_key_here";

pub const DEFAULT_PORT: u16 = 5002;
pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Deployment environment; controls whether error details reach clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" | "test" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown environment `{other}`")),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("expected `text` or `json`, got `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `info` or `hackforge=debug`.
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// `None` when unset or still the sample placeholder.
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl: Duration,
    pub max_entries: u64,
}

/// Per-IP request budgets, counted over a fixed window.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window: Duration,
    /// `POST /api/generate` requests per window.
    pub generate_max: u32,
    /// `/api/projects` requests per window.
    pub projects_max: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Origin allowed by CORS.
    pub frontend_url: String,
    /// SQLite URL; without one the server runs with no project history.
    pub database_url: Option<String>,
    pub environment: Environment,
    pub llm: LlmConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            frontend_url: DEFAULT_FRONTEND_URL.to_string(),
            database_url: None,
            environment: Environment::Development,
            llm: LlmConfig {
                api_key: None,
                model: DEFAULT_GEMINI_MODEL.to_string(),
                api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            },
            cache: CacheConfig {
                enabled: true,
                ttl: Duration::from_secs(300),
                max_entries: 10_000,
            },
            rate_limit: RateLimitConfig {
                window: Duration::from_secs(15 * 60),
                generate_max: 10,
                projects_max: 100,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Text,
            },
        }
    }
}

impl Config {
    /// Loads `.env` (if any) and then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is the normal production case.
        let _ = dotenvy::dotenv();
        Self::from_vars(std::env::vars())
    }

    /// Builds a config from explicit key/value pairs, falling back to defaults.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
        };

        let defaults = Self::default();

        let environment = match get("APP_ENV").or_else(|| get("NODE_ENV")) {
            Some(value) => parse_with("APP_ENV", value, Environment::from_str)?,
            None => defaults.environment,
        };

        let api_key = get("GEMINI_API_KEY").filter(|key| key != PLACEHOLDER_API_KEY);

        let cache = CacheConfig {
            enabled: match get("CACHE_ENABLED") {
                Some(v) => parse_bool("CACHE_ENABLED", v)?,
                None => defaults.cache.enabled,
            },
            ttl: match get("CACHE_TTL_SECS") {
                Some(v) => Duration::from_secs(parse_number("CACHE_TTL_SECS", v)?),
                None => defaults.cache.ttl,
            },
            max_entries: match get("CACHE_MAX_ENTRIES") {
                Some(v) => parse_number("CACHE_MAX_ENTRIES", v)?,
                None => defaults.cache.max_entries,
            },
        };

        let rate_limit = RateLimitConfig {
            window: match get("RATE_LIMIT_WINDOW_SECS") {
                Some(v) => Duration::from_secs(parse_number("RATE_LIMIT_WINDOW_SECS", v)?),
                None => defaults.rate_limit.window,
            },
            generate_max: match get("RATE_LIMIT_GENERATE_MAX") {
                Some(v) => parse_number("RATE_LIMIT_GENERATE_MAX", v)?,
                None => defaults.rate_limit.generate_max,
            },
            projects_max: match get("RATE_LIMIT_PROJECTS_MAX") {
                Some(v) => parse_number("RATE_LIMIT_PROJECTS_MAX", v)?,
                None => defaults.rate_limit.projects_max,
            },
        };

        let logging = LoggingConfig {
            level: get("LOG_LEVEL").unwrap_or(defaults.logging.level),
            format: match get("LOG_FORMAT") {
                Some(v) => parse_with("LOG_FORMAT", v, LogFormat::from_str)?,
                None => defaults.logging.format,
            },
        };

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: match get("PORT") {
                Some(v) => parse_number("PORT", v)?,
                None => defaults.port,
            },
            frontend_url: get("FRONTEND_URL").unwrap_or(defaults.frontend_url),
            database_url: get("DATABASE_URL"),
            environment,
            llm: LlmConfig {
                api_key,
                model: get("GEMINI_MODEL").unwrap_or(defaults.llm.model),
                api_base: get("GEMINI_API_BASE")
                    .map(|base| base.trim_end_matches('/').to_owned())
                    .unwrap_or(defaults.llm.api_base),
            },
            cache,
            rate_limit,
            logging,
        })
    }

    /// `host:port` string for [`Server::bind`](crate::server::Server::bind).
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_with<T>(
    key: &'static str,
    value: String,
    parse: impl FnOnce(&str) -> Result<T, String>,
) -> Result<T, ConfigError> {
    parse(&value).map_err(|reason| ConfigError::Invalid { key, value, reason })
}

fn parse_number<T>(key: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    parse_with(key, value, |v| v.parse::<T>().map_err(|e| e.to_string()))
}

fn parse_bool(key: &'static str, value: String) -> Result<bool, ConfigError> {
    parse_with(key, value, |v| match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected a boolean, got `{other}`")),
    })
}
