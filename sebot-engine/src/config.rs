use std::env::var;
use std::time::Duration;

use dotenvy::dotenv;

/// Application configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Discord API Token
    /// Env: DISCORD_TOKEN (optional here, the binary refuses to start without it)
    pub discord_token: Option<String>,

    /// Config store file path
    /// Env: DATABASE_PATH (default: "sebot.db")
    pub database_path: String,

    /// Status surface port
    /// Env: PORT (default: 3000)
    pub port: u16,

    /// Time between two poller ticks
    /// Env: POLL_INTERVAL_SECS (default: 5)
    pub poll_interval: Duration,

    /// Delay after a poller tick failed unexpectedly
    /// Env: POLL_BACKOFF_SECS (default: 30)
    pub poll_backoff: Duration,

    /// Time between two presence refreshes
    /// Env: STATUS_INTERVAL_SECS (default: 60)
    pub status_interval: Duration,

    /// How long shutdown waits for each background loop
    /// Env: SHUTDOWN_TIMEOUT_SECS (default: 5)
    pub shutdown_timeout: Duration,

    /// URL of the query gateway, `{host}` and `{port}` are substituted
    /// Env: QUERY_URL_TEMPLATE (default: "http://{host}:{port}/query")
    pub query_url_template: String,

    /// Timeout of a single gateway request
    /// Env: QUERY_TIMEOUT_SECS (default: 5)
    pub query_timeout: Duration,

    /// Status surface request timeout
    /// Env: REQUEST_TIMEOUT_SECS (default: 30)
    pub request_timeout: Duration,

    /// JSON file overriding the built-in strings
    /// Env: TRANSLATIONS_PATH (optional)
    pub translations_path: Option<String>,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv(); //for debugging mostly
        Self {
            discord_token: var("DISCORD_TOKEN").ok(),
            database_path: env_or_default_string("DATABASE_PATH", "sebot.db"),
            port: env_or_default("PORT", 3000),
            poll_interval: interval_secs(env_or_default("POLL_INTERVAL_SECS", 5)),
            poll_backoff: interval_secs(env_or_default("POLL_BACKOFF_SECS", 30)),
            status_interval: interval_secs(env_or_default("STATUS_INTERVAL_SECS", 60)),
            shutdown_timeout: Duration::from_secs(env_or_default("SHUTDOWN_TIMEOUT_SECS", 5)),
            query_url_template: env_or_default_string(
                "QUERY_URL_TEMPLATE",
                "http://{host}:{port}/query",
            ),
            query_timeout: Duration::from_secs(env_or_default("QUERY_TIMEOUT_SECS", 5)),
            request_timeout: Duration::from_secs(env_or_default("REQUEST_TIMEOUT_SECS", 30)),
            translations_path: var("TRANSLATIONS_PATH").ok(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: None,
            database_path: "sebot.db".to_string(),
            port: 3000,
            poll_interval: Duration::from_secs(5),
            poll_backoff: Duration::from_secs(30),
            status_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(5),
            query_url_template: "http://{host}:{port}/query".to_string(),
            query_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            translations_path: None,
        }
    }
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Loop interval of `secs`, never shorter than one second.
fn interval_secs(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}
