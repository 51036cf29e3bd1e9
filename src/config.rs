use std::env::var;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;

pub struct Config {
    pub port: u16,
    pub scheme: String,
    pub host: String,
    pub database_url: String,
    /// Shared bearer secret for every API endpoint except /health.
    pub api_secret: String,
    /// Base64 AES-256 key for sender SMTP credentials. Startup fails when
    /// it is absent or the wrong length.
    pub credentials_key: String,
    /// Directory scanned for dropped event files; None disables the
    /// fallback ingestion path.
    pub event_drop_dir: Option<PathBuf>,
    /// IANA zone used when neither the contact nor the sequence has one.
    pub fallback_timezone: Option<String>,
    pub worker_batch_limit: u32,
    pub worker_active_delay: Duration,
    pub worker_idle_delay: Duration,
    pub max_attempts: i32,
    pub retry_cooldown: Duration,
    pub breaker_threshold: u32,
    pub breaker_reset: Duration,
}

impl Config {
    pub fn try_parse() -> Result<Config, String> {
        let _ = dotenv();

        Ok(Config {
            port: optional("PORT", 8080)?,
            scheme: var("SCHEME").unwrap_or_else(|_| "http".to_string()),
            host: var("HOST").unwrap_or_else(|_| "localhost".to_string()),
            database_url: required("DATABASE_URL")?,
            api_secret: required("API_SECRET")?,
            credentials_key: required("CREDENTIALS_KEY")?,
            event_drop_dir: var("EVENT_DROP_DIR").ok().map(PathBuf::from),
            fallback_timezone: var("FALLBACK_TIMEZONE").ok(),
            worker_batch_limit: optional("WORKER_BATCH_LIMIT", 50)?,
            worker_active_delay: Duration::from_secs(optional("WORKER_ACTIVE_DELAY_SECS", 5)?),
            worker_idle_delay: Duration::from_secs(optional("WORKER_IDLE_DELAY_SECS", 30)?),
            max_attempts: optional("MAX_ATTEMPTS", 5)?,
            retry_cooldown: Duration::from_secs(optional("RETRY_COOLDOWN_SECS", 15 * 60)?),
            breaker_threshold: optional("BREAKER_THRESHOLD", 5)?,
            breaker_reset: Duration::from_secs(optional("BREAKER_RESET_SECS", 5 * 60)?),
        })
    }
}

fn required(name: &str) -> Result<String, String> {
    var(name).map_err(|_| format!("An error occured while getting {name} env param"))
}

fn optional<T: FromStr>(name: &str, default: T) -> Result<T, String> {
    match var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| format!("An error occured while parsing {name} env param")),
        Err(_) => Ok(default),
    }
}
