use anyhow::{Context, Result, bail};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.brightdata.com";
pub const DEFAULT_ZONE: &str = "serp_api1";
pub const DEFAULT_MAX_PAGES: u32 = 25;
/// Deepest page a query may request. Google stops paginating well before this.
pub const MAX_PAGES_LIMIT: u32 = 100;
pub const DEFAULT_CONCURRENCY: usize = 50;

/// Everything the binary needs, loaded once at startup and passed down.
#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub fetch: FetchSettings,
    pub max_pages: u32,
    pub concurrency: usize,
}

/// Credentials and request shaping for the Bright Data SERP API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_key: String,
    pub zone: String,
    pub base_url: String,
    /// Google `gl` parameter.
    pub country: String,
    /// Google `hl` parameter.
    pub language: String,
    pub request_timeout: Duration,
}

/// Tuning for one page exchange: retry budget, backoff, polling.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchSettings {
    /// Submission attempts, including the first.
    pub max_retries: u32,
    /// Delay before attempt `n + 1` is `backoff_unit * retry_backoff^n`.
    pub retry_backoff: u32,
    pub backoff_unit: Duration,
    pub poll_interval: Duration,
    pub max_polls: u32,
    /// Applied to every submit and every poll.
    pub request_timeout: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        FetchSettings {
            max_retries: 3,
            retry_backoff: 2,
            backoff_unit: Duration::from_secs(1),
            poll_interval: Duration::from_secs(2),
            max_polls: 20,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl FetchSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_polls == 0 {
            bail!("max_polls must be greater than 0");
        }
        if self.retry_backoff == 0 {
            bail!("retry_backoff must be greater than 0");
        }
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        Ok(())
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_unit
            .saturating_mul(self.retry_backoff.saturating_pow(attempt))
    }
}

impl Config {
    /// Reads the process environment, after loading `.env` if there is one.
    pub fn from_env() -> Result<Config> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let request_timeout =
            Duration::from_secs(get_parsed_or(&lookup, "SERP_REQUEST_TIMEOUT_SECS", 30)?);

        let api = ApiConfig {
            api_key: get_required(&lookup, "BRIGHT_DATA_API_KEY")?,
            zone: get_or_default(&lookup, "BRIGHT_DATA_ZONE", DEFAULT_ZONE),
            base_url: get_or_default(&lookup, "BRIGHT_DATA_API_URL", DEFAULT_API_URL),
            country: get_or_default(&lookup, "SERP_COUNTRY", "us"),
            language: get_or_default(&lookup, "SERP_LANGUAGE", "en"),
            request_timeout,
        };

        let fetch = FetchSettings {
            max_retries: get_parsed_or(&lookup, "SERP_MAX_RETRIES", 3)?,
            retry_backoff: get_parsed_or(&lookup, "SERP_RETRY_BACKOFF", 2)?,
            backoff_unit: Duration::from_secs(1),
            poll_interval: Duration::from_secs(get_parsed_or(
                &lookup,
                "SERP_POLL_INTERVAL_SECS",
                2,
            )?),
            max_polls: get_parsed_or(&lookup, "SERP_MAX_POLLS", 20)?,
            request_timeout,
        };
        fetch.validate()?;

        let max_pages = get_parsed_or(&lookup, "SERP_MAX_PAGES", DEFAULT_MAX_PAGES)?;
        if max_pages > MAX_PAGES_LIMIT {
            bail!("SERP_MAX_PAGES must be at most {MAX_PAGES_LIMIT}, got {max_pages}");
        }

        Ok(Config {
            api,
            fetch,
            max_pages,
            concurrency: get_parsed_or(&lookup, "SERP_CONCURRENCY", DEFAULT_CONCURRENCY)?,
        })
    }
}

fn get_required<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => bail!("Missing required environment variable: {key}"),
    }
}

fn get_or_default<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).unwrap_or_else(|| default.to_string())
}

fn get_parsed_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}
