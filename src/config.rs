// Runtime configuration from the environment (and an optional .env file)

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};

use crate::sync::SyncOptions;

pub const DEFAULT_DATABASE_PATH: &str = "data/ledger.db";
pub const DEFAULT_MIRROR_DIR: &str = "data/mirror";
pub const DEFAULT_BANK_API_URL: &str = "https://api.monobank.ua";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueBackend {
    /// In-process push delivery to this server's own processor
    Local,
    PubSub {
        api_url: String,
        access_token: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub mirror_dir: PathBuf,
    pub bank_api_url: String,
    pub bank_api_token: Option<String>,
    pub bank_name: String,
    pub queue: QueueBackend,
    pub queue_topic: String,
    pub subscription: String,
    pub listen_addr: String,
    pub sync: SyncOptions,
    pub sync_interval: Option<Duration>,
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let defaults = SyncOptions::default();
        let sync = SyncOptions {
            overlap: chrono::Duration::milliseconds(parse_or(
                &get,
                "SYNC_OVERLAP_MS",
                defaults.overlap.num_milliseconds(),
            )?),
            account_delay: Duration::from_millis(parse_or(
                &get,
                "SYNC_ACCOUNT_DELAY_MS",
                defaults.account_delay.as_millis() as u64,
            )?),
            max_retries: parse_or(&get, "SYNC_MAX_RETRIES", defaults.max_retries)?,
            initial_backoff: Duration::from_millis(parse_or(
                &get,
                "SYNC_INITIAL_BACKOFF_MS",
                defaults.initial_backoff.as_millis() as u64,
            )?),
            lookback_days: parse_or(&get, "SYNC_LOOKBACK_DAYS", defaults.lookback_days)?,
            start_date: get("SYNC_START_DATE")
                .map(|v| parse_start_date(&v))
                .transpose()?,
        };

        let topic = get("PUBSUB_TOPIC").unwrap_or_else(|| "bank-webhooks".to_string());
        let queue = match get("QUEUE_BACKEND").as_deref().unwrap_or("local") {
            "local" => QueueBackend::Local,
            "pubsub" => QueueBackend::PubSub {
                api_url: get("PUBSUB_API_URL")
                    .unwrap_or_else(|| crate::queue::pubsub::DEFAULT_PUBSUB_URL.to_string()),
                access_token: get("PUBSUB_ACCESS_TOKEN"),
            },
            other => bail!("QUEUE_BACKEND must be 'local' or 'pubsub', got '{}'", other),
        };

        let sync_interval = get("SYNC_INTERVAL_SECS")
            .map(|v| {
                v.parse::<u64>()
                    .map(Duration::from_secs)
                    .with_context(|| format!("SYNC_INTERVAL_SECS is not a number: {}", v))
            })
            .transpose()?;

        Ok(Config {
            database_path: get("DATABASE_PATH")
                .unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string())
                .into(),
            mirror_dir: get("MIRROR_DIR")
                .unwrap_or_else(|| DEFAULT_MIRROR_DIR.to_string())
                .into(),
            bank_api_url: get("BANK_API_URL").unwrap_or_else(|| DEFAULT_BANK_API_URL.to_string()),
            bank_api_token: get("BANK_API_TOKEN"),
            bank_name: get("BANK_NAME").unwrap_or_else(|| "monobank".to_string()),
            queue,
            queue_topic: topic,
            subscription: get("PUBSUB_SUBSCRIPTION").unwrap_or_else(|| "local-push".to_string()),
            listen_addr: get("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            sync,
            sync_interval,
        })
    }

    /// The bank token, required by anything that talks to the bank.
    pub fn require_bank_token(&self) -> Result<&str> {
        self.bank_api_token
            .as_deref()
            .context("BANK_API_TOKEN is not set")
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        None => Ok(default),
    }
}

fn parse_start_date(raw: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .with_context(|| format!("SYNC_START_DATE must be YYYY-MM-DD, got {}", raw))?;
    match date.and_hms_opt(0, 0, 0) {
        Some(midnight) => Ok(midnight.and_utc()),
        None => bail!("SYNC_START_DATE out of range: {}", raw),
    }
}
