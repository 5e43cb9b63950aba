use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::queue::postgres_queue::DEFAULT_RESERVATION_LEASE;
use crate::queue::RetryPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value `{value}`")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwilioSettings {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendgridSettings {
    pub api_key: String,
    pub from_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub poll_interval: Duration,
    /// A RUNNING step older than this may be reclaimed by another worker.
    pub step_lease: Duration,
    /// A reserved job older than this is handed out again.
    pub reservation_lease: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(750),
            step_lease: Duration::from_secs(300),
            reservation_lease: DEFAULT_RESERVATION_LEASE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub twilio: Option<TwilioSettings>,
    pub sendgrid: Option<SendgridSettings>,
    pub worker: WorkerSettings,
    pub retry: RetryPolicy,
    pub json_logs: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok(); // Load .env file
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        // SMS is enabled by the account SID; the rest is then required.
        let twilio = match get("TWILIO_ACCOUNT_SID") {
            Some(account_sid) => Some(TwilioSettings {
                account_sid,
                auth_token: get("TWILIO_AUTH_TOKEN")
                    .ok_or(ConfigError::Missing("TWILIO_AUTH_TOKEN"))?,
                from_number: get("TWILIO_FROM_NUMBER")
                    .ok_or(ConfigError::Missing("TWILIO_FROM_NUMBER"))?,
            }),
            None => None,
        };

        let sendgrid = match get("SENDGRID_API_KEY") {
            Some(api_key) => Some(SendgridSettings {
                api_key,
                from_email: get("SENDGRID_FROM_EMAIL")
                    .ok_or(ConfigError::Missing("SENDGRID_FROM_EMAIL"))?,
            }),
            None => None,
        };

        let defaults = WorkerSettings::default();
        let concurrency: usize = parse_or(&get, "WORKER_CONCURRENCY", defaults.concurrency)?;
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                name: "WORKER_CONCURRENCY",
                value: "0".into(),
            });
        }
        let worker = WorkerSettings {
            concurrency,
            poll_interval: Duration::from_millis(parse_or(
                &get,
                "WORKER_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )?),
            step_lease: Duration::from_secs(parse_or(
                &get,
                "STEP_LEASE_SECONDS",
                defaults.step_lease.as_secs(),
            )?),
            reservation_lease: Duration::from_secs(parse_or(
                &get,
                "JOB_RESERVATION_LEASE_SECONDS",
                defaults.reservation_lease.as_secs(),
            )?),
        };

        let default_retry = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: parse_or(&get, "JOB_MAX_ATTEMPTS", default_retry.max_attempts)?.max(1),
            initial_backoff: Duration::from_millis(parse_or(
                &get,
                "JOB_INITIAL_BACKOFF_MS",
                default_retry.initial_backoff.as_millis() as u64,
            )?),
        };

        let json_logs = get("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(Config {
            database_url,
            twilio,
            sendgrid,
            worker,
            retry,
            json_logs,
        })
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            value: raw,
        }),
        None => Ok(default),
    }
}
