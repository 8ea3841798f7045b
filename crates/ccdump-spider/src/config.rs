//! The JSON job file.
//!
//! ```json
//! {
//!     "frequency": 5,
//!     "max_rounds": null,
//!     "jobs": [
//!         {
//!             "name": "tickers",
//!             "request": "ticker",
//!             "exchanges": ["binance", "kraken"],
//!             "currency_pairs": [{ "first": "btc", "second": "usdt" }],
//!             "first_currencies": ["eth"],
//!             "second_currencies": [],
//!             "update_cp": false,
//!             "overrides": { "kraken": { "currency_pairs": [{ "first": "xbt", "second": "usd" }] } }
//!         }
//!     ]
//! }
//! ```
//!
//! `frequency` is in minutes. An exchange listed in `overrides` uses that selection instead of
//! the job's own.

use crate::exchange::{self, Exchange};
use crate::job::{Job, JobExchange};
use crate::model::{PairSelection, RequestKind};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read the configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse the configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("job `{job}`: unknown request `{request}`")]
    UnknownRequest { job: String, request: String },

    #[error("job `{job}`: unknown exchange `{exchange}`")]
    UnknownExchange { job: String, exchange: String },

    #[error("job `{job}` names no exchanges")]
    NoExchanges { job: String },

    #[error("frequency must be a positive number of minutes, got {0}")]
    InvalidFrequency(f64),

    #[error("the configuration contains no jobs")]
    NoJobs,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    frequency: f64,
    #[serde(default)]
    max_rounds: Option<usize>,
    #[serde(default)]
    jobs: Vec<RawJob>,
}

#[derive(Debug, Deserialize)]
struct RawJob {
    name: String,
    request: String,
    #[serde(default)]
    exchanges: Vec<String>,
    #[serde(flatten)]
    selection: PairSelection,
    #[serde(default)]
    update_cp: bool,
    #[serde(default)]
    overrides: HashMap<String, PairSelection>,
}

/// A loaded and checked job file.
#[derive(Debug)]
pub struct Config {
    pub frequency: Duration,
    pub max_rounds: Option<usize>,
    pub jobs: Vec<Job>,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("loading job file {}", path.display());
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    /// Parse a job file, resolving exchange names through [`exchange::registry`].
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Self::from_json_with(json, exchange::registry)
    }

    /// Parse a job file, resolving exchange names through `resolve`.
    pub fn from_json_with<F>(json: &str, resolve: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<Arc<dyn Exchange>>,
    {
        let raw: RawConfig = serde_json::from_str(json)?;

        if !raw.frequency.is_finite() || raw.frequency <= 0.0 {
            return Err(ConfigError::InvalidFrequency(raw.frequency));
        }
        let frequency = Duration::try_from_secs_f64(raw.frequency * 60.0)
            .map_err(|_| ConfigError::InvalidFrequency(raw.frequency))?;

        if raw.jobs.is_empty() {
            return Err(ConfigError::NoJobs);
        }

        let jobs = raw
            .jobs
            .into_iter()
            .map(|job| build_job(job, &resolve))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            frequency,
            max_rounds: raw.max_rounds,
            jobs,
        })
    }
}

fn build_job<F>(raw: RawJob, resolve: &F) -> Result<Job, ConfigError>
where
    F: Fn(&str) -> Option<Arc<dyn Exchange>>,
{
    let request: RequestKind = raw
        .request
        .parse()
        .map_err(|request| ConfigError::UnknownRequest {
            job: raw.name.clone(),
            request,
        })?;

    if raw.exchanges.is_empty() {
        return Err(ConfigError::NoExchanges { job: raw.name });
    }

    let mut overrides: HashMap<String, PairSelection> = raw
        .overrides
        .into_iter()
        .map(|(name, selection)| (name.trim().to_uppercase(), selection))
        .collect();

    let mut exchanges = Vec::with_capacity(raw.exchanges.len());
    for name in &raw.exchanges {
        let exchange = resolve(name).ok_or_else(|| ConfigError::UnknownExchange {
            job: raw.name.clone(),
            exchange: name.clone(),
        })?;
        let selection = overrides
            .remove(&exchange.name().to_uppercase())
            .unwrap_or_else(|| raw.selection.clone());
        exchanges.push(JobExchange {
            exchange,
            selection,
            update_cp: raw.update_cp,
        });
    }

    for name in overrides.keys() {
        warn!("job `{}`: override for {name}, which the job does not use", raw.name);
    }

    Ok(Job {
        name: raw.name,
        request,
        exchanges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_is_given_in_minutes() {
        let config = Config::from_json(
            r#"{ "frequency": 0.5, "jobs": [
                { "name": "t", "request": "ticker", "exchanges": ["binance"] }
            ] }"#,
        )
        .unwrap();
        assert_eq!(config.frequency, Duration::from_secs(30));
        assert_eq!(config.max_rounds, None);
    }

    #[test]
    fn overrides_replace_the_job_selection() {
        let config = Config::from_json(
            r#"{ "frequency": 1, "max_rounds": 1, "jobs": [
                { "name": "t", "request": "ticker", "exchanges": ["binance", "Kraken"],
                  "first_currencies": ["btc"],
                  "overrides": { "kraken": { "first_currencies": ["xbt"] } } }
            ] }"#,
        )
        .unwrap();

        let exchanges = &config.jobs[0].exchanges;
        assert_eq!(exchanges[0].selection.first_currencies, vec!["btc".to_string()]);
        assert_eq!(exchanges[1].selection.first_currencies, vec!["xbt".to_string()]);
    }
}
