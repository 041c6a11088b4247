// src/config.rs
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::utils::AppError;

// IMPORTANT: EDGAR requires a User-Agent naming the requester; override in config.
const DEFAULT_USER_AGENT: &str = "edgar_ingest/0.1 (set user_agent in config)";
/// Six bound columns per filing row; keeps a batch under SQLite's
/// host-parameter limit.
const MAX_BATCH_SIZE: usize = 5_000;

/// Runtime settings, read from an optional TOML file and then overridden by
/// command-line flags.
///
/// ```toml
/// database_url = "sqlite:edgar.db"
/// start_date = "2021-02-22"
/// end_date = "2021-02-26"
/// rate_limit = 10
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database_url: String,
    /// Root of the daily index tree.
    pub base_url: String,
    /// Root that submission paths in the index are relative to.
    pub archives_url: String,
    /// Host that document links on filing index pages are relative to.
    pub document_host: String,
    pub ticker_feed_url: String,
    pub user_agent: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Outbound requests per second, across all workers.
    pub rate_limit: u32,
    pub batch_size: usize,
    pub worker_pool_size: usize,
    /// Directory for the checkpoint logs and run summary.
    pub state_dir: PathBuf,
    /// Skip dates already in the completion log.
    pub resume: bool,
    /// Refresh the identifier registry from the ticker feed before ingesting.
    pub refresh_tickers: bool,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:edgar.db".to_string(),
            base_url: "https://www.sec.gov/Archives/edgar/daily-index".to_string(),
            archives_url: "https://www.sec.gov/Archives".to_string(),
            document_host: "https://www.sec.gov".to_string(),
            ticker_feed_url: "https://www.sec.gov/include/ticker.txt".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            start_date: None,
            end_date: None,
            rate_limit: 10,
            batch_size: 100,
            worker_pool_size: 8,
            state_dir: PathBuf::from("./state"),
            resume: true,
            refresh_tickers: true,
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(text: &str) -> Result<Self, AppError> {
        toml::from_str(text).map_err(|e| AppError::Config(e.to_string()))
    }

    /// Checks the settings every command relies on.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.rate_limit == 0 {
            return Err(AppError::Config("rate_limit must be at least 1".into()));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(AppError::Config(format!(
                "batch_size must be between 1 and {}",
                MAX_BATCH_SIZE
            )));
        }
        if self.worker_pool_size == 0 {
            return Err(AppError::Config("worker_pool_size must be at least 1".into()));
        }
        for (name, url) in [
            ("base_url", &self.base_url),
            ("archives_url", &self.archives_url),
            ("document_host", &self.document_host),
            ("ticker_feed_url", &self.ticker_feed_url),
        ] {
            reqwest::Url::parse(url).map_err(|e| AppError::Config(format!("{} '{}': {}", name, url, e)))?;
        }
        if self.user_agent.trim().is_empty() {
            return Err(AppError::Config("user_agent must not be empty".into()));
        }
        Ok(())
    }

    /// The inclusive date range to ingest.
    pub fn date_range(&self) -> Result<(NaiveDate, NaiveDate), AppError> {
        let start = self
            .start_date
            .ok_or_else(|| AppError::Config("start_date is required".into()))?;
        let end = self.end_date.unwrap_or(start);
        if start > end {
            return Err(AppError::Config(format!(
                "start_date {} is after end_date {}",
                start, end
            )));
        }
        Ok((start, end))
    }

    pub fn rate_limit(&self) -> Result<NonZeroU32, AppError> {
        NonZeroU32::new(self.rate_limit).ok_or_else(|| AppError::Config("rate_limit must be at least 1".into()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
