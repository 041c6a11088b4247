// src/edgar/daily_index.rs
use chrono::{Datelike, NaiveDate};

use crate::edgar::client::Fetch;
use crate::utils::error::EdgarError;

/// Calendar quarter (1-4) that EDGAR files a month's daily indices under.
pub fn quarter(month: u32) -> u32 {
    debug_assert!((1..=12).contains(&month));
    (month + 2) / 3
}

/// Builds `{base}/{year}/QTR{n}/master.{YYYYMMDD}.idx`.
pub fn index_url(base_url: &str, date: NaiveDate) -> String {
    format!(
        "{}/{}/QTR{}/master.{}.idx",
        base_url.trim_end_matches('/'),
        date.year(),
        quarter(date.month()),
        date.format("%Y%m%d")
    )
}

/// Downloads the master index for `date`.
///
/// Returns `Ok(None)` when EDGAR answers with a non-success status, which is
/// what weekends and market holidays look like. Network failures are errors:
/// the caller leaves the date un-checkpointed so a later run retries it.
pub async fn fetch_index(
    fetcher: &dyn Fetch,
    base_url: &str,
    date: NaiveDate,
) -> Result<Option<String>, EdgarError> {
    let url = index_url(base_url, date);
    tracing::info!(%date, "Fetching daily index {}", url);

    match fetcher.get_text(&url).await {
        Ok(body) => Ok(Some(body)),
        Err(EdgarError::Http { status, .. }) => {
            tracing::info!(%date, %status, "No daily index published, skipping date");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
