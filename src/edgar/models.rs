// src/edgar/models.rs
use chrono::NaiveDate;

use crate::utils::error::ParseError;

/// Ticker recorded for identifiers that appear in filings but not in the
/// ticker feed.
pub const UNKNOWN_TICKER: &str = "n/a";

/// One data line of a daily master index, before its detail page is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilingStub {
    pub cik: String,
    pub form_type: String,
    pub filing_date: NaiveDate,
    pub index_page_url: String,
}

/// A stub whose detail page yielded a primary document link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFiling {
    pub cik: String,
    pub form_type: String,
    pub filing_date: NaiveDate,
    pub index_page_url: String,
    pub document_url: String,
}

impl ResolvedFiling {
    pub fn from_stub(stub: FilingStub, document_url: String) -> Self {
        Self {
            cik: stub.cik,
            form_type: stub.form_type,
            filing_date: stub.filing_date,
            index_page_url: stub.index_page_url,
            document_url,
        }
    }

    /// Filing date in the `YYYY-MM-DD` form stored in the database.
    pub fn date_string(&self) -> String {
        self.filing_date.format("%Y-%m-%d").to_string()
    }
}

/// A `ticker\tcik` pair from the bulk ticker feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerPair {
    pub ticker: String,
    pub cik: String,
}

/// Normalizes a CIK to the 10-digit zero-padded form EDGAR uses in URLs
/// and submissions JSON. The daily index and ticker feed both drop the padding.
pub fn normalize_cik(raw: &str) -> Result<String, ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > 10 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidIdentifier(raw.to_string()));
    }
    Ok(format!("{:0>10}", trimmed))
}

/// Parses the tab-delimited ticker feed. Blank and malformed lines are skipped.
pub fn parse_ticker_feed(text: &str) -> Vec<TickerPair> {
    let mut pairs = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((ticker, cik)) = line.split_once('\t') else {
            tracing::warn!(line = idx + 1, "Skipping ticker feed line without a tab: '{}'", line);
            continue;
        };
        let ticker = ticker.trim();
        match normalize_cik(cik) {
            Ok(cik) if !ticker.is_empty() => pairs.push(TickerPair {
                ticker: ticker.to_uppercase(),
                cik,
            }),
            Ok(_) => tracing::warn!(line = idx + 1, "Skipping ticker feed line with empty ticker"),
            Err(e) => tracing::warn!(line = idx + 1, "Skipping ticker feed line: {}", e),
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_cik_pads_and_rejects_garbage() {
        assert_eq!(normalize_cik("320193").unwrap(), "0000320193");
        assert_eq!(normalize_cik(" 0000320193 ").unwrap(), "0000320193");
        assert!(normalize_cik("").is_err());
        assert!(normalize_cik("12a4").is_err());
        assert!(normalize_cik("12345678901").is_err());
    }

    #[test]
    fn ticker_feed_is_uppercased_and_tolerates_bad_lines() {
        let feed = "aapl\t320193\n\nbroken line\nmsft\t789019\n\t123\nxyz\tabc\n";
        let pairs = parse_ticker_feed(feed);
        assert_eq!(
            pairs,
            vec![
                TickerPair { ticker: "AAPL".into(), cik: "0000320193".into() },
                TickerPair { ticker: "MSFT".into(), cik: "0000789019".into() },
            ]
        );
    }
}
