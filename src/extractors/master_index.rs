// src/extractors/master_index.rs
//! Parser for EDGAR daily `master.YYYYMMDD.idx` files.
//!
//! The file starts with a free-form banner and a `CIK|Company Name|Form Type|
//! Date Filed|File Name` header, followed by one pipe-delimited line per
//! filing. Only lines naming a `.txt` full submission are data lines.

use chrono::NaiveDate;

use crate::edgar::models::{normalize_cik, FilingStub};
use crate::utils::error::ParseError;

const SUBMISSION_SUFFIX: &str = ".txt";
const INDEX_PAGE_SUFFIX: &str = "-index.html";
const FIELD_COUNT: usize = 5;

/// Result of parsing one index document.
#[derive(Debug, Default)]
pub struct ParsedIndex {
    /// Data lines in file order.
    pub stubs: Vec<FilingStub>,
    /// Candidate lines that were dropped, with the reason.
    pub skipped: Vec<ParseError>,
}

/// Turns `edgar/data/320193/0000320193-21-000010.txt` into the filing's
/// human-readable index page under `archives_url`.
pub fn index_page_url(archives_url: &str, submission_path: &str) -> String {
    let path = submission_path.trim().trim_start_matches('/');
    let stem = path.strip_suffix(SUBMISSION_SUFFIX).unwrap_or(path);
    format!("{}/{}{}", archives_url.trim_end_matches('/'), stem, INDEX_PAGE_SUFFIX)
}

pub fn parse_master_index(text: &str, archives_url: &str) -> ParsedIndex {
    let mut parsed = ParsedIndex::default();

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        if !line.contains(SUBMISSION_SUFFIX) {
            continue; // banner, header, separator
        }

        match parse_line(line, line_no, archives_url) {
            Ok(Some(stub)) => parsed.stubs.push(stub),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Skipping malformed index line: {}", e);
                parsed.skipped.push(e);
            }
        }
    }

    tracing::debug!(
        filings = parsed.stubs.len(),
        skipped = parsed.skipped.len(),
        "Parsed master index"
    );
    parsed
}

fn parse_line(line: &str, line_no: usize, archives_url: &str) -> Result<Option<FilingStub>, ParseError> {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() != FIELD_COUNT {
        return Err(ParseError::FieldCount { line: line_no, found: fields.len() });
    }

    let path = fields[4].trim();
    if !path.ends_with(SUBMISSION_SUFFIX) {
        // ".txt" appeared somewhere else on the line, e.g. in a company name.
        return Ok(None);
    }

    let raw_date = fields[3].trim();
    let filing_date = NaiveDate::parse_from_str(raw_date, "%Y%m%d").map_err(|_| ParseError::InvalidDate {
        line: line_no,
        raw: raw_date.to_string(),
    })?;

    Ok(Some(FilingStub {
        cik: normalize_cik(fields[0])?,
        form_type: fields[2].trim().to_string(),
        filing_date,
        index_page_url: index_page_url(archives_url, path),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARCHIVES: &str = "https://www.sec.gov/Archives";

    const HEADER: &str = "Description:           Daily Index of EDGAR Dissemination Feed by Company Name
Last Data Received:    February 22, 2021
Comments:              webmaster@sec.gov
Anonymous FTP:         ftp://ftp.sec.gov/edgar/

CIK|Company Name|Form Type|Date Filed|File Name
--------------------------------------------------------------------------------
";

    #[test]
    fn parses_data_lines_and_builds_index_page_urls() {
        let text = format!(
            "{}320193|Apple Inc.|10Q|20210222|edgar/data/320193/0000320193-21-000010.txt\n\
             789019|MICROSOFT CORP|8-K|20210222|edgar/data/789019/0001193125-21-050000.txt\n",
            HEADER
        );
        let parsed = parse_master_index(&text, ARCHIVES);

        assert!(parsed.skipped.is_empty());
        assert_eq!(parsed.stubs.len(), 2);
        let apple = &parsed.stubs[0];
        assert_eq!(apple.cik, "0000320193");
        assert_eq!(apple.form_type, "10Q");
        assert_eq!(apple.filing_date, NaiveDate::from_ymd_opt(2021, 2, 22).unwrap());
        assert_eq!(
            apple.index_page_url,
            "https://www.sec.gov/Archives/edgar/data/320193/0000320193-21-000010-index.html"
        );
        assert_eq!(parsed.stubs[1].cik, "0000789019");
    }

    #[test]
    fn n_good_and_m_malformed_lines_yield_exactly_n_stubs() {
        let good = [
            "1000045|NICHOLAS FINANCIAL INC|10-Q|20210222|edgar/data/1000045/0001564590-21-007000.txt",
            "1000097|KINGDON CAPITAL|SC 13G/A|20210222|edgar/data/1000097/0001000097-21-000002.txt",
            "1000177|NORDIC AMERICAN TANKERS|6-K|20210222|edgar/data/1000177/0001178913-21-000500.txt",
        ];
        let malformed = [
            "1000045|MISSING FIELDS|20210222|edgar/data/1000045/x.txt",
            "1000045|TOO|MANY|FIELDS|20210222|edgar/data/1000045/y.txt",
            "1000045|BAD DATE|10-K|2021-02-22|edgar/data/1000045/z.txt",
            "ABC|BAD CIK|10-K|20210222|edgar/data/abc/w.txt",
        ];

        let mut text = String::from(HEADER);
        for (i, line) in good.iter().enumerate() {
            text.push_str(line);
            text.push('\n');
            if let Some(bad) = malformed.get(i) {
                text.push_str(bad);
                text.push('\n');
            }
        }
        text.push_str(malformed[3]);
        text.push('\n');

        let parsed = parse_master_index(&text, ARCHIVES);
        assert_eq!(parsed.stubs.len(), good.len());
        assert_eq!(parsed.skipped.len(), malformed.len());
        assert!(parsed.stubs.iter().all(|s| !s.index_page_url.contains("/x-") && !s.index_page_url.contains("/w-")));
        // Order follows the file.
        let ciks: Vec<_> = parsed.stubs.iter().map(|s| s.cik.as_str()).collect();
        assert_eq!(ciks, vec!["0001000045", "0001000097", "0001000177"]);
    }

    #[test]
    fn txt_outside_the_file_name_column_is_not_a_data_line() {
        let text = "123|README.TXT HOLDINGS .txt|10-K|20210222|edgar/data/123/0000000123-21-000001.htm\n";
        let parsed = parse_master_index(text, ARCHIVES);
        assert!(parsed.stubs.is_empty());
        assert!(parsed.skipped.is_empty());
    }

    #[test]
    fn reports_line_numbers_for_malformed_lines() {
        let text = "header\n1|A|10-K|20210230|edgar/data/1/a.txt\n";
        let parsed = parse_master_index(text, ARCHIVES);
        assert_eq!(
            parsed.skipped,
            vec![ParseError::InvalidDate { line: 2, raw: "20210230".into() }]
        );
    }

    #[test]
    fn index_page_url_tolerates_slashes() {
        assert_eq!(
            index_page_url("http://a/Archives/", "/edgar/data/1/0000000001-21-000001.txt"),
            "http://a/Archives/edgar/data/1/0000000001-21-000001-index.html"
        );
    }
}
