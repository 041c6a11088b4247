// src/pipeline/mod.rs
//! Date-driven ingestion: for each date, fetch the daily master index,
//! parse it, resolve every filing's document link, write the results and
//! checkpoint the date.
pub mod resolver;

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::edgar::daily_index::fetch_index;
use crate::edgar::Fetch;
use crate::extractors::parse_master_index;
use crate::storage::{BatchWriter, CheckpointTracker, Database, IdentifierRegistry, WriteStats};
use crate::utils::AppError;

pub use resolver::DetailResolver;

/// Counters for one checkpointed date.
#[derive(Debug, Clone, Default)]
pub struct DateReport {
    pub filings_listed: usize,
    pub lines_skipped: usize,
    pub resolved: usize,
    pub dropped: usize,
    pub writes: WriteStats,
}

/// Terminal state of one date.
#[derive(Debug)]
pub enum DateOutcome {
    /// No index published (weekend, holiday).
    Skipped,
    Checkpointed(DateReport),
    /// Left un-checkpointed so a later run retries it.
    Failed(String),
    /// Stopped mid-date; nothing checkpointed.
    Cancelled,
}

/// Totals for a whole run, also written to the state directory as JSON.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub dates_already_done: usize,
    pub dates_checkpointed: usize,
    pub dates_skipped: usize,
    pub failed_dates: Vec<NaiveDate>,
    pub cancelled: bool,
    pub last_completed: Option<NaiveDate>,
    pub filings_resolved: usize,
    pub filings_dropped: usize,
    pub rows_inserted: u64,
    pub identifiers_backfilled: usize,
}

pub struct Pipeline {
    fetcher: Arc<dyn Fetch>,
    db: Database,
    registry: IdentifierRegistry,
    checkpoints: CheckpointTracker,
    resolver: DetailResolver,
    base_url: String,
    archives_url: String,
    batch_size: usize,
    resume: bool,
}

impl Pipeline {
    pub fn new(config: &Config, fetcher: Arc<dyn Fetch>, db: Database, checkpoints: CheckpointTracker) -> Self {
        Self {
            registry: IdentifierRegistry::new(db.clone(), fetcher.clone(), config.ticker_feed_url.clone()),
            resolver: DetailResolver::new(fetcher.clone(), &config.document_host, config.worker_pool_size),
            fetcher,
            db,
            checkpoints,
            base_url: config.base_url.clone(),
            archives_url: config.archives_url.clone(),
            batch_size: config.batch_size,
            resume: config.resume,
        }
    }

    pub fn checkpoints(&self) -> &CheckpointTracker {
        &self.checkpoints
    }

    /// Loads the registry and, if asked, refreshes it from the ticker feed.
    /// A failed refresh is logged and ingestion continues with the cache.
    pub async fn prepare(&self, refresh_tickers: bool) -> Result<(), AppError> {
        self.registry.load().await?;
        if refresh_tickers {
            if let Err(e) = self.registry.refresh().await {
                tracing::warn!("Ticker feed refresh failed, continuing with cached identifiers: {}", e);
            }
        }
        Ok(())
    }

    /// Processes every pending date in `start..=end`, one at a time.
    pub async fn run(&mut self, start: NaiveDate, end: NaiveDate, cancel: &CancellationToken) -> RunSummary {
        let pending = self.checkpoints.pending_dates(start, end, self.resume);
        let in_range = start.iter_days().take_while(|d| *d <= end).count();

        let mut summary = RunSummary {
            start_date: Some(start),
            end_date: Some(end),
            dates_already_done: in_range - pending.len(),
            ..RunSummary::default()
        };
        if summary.dates_already_done > 0 {
            tracing::info!(
                last_completed = ?self.checkpoints.last_completed(),
                skipped = summary.dates_already_done,
                "Resuming: dates already in the completion log are skipped"
            );
        }

        for date in pending {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            match self.process_date(date, cancel).await {
                DateOutcome::Skipped => summary.dates_skipped += 1,
                DateOutcome::Checkpointed(report) => {
                    summary.dates_checkpointed += 1;
                    summary.filings_resolved += report.resolved;
                    summary.filings_dropped += report.dropped;
                    summary.rows_inserted += report.writes.rows_inserted;
                    summary.identifiers_backfilled += report.writes.identifiers_backfilled;
                }
                DateOutcome::Failed(reason) => {
                    tracing::error!(%date, "Date failed and was not checkpointed: {}", reason);
                    summary.failed_dates.push(date);
                }
                DateOutcome::Cancelled => {
                    tracing::warn!(%date, "Run cancelled; date not checkpointed");
                    summary.cancelled = true;
                    break;
                }
            }
        }

        summary.last_completed = self.checkpoints.last_completed();
        summary
    }

    /// Fetching → Parsing → Resolving → Writing → Checkpointed for one date.
    pub async fn process_date(&mut self, date: NaiveDate, cancel: &CancellationToken) -> DateOutcome {
        let text = match fetch_index(self.fetcher.as_ref(), &self.base_url, date).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                if index_is_final(date) {
                    if let Err(e) = self.checkpoints.record_no_index(date) {
                        tracing::warn!(%date, "Could not record date without index: {}", e);
                    }
                }
                return DateOutcome::Skipped;
            }
            Err(e) => return DateOutcome::Failed(format!("index fetch failed: {}", e)),
        };

        let parsed = parse_master_index(&text, &self.archives_url);
        let mut report = DateReport {
            filings_listed: parsed.stubs.len(),
            lines_skipped: parsed.skipped.len(),
            ..DateReport::default()
        };
        tracing::info!(%date, filings = report.filings_listed, skipped_lines = report.lines_skipped, "Parsed daily index");

        let outcome = self.resolver.resolve_all(parsed.stubs, cancel).await;
        if outcome.cancelled {
            return DateOutcome::Cancelled;
        }
        report.resolved = outcome.resolved.len();
        report.dropped = outcome.dropped;

        let mut writer = BatchWriter::new(&self.db, &self.registry, &self.checkpoints, date, self.batch_size);
        for filing in outcome.resolved {
            writer.push(filing).await;
        }
        report.writes = writer.finish().await;

        if !report.writes.is_clean() {
            return DateOutcome::Failed(format!(
                "{} of {} batches failed, {} rows lost",
                report.writes.failed_batches, report.writes.batches, report.writes.rows_lost
            ));
        }

        if let Err(e) = self.checkpoints.record_completion(date) {
            return DateOutcome::Failed(format!("checkpoint write failed: {}", e));
        }

        tracing::info!(
            %date,
            resolved = report.resolved,
            dropped = report.dropped,
            inserted = report.writes.rows_inserted,
            duplicates = report.writes.duplicates,
            batches = report.writes.batches,
            backfilled = report.writes.identifiers_backfilled,
            "Date checkpointed"
        );
        DateOutcome::Checkpointed(report)
    }
}

/// EDGAR publishes a day's index in the evening, US Eastern. A date older
/// than yesterday (UTC) that has no index will never get one.
fn index_is_final(date: NaiveDate) -> bool {
    let today = chrono::Utc::now().date_naive();
    today.pred_opt().is_some_and(|yesterday| date < yesterday)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edgar::daily_index::index_url;
    use crate::edgar::testing::StaticFetcher;
    use crate::storage::test_support::scratch_db;

    const BASE: &str = "http://edgar.test/Archives/edgar/daily-index";
    const ARCHIVES: &str = "http://edgar.test/Archives";
    const HOST: &str = "http://edgar.test";
    const FEED: &str = "http://edgar.test/include/ticker.txt";

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 2, day).unwrap()
    }

    fn config(state_dir: &std::path::Path) -> Config {
        Config {
            base_url: BASE.into(),
            archives_url: ARCHIVES.into(),
            document_host: HOST.into(),
            ticker_feed_url: FEED.into(),
            batch_size: 2,
            worker_pool_size: 3,
            state_dir: state_dir.to_path_buf(),
            ..Config::default()
        }
    }

    fn index_for(day: u32, lines: &[(&str, &str, &str)]) -> String {
        let mut text = String::from(
            "Description:           Master Index of EDGAR Dissemination Feed\n\n\
             CIK|Company Name|Form Type|Date Filed|File Name\n\
             --------------------------------------------------------------------------------\n",
        );
        for (cik, form, accession) in lines {
            text.push_str(&format!(
                "{}|Some Co|{}|202102{:02}|edgar/data/{}/{}.txt\n",
                cik, form, day, cik.trim_start_matches('0'), accession
            ));
        }
        text
    }

    fn detail_url(cik: &str, accession: &str) -> String {
        format!("{}/edgar/data/{}/{}-index.html", ARCHIVES, cik.trim_start_matches('0'), accession)
    }

    fn detail_page(doc_path: &str) -> String {
        format!(
            r#"<html><body><table class="tableFile" summary="Document Format Files">
               <tr><th>Seq</th><th>Description</th><th>Document</th><th>Type</th><th>Size</th></tr>
               <tr><td>1</td><td>FORM</td><td><a href="{}">doc</a></td><td>FORM</td><td>1</td></tr>
               </table></body></html>"#,
            doc_path
        )
    }

    #[tokio::test]
    async fn end_to_end_single_day() {
        let (dir, db) = scratch_db().await;
        let accession = "0000320193-21-000010";
        let fetcher = StaticFetcher::new()
            .with_page(FEED, "AAPL\t0000320193\n")
            .with_page(&index_url(BASE, d(22)), &index_for(22, &[("0000320193", "10Q", accession)]))
            .with_page(
                &detail_url("0000320193", accession),
                &detail_page("/Archives/edgar/data/320193/000032019321000010/doc.htm"),
            );
        let config = config(&dir.path().join("state"));
        let checkpoints = CheckpointTracker::open(&config.state_dir).unwrap();
        let mut pipeline = Pipeline::new(&config, Arc::new(fetcher), db.clone(), checkpoints);

        pipeline.prepare(true).await.unwrap();
        let summary = pipeline.run(d(22), d(22), &CancellationToken::new()).await;

        assert_eq!(summary.dates_checkpointed, 1);
        assert_eq!(summary.rows_inserted, 1);
        assert_eq!(summary.identifiers_backfilled, 0);
        assert_eq!(summary.last_completed, Some(d(22)));

        let stored = db.filings_on("2021-02-22").await.unwrap();
        assert_eq!(stored.len(), 1);
        let record = &stored[0];
        assert_eq!(record.form_type, "10Q");
        assert_eq!(record.filing_date, "2021-02-22");
        assert!(record.document_url.ends_with("doc.htm"), "{}", record.document_url);
        assert_eq!(record.cik, "0000320193");
        assert_eq!(record.ticker.as_deref(), Some("AAPL"));

        let entry = pipeline.registry.get("0000320193").await.unwrap();
        assert_eq!(entry.ticker.as_deref(), Some("AAPL"));
    }

    #[tokio::test]
    async fn multi_day_run_skips_weekends_backfills_and_resumes() {
        let (dir, db) = scratch_db().await;
        // 2021-02-19 is a Friday; 20/21 have no index; 22 is a Monday.
        let friday = [("0000000011", "8-K", "0000000011-21-000001"), ("0000000012", "4", "0000000012-21-000001")];
        let monday = [
            ("0000000011", "10-K", "0000000011-21-000002"),
            ("0000000013", "S-1", "0000000013-21-000001"),
            ("0000000014", "D", "0000000014-21-000001"), // detail page missing
        ];
        let mut fetcher = StaticFetcher::new()
            .with_page(FEED, "ELEV\t11\n")
            .with_page(&index_url(BASE, d(19)), &index_for(19, &friday))
            .with_page(&index_url(BASE, d(22)), &index_for(22, &monday));
        for (cik, _, accession) in friday.iter().chain(monday.iter().take(2)) {
            fetcher = fetcher.with_page(
                &detail_url(cik, accession),
                &detail_page(&format!("/Archives/edgar/data/{}/{}.htm", cik, accession)),
            );
        }
        let fetcher = Arc::new(fetcher);
        let config = config(&dir.path().join("state"));

        let checkpoints = CheckpointTracker::open(&config.state_dir).unwrap();
        let mut pipeline = Pipeline::new(&config, fetcher.clone(), db.clone(), checkpoints);
        pipeline.prepare(true).await.unwrap();
        let summary = pipeline.run(d(19), d(22), &CancellationToken::new()).await;

        assert_eq!(summary.dates_checkpointed, 2);
        assert_eq!(summary.dates_skipped, 2);
        assert!(summary.failed_dates.is_empty());
        assert_eq!(summary.filings_resolved, 4);
        assert_eq!(summary.filings_dropped, 1);
        assert_eq!(summary.rows_inserted, 4);
        // 12 and 13 are not in the ticker feed.
        assert_eq!(summary.identifiers_backfilled, 2);
        assert_eq!(db.count_filings().await.unwrap(), 4);
        let missing = std::fs::read_to_string(config.state_dir.join("missing_identifiers.log")).unwrap();
        assert_eq!(missing, "2021-02-19\t0000000012\n2021-02-22\t0000000013\n");

        // A rerun over the same range only looks past the checkpoint; the
        // weekend is remembered as having no index.
        let requests_before = fetcher.requests().len();
        let checkpoints = CheckpointTracker::open(&config.state_dir).unwrap();
        let mut rerun = Pipeline::new(&config, fetcher.clone(), db.clone(), checkpoints);
        rerun.prepare(false).await.unwrap();
        let summary = rerun.run(d(19), d(23), &CancellationToken::new()).await;

        assert_eq!(summary.dates_already_done, 4);
        assert_eq!(summary.last_completed, Some(d(22)));
        assert_eq!(fetcher.requests()[requests_before..].to_vec(), vec![index_url(BASE, d(23))]);
        assert_eq!(db.count_filings().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn index_fetch_failure_leaves_date_unchecked_and_continues() {
        let (dir, db) = scratch_db().await;
        let accession = "0000000021-21-000001";
        let fetcher = StaticFetcher::new()
            .with_broken(&index_url(BASE, d(22)))
            .with_page(&index_url(BASE, d(23)), &index_for(23, &[("0000000021", "8-K", accession)]))
            .with_page(&detail_url("0000000021", accession), &detail_page("/Archives/doc.htm"));
        let config = config(&dir.path().join("state"));
        let checkpoints = CheckpointTracker::open(&config.state_dir).unwrap();
        let mut pipeline = Pipeline::new(&config, Arc::new(fetcher), db, checkpoints);
        pipeline.prepare(false).await.unwrap();

        let summary = pipeline.run(d(22), d(23), &CancellationToken::new()).await;
        assert_eq!(summary.failed_dates, vec![d(22)]);
        assert_eq!(summary.dates_checkpointed, 1);
        assert!(!pipeline.checkpoints().is_completed(d(22)));
        assert!(pipeline.checkpoints().is_completed(d(23)));
        // The failed date stays pending for the next run.
        assert_eq!(pipeline.checkpoints().pending_dates(d(22), d(23), true), vec![d(22)]);
    }

    #[tokio::test]
    async fn cancellation_stops_before_checkpointing() {
        let (dir, db) = scratch_db().await;
        let fetcher = StaticFetcher::new().with_page(
            &index_url(BASE, d(22)),
            &index_for(22, &[("0000000031", "8-K", "0000000031-21-000001")]),
        );
        let config = config(&dir.path().join("state"));
        let checkpoints = CheckpointTracker::open(&config.state_dir).unwrap();
        let mut pipeline = Pipeline::new(&config, Arc::new(fetcher), db.clone(), checkpoints);
        pipeline.prepare(false).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(pipeline.process_date(d(22), &cancel).await, DateOutcome::Cancelled));
        assert!(!pipeline.checkpoints().is_completed(d(22)));
        assert_eq!(db.count_filings().await.unwrap(), 0);

        let summary = pipeline.run(d(22), d(24), &cancel).await;
        assert!(summary.cancelled);
        assert_eq!(summary.dates_checkpointed, 0);
    }

    #[tokio::test]
    async fn cancelling_while_resolving_writes_nothing() {
        let (dir, db) = scratch_db().await;
        let lines: Vec<(String, String)> = (40..50)
            .map(|n| (format!("00000000{}", n), format!("00000000{}-21-000001", n)))
            .collect();
        let entries: Vec<(&str, &str, &str)> = lines.iter().map(|(c, a)| (c.as_str(), "8-K", a.as_str())).collect();
        let mut fetcher = StaticFetcher::new()
            .with_latency(std::time::Duration::from_millis(50))
            .with_page(&index_url(BASE, d(22)), &index_for(22, &entries));
        for (cik, accession) in &lines {
            fetcher = fetcher.with_page(&detail_url(cik, accession), &detail_page("/Archives/doc.htm"));
        }
        let fetcher = Arc::new(fetcher);
        let config = config(&dir.path().join("state"));
        let checkpoints = CheckpointTracker::open(&config.state_dir).unwrap();
        let mut pipeline = Pipeline::new(&config, fetcher.clone(), db.clone(), checkpoints);
        pipeline.prepare(false).await.unwrap();

        // Cancel once the index and the first detail requests are under way.
        let cancel = CancellationToken::new();
        let watcher = {
            let fetcher = fetcher.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                while fetcher.requests().len() < 3 {
                    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                }
                cancel.cancel();
            })
        };

        let outcome = pipeline.process_date(d(22), &cancel).await;
        watcher.await.unwrap();

        assert!(matches!(outcome, DateOutcome::Cancelled));
        assert!(fetcher.requests().len() < 1 + lines.len());
        assert_eq!(fetcher.in_flight(), 0);
        assert_eq!(db.count_filings().await.unwrap(), 0);
        assert!(!pipeline.checkpoints().is_settled(d(22)));
    }

    #[test]
    fn only_past_dates_are_final() {
        let today = chrono::Utc::now().date_naive();
        assert!(index_is_final(d(20)));
        assert!(!index_is_final(today));
        assert!(!index_is_final(today.pred_opt().unwrap()));
    }
}
