// src/storage/checkpoint.rs
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;

use crate::utils::error::StorageError;

const COMPLETED_LOG: &str = "completed_dates.log";
const NO_INDEX_LOG: &str = "no_index_dates.log";
const MISSING_LOG: &str = "missing_identifiers.log";
const RUN_SUMMARY: &str = "last_run.json";

/// Append-only progress logs kept next to the database.
///
/// `completed_dates.log` holds one `YYYY-MM-DD` per fully ingested date; the
/// greatest entry is the checkpoint. `no_index_dates.log` holds dates EDGAR
/// never published an index for (weekends, holidays). `missing_identifiers.log`
/// lists `date<TAB>cik` for identifiers that had to be backfilled.
pub struct CheckpointTracker {
    dir: PathBuf,
    completed: BTreeSet<NaiveDate>,
    no_index: BTreeSet<NaiveDate>,
}

impl CheckpointTracker {
    /// Opens the state directory, reading the date logs once.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }

        let completed = read_date_log(&dir.join(COMPLETED_LOG))?;
        let no_index = read_date_log(&dir.join(NO_INDEX_LOG))?;

        if let Some(last) = completed.last() {
            tracing::info!(
                last_completed = %last,
                dates = completed.len(),
                no_index = no_index.len(),
                "Loaded checkpoint"
            );
        }
        Ok(Self { dir, completed, no_index })
    }

    /// Marks `date` as fully ingested. Call only once its writes are durable.
    pub fn record_completion(&mut self, date: NaiveDate) -> Result<(), StorageError> {
        self.append(COMPLETED_LOG, &format!("{}\n", date.format("%Y-%m-%d")))?;
        self.completed.insert(date);
        Ok(())
    }

    /// Marks `date` as having no published index, so resumed runs do not ask
    /// for it again.
    pub fn record_no_index(&mut self, date: NaiveDate) -> Result<(), StorageError> {
        if self.no_index.contains(&date) {
            return Ok(());
        }
        self.append(NO_INDEX_LOG, &format!("{}\n", date.format("%Y-%m-%d")))?;
        self.no_index.insert(date);
        Ok(())
    }

    pub fn record_missing_identifier(&self, date: NaiveDate, cik: &str) -> Result<(), StorageError> {
        self.append(MISSING_LOG, &format!("{}\t{}\n", date.format("%Y-%m-%d"), cik))
    }

    pub fn last_completed(&self) -> Option<NaiveDate> {
        self.completed.last().copied()
    }

    pub fn is_completed(&self, date: NaiveDate) -> bool {
        self.completed.contains(&date)
    }

    /// Completed, or known to have no index.
    pub fn is_settled(&self, date: NaiveDate) -> bool {
        self.is_completed(date) || self.no_index.contains(&date)
    }

    /// Dates in `start..=end` still to be processed. With `resume`, settled
    /// dates are left out, so a date that failed mid-range is retried even
    /// though later dates completed.
    pub fn pending_dates(&self, start: NaiveDate, end: NaiveDate, resume: bool) -> Vec<NaiveDate> {
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| !resume || !self.is_settled(*d))
            .collect()
    }

    /// Writes a JSON summary of the latest run for the operator.
    pub fn save_run_summary<T: Serialize>(&self, summary: &T) -> Result<PathBuf, StorageError> {
        let path = self.dir.join(RUN_SUMMARY);
        let json = serde_json::to_string_pretty(summary)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        fs::write(&path, json)?;
        tracing::info!("Saved run summary to {}", path.display());
        Ok(path)
    }

    fn append(&self, file: &str, line: &str) -> Result<(), StorageError> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))?;
        f.write_all(line.as_bytes())?;
        f.sync_data()?;
        Ok(())
    }
}

fn read_date_log(path: &Path) -> Result<BTreeSet<NaiveDate>, StorageError> {
    let mut dates = BTreeSet::new();
    if !path.exists() {
        return Ok(dates);
    }
    for line in fs::read_to_string(path)?.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let date = NaiveDate::parse_from_str(line, "%Y-%m-%d").map_err(|_| StorageError::CorruptCheckpoint {
            file: path.display().to_string(),
            entry: line.to_string(),
        })?;
        dates.insert(date);
    }
    Ok(dates)
}
