// src/storage/writer.rs
use chrono::NaiveDate;

use crate::edgar::models::ResolvedFiling;
use crate::storage::{CheckpointTracker, Database, FilingRow, IdentifierRegistry};

/// Counters for one date's writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub batches: usize,
    pub failed_batches: usize,
    pub rows_inserted: u64,
    pub duplicates: u64,
    pub rows_lost: u64,
    pub identifiers_backfilled: usize,
}

impl WriteStats {
    /// Every row handed to the writer reached the database.
    pub fn is_clean(&self) -> bool {
        self.failed_batches == 0 && self.rows_lost == 0
    }
}

/// Accumulates resolved filings for one date and inserts them in batches of
/// `batch_size`, each in its own transaction.
pub struct BatchWriter<'a> {
    db: &'a Database,
    registry: &'a IdentifierRegistry,
    checkpoints: &'a CheckpointTracker,
    date: NaiveDate,
    batch_size: usize,
    pending: Vec<FilingRow>,
    stats: WriteStats,
}

impl<'a> BatchWriter<'a> {
    pub fn new(
        db: &'a Database,
        registry: &'a IdentifierRegistry,
        checkpoints: &'a CheckpointTracker,
        date: NaiveDate,
        batch_size: usize,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            db,
            registry,
            checkpoints,
            date,
            batch_size,
            pending: Vec::with_capacity(batch_size),
            stats: WriteStats::default(),
        }
    }

    /// Queues one filing, flushing when the batch is full. Identifiers the
    /// registry has never seen are backfilled with an unknown ticker.
    pub async fn push(&mut self, filing: ResolvedFiling) {
        let ensured = match self.registry.ensure(&filing.cik, None).await {
            Ok(ensured) => ensured,
            Err(e) => {
                tracing::error!(cik = %filing.cik, "Could not resolve identifier, dropping filing: {}", e);
                self.stats.rows_lost += 1;
                return;
            }
        };

        if ensured.created {
            self.stats.identifiers_backfilled += 1;
            tracing::info!(date = %self.date, cik = %filing.cik, "Backfilled unseen identifier");
            if let Err(e) = self.checkpoints.record_missing_identifier(self.date, &filing.cik) {
                tracing::warn!(cik = %filing.cik, "Could not append to missing-identifier log: {}", e);
            }
        }

        let filing_date = filing.date_string();
        self.pending.push(FilingRow {
            identifier_id: ensured.key,
            form_type: filing.form_type,
            filing_date,
            index_page_url: filing.index_page_url,
            document_url: filing.document_url,
        });

        if self.pending.len() >= self.batch_size {
            self.flush().await;
        }
    }

    /// Flushes whatever is left and returns the date's counters.
    pub async fn finish(mut self) -> WriteStats {
        if !self.pending.is_empty() {
            self.flush().await;
        }
        self.stats
    }

    async fn flush(&mut self) {
        let rows = std::mem::take(&mut self.pending);
        self.stats.batches += 1;

        match self.db.insert_filings(&rows).await {
            Ok(result) => {
                self.stats.rows_inserted += result.inserted;
                self.stats.duplicates += result.duplicates;
                tracing::debug!(
                    date = %self.date,
                    rows = rows.len(),
                    inserted = result.inserted,
                    "Flushed batch"
                );
            }
            Err(e) => {
                // The whole batch is lost; the date will not be checkpointed.
                self.stats.failed_batches += 1;
                self.stats.rows_lost += rows.len() as u64;
                tracing::error!(date = %self.date, rows = rows.len(), "Batch insert failed: {}", e);
            }
        }
        self.pending = Vec::with_capacity(self.batch_size);
    }
}
