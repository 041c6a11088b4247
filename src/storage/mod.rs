// src/storage/mod.rs
pub mod checkpoint;
pub mod registry;
pub mod writer;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};

use crate::edgar::models::{TickerPair, UNKNOWN_TICKER};
use crate::utils::error::StorageError;

pub use checkpoint::CheckpointTracker;
pub use registry::IdentifierRegistry;
pub use writer::{BatchWriter, WriteStats};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS identifiers (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    cik         TEXT NOT NULL,
    ticker      TEXT,
    created_at  TEXT NOT NULL,
    UNIQUE (cik, ticker)
);
CREATE INDEX IF NOT EXISTS idx_identifiers_cik ON identifiers (cik);

CREATE TABLE IF NOT EXISTS filings (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    identifier_id   INTEGER NOT NULL REFERENCES identifiers (id) ON UPDATE CASCADE,
    form_type       TEXT NOT NULL,
    filing_date     TEXT NOT NULL,
    index_page_url  TEXT NOT NULL,
    document_url    TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    UNIQUE (identifier_id, filing_date, form_type, index_page_url)
);
CREATE INDEX IF NOT EXISTS idx_filings_date ON filings (filing_date);
"#;

/// A row of the `identifiers` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierRow {
    pub id: i64,
    pub cik: String,
    pub ticker: Option<String>,
}

/// A filing ready to be inserted, with its identifier already resolved to a
/// durable key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilingRow {
    pub identifier_id: i64,
    pub form_type: String,
    pub filing_date: String,
    pub index_page_url: String,
    pub document_url: String,
}

/// Stored filing joined with its identifier, as read back for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFiling {
    pub cik: String,
    pub ticker: Option<String>,
    pub form_type: String,
    pub filing_date: String,
    pub index_page_url: String,
    pub document_url: String,
}

/// Outcome of one multi-row insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchInsert {
    pub inserted: u64,
    pub duplicates: u64,
}

/// SQLite-backed store for identifiers and filings.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connects using a `sqlite:` URL, e.g. `sqlite:edgar.db`.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let opts = SqliteConnectOptions::from_str(url)?;
        let opts = opts
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // Writes are serialized anyway; one connection keeps SQLite from
        // returning "database is locked" under concurrent resolver workers.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;
        Ok(())
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn load_identifiers(&self) -> Result<Vec<IdentifierRow>, StorageError> {
        let rows: Vec<(i64, String, Option<String>)> =
            sqlx::query_as("SELECT id, cik, ticker FROM identifiers ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(id, cik, ticker)| IdentifierRow { id, cik, ticker })
            .collect())
    }

    /// Inserts `(cik, ticker)` if the identifier has no row yet and returns
    /// its durable key (its oldest row) plus whether a row was created.
    pub async fn upsert_identifier(&self, cik: &str, ticker: &str) -> Result<(i64, bool), StorageError> {
        let mut tx = self.pool.begin().await?;

        let created = sqlx::query(
            "INSERT INTO identifiers (cik, ticker, created_at)
             SELECT ?1, ?2, ?3 WHERE NOT EXISTS (SELECT 1 FROM identifiers WHERE cik = ?1)",
        )
        .bind(cik)
        .bind(ticker)
        .bind(now())
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        let (id,): (i64,) = sqlx::query_as("SELECT id FROM identifiers WHERE cik = ? ORDER BY id LIMIT 1")
            .bind(cik)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((id, created))
    }

    /// Applies a ticker feed in one transaction. A placeholder `"n/a"` row is
    /// corrected in place; otherwise unseen pairs are inserted. Returns the
    /// number of rows changed.
    pub async fn apply_ticker_pairs(&self, pairs: &[TickerPair]) -> Result<u64, StorageError> {
        let mut tx = self.pool.begin().await?;
        let mut changed = 0;

        for pair in pairs {
            let corrected = sqlx::query(
                "UPDATE identifiers SET ticker = ?1
                 WHERE cik = ?2 AND ticker = ?3
                   AND NOT EXISTS (SELECT 1 FROM identifiers WHERE cik = ?2 AND ticker = ?1)",
            )
            .bind(&pair.ticker)
            .bind(&pair.cik)
            .bind(UNKNOWN_TICKER)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if corrected > 0 {
                changed += corrected;
                continue;
            }

            changed += sqlx::query(
                "INSERT INTO identifiers (cik, ticker, created_at) VALUES (?, ?, ?)
                 ON CONFLICT (cik, ticker) DO NOTHING",
            )
            .bind(&pair.cik)
            .bind(&pair.ticker)
            .bind(now())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        Ok(changed)
    }

    /// Inserts `rows` with a single multi-row statement inside one
    /// transaction. Rows already present are ignored, so replaying a date is
    /// harmless.
    pub async fn insert_filings(&self, rows: &[FilingRow]) -> Result<BatchInsert, StorageError> {
        if rows.is_empty() {
            return Ok(BatchInsert::default());
        }

        let created_at = now();
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO filings (identifier_id, form_type, filing_date, index_page_url, document_url, created_at) ",
        );
        qb.push_values(rows.iter(), |mut b, row| {
            b.push_bind(row.identifier_id)
                .push_bind(row.form_type.clone())
                .push_bind(row.filing_date.clone())
                .push_bind(row.index_page_url.clone())
                .push_bind(row.document_url.clone())
                .push_bind(created_at.clone());
        });
        qb.push(" ON CONFLICT (identifier_id, filing_date, form_type, index_page_url) DO NOTHING");

        let mut tx = self.pool.begin().await?;
        let inserted = qb.build().execute(&mut *tx).await?.rows_affected();
        tx.commit().await?;

        Ok(BatchInsert {
            inserted,
            duplicates: rows.len() as u64 - inserted,
        })
    }

    pub async fn count_filings(&self) -> Result<i64, StorageError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM filings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn filings_on(&self, filing_date: &str) -> Result<Vec<StoredFiling>, StorageError> {
        let rows: Vec<(String, Option<String>, String, String, String, String)> = sqlx::query_as(
            "SELECT i.cik, i.ticker, f.form_type, f.filing_date, f.index_page_url, f.document_url
             FROM filings f JOIN identifiers i ON i.id = f.identifier_id
             WHERE f.filing_date = ?
             ORDER BY f.id",
        )
        .bind(filing_date)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(cik, ticker, form_type, filing_date, index_page_url, document_url)| StoredFiling {
                cik,
                ticker,
                form_type,
                filing_date,
                index_page_url,
                document_url,
            })
            .collect())
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Database;
    use tempfile::TempDir;

    /// A scratch database that lives as long as the returned directory.
    pub async fn scratch_db() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("edgar.db").display());
        let db = Database::connect(&url).await.unwrap();
        (dir, db)
    }
}
