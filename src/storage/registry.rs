// src/storage/registry.rs
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::edgar::models::{parse_ticker_feed, UNKNOWN_TICKER};
use crate::edgar::Fetch;
use crate::storage::{Database, IdentifierRow};
use crate::utils::error::{AppError, StorageError};

/// Cached view of one identifier, carrying the key filings reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierEntry {
    pub key: i64,
    pub cik: String,
    pub ticker: Option<String>,
}

/// Result of [`IdentifierRegistry::ensure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ensured {
    pub key: i64,
    /// The identifier was unseen and a record was created for it.
    pub created: bool,
}

#[derive(Default)]
struct Caches {
    by_cik: HashMap<String, IdentifierEntry>,
    by_ticker: HashMap<String, IdentifierEntry>,
}

impl Caches {
    fn rebuild(rows: Vec<IdentifierRow>) -> Self {
        let mut caches = Caches::default();
        for row in rows {
            caches.insert(IdentifierEntry {
                key: row.id,
                cik: row.cik,
                ticker: row.ticker,
            });
        }
        caches
    }

    fn insert(&mut self, entry: IdentifierEntry) {
        // Rows arrive oldest first; the oldest row is the durable key, and
        // every ticker of the identifier maps to it.
        let key = self.by_cik.entry(entry.cik.clone()).or_insert_with(|| entry.clone()).key;
        if let Some(ticker) = entry.ticker.as_deref().filter(|t| *t != UNKNOWN_TICKER) {
            self.by_ticker
                .insert(ticker.to_string(), IdentifierEntry { key, ..entry.clone() });
        }
    }
}

/// Identifier↔ticker registry: an in-memory cache over the `identifiers`
/// table, refreshed from the EDGAR ticker feed.
///
/// All inserts happen while holding the cache lock, so concurrent `ensure`
/// calls for the same unseen identifier produce a single record.
pub struct IdentifierRegistry {
    db: Database,
    fetcher: Arc<dyn Fetch>,
    feed_url: String,
    caches: Mutex<Caches>,
}

impl IdentifierRegistry {
    pub fn new(db: Database, fetcher: Arc<dyn Fetch>, feed_url: impl Into<String>) -> Self {
        Self {
            db,
            fetcher,
            feed_url: feed_url.into(),
            caches: Mutex::new(Caches::default()),
        }
    }

    /// Populates the caches from the database.
    pub async fn load(&self) -> Result<(), StorageError> {
        let rows = self.db.load_identifiers().await?;
        let mut caches = self.caches.lock().await;
        *caches = Caches::rebuild(rows);
        tracing::info!(
            identifiers = caches.by_cik.len(),
            tickers = caches.by_ticker.len(),
            "Loaded identifier registry"
        );
        Ok(())
    }

    /// Returns the durable key for `cik`, creating a record (ticker `"n/a"`
    /// unless given) when the identifier has never been seen.
    pub async fn ensure(&self, cik: &str, ticker: Option<&str>) -> Result<Ensured, StorageError> {
        let mut caches = self.caches.lock().await;
        if let Some(entry) = caches.by_cik.get(cik) {
            return Ok(Ensured { key: entry.key, created: false });
        }

        let ticker = ticker.unwrap_or(UNKNOWN_TICKER);
        let (key, created) = self.db.upsert_identifier(cik, ticker).await?;
        if created {
            tracing::debug!(cik, ticker, key, "Registered new identifier");
        }
        caches.insert(IdentifierEntry {
            key,
            cik: cik.to_string(),
            ticker: Some(ticker.to_string()),
        });
        Ok(Ensured { key, created })
    }

    /// Looks up the identifier for `ticker`, refreshing from the ticker feed
    /// once if it is not cached yet.
    pub async fn resolve_ticker(&self, ticker: &str) -> Option<String> {
        let ticker = ticker.trim().to_uppercase();
        if let Some(cik) = self.cached_cik(&ticker).await {
            return Some(cik);
        }

        tracing::info!(ticker = %ticker, "Ticker not cached, refreshing from feed");
        if let Err(e) = self.refresh().await {
            tracing::warn!(ticker = %ticker, "Ticker feed refresh failed, using cached data: {}", e);
        }
        self.cached_cik(&ticker).await
    }

    /// Downloads the ticker feed and merges it into the database and caches.
    /// Returns the number of identifier rows created or corrected.
    pub async fn refresh(&self) -> Result<u64, AppError> {
        let body = self.fetcher.get_text(&self.feed_url).await?;
        let pairs = parse_ticker_feed(&body);
        if pairs.is_empty() {
            return Err(AppError::Processing(format!(
                "ticker feed {} contained no usable lines",
                self.feed_url
            )));
        }

        let mut caches = self.caches.lock().await;
        let changed = self.db.apply_ticker_pairs(&pairs).await?;
        *caches = Caches::rebuild(self.db.load_identifiers().await?);

        tracing::info!(
            feed_pairs = pairs.len(),
            changed,
            identifiers = caches.by_cik.len(),
            "Refreshed identifier registry from ticker feed"
        );
        Ok(changed)
    }

    pub async fn get(&self, cik: &str) -> Option<IdentifierEntry> {
        self.caches.lock().await.by_cik.get(cik).cloned()
    }

    /// `(identifiers, tickers)` currently cached.
    pub async fn counts(&self) -> (usize, usize) {
        let caches = self.caches.lock().await;
        (caches.by_cik.len(), caches.by_ticker.len())
    }

    async fn cached_cik(&self, ticker: &str) -> Option<String> {
        self.caches
            .lock()
            .await
            .by_ticker
            .get(ticker)
            .map(|entry| entry.cik.clone())
    }
}
