// src/pipeline/resolver.rs
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::edgar::models::{FilingStub, ResolvedFiling};
use crate::edgar::Fetch;
use crate::extractors::extract_document_url;

/// What came back from resolving one date's stubs.
#[derive(Debug, Default)]
pub struct ResolveOutcome {
    /// Completion order, not parse order.
    pub resolved: Vec<ResolvedFiling>,
    pub dropped: usize,
    /// Stubs never started because the run was cancelled.
    pub not_started: usize,
    pub cancelled: bool,
}

/// Fetches each stub's filing index page on a bounded pool of tasks and
/// extracts the primary document link. Outbound requests share the
/// fetcher's rate limiter, so the pool size only bounds concurrency.
pub struct DetailResolver {
    fetcher: Arc<dyn Fetch>,
    document_host: Arc<str>,
    workers: usize,
}

impl DetailResolver {
    pub fn new(fetcher: Arc<dyn Fetch>, document_host: &str, workers: usize) -> Self {
        Self {
            fetcher,
            document_host: Arc::from(document_host),
            workers: workers.max(1),
        }
    }

    /// Resolves every stub and waits for all tasks to finish.
    ///
    /// Once `cancel` fires no new tasks are started; tasks already running
    /// are drained so nothing is left detached.
    pub async fn resolve_all(&self, stubs: Vec<FilingStub>, cancel: &CancellationToken) -> ResolveOutcome {
        let total = stubs.len();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let mut outcome = ResolveOutcome::default();

        for (started, stub) in stubs.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    outcome.cancelled = true;
                    outcome.not_started = total - started;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break, // never closed
                },
            };

            let fetcher = self.fetcher.clone();
            let host = self.document_host.clone();
            tasks.spawn(async move {
                let _permit = permit; // Hold the permit for the duration of the task
                resolve_one(fetcher.as_ref(), &host, stub).await
            });
        }

        if outcome.cancelled {
            tracing::warn!(in_flight = tasks.len(), not_started = outcome.not_started, "Resolution cancelled, draining in-flight requests");
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(filing)) => outcome.resolved.push(filing),
                Ok(None) => outcome.dropped += 1,
                Err(e) => {
                    tracing::error!("Resolver task failed: {}", e);
                    outcome.dropped += 1;
                }
            }
        }

        outcome
    }
}

/// Resolves a single stub, logging and returning `None` on any failure.
async fn resolve_one(fetcher: &dyn Fetch, document_host: &str, stub: FilingStub) -> Option<ResolvedFiling> {
    let page = match fetcher.get_text(&stub.index_page_url).await {
        Ok(page) => page,
        Err(e) => {
            tracing::warn!(cik = %stub.cik, "Filing index page not available: {}", e);
            return None;
        }
    };

    match extract_document_url(&page, &stub.index_page_url, document_host) {
        Ok(document_url) => Some(ResolvedFiling::from_stub(stub, document_url)),
        Err(e) => {
            tracing::warn!(cik = %stub.cik, "Could not extract document link: {}", e);
            None
        }
    }
}
