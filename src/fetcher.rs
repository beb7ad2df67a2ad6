use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::aggregator::QueryAggregator;
use crate::client::SerpApi;
use crate::config::{FetchSettings, MAX_PAGES_LIMIT};
use crate::data_models::{PageRequest, PageResponse, QueryResult};
use crate::exchange;

/// Consecutive empty-or-failed arrivals that stop a query.
pub const EARLY_STOP_THRESHOLD: usize = 3;

/// Run length of empty arrivals, in arrival order.
#[derive(Debug, Default)]
pub struct EarlyStop {
    consecutive_empty: usize,
    threshold: usize,
}

impl EarlyStop {
    pub fn new(threshold: usize) -> Self {
        Self {
            consecutive_empty: 0,
            threshold,
        }
    }

    /// Records one arrival; `true` once the threshold is reached.
    pub fn observe(&mut self, response: &PageResponse) -> bool {
        if response.is_empty() {
            self.consecutive_empty += 1;
        } else {
            self.consecutive_empty = 0;
        }
        self.consecutive_empty >= self.threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FetchSummary {
    pub pages_received: u32,
    pub stopped_early: bool,
}

/// Fetches the pages of a query with bounded concurrency.
pub struct PageFetcher<A> {
    api: Arc<A>,
    settings: FetchSettings,
    concurrency: usize,
}

impl<A: SerpApi + 'static> PageFetcher<A> {
    pub fn new(api: Arc<A>, settings: FetchSettings, concurrency: usize) -> PageFetcher<A> {
        PageFetcher {
            api,
            settings,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetches up to `max_pages` pages and aggregates them.
    pub async fn fetch(&self, query: &str, max_pages: u32) -> QueryResult {
        let mut aggregator = QueryAggregator::new(query);
        let summary = self
            .stream_pages(query, max_pages, |request, response| {
                aggregator.ingest(request.page, response)
            })
            .await;

        tracing::debug!(
            query,
            pages_received = summary.pages_received,
            pages_ok = aggregator.pages_ok(),
            pages_failed = aggregator.pages_failed(),
            stopped_early = summary.stopped_early,
            "query pages consumed"
        );
        aggregator.finish()
    }

    /// Launches one exchange per page and hands every completion to
    /// `on_page`, in arrival order, until all pages are in or the early-stop
    /// threshold trips. Outstanding exchanges are then cancelled and left to
    /// wind down on their own. `max_pages` is capped at [`MAX_PAGES_LIMIT`].
    pub async fn stream_pages<F>(&self, query: &str, max_pages: u32, mut on_page: F) -> FetchSummary
    where
        F: FnMut(PageRequest, PageResponse),
    {
        if max_pages > MAX_PAGES_LIMIT {
            tracing::warn!(query, max_pages, limit = MAX_PAGES_LIMIT, "page count capped");
        }
        let max_pages = max_pages.min(MAX_PAGES_LIMIT);
        let cancel = CancellationToken::new();
        // also fires if this future is dropped mid-fetch
        let _cancel_on_exit = cancel.clone().drop_guard();
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        for page in 1..=max_pages {
            let request = PageRequest::new(query, page);
            let api = self.api.clone();
            let settings = self.settings.clone();
            let permits = permits.clone();
            let cancel = cancel.clone();
            let done_tx = done_tx.clone();

            tokio::spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    permit = permits.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };
                let response = exchange::execute(api.as_ref(), &request, &settings, &cancel).await;
                if cancel.is_cancelled() {
                    return;
                }
                // receiver gone means the query already stopped
                let _ = done_tx.send((request, response));
            });
        }
        drop(done_tx);

        let mut early_stop = EarlyStop::new(EARLY_STOP_THRESHOLD);
        let mut summary = FetchSummary::default();

        while let Some((request, response)) = done_rx.recv().await {
            summary.pages_received += 1;
            match &response {
                PageResponse::Success(payload) => {
                    tracing::debug!(query, page = request.page, organic = payload.organic.len(), "page done");
                }
                PageResponse::Failure(err) => {
                    tracing::warn!(query, page = request.page, kind = err.kind(), error = %err, "page failed");
                }
            }

            let stop = early_stop.observe(&response);
            on_page(request, response);
            if stop {
                tracing::info!(
                    query,
                    after_pages = summary.pages_received,
                    "{EARLY_STOP_THRESHOLD} consecutive empty pages, stopping"
                );
                summary.stopped_early = true;
                cancel.cancel();
                break;
            }
        }

        summary
    }
}

/// Fetches and aggregates every page of `query`.
pub async fn fetch_query<A: SerpApi + 'static>(
    api: Arc<A>,
    query: &str,
    max_pages: u32,
    concurrency: usize,
    settings: &FetchSettings,
) -> QueryResult {
    PageFetcher::new(api, settings.clone(), concurrency)
        .fetch(query, max_pages)
        .await
}
