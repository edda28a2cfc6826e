use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::CrawlError;
use crate::model::CrawlRequest;
use crate::page::PageOpener;
use crate::queue::RequestQueue;
use crate::router::{RequestRouter, RouteOutcome};

const MAX_QUEUE_ERRORS: usize = 5;

/// Counters for one crawl run.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlStats {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pages_handled: usize,
    pub search_harvests: usize,
    pub details_dispatched: usize,
    pub records_stored: usize,
    pub navigation_timeouts: usize,
    pub handler_timeouts: usize,
    pub handler_errors: usize,
    pub sink_failures: usize,
    pub page_open_failures: usize,
}

impl CrawlStats {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            pages_handled: 0,
            search_harvests: 0,
            details_dispatched: 0,
            records_stored: 0,
            navigation_timeouts: 0,
            handler_timeouts: 0,
            handler_errors: 0,
            sink_failures: 0,
            page_open_failures: 0,
        }
    }
}

/// Pops requests until the queue is drained and no request is in flight
/// on any worker sharing `in_flight`.
pub struct Worker {
    pub id: usize,
    pub opener: Arc<dyn PageOpener>,
    pub router: Arc<RequestRouter>,
    pub queue: Arc<dyn RequestQueue>,
    pub stats: Arc<Mutex<CrawlStats>>,
    pub in_flight: Arc<AtomicUsize>,
    pub handler_timeout: Duration,
    pub poll_interval: Duration,
}

impl Worker {
    pub async fn run(self) {
        debug!(worker = self.id, "worker started");
        let mut queue_errors = 0;

        loop {
            // Claim a slot before popping so an idle peer never sees an
            // empty queue with zero in flight while this pop is pending.
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            match self.queue.pop().await {
                Ok(Some(request)) => {
                    queue_errors = 0;
                    self.process(request).await;
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                }
                Ok(None) => {
                    queue_errors = 0;
                    if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                        break;
                    }
                    sleep(self.poll_interval).await;
                }
                Err(e) => {
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    queue_errors += 1;
                    error!(worker = self.id, error = %e, attempt = queue_errors, "queue error");
                    if queue_errors >= MAX_QUEUE_ERRORS {
                        break;
                    }
                    sleep(self.poll_interval * 5).await;
                }
            }
        }

        debug!(worker = self.id, "worker finished");
    }

    async fn process(&self, request: CrawlRequest) {
        let page = match self.opener.open(&request.url).await {
            Ok(page) => page,
            Err(e) => {
                warn!(worker = self.id, url = %request.url, error = %e, "page open failed");
                self.stats.lock().page_open_failures += 1;
                return;
            }
        };

        let routed = timeout(self.handler_timeout, self.router.route(page.as_ref(), &request)).await;
        page.close().await;

        let mut stats = self.stats.lock();
        stats.pages_handled += 1;
        match routed {
            Ok(Ok(RouteOutcome::Harvested { anchors, dispatched })) => {
                stats.search_harvests += 1;
                stats.details_dispatched += dispatched;
                debug!(worker = self.id, anchors, dispatched, "search handled");
            }
            Ok(Ok(RouteOutcome::Recorded)) => {
                stats.records_stored += 1;
            }
            Ok(Err(e @ CrawlError::NavigationTimeout { .. })) => {
                stats.navigation_timeouts += 1;
                warn!(worker = self.id, error = %e, "page abandoned");
            }
            Ok(Err(CrawlError::Sink(e))) => {
                stats.sink_failures += 1;
                error!(worker = self.id, url = %request.url, error = %e, "record not stored");
            }
            Ok(Err(e)) => {
                stats.handler_errors += 1;
                error!(worker = self.id, url = %request.url, error = %e, "handler failed");
            }
            Err(_) => {
                stats.handler_timeouts += 1;
                warn!(
                    worker = self.id,
                    url = %request.url,
                    timeout_secs = self.handler_timeout.as_secs(),
                    "handler timed out"
                );
            }
        }
    }
}

pub(crate) fn log_summary(stats: &CrawlStats) {
    info!(
        run_id = %stats.run_id,
        pages = stats.pages_handled,
        dispatched = stats.details_dispatched,
        stored = stats.records_stored,
        navigation_timeouts = stats.navigation_timeouts,
        handler_timeouts = stats.handler_timeouts,
        sink_failures = stats.sink_failures,
        "crawl finished"
    );
}
