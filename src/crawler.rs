use parking_lot::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::CrawlerConfig;
use crate::detail::DetailExtractor;
use crate::error::CrawlError;
use crate::frontier::DedupFrontier;
use crate::model::{seed_url, CrawlRequest};
use crate::page::PageOpener;
use crate::queue::RequestQueue;
use crate::router::RequestRouter;
use crate::search::SearchPageController;
use crate::storage::RecordSink;
use crate::worker::{log_summary, CrawlStats, Worker};

/// One harvesting run: seeds the search page, then lets the worker pool
/// drain the queue.
pub struct Crawler {
    config: CrawlerConfig,
    opener: Arc<dyn PageOpener>,
    queue: Arc<dyn RequestQueue>,
    sink: Arc<dyn RecordSink>,
    run_id: Uuid,
}

impl Crawler {
    pub fn new(
        config: CrawlerConfig,
        opener: Arc<dyn PageOpener>,
        queue: Arc<dyn RequestQueue>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            config,
            opener,
            queue,
            sink,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn seed_url(&self) -> String {
        seed_url(&self.config.search_url_template, &self.config.input.search_query)
    }

    pub async fn run(&self) -> Result<CrawlStats, CrawlError> {
        let config = &self.config;
        let selectors = Arc::new(config.selectors.clone());
        let frontier = Arc::new(DedupFrontier::new(config.input.max_results));

        let search = SearchPageController::new(
            selectors.clone(),
            config.search.clone(),
            config.input.max_results,
            frontier.clone(),
        )?;
        let detail = DetailExtractor::new(selectors, config.detail.clone());
        let router = Arc::new(RequestRouter::new(
            search,
            detail,
            self.queue.clone(),
            self.sink.clone(),
        ));

        let seed = self.seed_url();
        info!(
            run_id = %self.run_id,
            query = %config.input.search_query,
            max_results = config.input.max_results,
            profile = ?config.profile,
            concurrency = config.max_concurrency,
            selectors = %config.selectors.version,
            url = %seed,
            "crawl started"
        );
        self.queue.push(CrawlRequest::search(seed)).await?;

        let stats = Arc::new(Mutex::new(CrawlStats::new(self.run_id)));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let mut workers = JoinSet::new();
        for id in 0..config.max_concurrency.max(1) {
            let worker = Worker {
                id,
                opener: self.opener.clone(),
                router: router.clone(),
                queue: self.queue.clone(),
                stats: stats.clone(),
                in_flight: in_flight.clone(),
                handler_timeout: config.request_handler_timeout,
                poll_interval: config.poll_interval,
            };
            workers.spawn(worker.run());
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker task failed");
            }
        }

        let mut stats = stats.lock().clone();
        stats.finished_at = Some(chrono::Utc::now());
        log_summary(&stats);
        Ok(stats)
    }
}
