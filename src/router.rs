use std::sync::Arc;
use tracing::error;

use crate::detail::DetailExtractor;
use crate::error::CrawlError;
use crate::model::{CrawlRequest, Label};
use crate::page::Page;
use crate::queue::RequestQueue;
use crate::search::SearchPageController;
use crate::storage::RecordSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A search page was harvested and `dispatched` detail requests enqueued.
    Harvested { anchors: usize, dispatched: usize },
    /// A detail page produced a record that reached the sink.
    Recorded,
}

/// Dispatches a loaded page to its handler by label.
pub struct RequestRouter {
    search: SearchPageController,
    detail: DetailExtractor,
    queue: Arc<dyn RequestQueue>,
    sink: Arc<dyn RecordSink>,
}

impl RequestRouter {
    pub fn new(
        search: SearchPageController,
        detail: DetailExtractor,
        queue: Arc<dyn RequestQueue>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            search,
            detail,
            queue,
            sink,
        }
    }

    pub async fn route(
        &self,
        page: &dyn Page,
        request: &CrawlRequest,
    ) -> Result<RouteOutcome, CrawlError> {
        match request.label() {
            Label::Search => {
                let harvest = self.search.harvest(page).await?;
                let dispatched = harvest.requests.len();
                let reserved: Vec<String> = harvest.requests.iter().map(|r| r.url.clone()).collect();
                if let Err(e) = self.queue.push_all(harvest.requests).await {
                    // Reservations are spent; some of these may never be visited.
                    error!(
                        url = %page.url(),
                        error = %e,
                        reserved = ?reserved,
                        "detail requests reserved but not enqueued"
                    );
                    return Err(e.into());
                }
                Ok(RouteOutcome::Harvested {
                    anchors: harvest.anchors,
                    dispatched,
                })
            }
            Label::Detail => {
                let record = self.detail.extract(page, request).await?;
                self.sink.append(&record).await?;
                Ok(RouteOutcome::Recorded)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetailSettings, SearchSettings, SelectorSet};
    use crate::frontier::DedupFrontier;
    use crate::page::HtmlPage;
    use crate::queue::MemoryQueue;
    use crate::error::QueueError;
    use crate::storage::MemorySink;
    use async_trait::async_trait;
    use std::time::Duration;

    fn router(queue: Arc<MemoryQueue>, sink: Arc<MemorySink>) -> RequestRouter {
        let selectors = Arc::new(SelectorSet::default());
        let settings = SearchSettings {
            settle: Duration::ZERO,
            ..SearchSettings::default()
        };
        let search = SearchPageController::new(
            selectors.clone(),
            settings,
            10,
            Arc::new(DedupFrontier::new(10)),
        )
        .unwrap();
        let detail = DetailExtractor::new(selectors, DetailSettings::default());
        RequestRouter::new(search, detail, queue, sink)
    }

    #[tokio::test]
    async fn search_pages_enqueue_detail_requests() {
        let queue = Arc::new(MemoryQueue::new());
        let sink = Arc::new(MemorySink::new());
        let page = HtmlPage::new(
            "https://www.google.com/maps/search/tea",
            r#"<div role="feed"><a href="/maps/place/a">A</a><a href="/maps/place/b">B</a></div>"#,
        );

        let outcome = router(queue.clone(), sink.clone())
            .route(&page, &CrawlRequest::search(page.url()))
            .await
            .unwrap();

        assert_eq!(outcome, RouteOutcome::Harvested { anchors: 2, dispatched: 2 });
        let next = queue.pop().await.unwrap().unwrap();
        assert_eq!(next.label(), Label::Detail);
        assert_eq!(next.url, "https://www.google.com/maps/place/a");
        assert!(sink.records().is_empty());
    }

    struct ClosedQueue;

    #[async_trait]
    impl RequestQueue for ClosedQueue {
        async fn push(&self, _request: CrawlRequest) -> Result<(), QueueError> {
            Err(QueueError::Codec(serde_json::from_str::<u8>("x").unwrap_err()))
        }

        async fn pop(&self) -> Result<Option<CrawlRequest>, QueueError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn failed_enqueue_is_reported() {
        let selectors = Arc::new(SelectorSet::default());
        let settings = SearchSettings {
            settle: Duration::ZERO,
            ..SearchSettings::default()
        };
        let frontier = Arc::new(DedupFrontier::new(10));
        let search =
            SearchPageController::new(selectors.clone(), settings, 10, frontier.clone()).unwrap();
        let detail = DetailExtractor::new(selectors, DetailSettings::default());
        let router = RequestRouter::new(search, detail, Arc::new(ClosedQueue), Arc::new(MemorySink::new()));
        let page = HtmlPage::new(
            "https://www.google.com/maps/search/tea",
            r#"<div role="feed"><a href="/maps/place/a">A</a></div>"#,
        );

        let err = router
            .route(&page, &CrawlRequest::search(page.url()))
            .await
            .unwrap_err();

        assert!(matches!(err, CrawlError::Queue(_)));
        assert_eq!(frontier.reserved(), 1);
    }

    #[tokio::test]
    async fn detail_pages_reach_the_sink() {
        let queue = Arc::new(MemoryQueue::new());
        let sink = Arc::new(MemorySink::new());
        let url = "https://www.google.com/maps/place/a";
        let page = HtmlPage::new(url, "<h1>Samovar</h1>");

        let outcome = router(queue.clone(), sink.clone())
            .route(&page, &CrawlRequest::detail(url))
            .await
            .unwrap();

        assert_eq!(outcome, RouteOutcome::Recorded);
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name.as_deref(), Some("Samovar"));
        assert_eq!(records[0].url, url);
        assert!(queue.is_empty());
    }
}
