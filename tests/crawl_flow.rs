use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use maps_harvester::config::{CrawlInput, CrawlerConfig};
use maps_harvester::crawler::Crawler;
use maps_harvester::error::SinkError;
use maps_harvester::model::BusinessRecord;
use maps_harvester::page::SnapshotOpener;
use maps_harvester::queue::MemoryQueue;
use maps_harvester::storage::{JsonLinesSink, MemorySink, RecordSink};

const SEARCH_URL: &str = "https://www.google.com/maps/search/coffee";

fn place_url(i: usize) -> String {
    format!("https://www.google.com/maps/place/shop-{}", i)
}

fn search_page(listings: usize) -> String {
    let links: String = (0..listings)
        .map(|i| format!(r#"<a href="/maps/place/shop-{}">Shop {}</a>"#, i, i))
        .collect();
    format!(r#"<html><body><div role="feed">{}</div></body></html>"#, links)
}

fn detail_page(i: usize) -> String {
    format!(
        r#"<html><body>
          <h1>Shop {i}</h1>
          <span aria-label="4.{i} stars">4.{i}</span>
          <button data-item-id="address">{i} Main St</button>
          <a data-item-id="authority" href="https://shop{i}.example/">shop{i}.example</a>
        </body></html>"#,
        i = i
    )
}

fn fixtures(listings: usize) -> SnapshotOpener {
    (0..listings).fold(
        SnapshotOpener::new().page(SEARCH_URL, search_page(listings)),
        |opener, i| opener.page(place_url(i), detail_page(i)),
    )
}

fn config(max_results: usize) -> CrawlerConfig {
    let mut config = CrawlerConfig::new(CrawlInput {
        search_query: "coffee".into(),
        max_results,
    });
    config.max_concurrency = 3;
    config.poll_interval = std::time::Duration::from_millis(10);
    config
}

struct BrokenSink;

#[async_trait]
impl RecordSink for BrokenSink {
    async fn append(&self, _record: &BusinessRecord) -> Result<(), SinkError> {
        Err(SinkError::Unavailable("disk full".into()))
    }
}

#[tokio::test]
async fn crawl_stops_at_the_result_cap() {
    let sink = Arc::new(MemorySink::new());
    let crawler = Crawler::new(
        config(5),
        Arc::new(fixtures(12)),
        Arc::new(MemoryQueue::new()),
        sink.clone(),
    );

    let stats = crawler.run().await.unwrap();

    let records = sink.records();
    assert_eq!(records.len(), 5);
    let urls: HashSet<&str> = records.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(urls.len(), 5);
    assert!(records.iter().all(|r| r.name.is_some()));

    assert_eq!(stats.search_harvests, 1);
    assert_eq!(stats.details_dispatched, 5);
    assert_eq!(stats.records_stored, 5);
    assert_eq!(stats.pages_handled, 6);
}

#[tokio::test]
async fn detail_page_without_heading_is_skipped() {
    let opener = fixtures(3).page(place_url(1), "<html><body><p>gone</p></body></html>");
    let sink = Arc::new(MemorySink::new());
    let crawler = Crawler::new(
        config(10),
        Arc::new(opener),
        Arc::new(MemoryQueue::new()),
        sink.clone(),
    );

    let stats = crawler.run().await.unwrap();

    let mut urls: Vec<String> = sink.records().into_iter().map(|r| r.url).collect();
    urls.sort();
    assert_eq!(urls, vec![place_url(0), place_url(2)]);
    assert_eq!(stats.navigation_timeouts, 1);
    assert_eq!(stats.records_stored, 2);
}

#[tokio::test]
async fn missing_fields_are_null_not_fatal() {
    let sink = Arc::new(MemorySink::new());
    let crawler = Crawler::new(
        config(1),
        Arc::new(fixtures(1)),
        Arc::new(MemoryQueue::new()),
        sink.clone(),
    );
    crawler.run().await.unwrap();

    let records = sink.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.name.as_deref(), Some("Shop 0"));
    assert_eq!(record.address.as_deref(), Some("0 Main St"));
    assert_eq!(record.website.as_deref(), Some("https://shop0.example/"));
    assert_eq!(record.phone, None);
    assert_eq!(record.reviews, None);
}

#[tokio::test]
async fn sink_failures_do_not_stop_the_crawl() {
    let crawler = Crawler::new(
        config(4),
        Arc::new(fixtures(4)),
        Arc::new(MemoryQueue::new()),
        Arc::new(BrokenSink),
    );

    let stats = crawler.run().await.unwrap();

    assert_eq!(stats.details_dispatched, 4);
    assert_eq!(stats.sink_failures, 4);
    assert_eq!(stats.records_stored, 0);
}

#[tokio::test]
async fn records_are_written_as_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("datasets").join("coffee.jsonl");
    let sink = Arc::new(JsonLinesSink::open(&path).await.unwrap());
    let crawler = Crawler::new(
        config(3),
        Arc::new(fixtures(3)),
        Arc::new(MemoryQueue::new()),
        sink,
    );
    crawler.run().await.unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let records: Vec<BusinessRecord> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 3);
    assert!(contents.contains(r#""phone":null"#));
}
