use anyhow::Context;
use dotenv::dotenv;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use maps_harvester::browser::ChromeOpener;
use maps_harvester::config::{CrawlerConfig, QueueBackend, SinkBackend};
use maps_harvester::crawler::Crawler;
use maps_harvester::db::PostgresSink;
use maps_harvester::queue::{MemoryQueue, RedisQueue, RequestQueue};
use maps_harvester::storage::{JsonLinesSink, RecordSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = CrawlerConfig::from_env().context("invalid crawl configuration")?;
    let run_id = Uuid::new_v4();

    let queue: Arc<dyn RequestQueue> = match &config.queue {
        QueueBackend::Memory => Arc::new(MemoryQueue::new()),
        QueueBackend::Redis { url, key } => Arc::new(
            RedisQueue::new(url, key.clone())
                .await
                .context("failed to connect to redis")?,
        ),
    };

    let sink: Arc<dyn RecordSink> = match &config.sink {
        SinkBackend::JsonLines { path } => {
            let sink = JsonLinesSink::open(path)
                .await
                .with_context(|| format!("failed to open dataset {}", path))?;
            info!(path = %sink.path().display(), "writing records as JSON lines");
            Arc::new(sink)
        }
        SinkBackend::Postgres { url } => Arc::new(
            PostgresSink::new(url, run_id)
                .await
                .context("failed to prepare postgres sink")?,
        ),
    };

    let opener = ChromeOpener::launch(&config.browser, config.navigation_timeout)
        .await
        .context("failed to launch chrome")?;

    let crawler = Crawler::new(config, Arc::new(opener), queue, sink).with_run_id(run_id);
    let stats = crawler.run().await?;

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
