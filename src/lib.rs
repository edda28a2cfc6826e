pub mod browser;
pub mod config;
pub mod crawler;
pub mod db;
pub mod detail;
pub mod error;
pub mod frontier;
pub mod model;
pub mod page;
pub mod queue;
pub mod router;
pub mod search;
pub mod storage;
pub mod worker;

pub use config::{CrawlInput, CrawlerConfig};
pub use crawler::Crawler;
pub use error::CrawlError;
pub use model::{BusinessRecord, CrawlRequest};
pub use worker::CrawlStats;
