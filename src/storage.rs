use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::SinkError;
use crate::model::BusinessRecord;

/// Append-only destination for finished records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn append(&self, record: &BusinessRecord) -> Result<(), SinkError>;
}

/// Dataset file with one JSON record per line.
pub struct JsonLinesSink {
    path: PathBuf,
    file: tokio::sync::Mutex<File>,
}

impl JsonLinesSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        info!(path = %path.display(), "dataset opened");
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSink for JsonLinesSink {
    async fn append(&self, record: &BusinessRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps records in memory, in append order.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<BusinessRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<BusinessRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn append(&self, record: &BusinessRecord) -> Result<(), SinkError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: &str) -> BusinessRecord {
        BusinessRecord {
            name: Some("Tartine".into()),
            address: None,
            rating: Some("4.6 stars".into()),
            reviews: None,
            phone: None,
            website: None,
            category: None,
            url: url.into(),
        }
    }

    #[tokio::test]
    async fn json_lines_appends_one_record_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datasets").join("default.jsonl");
        let sink = JsonLinesSink::open(&path).await.unwrap();
        sink.append(&record("https://x.test/a")).await.unwrap();
        sink.append(&record("https://x.test/b")).await.unwrap();

        let raw = tokio::fs::read_to_string(sink.path()).await.unwrap();
        let lines: Vec<BusinessRecord> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines, vec![record("https://x.test/a"), record("https://x.test/b")]);
    }

    #[tokio::test]
    async fn reopening_keeps_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.jsonl");
        JsonLinesSink::open(&path)
            .await
            .unwrap()
            .append(&record("https://x.test/a"))
            .await
            .unwrap();
        JsonLinesSink::open(&path)
            .await
            .unwrap()
            .append(&record("https://x.test/b"))
            .await
            .unwrap();

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(raw.lines().count(), 2);
    }

    #[tokio::test]
    async fn memory_sink_keeps_order() {
        let sink = MemorySink::new();
        sink.append(&record("https://x.test/1")).await.unwrap();
        sink.append(&record("https://x.test/2")).await.unwrap();
        let urls: Vec<String> = sink.records().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec!["https://x.test/1", "https://x.test/2"]);
    }
}
