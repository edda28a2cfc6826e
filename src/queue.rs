use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{AsyncCommands, Client};
use std::collections::VecDeque;
use tracing::info;

use crate::error::QueueError;
use crate::model::CrawlRequest;

/// Pending page visits. Every pushed request is handed out at least once.
#[async_trait]
pub trait RequestQueue: Send + Sync {
    async fn push(&self, request: CrawlRequest) -> Result<(), QueueError>;

    async fn pop(&self) -> Result<Option<CrawlRequest>, QueueError>;

    async fn push_all(&self, requests: Vec<CrawlRequest>) -> Result<(), QueueError> {
        for request in requests {
            self.push(request).await?;
        }
        Ok(())
    }
}

/// FIFO queue local to this process.
#[derive(Default)]
pub struct MemoryQueue {
    pending: Mutex<VecDeque<CrawlRequest>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

#[async_trait]
impl RequestQueue for MemoryQueue {
    async fn push(&self, request: CrawlRequest) -> Result<(), QueueError> {
        self.pending.lock().push_back(request);
        Ok(())
    }

    async fn pop(&self) -> Result<Option<CrawlRequest>, QueueError> {
        Ok(self.pending.lock().pop_front())
    }

    async fn push_all(&self, requests: Vec<CrawlRequest>) -> Result<(), QueueError> {
        self.pending.lock().extend(requests);
        Ok(())
    }
}

/// Redis list used as a FIFO (`LPUSH` + `RPOP`), JSON-encoded entries.
#[derive(Clone)]
pub struct RedisQueue {
    client: Client,
    key: String,
}

impl RedisQueue {
    pub async fn new(redis_url: &str, key: impl Into<String>) -> Result<Self, QueueError> {
        let client = Client::open(redis_url)?;

        // Test connection
        let mut conn = client.get_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("redis connected");

        Ok(Self {
            client,
            key: key.into(),
        })
    }
}

#[async_trait]
impl RequestQueue for RedisQueue {
    async fn push(&self, request: CrawlRequest) -> Result<(), QueueError> {
        let mut conn = self.client.get_async_connection().await?;
        let json = serde_json::to_string(&request)?;
        conn.lpush::<_, _, ()>(&self.key, json).await?;
        Ok(())
    }

    async fn pop(&self) -> Result<Option<CrawlRequest>, QueueError> {
        let mut conn = self.client.get_async_connection().await?;
        let result: Option<String> = conn.rpop(&self.key, None).await?;

        match result {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
