use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::SinkError;
use crate::model::BusinessRecord;
use crate::storage::RecordSink;

const CONNECT_ATTEMPTS: u32 = 15;

pub async fn connect(db_url: &str) -> Result<PgPool, SinkError> {
    let mut attempts = 0;
    loop {
        match PgPoolOptions::new().max_connections(5).connect(db_url).await {
            Ok(pool) => {
                info!("database connected");
                return Ok(pool);
            }
            Err(e) => {
                attempts += 1;
                if attempts >= CONNECT_ATTEMPTS {
                    return Err(e.into());
                }
                warn!(error = %e, attempt = attempts, "database connect failed, retrying in 2s");
                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

pub async fn init_db(pool: &PgPool) -> Result<(), SinkError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS business_records (
            id BIGSERIAL PRIMARY KEY,
            run_id VARCHAR NOT NULL,
            url TEXT NOT NULL,
            name TEXT,
            address TEXT,
            rating TEXT,
            reviews TEXT,
            phone TEXT,
            website TEXT,
            category TEXT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Stores records in the `business_records` table, tagged with the run id.
pub struct PostgresSink {
    pool: PgPool,
    run_id: String,
}

impl PostgresSink {
    pub async fn new(db_url: &str, run_id: Uuid) -> Result<Self, SinkError> {
        let pool = connect(db_url).await?;
        init_db(&pool).await?;
        Ok(Self {
            pool,
            run_id: run_id.to_string(),
        })
    }
}

#[async_trait]
impl RecordSink for PostgresSink {
    async fn append(&self, record: &BusinessRecord) -> Result<(), SinkError> {
        sqlx::query(
            "INSERT INTO business_records (run_id, url, name, address, rating, reviews, phone, website, category) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        )
        .bind(&self.run_id)
        .bind(&record.url)
        .bind(&record.name)
        .bind(&record.address)
        .bind(&record.rating)
        .bind(&record.reviews)
        .bind(&record.phone)
        .bind(&record.website)
        .bind(&record.category)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
