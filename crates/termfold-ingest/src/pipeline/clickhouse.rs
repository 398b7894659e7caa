//! ClickHouse sink for aggregated search-term rows.
//!
//! Each batch is one bulk `INSERT` into the configured table. Rows that fail
//! local validation are held back and reported as row-level rejections; any
//! client or server error on the insert itself fails the whole batch as a
//! transport failure.
//!
//! The sink owns a current-thread tokio runtime and blocks on it, so it can
//! be driven from the upload worker thread without an ambient runtime.

use super::sink::{RowSink, SendOutcome, outcome_after_write, partition_valid};
use crate::Result;
use clickhouse::Client;
use termfold_core::OutputRow;
use tokio::runtime::Runtime;

/// Configuration for the ClickHouse sink.
#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    /// ClickHouse server URL (e.g., "http://localhost:8123")
    pub url: String,

    /// Database name
    pub database: String,

    /// Destination table
    pub table: String,

    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            database: "amazon_analytics".to_string(),
            table: "search_terms".to_string(),
            user: None,
            password: None,
        }
    }
}

/// Row sink backed by a ClickHouse table.
pub struct ClickHouseSink {
    client: Client,
    config: ClickHouseConfig,
    runtime: Runtime,
}

impl ClickHouseSink {
    /// Create a new ClickHouse sink.
    pub fn new(config: ClickHouseConfig) -> Result<Self> {
        let mut client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database);
        if let Some(user) = &config.user {
            client = client.with_user(user);
        }
        if let Some(password) = &config.password {
            client = client.with_password(password);
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        tracing::info!(
            "ClickHouse sink initialized: url={}, database={}, table={}",
            config.url,
            config.database,
            config.table
        );

        Ok(Self {
            client,
            config,
            runtime,
        })
    }

    /// Check if ClickHouse is reachable.
    pub fn health_check(&self) -> Result<bool> {
        let result: u8 = self
            .runtime
            .block_on(self.client.query("SELECT 1").fetch_one())?;
        Ok(result == 1)
    }

    async fn insert_rows(
        client: &Client,
        table: &str,
        rows: &[&OutputRow],
    ) -> std::result::Result<(), clickhouse::error::Error> {
        let mut insert = client.insert::<OutputRow>(table)?;
        for row in rows {
            insert.write(*row).await?;
        }
        insert.end().await
    }
}

impl RowSink for ClickHouseSink {
    fn name(&self) -> &'static str {
        "clickhouse"
    }

    fn send(&mut self, batch: &[OutputRow]) -> SendOutcome {
        let (valid, rejected) = partition_valid(batch);

        if !valid.is_empty() {
            let insert = Self::insert_rows(&self.client, &self.config.table, &valid);
            if let Err(e) = self.runtime.block_on(insert) {
                return SendOutcome::TransportFailed {
                    error: e.to_string(),
                };
            }
        }

        outcome_after_write(valid.len(), rejected)
    }
}
