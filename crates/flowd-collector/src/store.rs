//! PostgreSQL persistence for flow records
//!
//! [`FlowStore`] wraps one sqlx pool built at startup and shared by every
//! worker behind an `Arc`. Writes go through a single upsert keyed on the
//! flow id: the first write fixes the descriptive columns, later writes only
//! replace `last_seen`, the four counters, and `ndpi`.
//!
//! Reads are limited to diagnostics: one row by id, or a page of
//! [`FlowSummary`] rows, most recently seen first.

use std::time::Duration;

use async_trait::async_trait;
use flowd_common::types::{FlowRecord, Page};
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;

use crate::config::DatabaseConfig;

/// Database operation errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQL execution or connection error
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// The protocol-detection metadata could not be serialized
    #[error("Failed to serialize ndpi metadata: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A counter does not fit the BIGINT column
    #[error("{field} value {value} exceeds the BIGINT range")]
    OutOfRange { field: &'static str, value: u64 },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Destination for decoded flow records.
///
/// Implementations must be safe to call from many workers at once.
#[async_trait]
pub trait FlowSink: Send + Sync + 'static {
    /// Insert the flow, or refresh its accumulating fields if it exists
    async fn upsert(&self, record: &FlowRecord) -> StoreResult<()>;
}

const UPSERT_FLOW: &str = r#"
    INSERT INTO flow_info (
        id, src_ip, dst_ip, src_port, dst_port, ipv, tcp_fingerprint,
        client_os, server_os, proto, src_country, dst_country, src_as, dst_as,
        first_seen, last_seen,
        client_num_pkts, server_num_pkts, client_len_pkts, server_len_pkts,
        ndpi
    )
    VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
        $15, $16, $17, $18, $19, $20, $21::jsonb
    )
    ON CONFLICT (id) DO UPDATE
    SET last_seen = EXCLUDED.last_seen,
        client_num_pkts = EXCLUDED.client_num_pkts,
        server_num_pkts = EXCLUDED.server_num_pkts,
        client_len_pkts = EXCLUDED.client_len_pkts,
        server_len_pkts = EXCLUDED.server_len_pkts,
        ndpi = EXCLUDED.ndpi
"#;

/// A `flow_info` row as stored
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct StoredFlow {
    pub id: String,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: i32,
    pub dst_port: i32,
    pub ipv: i16,
    pub tcp_fingerprint: String,
    pub client_os: String,
    pub server_os: String,
    pub proto: String,
    pub src_country: String,
    pub dst_country: String,
    pub src_as: String,
    pub dst_as: String,
    pub first_seen: String,
    pub last_seen: String,
    pub client_num_pkts: i64,
    pub server_num_pkts: i64,
    pub client_len_pkts: i64,
    pub server_len_pkts: i64,
    pub ndpi: serde_json::Value,
}

/// The listing projection of a `flow_info` row
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct FlowSummary {
    pub id: String,
    pub last_seen: String,
    pub src_ip: String,
    pub dst_ip: String,
    /// `ndpi.proto`, when the DPI engine classified the flow
    pub ndpi_proto: Option<String>,
    /// `ndpi.category`
    pub ndpi_category: Option<String>,
}

/// Handle to the flow database
#[derive(Debug, Clone)]
pub struct FlowStore {
    pool: PgPool,
}

impl FlowStore {
    /// Build the connection pool
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Database connection pool created"
        );

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query to prove the store is reachable
    pub async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(StoreError::from)
    }

    /// Close every pooled connection; later queries fail
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database connection pool closed");
    }

    /// Fetch the stored row for one flow
    pub async fn get(&self, id: &str) -> StoreResult<Option<StoredFlow>> {
        let row = sqlx::query_as::<_, StoredFlow>(
            r#"
            SELECT id, src_ip, dst_ip, src_port, dst_port, ipv, tcp_fingerprint,
                   client_os, server_os, proto, src_country, dst_country, src_as, dst_as,
                   first_seen, last_seen,
                   client_num_pkts, server_num_pkts, client_len_pkts, server_len_pkts,
                   ndpi
            FROM flow_info
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// One page of flows, most recently seen first
    pub async fn list(&self, page: Page) -> StoreResult<Vec<FlowSummary>> {
        let rows = sqlx::query_as::<_, FlowSummary>(
            r#"
            SELECT id, last_seen, src_ip, dst_ip,
                   ndpi->>'proto' AS ndpi_proto,
                   ndpi->>'category' AS ndpi_category
            FROM flow_info
            ORDER BY last_seen DESC, id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Write one observation (see the module docs for the conflict rule)
    pub async fn upsert(&self, record: &FlowRecord) -> StoreResult<()> {
        let ndpi = serde_json::to_string(&record.ndpi)?;

        sqlx::query(UPSERT_FLOW)
            .bind(&record.id)
            .bind(&record.src_ip)
            .bind(&record.dst_ip)
            .bind(i32::from(record.src_port))
            .bind(i32::from(record.dst_port))
            .bind(i16::from(record.ipv))
            .bind(&record.tcp_fingerprint)
            .bind(&record.client_os)
            .bind(&record.server_os)
            .bind(&record.proto)
            .bind(&record.src_country)
            .bind(&record.dst_country)
            .bind(&record.src_as)
            .bind(&record.dst_as)
            .bind(&record.first_seen)
            .bind(&record.last_seen)
            .bind(bigint("client_num_pkts", record.client_num_pkts)?)
            .bind(bigint("server_num_pkts", record.server_num_pkts)?)
            .bind(bigint("client_len_pkts", record.client_len_pkts)?)
            .bind(bigint("server_len_pkts", record.server_len_pkts)?)
            .bind(ndpi)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl FlowSink for FlowStore {
    async fn upsert(&self, record: &FlowRecord) -> StoreResult<()> {
        FlowStore::upsert(self, record).await
    }
}

fn bigint(field: &'static str, value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::OutOfRange { field, value })
}
