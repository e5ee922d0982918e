use std::collections::HashSet;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use bb8::{Pool, PooledConnection, RunError};
use bb8_postgres::PostgresConnectionManager;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::blockchain::Blockchain;
use crate::chain::RawTransaction;
use crate::error::{CrawlerError, Result};
use crate::store::LabelStore;
use crate::types::{tx_hash_hex, LabelRecord};

/// DDL applied at startup when no custom schema file is configured
pub const DEFAULT_SCHEMA: &str = include_str!("../../schema/init.sql");

type PgPool = Pool<PostgresConnectionManager<NoTls>>;
type PgConnection<'a> = PooledConnection<'a, PostgresConnectionManager<NoTls>>;

/// Postgres-backed store. Every operation checks out its own pooled
/// connection, so runs on different labels never wait on each other's
/// statements; `statement_timeout` bounds the statement only, not the checkout.
pub struct PgStore {
    pool: PgPool,
    statement_timeout: Duration,
}

pub async fn connect_pg(dsn: &str, schema: &str, pool_size: u32) -> Result<PgPool> {
    let config = dsn
        .parse::<tokio_postgres::Config>()
        .map_err(|e| CrawlerError::Config(format!("Invalid Postgres DSN: {}", e)))?;
    let manager = PostgresConnectionManager::new(config, NoTls);
    let pool = Pool::builder().max_size(pool_size.max(1)).build(manager).await?;

    {
        let conn = pool.get().await.map_err(checkout_error)?;
        conn.batch_execute(schema).await?;
    }

    info!("PostgreSQL ready, pool of {} connections", pool_size.max(1));

    Ok(pool)
}

fn checkout_error(e: RunError<tokio_postgres::Error>) -> CrawlerError {
    match e {
        RunError::User(e) => CrawlerError::Store(format!("Cannot open a pooled connection: {}", e)),
        RunError::TimedOut => CrawlerError::Store("Timed out waiting for a pooled connection".to_string()),
    }
}

/// Block numbers and timestamps are stored as BIGINT
fn to_bigint(value: u64, column: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| CrawlerError::Validation(format!("{} {} does not fit in BIGINT", column, value)))
}

fn from_bigint(value: i64, column: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| CrawlerError::Store(format!("Negative {} in store: {}", column, value)))
}

impl PgStore {
    pub async fn connect(dsn: &str, schema: Option<&str>, pool_size: u32, statement_timeout: Duration) -> Result<Self> {
        let pool = connect_pg(dsn, schema.unwrap_or(DEFAULT_SCHEMA), pool_size).await?;
        Ok(Self {
            pool,
            statement_timeout,
        })
    }

    async fn connection(&self) -> Result<PgConnection<'_>> {
        self.pool.get().await.map_err(checkout_error)
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.statement_timeout, fut)
            .await
            .map_err(|_| CrawlerError::Timeout {
                operation: operation.to_string(),
                secs: self.statement_timeout.as_secs(),
            })?
    }
}

fn parse_column<T: FromStr>(row: &Row, column: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>()
        .map_err(|e| CrawlerError::Store(format!("Bad value in column {}: {} ({})", column, raw, e)))
}

fn parse_optional_column<T: FromStr>(row: &Row, column: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|value| {
        value
            .parse::<T>()
            .map_err(|e| CrawlerError::Store(format!("Bad value in column {}: {} ({})", column, value, e)))
    })
    .transpose()
}

fn transaction_from_row(row: &Row) -> Result<RawTransaction> {
    let block_number: i64 = row.try_get("block_number")?;
    Ok(RawTransaction {
        hash: parse_column::<B256>(row, "hash")?,
        block_number: from_bigint(block_number, "block_number")?,
        from: parse_column::<Address>(row, "from_address")?,
        to: parse_optional_column::<Address>(row, "to_address")?,
        input: parse_optional_column::<Bytes>(row, "input")?.unwrap_or_default(),
        gas_price: parse_optional_column::<u128>(row, "gas_price")?.unwrap_or_default(),
        max_fee_per_gas: parse_optional_column::<u128>(row, "max_fee_per_gas")?,
        max_priority_fee_per_gas: parse_optional_column::<u128>(row, "max_priority_fee_per_gas")?,
    })
}

#[async_trait]
impl LabelStore for PgStore {
    async fn block_timestamps(&self, blockchain: Blockchain, from_block: u64, to_block: u64) -> Result<Vec<(u64, u64)>> {
        let query = format!(
            "SELECT block_number, timestamp FROM {} WHERE block_number >= $1 AND block_number <= $2 ORDER BY block_number ASC",
            blockchain.blocks_table()
        );

        let from_block = to_bigint(from_block, "block_number")?;
        // Ranges may reach past the BIGINT domain; nothing is stored there
        let to_block = i64::try_from(to_block).unwrap_or(i64::MAX);

        let conn = self.connection().await?;
        self.bounded("select block timestamps", async {
            let rows = conn.query(&query, &[&from_block, &to_block]).await?;
            rows.iter()
                .map(|row| -> Result<(u64, u64)> {
                    let number: i64 = row.try_get(0)?;
                    let timestamp: i64 = row.try_get(1)?;
                    Ok((from_bigint(number, "block_number")?, from_bigint(timestamp, "timestamp")?))
                })
                .collect()
        })
        .await
    }

    async fn transactions_by_hash(&self, blockchain: Blockchain, hashes: &[B256]) -> Result<Vec<RawTransaction>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let hex_hashes: Vec<String> = hashes.iter().map(tx_hash_hex).collect();
        let query = format!(
            r#"
            SELECT
                hash,
                block_number,
                from_address,
                to_address,
                input,
                gas_price::TEXT AS gas_price,
                max_fee_per_gas::TEXT AS max_fee_per_gas,
                max_priority_fee_per_gas::TEXT AS max_priority_fee_per_gas
            FROM {}
            WHERE hash = ANY($1)
            "#,
            blockchain.transactions_table()
        );

        let conn = self.connection().await?;
        let txs = self
            .bounded("select transactions", async {
                let rows = conn.query(&query, &[&hex_hashes]).await?;
                rows.iter().map(transaction_from_row).collect::<Result<Vec<_>>>()
            })
            .await?;

        debug!("Found {} of {} transactions in {}", txs.len(), hashes.len(), blockchain.transactions_table());
        Ok(txs)
    }

    async fn existing_function_call_hashes(
        &self,
        blockchain: Blockchain,
        label_name: &str,
        hashes: &[String],
    ) -> Result<HashSet<String>> {
        if hashes.is_empty() {
            return Ok(HashSet::new());
        }
        let query = format!(
            "SELECT DISTINCT transaction_hash FROM {} WHERE label = $1 AND log_index IS NULL AND transaction_hash = ANY($2)",
            blockchain.labels_table()
        );

        let conn = self.connection().await?;
        self.bounded("select existing function calls", async {
            let rows = conn.query(&query, &[&label_name, &hashes]).await?;
            rows.iter()
                .map(|row| row.try_get::<_, String>(0).map_err(CrawlerError::from))
                .collect()
        })
        .await
    }

    async fn max_labeled_block(
        &self,
        blockchain: Blockchain,
        label_name: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Option<u64>> {
        let query = format!(
            "SELECT MAX(block_number) FROM {} WHERE label = $1 AND block_number >= $2 AND block_number <= $3",
            blockchain.labels_table()
        );

        let from_block = to_bigint(from_block, "block_number")?;
        let to_block = i64::try_from(to_block).unwrap_or(i64::MAX);

        let conn = self.connection().await?;
        self.bounded("select checkpoint", async {
            let row = conn.query_one(&query, &[&label_name, &from_block, &to_block]).await?;
            let max: Option<i64> = row.try_get(0)?;
            max.map(|b| from_bigint(b, "block_number")).transpose()
        })
        .await
    }

    async fn write_labels(&self, blockchain: Blockchain, records: &[LabelRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let query = format!(
            r#"
            INSERT INTO {} (
                id,
                label,
                label_data,
                address,
                block_number,
                transaction_hash,
                block_timestamp,
                log_index
            ) VALUES ($1, $2, $3::jsonb, $4, $5, $6, $7, $8)
            "#,
            blockchain.labels_table()
        );

        let rows = records
            .iter()
            .map(|record| -> Result<(serde_json::Value, i64, i64, Option<i32>)> {
                let log_index = record
                    .log_index
                    .map(|i| {
                        i32::try_from(i).map_err(|_| CrawlerError::Validation(format!("log_index {} does not fit in INTEGER", i)))
                    })
                    .transpose()?;
                Ok((
                    serde_json::to_value(&record.label_data)?,
                    to_bigint(record.block_number, "block_number")?,
                    to_bigint(record.block_timestamp, "block_timestamp")?,
                    log_index,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        // The transaction rolls back when dropped, so an error or a timeout
        // mid-batch leaves no rows behind.
        let mut conn = self.connection().await?;
        self.bounded("insert labels", async {
            let tx = conn.transaction().await?;
            let statement = tx.prepare(&query).await?;

            for (record, (label_data, block_number, block_timestamp, log_index)) in records.iter().zip(&rows) {
                tx.execute(
                    &statement,
                    &[
                        &Uuid::new_v4(),
                        &record.label_name,
                        label_data,
                        &record.address,
                        block_number,
                        &record.transaction_hash,
                        block_timestamp,
                        log_index,
                    ],
                )
                .await?;
            }

            tx.commit().await?;
            Ok(records.len())
        })
        .await
    }
}
