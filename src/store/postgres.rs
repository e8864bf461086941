//! Postgres adapter for the catalog (read-only) and the display log (owned table).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDate;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use tracing::{debug, info, warn};

use super::{CatalogStore, DisplayLogStore};
use crate::config::CatalogConfig;
use crate::error::StoreError;
use crate::model::{DisplayLogEntry, ImageRecord, MonthDay};
use crate::retry::{Attempt, RetryPolicy};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    assets_table: String,
    log_table: String,
    schema_ready: Arc<AtomicBool>,
}

impl PgStore {
    /// Opens the pool, retrying transient failures with `retry`.
    pub async fn connect(cfg: &CatalogConfig, retry: &RetryPolicy) -> Result<Self, StoreError> {
        let url = cfg
            .resolve_database_url()
            .map_err(|err| StoreError::Unavailable(format!("{err:#}")))?;
        let outcome = retry
            .run("catalog-connect", |attempt| {
                let url = url.clone();
                async move {
                    debug!(attempt, "connecting to catalog database");
                    let res = PgPoolOptions::new()
                        .max_connections(cfg.max_connections)
                        .acquire_timeout(cfg.connect_timeout)
                        .connect(&url)
                        .await;
                    match res {
                        Ok(pool) => Attempt::Ok(pool),
                        Err(err @ sqlx::Error::Configuration(_)) => Attempt::Fatal(err),
                        Err(err) => Attempt::Retryable(err),
                    }
                }
            })
            .await;
        let pool = outcome.into_result()?;
        info!(
            assets = %cfg.assets_table,
            display_log = %cfg.display_log_table,
            "connected to catalog database"
        );
        Ok(Self::from_pool(
            pool,
            cfg.assets_table.clone(),
            cfg.display_log_table.clone(),
        ))
    }

    /// Builds a pool that connects on first use. Used when the database is
    /// down at startup so the frame can come up idle and recover later.
    pub fn connect_lazy(cfg: &CatalogConfig) -> Result<Self, StoreError> {
        let url = cfg
            .resolve_database_url()
            .map_err(|err| StoreError::Unavailable(format!("{err:#}")))?;
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(cfg.connect_timeout)
            .connect_lazy(&url)?;
        warn!("catalog database unreachable; continuing with a lazy pool");
        Ok(Self::from_pool(
            pool,
            cfg.assets_table.clone(),
            cfg.display_log_table.clone(),
        ))
    }

    pub fn from_pool(pool: PgPool, assets_table: String, log_table: String) -> Self {
        Self {
            pool,
            assets_table,
            log_table,
            schema_ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates the display log table and its lookup index when missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                image_id     TEXT NOT NULL,
                display_date DATE NOT NULL,
                device_id    TEXT NOT NULL,
                displayed_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            table = self.log_table
        );
        sqlx::query(&create).execute(&self.pool).await?;

        let index = format!(
            "CREATE INDEX IF NOT EXISTS {name} ON {table} (device_id, image_id, display_date)",
            name = index_name(&self.log_table),
            table = self.log_table
        );
        sqlx::query(&index).execute(&self.pool).await?;
        self.schema_ready.store(true, Ordering::Release);
        debug!(table = %self.log_table, "display log schema ready");
        Ok(())
    }

    async fn schema(&self) -> Result<(), StoreError> {
        if self.schema_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        self.ensure_schema().await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// SQLSTATE `undefined_table`.
const UNDEFINED_TABLE: &str = "42P01";

fn is_undefined_table(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => is_undefined_table_code(db.code().as_deref()),
        _ => false,
    }
}

fn is_undefined_table_code(code: Option<&str>) -> bool {
    code == Some(UNDEFINED_TABLE)
}

fn index_name(table: &str) -> String {
    format!("{}_device_image_idx", table.replace('.', "_"))
}

fn image_from_row(row: &PgRow) -> Result<ImageRecord, StoreError> {
    let storage_key: String = row.try_get("storage_key")?;
    if storage_key.trim().is_empty() {
        return Err(StoreError::Malformed("empty storage key".to_string()));
    }
    Ok(ImageRecord {
        storage_key,
        id: row.try_get("id")?,
        display_name: row.try_get("display_name")?,
        creation_date: row.try_get("creation_date")?,
    })
}

impl CatalogStore for PgStore {
    async fn query_by_month_day(&self, key: MonthDay) -> Result<Vec<ImageRecord>, StoreError> {
        let sql = format!(
            "SELECT uuid::text AS id,
                    COALESCE(name, '') AS display_name,
                    image_proxy_name AS storage_key,
                    creation_date::date AS creation_date
             FROM {table}
             WHERE image_proxy_name IS NOT NULL
               AND image_proxy_name <> ''
               AND to_char(creation_date, 'MM-DD') = $1
             ORDER BY creation_date DESC",
            table = self.assets_table
        );
        let rows = sqlx::query(&sql)
            .bind(key.to_string())
            .fetch_all(&self.pool)
            .await?;
        let records = rows
            .iter()
            .map(image_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(month_day = %key, count = records.len(), "catalog query");
        Ok(records)
    }
}

impl DisplayLogStore for PgStore {
    async fn exists(&self, entry: &DisplayLogEntry) -> Result<bool, StoreError> {
        self.schema().await?;
        let sql = format!(
            "SELECT EXISTS(
                SELECT 1 FROM {table}
                WHERE image_id = $1 AND display_date = $2 AND device_id = $3
            )",
            table = self.log_table
        );
        let row = sqlx::query(&sql)
            .bind(&entry.image_id)
            .bind(entry.display_date)
            .bind(&entry.device_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<bool, _>(0)?)
    }

    async fn insert(&self, entry: &DisplayLogEntry) -> Result<(), StoreError> {
        self.schema().await?;
        let sql = format!(
            "INSERT INTO {table} (image_id, display_date, device_id) VALUES ($1, $2, $3)",
            table = self.log_table
        );
        sqlx::query(&sql)
            .bind(&entry.image_id)
            .bind(entry.display_date)
            .bind(&entry.device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn displayed_since(
        &self,
        image_id: &str,
        threshold: NaiveDate,
        device_id: &str,
    ) -> Result<bool, StoreError> {
        // Read only: the table is created on the write path. Until then
        // nothing has been displayed.
        let sql = format!(
            "SELECT EXISTS(
                SELECT 1 FROM {table}
                WHERE image_id = $1 AND display_date >= $2 AND device_id = $3
            )",
            table = self.log_table
        );
        let res = sqlx::query(&sql)
            .bind(image_id)
            .bind(threshold)
            .bind(device_id)
            .fetch_one(&self.pool)
            .await;
        match res {
            Ok(row) => Ok(row.try_get::<bool, _>(0)?),
            Err(err) if is_undefined_table(&err) => {
                debug!(table = %self.log_table, "display log table not created yet");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}
