//! SQLite-backed [`LogStore`] implementation.
//!
//! Appends each completed exchange to the `exchange_logs` table, which
//! is auto-created on first connection. The store never updates or
//! deletes rows; [`SqliteLogStore::recent`] exists for the `logs`
//! subcommand.

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use super::{unix_micros, ExchangeRecord, LogStore};
use crate::error::TapwireError;

fn db_error(e: sqlx::Error) -> TapwireError {
    TapwireError::Database {
        backend: "sqlite",
        source: Box::new(e),
    }
}

/// A persisted row, as read back by [`SqliteLogStore::recent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct StoredExchange {
    pub id: i64,
    pub request_url: String,
    pub request_method: String,
    pub request_time: i64,
    pub response_time: i64,
    pub status_code: Option<i64>,
    pub request_content: Option<String>,
    pub response_header: String,
    pub response_content: String,
    pub tenant: Option<String>,
}

pub struct SqliteLogStore {
    pool: SqlitePool,
}

impl SqliteLogStore {
    pub async fn open(path: &Path) -> Result<Self, TapwireError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await.map_err(db_error)?;
        Self::with_pool(pool).await
    }

    /// Private in-memory database; one connection so every query sees it.
    pub async fn in_memory() -> Result<Self, TapwireError> {
        let options = SqliteConnectOptions::new().in_memory(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(db_error)?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, TapwireError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS exchange_logs (\
                id INTEGER PRIMARY KEY AUTOINCREMENT, \
                request_url TEXT NOT NULL, \
                request_method TEXT NOT NULL, \
                request_time INTEGER NOT NULL, \
                response_time INTEGER NOT NULL, \
                status_code INTEGER, \
                request_content TEXT, \
                response_header TEXT NOT NULL, \
                response_content TEXT NOT NULL, \
                tenant TEXT\
            )",
        )
        .execute(&pool)
        .await
        .map_err(db_error)?;

        Ok(Self { pool })
    }

    /// Most recent rows first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<StoredExchange>, TapwireError> {
        sqlx::query_as::<_, StoredExchange>(
            "SELECT id, request_url, request_method, request_time, response_time, \
                    status_code, request_content, response_header, response_content, tenant \
             FROM exchange_logs ORDER BY id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }
}

#[async_trait]
impl LogStore for SqliteLogStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn append(&self, record: &ExchangeRecord) -> Result<i64, TapwireError> {
        let result = sqlx::query(
            "INSERT INTO exchange_logs (\
                request_url, request_method, request_time, response_time, status_code, \
                request_content, response_header, response_content, tenant\
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.request_url)
        .bind(record.request_method.as_str())
        .bind(unix_micros(record.started_at))
        .bind(record.elapsed_micros())
        .bind(record.status_code.map(i64::from))
        .bind(record.request_body.as_deref())
        .bind(record.response_headers_json())
        .bind(&record.response_body)
        .bind(record.tenant.as_deref())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.last_insert_rowid())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use axum::http::Method;

    use super::*;

    fn record(url: &str, body: Option<&str>) -> ExchangeRecord {
        let mut record = ExchangeRecord::open(
            url.into(),
            Method::POST,
            UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        );
        record.elapsed = Duration::from_micros(1_500);
        record.status_code = Some(201);
        record.request_body = body.map(String::from);
        record.response_headers = vec![("x-a".into(), "1".into()), ("x-a".into(), "2".into())];
        record.response_body = "done".into();
        record.tenant = Some("inst-7".into());
        record
    }

    #[tokio::test]
    async fn appends_and_reads_back() {
        let store = SqliteLogStore::in_memory().await.unwrap();
        let first = store
            .append(&record("https://a/one", Some(r#"{"q":1}"#)))
            .await
            .unwrap();
        let second = store.append(&record("https://a/two", None)).await.unwrap();
        assert!(second > first);

        let rows = store.recent(10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].request_url, "https://a/two");
        assert_eq!(rows[0].request_content, None);
        assert_eq!(rows[1].request_content.as_deref(), Some(r#"{"q":1}"#));
        assert_eq!(rows[1].request_method, "POST");
        assert_eq!(rows[1].request_time, 1_700_000_000_000_000);
        assert_eq!(rows[1].response_time, 1_500);
        assert_eq!(rows[1].status_code, Some(201));
        assert_eq!(rows[1].response_header, r#"[["x-a","1"],["x-a","2"]]"#);
        assert_eq!(rows[1].tenant.as_deref(), Some("inst-7"));
    }

    #[tokio::test]
    async fn recent_honours_limit() {
        let store = SqliteLogStore::in_memory().await.unwrap();
        for i in 0..5 {
            store
                .append(&record(&format!("https://a/{i}"), None))
                .await
                .unwrap();
        }
        let rows = store.recent(2).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].request_url, "https://a/4");
    }
}
