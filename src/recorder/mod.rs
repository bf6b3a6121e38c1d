//! Exchange records and their asynchronous persistence.
//!
//! An [`ExchangeRecord`] is opened when a request is accepted, filled in by
//! the relay as the upstream response streams through, and handed to the
//! [`Recorder`] only once the body has been fully observed. The recorder
//! submits each record to a [`LogStore`] on a detached task so the write
//! never delays or alters the client response. Store failures surface as
//! `tracing` errors and a failure counter.

#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::http::Method;

use crate::error::TapwireError;

/// One proxied request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRecord {
    pub request_url: String,
    pub request_method: Method,
    pub started_at: SystemTime,
    pub elapsed: Duration,
    pub status_code: Option<u16>,
    pub request_body: Option<String>,
    pub response_headers: Vec<(String, String)>,
    pub response_body: String,
    pub tenant: Option<String>,
}

/// Microseconds since the Unix epoch, negative for times before it.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn unix_micros(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_micros() as i64,
        Err(before) => -(before.duration().as_micros() as i64),
    }
}

impl ExchangeRecord {
    #[must_use]
    pub fn open(request_url: String, request_method: Method, started_at: SystemTime) -> Self {
        Self {
            request_url,
            request_method,
            started_at,
            elapsed: Duration::ZERO,
            status_code: None,
            request_body: None,
            response_headers: Vec::new(),
            response_body: String::new(),
            tenant: None,
        }
    }

    #[must_use]
    pub fn completed_at(&self) -> SystemTime {
        self.started_at + self.elapsed
    }

    #[must_use]
    pub fn elapsed_micros(&self) -> i64 {
        i64::try_from(self.elapsed.as_micros()).unwrap_or(i64::MAX)
    }

    /// Response headers as a JSON array of `[name, value]` pairs.
    #[must_use]
    pub fn response_headers_json(&self) -> String {
        serde_json::to_string(&self.response_headers).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Append-only persistence for completed exchanges.
// async_trait keeps LogStore object safe for Arc<dyn LogStore>.
#[async_trait]
pub trait LogStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Persist `record`, returning the id assigned by the store.
    async fn append(&self, record: &ExchangeRecord) -> Result<i64, TapwireError>;
}

/// Emits each record as a structured event on the `tapwire::exchange` target.
/// Used when no database is configured.
#[derive(Debug, Default)]
pub struct TracingLogStore {
    next_id: AtomicU64,
}

#[async_trait]
impl LogStore for TracingLogStore {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn append(&self, record: &ExchangeRecord) -> Result<i64, TapwireError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(
            target: "tapwire::exchange",
            id,
            request_url = %record.request_url,
            request_method = %record.request_method,
            request_time = unix_micros(record.started_at),
            response_time = record.elapsed_micros(),
            status_code = record.status_code.unwrap_or(0),
            request_content = record.request_body.as_deref(),
            response_header = %record.response_headers_json(),
            response_content = %record.response_body,
            tenant = record.tenant.as_deref(),
            "exchange recorded"
        );
        Ok(i64::try_from(id).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Default)]
pub struct RecorderStats {
    pub recorded: AtomicU64,
    pub failures: AtomicU64,
}

/// Fire-and-forget front for a [`LogStore`].
#[derive(Clone)]
pub struct Recorder {
    store: Arc<dyn LogStore>,
    stats: Arc<RecorderStats>,
}

impl Recorder {
    #[must_use]
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self {
            store,
            stats: Arc::new(RecorderStats::default()),
        }
    }

    #[must_use]
    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    #[must_use]
    pub fn stats(&self) -> &RecorderStats {
        &self.stats
    }

    /// Schedule `record` for persistence and return immediately.
    ///
    /// The returned handle is only useful to tests and shutdown code; request
    /// handling drops it.
    pub fn record(&self, record: ExchangeRecord) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            match store.append(&record).await {
                Ok(id) => {
                    stats.recorded.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        id,
                        store = store.name(),
                        request_url = %record.request_url,
                        "exchange persisted"
                    );
                }
                Err(e) => {
                    stats.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        store = store.name(),
                        request_url = %record.request_url,
                        error = %e,
                        "failed to persist exchange record"
                    );
                }
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use super::*;

    /// Store that keeps records in memory, or fails every append.
    #[derive(Default)]
    pub struct MemoryStore {
        pub records: Mutex<Vec<ExchangeRecord>>,
        pub fail: bool,
    }

    impl MemoryStore {
        pub fn failing() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn snapshot(&self) -> Vec<ExchangeRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LogStore for MemoryStore {
        fn name(&self) -> &'static str {
            "memory"
        }

        async fn append(&self, record: &ExchangeRecord) -> Result<i64, TapwireError> {
            if self.fail {
                return Err(TapwireError::Database {
                    backend: "memory",
                    source: "simulated store failure".into(),
                });
            }
            let mut records = self.records.lock().unwrap();
            records.push(record.clone());
            Ok(records.len() as i64)
        }
    }
}
