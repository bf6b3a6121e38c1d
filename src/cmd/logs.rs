//! `tapwire logs`: print recently recorded exchanges from SQLite.

use std::time::{Duration, UNIX_EPOCH};

use crate::cli::LogsArgs;
use crate::error::TapwireError;
use crate::recorder::sqlite::{SqliteLogStore, StoredExchange};

pub async fn execute(args: LogsArgs) -> Result<(), TapwireError> {
    if !args.sqlite_path.exists() {
        return Err(TapwireError::Database {
            backend: "sqlite",
            source: format!("no database at {}", args.sqlite_path.display()).into(),
        });
    }

    let store = SqliteLogStore::open(&args.sqlite_path).await?;
    let rows = store.recent(args.limit).await?;

    if args.json {
        for row in &rows {
            let line = serde_json::to_string(row).map_err(|e| TapwireError::Database {
                backend: "sqlite",
                source: Box::new(e),
            })?;
            println!("{line}");
        }
        return Ok(());
    }

    if rows.is_empty() {
        println!("No exchanges recorded in {}", args.sqlite_path.display());
        return Ok(());
    }

    for row in rows.iter().rev() {
        println!("{}", summary_line(row));
    }
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn summary_line(row: &StoredExchange) -> String {
    let status = row
        .status_code
        .map_or_else(|| "---".to_string(), |s| s.to_string());
    let started = u64::try_from(row.request_time)
        .map(|micros| humanize_epoch(UNIX_EPOCH + Duration::from_micros(micros)))
        .unwrap_or_else(|_| row.request_time.to_string());
    let tenant = row
        .tenant
        .as_deref()
        .map_or_else(String::new, |t| format!(" tenant={t}"));

    format!(
        "#{:<6} {started} {:<6} {status} {:>8.1}ms {:>8}B  {}{tenant}",
        row.id,
        row.request_method,
        row.response_time as f64 / 1000.0,
        row.response_content.len(),
        row.request_url,
    )
}

/// Seconds since the epoch with millisecond precision.
fn humanize_epoch(time: std::time::SystemTime) -> String {
    time.duration_since(UNIX_EPOCH)
        .map(|d| format!("{}.{:03}", d.as_secs(), d.subsec_millis()))
        .unwrap_or_default()
}
