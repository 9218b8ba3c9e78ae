//! The log store: append and streaming range queries over one SQLite database.
//!
//! Appends take the exclusive half of a reader/writer lock for the duration
//! of one insert. Queries read in pages keyed on `(ts, rowid)` and take the
//! shared half only while one page is fetched, so a slow or stalled consumer
//! never holds the lock while rows wait in the channel.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::storage::StorageError;
use crate::storage::db::{SqlitePool, is_memory_location};
use crate::storage::schema::init_schema;
use crate::storage::stream::LogStream;
use crate::storage::types::{LogQuery, LogRecord};

// =============================================================================
// Constants
// =============================================================================

/// Number of rows buffered between the scan task and the consumer.
pub const QUERY_BUFFER_SIZE: usize = 64;

/// Rows fetched per shared lock section of a scan.
pub const QUERY_PAGE_SIZE: usize = 256;

const INSERT_SQL: &str = "INSERT INTO log (ts, device, msg) VALUES (?, ?, ?)";

// Pages continue strictly after the last `(ts, rowid)` delivered. The first
// page starts from `(until, i64::MAX)`, which `ts < until` already covers.
const SELECT_PAGE_SQL: &str = "SELECT rowid, ts, device, msg FROM log \
     WHERE ts >= ? AND ts < ? AND (ts < ? OR (ts = ? AND rowid < ?)) \
     ORDER BY ts DESC, rowid DESC LIMIT ?";

const SELECT_PAGE_DEVICE_SQL: &str = "SELECT rowid, ts, device, msg FROM log \
     WHERE ts >= ? AND ts < ? AND device = ? AND (ts < ? OR (ts = ? AND rowid < ?)) \
     ORDER BY ts DESC, rowid DESC LIMIT ?";

type PageRow = (i64, i64, String, String);

// =============================================================================
// Sink trait
// =============================================================================

/// Destination for captured records.
///
/// Implemented by [`LogStore`]; ingestion is written against this trait so a
/// supervisor can be driven against any sink.
#[async_trait::async_trait]
pub trait RecordSink: Send + Sync + 'static {
    /// Durably store one record.
    async fn append(&self, record: &LogRecord) -> Result<(), StorageError>;
}

// =============================================================================
// Store
// =============================================================================

/// Shared handle to the log database.
///
/// Cloning is cheap; all clones share the same connection pool and lock.
#[derive(Clone)]
pub struct LogStore {
    pool: SqlitePool,
    lock: Arc<RwLock<()>>,
    location: Arc<str>,
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl LogStore {
    /// Open the store at `location`, creating the database if needed.
    ///
    /// `location` is a file path or `:memory:`. The schema is created when the
    /// database is new and verified otherwise.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn open(location: impl AsRef<str>) -> Result<Self, StorageError> {
        let location = location.as_ref();
        let created = is_memory_location(location) || !Path::new(location).exists();

        let pool = SqlitePool::open(location).await?;
        init_schema(pool.inner()).await?;

        if created {
            tracing::info!(location = %location, "Created database");
        } else {
            tracing::info!(location = %location, "Opened database");
        }

        Ok(Self {
            pool,
            lock: Arc::new(RwLock::new(())),
            location: Arc::from(location),
        })
    }

    /// Open a store that must already exist.
    ///
    /// Used by read-only callers so a mistyped path fails instead of leaving
    /// an empty database behind. In-memory locations are always accepted.
    ///
    /// # Errors
    /// Returns [`StorageError::NotFound`] if no database file exists at
    /// `location`.
    pub async fn open_existing(location: impl AsRef<str>) -> Result<Self, StorageError> {
        let location = location.as_ref();
        if is_memory_location(location) {
            return Self::open(location).await;
        }
        if !Path::new(location).is_file() {
            return Err(StorageError::NotFound(location.to_string()));
        }

        let pool = SqlitePool::open_with(location, false).await?;
        init_schema(pool.inner()).await?;
        tracing::info!(location = %location, "Opened database");

        Ok(Self {
            pool,
            lock: Arc::new(RwLock::new(())),
            location: Arc::from(location),
        })
    }

    /// Storage location this store was opened with.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Check if the store has been closed.
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Insert a single record.
    ///
    /// Runs to completion or failure; there is no cancellation.
    pub async fn append(&self, record: &LogRecord) -> Result<(), StorageError> {
        if self.pool.is_closed() {
            return Err(StorageError::Closed);
        }

        let _guard = self.lock.write().await;
        sqlx::query(INSERT_SQL)
            .bind(record.ts)
            .bind(record.device.as_str())
            .bind(record.message.as_str())
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    /// Stream all records matching `query`, newest first.
    ///
    /// Rows are produced by a background scan and handed over one at a time.
    /// If `cancel` is already triggered the stream yields only
    /// [`StorageError::Cancelled`]. Cancelling mid-stream stops delivery at
    /// the next item, which is [`StorageError::Cancelled`].
    ///
    /// The shared lock is held only while a page is read, so appends proceed
    /// while the stream is held open. Rows appended during the scan are not
    /// delivered unless they sort after the last row already handed out.
    pub fn query(&self, query: LogQuery, cancel: CancellationToken) -> LogStream {
        if cancel.is_cancelled() {
            tracing::debug!(?query, "Query cancelled before start");
            return LogStream::cancelled(cancel);
        }

        let (tx, rx) = mpsc::channel(QUERY_BUFFER_SIZE);
        let pool = self.pool.clone();
        let lock = Arc::clone(&self.lock);
        let token = cancel.clone();

        tokio::spawn(async move {
            if let Err(e) = scan(&pool, &lock, query, &token, &tx).await {
                tracing::error!(error = %e, "Query scan failed");
                let _ = tx.send(Err(e)).await;
            }
        });

        LogStream::new(rx, cancel)
    }

    /// Close the store.
    ///
    /// Must only be called once all appends and queries have finished.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!(location = %self.location, "Store closed");
    }
}

#[async_trait::async_trait]
impl RecordSink for LogStore {
    async fn append(&self, record: &LogRecord) -> Result<(), StorageError> {
        LogStore::append(self, record).await
    }
}

/// Run the range scan page by page, forwarding rows until exhaustion,
/// cancellation, or consumer drop. Only database errors are returned.
async fn scan(
    pool: &SqlitePool,
    lock: &RwLock<()>,
    query: LogQuery,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<Result<LogRecord, StorageError>>,
) -> Result<(), StorageError> {
    let LogQuery {
        since,
        until,
        device,
    } = query;
    let mut cursor = (until, i64::MAX);

    loop {
        let page = {
            let _guard = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("Query cancelled");
                    return Ok(());
                }
                _ = tx.closed() => return Ok(()),
                guard = lock.read() => guard,
            };
            fetch_page(pool, since, until, device.as_deref(), cursor).await?
        };
        let last_page = page.len() < QUERY_PAGE_SIZE;

        for (rowid, ts, device, message) in page {
            cursor = (ts, rowid);
            let record = LogRecord { ts, device, message };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("Query cancelled");
                    return Ok(());
                }
                sent = tx.send(Ok(record)) => {
                    if sent.is_err() {
                        return Ok(());
                    }
                }
            }
        }

        if last_page {
            return Ok(());
        }
    }
}

/// Read the next page strictly after `cursor` in `(ts, rowid)` descending
/// order. The statement runs to completion before returning.
async fn fetch_page(
    pool: &SqlitePool,
    since: i64,
    until: i64,
    device: Option<&str>,
    (cursor_ts, cursor_rowid): (i64, i64),
) -> Result<Vec<PageRow>, StorageError> {
    let limit = QUERY_PAGE_SIZE as i64;
    let statement = match device {
        None => sqlx::query_as::<_, PageRow>(SELECT_PAGE_SQL)
            .bind(since)
            .bind(until),
        Some(device) => sqlx::query_as::<_, PageRow>(SELECT_PAGE_DEVICE_SQL)
            .bind(since)
            .bind(until)
            .bind(device),
    };

    let rows = statement
        .bind(cursor_ts)
        .bind(cursor_ts)
        .bind(cursor_rowid)
        .bind(limit)
        .fetch_all(pool.inner())
        .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    async fn seeded_store(count: i64) -> LogStore {
        let store = LogStore::open(":memory:").await.unwrap();
        for i in 0..count {
            store
                .append(&LogRecord::new(1_000 + i, "foo", format!("bar number {i}")))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_append_and_query_newest_first() {
        let store = seeded_store(10).await;

        let records = store
            .query(LogQuery::new(0, i64::MAX), CancellationToken::new())
            .try_collect_all()
            .await
            .unwrap();

        assert_eq!(records.len(), 10);
        assert_eq!(records[0].ts, 1_009);
        assert_eq!(records[0].message, "bar number 9");
        assert!(records.windows(2).all(|w| w[0].ts > w[1].ts));

        store.close().await;
    }

    #[tokio::test]
    async fn test_query_range_is_half_open() {
        let store = seeded_store(10).await;

        let records = store
            .query(LogQuery::new(1_002, 1_005), CancellationToken::new())
            .try_collect_all()
            .await
            .unwrap();

        let ts: Vec<i64> = records.iter().map(|r| r.ts).collect();
        assert_eq!(ts, vec![1_004, 1_003, 1_002]);
    }

    #[tokio::test]
    async fn test_equal_timestamps_ordered_by_storage() {
        let store = LogStore::open(":memory:").await.unwrap();
        for device in ["a", "b", "c"] {
            store
                .append(&LogRecord::new(5, device, "same"))
                .await
                .unwrap();
        }

        let devices: Vec<String> = store
            .query(LogQuery::new(0, 10), CancellationToken::new())
            .try_collect_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.device)
            .collect();
        assert_eq!(devices, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_query_cancelled_before_start() {
        let store = seeded_store(10).await;
        let token = CancellationToken::new();
        token.cancel();

        let mut stream = store.query(LogQuery::new(0, i64::MAX), token);
        let first = stream.next().await.unwrap();
        assert!(first.unwrap_err().is_cancelled());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_query_cancelled_mid_stream_releases_lock() {
        let store = seeded_store(10).await;
        let token = CancellationToken::new();
        let mut stream = store.query(LogQuery::new(0, i64::MAX), token.clone());

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.ts, 1_009);
        token.cancel();

        assert!(stream.next().await.unwrap().unwrap_err().is_cancelled());
        assert!(stream.next().await.is_none());
        drop(stream);

        // The scan has released the read lock, so appends proceed.
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            store.append(&LogRecord::new(2_000, "foo", "after")),
        )
        .await
        .expect("append blocked by a cancelled query")
        .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_stream_releases_lock() {
        let store = seeded_store(QUERY_BUFFER_SIZE as i64 * 3).await;

        let mut stream = store.query(LogQuery::new(0, i64::MAX), CancellationToken::new());
        stream.next().await.unwrap().unwrap();
        drop(stream);

        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            store.append(&LogRecord::new(9_999, "foo", "after drop")),
        )
        .await
        .expect("append blocked by a dropped query")
        .unwrap();
    }

    #[tokio::test]
    async fn test_stalled_consumer_does_not_block_append() {
        let total = (QUERY_BUFFER_SIZE + QUERY_PAGE_SIZE) as i64 * 2;
        let store = seeded_store(total).await;

        let mut stream = store.query(LogQuery::new(0, 5_000), CancellationToken::new());
        stream.next().await.unwrap().unwrap();

        // Give the scan time to fill the channel and park on a full send.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            store.append(&LogRecord::new(4_000, "foo", "while paused")),
        )
        .await
        .expect("append blocked by an idle query stream")
        .unwrap();

        // The new row sorts before the scan position and is not delivered.
        let rest = stream.try_collect_all().await.unwrap();
        assert_eq!(rest.len() as i64, total - 1);
        assert!(rest.iter().all(|r| r.message != "while paused"));
    }

    #[tokio::test]
    async fn test_scan_pages_through_equal_timestamps() {
        let store = LogStore::open(":memory:").await.unwrap();
        let total = QUERY_PAGE_SIZE * 2 + 5;
        for i in 0..total {
            store
                .append(&LogRecord::new(7, "foo", i.to_string()))
                .await
                .unwrap();
        }

        let lines: Vec<usize> = store
            .query(LogQuery::new(0, 10), CancellationToken::new())
            .try_collect_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.message.parse().unwrap())
            .collect();

        let expected: Vec<usize> = (0..total).rev().collect();
        assert_eq!(lines, expected);
    }

    #[tokio::test]
    async fn test_device_filter_across_pages() {
        let store = LogStore::open(":memory:").await.unwrap();
        for i in 0..QUERY_PAGE_SIZE as i64 * 3 {
            let device = if i % 3 == 0 { "a" } else { "b" };
            store
                .append(&LogRecord::new(i, device, i.to_string()))
                .await
                .unwrap();
        }

        let records = store
            .query(
                LogQuery::new(0, i64::MAX).with_device("a"),
                CancellationToken::new(),
            )
            .try_collect_all()
            .await
            .unwrap();

        assert_eq!(records.len(), QUERY_PAGE_SIZE);
        assert!(records.iter().all(|r| r.device == "a"));
        assert!(records.windows(2).all(|w| w[0].ts > w[1].ts));
    }

    #[tokio::test]
    async fn test_open_unopenable_location_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("nested").join("log.db");

        let err = LogStore::open(path.to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, StorageError::Database(_)));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_open_existing_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("typo.db");
        let location = path.to_str().unwrap();

        let err = LogStore::open_existing(location).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(ref l) if l == location));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_open_existing_reads_created_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db");
        let location = path.to_str().unwrap();

        let store = LogStore::open(location).await.unwrap();
        store.append(&LogRecord::new(3, "foo", "kept")).await.unwrap();
        store.close().await;

        let store = LogStore::open_existing(location).await.unwrap();
        let records = store
            .query(LogQuery::new(0, 10), CancellationToken::new())
            .try_collect_all()
            .await
            .unwrap();
        assert_eq!(records, vec![LogRecord::new(3, "foo", "kept")]);
        store.close().await;

        assert!(LogStore::open_existing(":memory:").await.is_ok());
    }

    #[tokio::test]
    async fn test_append_after_close_fails() {
        let store = LogStore::open(":memory:").await.unwrap();
        store.close().await;
        assert!(store.is_closed());

        let err = store
            .append(&LogRecord::new(1, "foo", "late"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Closed));
    }

    #[tokio::test]
    async fn test_reopen_file_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db");
        let location = path.to_str().unwrap();

        let store = LogStore::open(location).await.unwrap();
        store
            .append(&LogRecord::new(1, "foo", "persisted"))
            .await
            .unwrap();
        store.close().await;

        let store = LogStore::open(location).await.unwrap();
        let records = store
            .query(LogQuery::new(0, 10), CancellationToken::new())
            .try_collect_all()
            .await
            .unwrap();
        assert_eq!(records, vec![LogRecord::new(1, "foo", "persisted")]);
        store.close().await;
    }
}
