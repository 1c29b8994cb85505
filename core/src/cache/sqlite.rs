//! SQLite-backed response cache with background expiry.
//!
//! One row per cached URL. `expires` is indexed so both the read filter and
//! the sweeper's delete stay cheap as the table grows. Reads never delete;
//! expired rows are simply not returned until the sweeper removes them.

use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use super::{ensure_cacheable, expires_at, Cache, Clock, SystemClock};
use crate::error::CacheError;
use crate::http::{Headers, Request, Response};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS api_cache (
        id TEXT PRIMARY KEY NOT NULL,
        http_code INTEGER NOT NULL,
        body TEXT NOT NULL,
        headers TEXT NOT NULL,
        expires INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_api_cache_expires ON api_cache(expires);
";

/// A [`Cache`] storing documents in a SQLite table.
///
/// Cloning is cheap; clones share the connection.
#[derive(Clone)]
pub struct SqliteCache {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SqliteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCache").finish_non_exhaustive()
    }
}

impl SqliteCache {
    /// Open (or create) the cache database at `path` and declare its schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, CacheError> {
        let cache = Self {
            conn: Arc::new(Mutex::new(conn)),
            clock: Arc::new(SystemClock),
        };
        cache.ensure_indexes()?;
        Ok(cache)
    }

    /// Use `clock` instead of the system clock for expiry decisions.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Declare the cache table and its expiry index. Safe to call repeatedly.
    pub fn ensure_indexes(&self) -> Result<(), CacheError> {
        self.conn.lock().execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Delete every expired document, returning how many were removed.
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = self.clock.now().timestamp();
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM api_cache WHERE expires <= ?1", params![now])?;
        if removed > 0 {
            debug!(removed, "purged expired cache documents");
        }
        Ok(removed)
    }

    /// Number of stored documents, expired or not.
    pub fn len(&self) -> Result<usize, CacheError> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM api_cache", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }

    /// Run [`purge_expired`](Self::purge_expired) every `interval` on a
    /// background thread until the returned handle is stopped or dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> Sweeper {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let cache = self.clone();
        let handle = std::thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    if let Err(err) = cache.purge_expired() {
                        warn!(error = %err, "cache sweep failed");
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        Sweeper {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }
}

impl Cache for SqliteCache {
    fn get(&self, request: &Request) -> Result<Option<Response>, CacheError> {
        ensure_cacheable(request)?;
        let now = self.clock.now().timestamp();

        let row = self
            .conn
            .lock()
            .query_row(
                "SELECT http_code, body, headers FROM api_cache WHERE id = ?1 AND expires > ?2",
                params![request.url(), now],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((http_code, body, headers)) = row else {
            return Ok(None);
        };

        match decode_row(http_code, &body, &headers) {
            Ok(response) => Ok(Some(response)),
            Err(err) => {
                warn!(url = request.url(), error = %err, "dropping undecodable cache entry");
                self.conn
                    .lock()
                    .execute("DELETE FROM api_cache WHERE id = ?1", params![request.url()])?;
                Ok(None)
            }
        }
    }

    fn set(&self, request: &Request, response: &Response) -> Result<(), CacheError> {
        ensure_cacheable(request)?;
        let Some(expires) = expires_at(response)? else {
            return Ok(());
        };

        let body = serde_json::to_string(response.body())?;
        let headers = serde_json::to_string(response.headers())?;

        self.conn.lock().execute(
            "INSERT INTO api_cache (id, http_code, body, headers, expires)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                http_code = excluded.http_code,
                body = excluded.body,
                headers = excluded.headers,
                expires = excluded.expires",
            params![
                request.url(),
                i64::from(response.http_code()),
                body,
                headers,
                expires.timestamp()
            ],
        )?;
        debug!(url = request.url(), %expires, "cached response");
        Ok(())
    }
}

fn decode_row(http_code: i64, body: &str, headers: &str) -> Result<Response, CacheError> {
    let http_code = u16::try_from(http_code).unwrap_or(u16::MAX);
    let headers: Headers = serde_json::from_str(headers)?;
    let body = serde_json::from_str(body)?;
    Ok(Response::new(http_code, headers, body)?)
}

/// Handle to a background sweeper thread. Dropping it stops the thread.
#[derive(Debug)]
pub struct Sweeper {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Stop the sweeper and wait for its thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}
