//! Held-cursor pool.
//!
//! A [`CursorPool`] maps an opaque cursor id to a server-side
//! `SCROLL CURSOR WITH HOLD`, so consecutive requests can page through one
//! result set without `OFFSET` or keyset predicates.
//!
//! ## Locking
//!
//! - The id → session table is a `DashMap`. Every insert, lookup and delete
//!   goes through it; no reference into the map is held across an `.await`.
//! - Each session sits behind its own async mutex. Declaring, fetching,
//!   expiring and shutting down all hold that mutex while they touch the
//!   session or its cursor, so fetches on one id are serialized while
//!   different ids proceed in parallel.
//! - Retirement is one-way: the first of exhaustion, failure, expiry,
//!   replacement or shutdown to see a live session closes the cursor. The
//!   others find it `Retired` and do nothing.

use crate::config::{CLOSE_TIMEOUT, PoolConfig};
use crate::engine::{Executor, Param, Row};
use crate::error::{CursorError, CursorResult};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;

/// Strip everything outside `[A-Za-z0-9]`.
///
/// The result is spliced into statement text as part of the cursor name,
/// so nothing else may get through.
pub fn sanitize_id(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// Statement text for cursor commands. Cursor names are `_` + sanitized id.
mod statement {
    pub fn declare(id: &str, sql: &str) -> String {
        let sql = sql.trim().trim_end_matches(';');
        format!("DECLARE _{id} SCROLL CURSOR WITH HOLD FOR {sql}")
    }

    pub fn move_to_end(id: &str) -> String {
        format!("MOVE FORWARD ALL IN _{id}")
    }

    pub fn rewind(id: &str) -> String {
        format!("MOVE ABSOLUTE 0 IN _{id}")
    }

    pub fn fetch(count: usize, id: &str) -> String {
        format!("FETCH {count} FROM _{id}")
    }

    pub fn close(id: &str) -> String {
        format!("CLOSE _{id}")
    }
}

/// One page of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub rows: Vec<Row>,
    /// `false` once the cursor is exhausted. The session is gone by then.
    pub more: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Declaring,
    Open,
    /// A round trip is in flight. Seeing this at the start of a fetch means
    /// the previous fetch was dropped midway.
    Fetching,
    Retired,
}

#[derive(Debug, Clone, Copy)]
enum Retirement {
    Exhausted,
    Expired,
    Failed,
    Replaced,
    Shutdown,
}

impl Retirement {
    fn as_str(self) -> &'static str {
        match self {
            Self::Exhausted => "exhausted",
            Self::Expired => "expired",
            Self::Failed => "failed",
            Self::Replaced => "replaced",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug)]
struct Session {
    id: String,
    remaining: i64,
    state: SessionState,
    expiry: Option<AbortHandle>,
}

impl Session {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            remaining: 0,
            state: SessionState::Declaring,
            expiry: None,
        }
    }
}

type SessionRef = Arc<Mutex<Session>>;

/// Pool of held cursors bound to one [`Executor`].
///
/// Cloning is cheap; clones share the same sessions.
pub struct CursorPool<E: Executor> {
    inner: Arc<Inner<E>>,
}

impl<E: Executor> Clone for CursorPool<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<E> {
    executor: E,
    sessions: DashMap<String, SessionRef>,
    config: PoolConfig,
    closed: AtomicBool,
}

impl<E: Executor> CursorPool<E> {
    /// Create a pool with the default configuration.
    pub fn new(executor: E) -> Self {
        Self::with_config(executor, PoolConfig::default())
    }

    pub fn with_config(executor: E, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                sessions: DashMap::new(),
                config,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn executor(&self) -> &E {
        &self.inner.executor
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Rows not yet delivered for a live session.
    pub async fn remaining(&self, raw_id: &str) -> Option<i64> {
        let handle = self.inner.lookup(&sanitize_id(raw_id))?;
        let session = handle.lock().await;
        (session.state != SessionState::Retired).then_some(session.remaining)
    }

    /// Declare a held cursor over `sql` and register it under `raw_id`.
    ///
    /// Returns the sanitized id clients should send back to [`fetch`].
    /// A live session already registered under the same id is closed and
    /// replaced.
    ///
    /// [`fetch`]: CursorPool::fetch
    pub async fn declare(&self, raw_id: &str, sql: &str, params: &[Param]) -> CursorResult<String> {
        let id = sanitize_id(raw_id);
        if id.is_empty() {
            return Err(CursorError::InvalidIdentifier(raw_id.to_string()));
        }
        if self.inner.is_closed() {
            return Err(CursorError::Closed);
        }

        let handle: SessionRef = Arc::new(Mutex::new(Session::new(&id)));
        let mut session = Arc::clone(&handle).lock_owned().await;

        if let Some(previous) = self.inner.sessions.insert(id.clone(), Arc::clone(&handle)) {
            let mut old = previous.lock().await;
            if let Err(e) = self.inner.retire(&mut old, &previous, Retirement::Replaced).await {
                tracing::warn!("Failed to close replaced cursor: {}", e);
            }
        }

        // close() may have drained the table between the check above and the insert
        if self.inner.is_closed() {
            self.inner.discard(&mut session, &handle);
            return Err(CursorError::Closed);
        }

        // scheduled up front so an abandoned declaration is still reclaimed
        session.expiry = Some(self.schedule_expiry(&id, &handle));

        let timeout = self.inner.config.round_trip_timeout();

        let declared = tokio::time::timeout(
            timeout,
            self.inner.executor.execute(&statement::declare(&id, sql), params),
        )
        .await;
        match declared {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                self.inner.discard(&mut session, &handle);
                return Err(CursorError::declare(&id, e.to_string()));
            }
            Err(_) => {
                // the statement may still complete on the server after we stop waiting
                if let Err(e) = self.inner.retire(&mut session, &handle, Retirement::Failed).await {
                    tracing::warn!("Failed to close timed out declaration: {}", e);
                }
                return Err(CursorError::declare(&id, timed_out(timeout)));
            }
        }

        let total = match self.inner.measure(&id).await {
            Ok(total) => total,
            Err(message) => {
                if let Err(e) = self.inner.retire(&mut session, &handle, Retirement::Failed).await {
                    tracing::warn!("Failed to close unmeasured cursor: {}", e);
                }
                return Err(CursorError::measure(&id, message));
            }
        };

        session.remaining = total;
        session.state = SessionState::Open;

        tracing::info!("Declared cursor {} ({} rows)", id, total);
        Ok(id)
    }

    /// Fetch the next page into `dst`.
    ///
    /// `page_size` of zero or above the configured ceiling means the ceiling.
    /// Returns whether more rows remain. On `false`, or on any error, the
    /// session is closed and later calls get [`CursorError::SessionNotFound`].
    pub async fn fetch<T, D>(&self, dst: &mut D, raw_id: &str, page_size: usize) -> CursorResult<bool>
    where
        T: DeserializeOwned,
        D: Extend<T>,
    {
        let (items, more) = self.fetch_with(raw_id, page_size, decode::<T>).await?;
        dst.extend(items);
        Ok(more)
    }

    /// Fetch the next page as raw rows.
    pub async fn fetch_rows(&self, raw_id: &str, page_size: usize) -> CursorResult<Page> {
        let (rows, more) = self.fetch_with(raw_id, page_size, Ok).await?;
        Ok(Page { rows, more })
    }

    async fn fetch_with<R>(
        &self,
        raw_id: &str,
        page_size: usize,
        decode: impl FnOnce(Vec<Row>) -> Result<R, String>,
    ) -> CursorResult<(R, bool)> {
        let id = sanitize_id(raw_id);
        if id.is_empty() {
            return Err(CursorError::InvalidIdentifier(raw_id.to_string()));
        }
        let page_size = self.inner.config.page_size(page_size);

        let handle = self
            .inner
            .lookup(&id)
            .ok_or_else(|| CursorError::SessionNotFound(id.clone()))?;
        let mut session = handle.lock().await;

        match session.state {
            SessionState::Open => {}
            SessionState::Fetching => {
                if let Err(e) = self.inner.retire(&mut session, &handle, Retirement::Failed).await {
                    tracing::warn!("Failed to close interrupted cursor: {}", e);
                }
                return Err(CursorError::fetch(&id, "previous fetch was interrupted"));
            }
            SessionState::Declaring => {
                // declare() holds the lock until it finishes, so this one was dropped
                if let Err(e) = self.inner.retire(&mut session, &handle, Retirement::Failed).await {
                    tracing::debug!("Abandoned cursor had nothing to close: {}", e);
                }
                return Err(CursorError::SessionNotFound(id));
            }
            SessionState::Retired => return Err(CursorError::SessionNotFound(id)),
        }

        session.state = SessionState::Fetching;
        let pulled = run(
            self.inner.config.round_trip_timeout(),
            self.inner.executor.query(&statement::fetch(page_size, &id)),
        )
        .await;

        let decoded = pulled.and_then(|rows| {
            let count = rows.len() as i64;
            decode(rows).map(|items| (items, count))
        });
        let (items, count) = match decoded {
            Ok(page) => page,
            Err(message) => {
                if let Err(e) = self.inner.retire(&mut session, &handle, Retirement::Failed).await {
                    tracing::warn!("Failed to close cursor after fetch error: {}", e);
                }
                return Err(CursorError::fetch(&id, message));
            }
        };

        session.remaining = (session.remaining - count).max(0);
        session.state = SessionState::Open;

        // an empty page means the cursor is spent whatever the count says
        let more = session.remaining > 0 && count > 0;
        if !more {
            if let Err(e) = self.inner.retire(&mut session, &handle, Retirement::Exhausted).await {
                tracing::warn!("Failed to close exhausted cursor: {}", e);
            }
        }

        tracing::debug!("Fetched {} rows from cursor {} (more: {})", count, id, more);
        Ok((items, more))
    }

    /// Close every live cursor and refuse further declarations.
    ///
    /// Individual close failures are collected into
    /// [`CursorError::CloseFailed`].
    pub async fn close(&self) -> CursorResult<()> {
        self.inner.closed.store(true, Ordering::Release);

        let ids: Vec<String> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let mut failures = Vec::new();
        for id in ids {
            let Some((_, handle)) = self.inner.sessions.remove(&id) else {
                continue;
            };
            let mut session = handle.lock().await;
            if let Err(e) = self.inner.retire(&mut session, &handle, Retirement::Shutdown).await {
                tracing::warn!("Failed to close cursor on shutdown: {}", e);
                failures.push(e);
            }
        }

        if failures.is_empty() {
            tracing::info!("Cursor pool closed");
            Ok(())
        } else {
            Err(CursorError::CloseFailed(failures))
        }
    }

    fn schedule_expiry(&self, id: &str, handle: &SessionRef) -> AbortHandle {
        let pool = Arc::downgrade(&self.inner);
        let session = Arc::downgrade(handle);
        let ttl = self.inner.config.session_ttl();
        let id = id.to_string();

        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let (Some(pool), Some(session)) = (pool.upgrade(), session.upgrade()) {
                pool.expire(&id, &session).await;
            }
        })
        .abort_handle()
    }
}

impl<E: Executor> Inner<E> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn lookup(&self, id: &str) -> Option<SessionRef> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Drop `handle` from the table if it is still the entry for its id.
    fn unlink(&self, id: &str, handle: &SessionRef) {
        self.sessions.remove_if(id, |_, current| Arc::ptr_eq(current, handle));
    }

    /// Retire a session whose cursor was never created.
    fn discard(&self, session: &mut Session, handle: &SessionRef) {
        session.state = SessionState::Retired;
        self.unlink(&session.id, handle);
        if let Some(expiry) = session.expiry.take() {
            expiry.abort();
        }
    }

    async fn measure(&self, id: &str) -> Result<i64, String> {
        let timeout = self.config.round_trip_timeout();
        let total = run(timeout, self.executor.execute(&statement::move_to_end(id), &[])).await?;
        run(timeout, self.executor.execute(&statement::rewind(id), &[])).await?;
        Ok(i64::try_from(total).unwrap_or(i64::MAX))
    }

    /// Retire a session and close its cursor.
    ///
    /// `Ok(false)` means someone else already retired it.
    async fn retire(
        &self,
        session: &mut Session,
        handle: &SessionRef,
        cause: Retirement,
    ) -> Result<bool, String> {
        if session.state == SessionState::Retired {
            return Ok(false);
        }
        session.state = SessionState::Retired;
        self.unlink(&session.id, handle);

        // the expiry task must not abort itself mid-close
        if let Some(expiry) = session.expiry.take() {
            if !matches!(cause, Retirement::Expired) {
                expiry.abort();
            }
        }

        tracing::debug!(
            "Closing cursor {} ({}, {} rows left)",
            session.id,
            cause.as_str(),
            session.remaining
        );

        run(CLOSE_TIMEOUT, self.executor.execute(&statement::close(&session.id), &[]))
            .await
            .map(|_| true)
            .map_err(|e| format!("_{}: {}", session.id, e))
    }

    async fn expire(&self, id: &str, handle: &SessionRef) {
        if self
            .sessions
            .remove_if(id, |_, current| Arc::ptr_eq(current, handle))
            .is_none()
        {
            return;
        }

        let mut session = handle.lock().await;
        match self.retire(&mut session, handle, Retirement::Expired).await {
            Ok(true) => tracing::info!("Cursor {} expired", id),
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to close expired cursor: {}", e),
        }
    }
}

async fn run<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T, sqlx::Error>>,
) -> Result<T, String> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(_) => Err(timed_out(timeout)),
    }
}

fn timed_out(timeout: Duration) -> String {
    format!("timed out after {}s", timeout.as_secs())
}

fn decode<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, String> {
    rows.into_iter()
        .map(|row| serde_json::from_value(serde_json::Value::Object(row)).map_err(|e| e.to_string()))
        .collect()
}
