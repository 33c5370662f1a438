//! Import and Export Orchestration
//!
//! [`Service`] moves data between text and a [`Storage`] backend:
//!
//! - **import** reads address lines and issues one `increment(.., 1)` per
//!   non-empty line
//! - **export** lists every counter and renders `"<address>, count=<n>\n"`
//!   per record
//!
//! ## Modes
//!
//! ```text
//!   Sync                          Async
//!   ────                          ─────
//!   line 1 ──> increment ──┐      line 1 ──> spawn ──┐
//!   line 2 ──> increment ──┤      line 2 ──> spawn ──┤   JoinSet
//!   line 3 ──> increment ──┘      line 3 ──> spawn ──┴─> join all
//!   (stop at first failure)       (every task runs, first failure kept)
//! ```
//!
//! Sync mode keeps input and list order for side effects and output. Async
//! mode only guarantees that every task finished before the call returns.
//! An optional limit caps how many tasks run at once; without it the fan-out
//! is one task per line or record.
//!
//! Dropping an import or export future drops its `JoinSet`, which aborts the
//! tasks still in flight.

use crate::error::{Error, ErrorKind, Result};
use crate::storage::{Record, Storage};
use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

/// Execution strategy for import and export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// One unit of work at a time, in order
    #[default]
    Sync,
    /// One task per unit of work, joined at the end
    Async,
}

impl Mode {
    /// Maps a configuration value to a mode.
    ///
    /// `"async"` selects [`Mode::Async`]; anything else is [`Mode::Sync`].
    pub fn from_config(value: &str) -> Self {
        if value == "async" {
            Mode::Async
        } else {
            Mode::Sync
        }
    }
}

impl FromStr for Mode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Mode::from_config(s))
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Sync => write!(f, "sync"),
            Mode::Async => write!(f, "async"),
        }
    }
}

/// Imports address lines into storage and exports the counters as text.
pub struct Service<S: ?Sized> {
    storage: Arc<S>,
    limit: Option<Arc<Semaphore>>,
}

impl<S: ?Sized> Clone for Service<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            limit: self.limit.clone(),
        }
    }
}

impl<S: Storage + ?Sized + 'static> Service<S> {
    /// Creates a service with unbounded fan-out.
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            limit: None,
        }
    }

    /// Caps the number of concurrently running tasks in async mode.
    ///
    /// A limit of 0 is treated as 1.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.limit = Some(Arc::new(Semaphore::new(limit.max(1))));
        self
    }

    /// Waits for a task slot when a limit is configured.
    async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        let limit = self.limit.as_ref()?;
        // The semaphore is never closed
        Arc::clone(limit).acquire_owned().await.ok()
    }

    /// Reads address lines from `reader` and increments each one's counter.
    ///
    /// Empty lines are skipped; apart from a trailing `\r` nothing is trimmed.
    /// Bytes that are not valid UTF-8 are replaced with U+FFFD, so such a
    /// line is still counted. Returns the elapsed wall-clock time in whole
    /// seconds.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::SetKey`]: an increment failed in sync mode; later lines
    ///   were not processed
    /// - [`ErrorKind::ProcessRecords`]: one or more increments failed in async
    ///   mode; every dispatched increment still ran
    /// - [`ErrorKind::ProcessInputFile`]: reading `reader` failed
    pub async fn import<R>(&self, reader: R, namespace: &str, set: &str, mode: Mode) -> Result<u64>
    where
        R: AsyncBufRead + Unpin,
    {
        let start = Instant::now();
        let namespace: Arc<str> = Arc::from(namespace);
        let set: Arc<str> = Arc::from(set);

        let mut lines = reader.split(b'\n');
        let mut tasks = JoinSet::new();
        let mut dispatched = 0usize;

        let read_result = loop {
            let line = match lines.next_segment().await {
                Ok(Some(raw)) => decode_line(raw),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };
            if line.is_empty() {
                continue;
            }
            dispatched += 1;

            match mode {
                Mode::Sync => {
                    if let Err(e) = self.storage.increment(&namespace, &set, &line, 1).await {
                        warn!(line = dispatched, error = %e, "Increment failed, aborting import");
                        return Err(Error::with_source(ErrorKind::SetKey, e));
                    }
                }
                Mode::Async => {
                    let permit = self.acquire().await;
                    let storage = Arc::clone(&self.storage);
                    let namespace = Arc::clone(&namespace);
                    let set = Arc::clone(&set);
                    tasks.spawn(async move {
                        let _permit = permit;
                        storage.increment(&namespace, &set, &line, 1).await
                    });
                }
            }
        };

        // Dispatched tasks run to completion even if the input broke
        let joined = join_all(&mut tasks).await;

        if let Err(e) = read_result {
            warn!(error = %e, "Failed to read input");
            return Err(Error::with_source(ErrorKind::ProcessInputFile, e));
        }
        joined?;

        let elapsed = start.elapsed().as_secs();
        info!(lines = dispatched, mode = %mode, elapsed, "Import finished");
        Ok(elapsed)
    }

    /// Lists every counter in `namespace`/`set` and renders the report.
    ///
    /// In async mode line order is whatever order the tasks ran in.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::ListRecords`]: listing failed; nothing was rendered
    /// - [`ErrorKind::WriteToBuffer`]: appending a line failed in sync mode
    /// - [`ErrorKind::ProcessRecords`]: a render task failed in async mode
    pub async fn export(&self, namespace: &str, set: &str, mode: Mode) -> Result<String> {
        let records = self
            .storage
            .list(namespace, set)
            .await
            .map_err(|e| Error::with_source(ErrorKind::ListRecords, e))?;
        debug!(records = records.len(), mode = %mode, "Rendering report");

        let report = match mode {
            Mode::Sync => {
                let mut report = String::new();
                for record in &records {
                    render(&mut report, record)
                        .map_err(|e| Error::with_source(ErrorKind::WriteToBuffer, e))?;
                }
                report
            }
            Mode::Async => self.render_concurrently(records).await?,
        };

        info!(bytes = report.len(), "Export finished");
        Ok(report)
    }

    async fn render_concurrently(&self, records: Vec<Record>) -> Result<String> {
        let report = Arc::new(Mutex::new(String::new()));
        let mut tasks = JoinSet::new();

        for record in records {
            let permit = self.acquire().await;
            let report = Arc::clone(&report);
            tasks.spawn(async move {
                let _permit = permit;
                let mut report = report
                    .lock()
                    .map_err(|_| Error::with_source(ErrorKind::WriteToBuffer, "report lock poisoned"))?;
                render(&mut report, &record)
                    .map_err(|e| Error::with_source(ErrorKind::WriteToBuffer, e))
            });
        }

        join_all(&mut tasks).await?;

        // Every task has finished, so this is the last handle
        let report = Arc::try_unwrap(report)
            .map_err(|_| Error::with_source(ErrorKind::ProcessRecords, "report still shared"))?;
        report
            .into_inner()
            .map_err(|_| Error::with_source(ErrorKind::ProcessRecords, "report lock poisoned"))
    }
}

/// Turns one raw input line into a key.
fn decode_line(mut raw: Vec<u8>) -> String {
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }
    match String::from_utf8(raw) {
        Ok(line) => line,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Appends one report line.
fn render(out: &mut String, record: &Record) -> fmt::Result {
    writeln!(out, "{}, count={}", record.key, record.count)
}

/// Joins every task, keeping the first failure as the cause of a
/// [`ErrorKind::ProcessRecords`] error.
async fn join_all(tasks: &mut JoinSet<Result<()>>) -> Result<()> {
    let mut first: Option<Error> = None;
    let mut failed = 0usize;

    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.map_err(|e: JoinError| Error::with_source(ErrorKind::ProcessRecords, e));
        if let Err(e) = outcome.and_then(|r| r) {
            failed += 1;
            first.get_or_insert(e);
        }
    }

    match first {
        None => Ok(()),
        Some(cause) => {
            warn!(failed, "Tasks failed");
            Err(Error::with_source(ErrorKind::ProcessRecords, cause))
        }
    }
}
