//! Serialized writer
//!
//! One dedicated thread owns the write connection and drains a single FIFO
//! queue of tasks. Every mutating operation goes through it, so at most one
//! logical writer ever touches that connection.
//!
//! Each task carries its own result channel. A failing or panicking task is
//! reported on that channel and the worker moves on to the next one.

use crate::{Error, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use rusqlite::Connection;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

type Job = Box<dyn FnOnce(&mut Connection) + Send>;

struct Task {
    id: u64,
    job: Job,
}

/// Front of the write connection. Dropping it closes the queue; tasks
/// already queued still run before the worker exits.
pub struct WriteProxy {
    database: PathBuf,
    sender: Option<Sender<Task>>,
    worker: Option<thread::JoinHandle<()>>,
    next_id: AtomicU64,
    timeout: Option<Duration>,
}

impl WriteProxy {
    /// Move `conn` onto a new worker thread and start draining the queue
    pub fn start(conn: Connection, database: impl Into<PathBuf>, timeout: Option<Duration>) -> Result<Self> {
        let database = database.into();
        let (tx, rx) = channel::unbounded::<Task>();

        let label = database.display().to_string();
        let worker = thread::Builder::new()
            .name("litemodel-writer".to_string())
            .spawn(move || run_worker(conn, rx, label))?;

        Ok(Self {
            database,
            sender: Some(tx),
            worker: Some(worker),
            next_id: AtomicU64::new(1),
            timeout,
        })
    }

    pub fn database(&self) -> &Path {
        &self.database
    }

    /// Timeout applied by [`submit_blocking`](Self::submit_blocking)
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Number of tasks waiting in the queue
    pub fn queued(&self) -> usize {
        self.sender.as_ref().map(Sender::len).unwrap_or(0)
    }

    /// Queue `operation` and return a handle to its eventual result.
    ///
    /// The handle may be awaited later or simply dropped; the task runs
    /// either way.
    pub fn submit<T, F>(&self, operation: F) -> PendingTask<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (result_tx, result_rx) = channel::bounded(1);

        let job: Job = Box::new(move |conn| {
            let result = operation(conn).map_err(|e| {
                tracing::warn!(task = id, "write task failed: {}", e);
                Error::task_failure(id, e)
            });
            // The caller may have abandoned the handle
            let _ = result_tx.send(result);
        });

        match &self.sender {
            Some(sender) => {
                if sender.send(Task { id, job }).is_err() {
                    tracing::error!(task = id, "writer queue is closed");
                }
            }
            None => tracing::error!(task = id, "writer queue is closed"),
        }

        PendingTask { id, receiver: result_rx }
    }

    /// Submit and wait for the result, bounded by the configured timeout
    pub fn submit_blocking<T, F>(&self, operation: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let pending = self.submit(operation);
        match self.timeout {
            Some(timeout) => pending.wait_timeout(timeout),
            None => pending.wait(),
        }
    }
}

impl Drop for WriteProxy {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!(database = %self.database.display(), "writer thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for WriteProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteProxy")
            .field("database", &self.database)
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}

fn run_worker(mut conn: Connection, tasks: Receiver<Task>, database: String) {
    tracing::info!("Writer started for {}", database);

    for task in tasks {
        let Task { id, job } = task;
        tracing::debug!(task = id, "running write task");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(&mut conn)));
        if outcome.is_err() {
            tracing::error!(task = id, "write task panicked");
        }
    }

    tracing::info!("Writer stopped for {}", database);
}

/// Handle to a queued write task.
#[derive(Debug)]
pub struct PendingTask<T> {
    id: u64,
    receiver: Receiver<Result<T>>,
}

impl<T> PendingTask<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until the task has run
    pub fn wait(self) -> Result<T> {
        match self.receiver.recv() {
            Ok(result) => result,
            Err(_) => Err(self.lost()),
        }
    }

    /// Block for at most `timeout`. On timeout the task still runs; the
    /// handle can be waited on again.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(Error::TaskTimeout { task: self.id, timeout }),
            Err(RecvTimeoutError::Disconnected) => Err(self.lost()),
        }
    }

    /// The result if the task has already finished
    pub fn try_result(&self) -> Option<Result<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(self.lost())),
        }
    }

    fn lost(&self) -> Error {
        Error::WorkerTaskFailure {
            task: self.id,
            message: "task ended without a result (panicked or writer stopped)".to_string(),
            source: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    fn proxy_in(dir: &tempfile::TempDir) -> WriteProxy {
        let path = dir.path().join("proxy.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute("CREATE TABLE log (n INTEGER NOT NULL)", []).unwrap();
        WriteProxy::start(conn, path, None).unwrap()
    }

    #[test]
    fn test_tasks_run_in_submission_order() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy_in(&dir);

        let handles: Vec<_> = (0..20)
            .map(|n| {
                proxy.submit(move |conn| {
                    conn.execute("INSERT INTO log (n) VALUES (?1)", [n])?;
                    Ok(n)
                })
            })
            .collect();
        for (n, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.wait().unwrap(), n as i32);
        }

        let order: Vec<i64> = proxy
            .submit_blocking(|conn| {
                let mut stmt = conn.prepare("SELECT n FROM log ORDER BY rowid")?;
                let rows = stmt.query_map([], |row| row.get(0))?.collect::<rusqlite::Result<Vec<i64>>>()?;
                Ok(rows)
            })
            .unwrap();
        assert_eq!(order, (0..20).collect::<Vec<i64>>());
    }

    #[test]
    fn test_failure_is_delivered_and_worker_survives() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy_in(&dir);

        let err = proxy
            .submit_blocking(|conn| {
                conn.execute("INSERT INTO missing_table VALUES (1)", [])?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::WorkerTaskFailure { source: Some(_), .. }));

        let ok = proxy.submit_blocking(|conn| Ok(conn.execute("INSERT INTO log (n) VALUES (1)", [])?));
        assert_eq!(ok.unwrap(), 1);
    }

    #[test]
    fn test_panic_is_reported_and_worker_survives() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy_in(&dir);

        let pending = proxy.submit::<(), _>(|_conn| panic!("boom"));
        assert!(matches!(pending.wait(), Err(Error::WorkerTaskFailure { source: None, .. })));

        assert_eq!(proxy.submit_blocking(|_conn| Ok(7)).unwrap(), 7);
    }

    #[test]
    fn test_timeout_keeps_handle_usable() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy_in(&dir);
        let gate = Arc::new(Barrier::new(2));

        let blocker = Arc::clone(&gate);
        let first = proxy.submit(move |_conn| {
            blocker.wait();
            Ok(())
        });
        let second = proxy.submit(|_conn| Ok("done"));

        assert!(second.try_result().is_none());
        assert!(matches!(
            second.wait_timeout(Duration::from_millis(20)),
            Err(Error::TaskTimeout { .. })
        ));

        gate.wait();
        first.wait().unwrap();
        assert_eq!(second.wait().unwrap(), "done");
    }

    #[test]
    fn test_abandoned_handles_still_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.db");
        {
            let proxy = proxy_in(&dir);
            for n in 0..5 {
                drop(proxy.submit(move |conn| Ok(conn.execute("INSERT INTO log (n) VALUES (?1)", [n])?)));
            }
        }

        let conn = Connection::open(&path).unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM log", [], |row| row.get(0)).unwrap();
        assert_eq!(count, 5);
    }
}
