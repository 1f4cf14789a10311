//! The queue aggregate and its operation serializer.
//!
//! All state-mutating operations are executed by a single worker thread that
//! receives tagged commands over a rendezvous channel. Concurrent callers
//! rendezvous with the worker in arrival order, which gives FIFO across
//! callers without per-call locking on the hot path. Each command carries
//! its own one-slot reply channel, so callers can never receive each
//! other's responses and an abandoned caller cannot stall the worker.
//!
//! The queue-wide `RwLock` is a second barrier: the worker takes the write
//! guard per operation, and so do the read-only scanners (they move the
//! shared read handle's seek position) and the background flusher.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, RwLock, RwLockWriteGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{info, warn};

use crate::retention::clean_backups;
use crate::store::{LogStore, BACKUP_DIR, DEFAULT_MAX_SIZE};
use crate::{Error, Result};

const CLEANER_PASS_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const CLEANER_RETRY_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Tuning knobs for a queue instance.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Rotation threshold: rotate once the cursor has drained past this many
    /// bytes of push log.
    pub max_size: u64,
    /// Cadence of the background `fsync` of both logs. Durability loss under
    /// crash is bounded by this interval.
    pub flush_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            flush_interval: Duration::from_secs(1),
        }
    }
}

enum Command {
    Push(Vec<u8>, SyncSender<Result<()>>),
    Pop(SyncSender<Result<Option<Vec<u8>>>>),
}

/// Durable FIFO queue over a pair of append-only files.
///
/// # Example
///
/// ```no_run
/// use diskqueue::DiskQueue;
///
/// let queue = DiskQueue::open("./jobs")?;
/// queue.push(b"job-1")?;
/// assert_eq!(queue.pop()?, Some(b"job-1".to_vec()));
/// assert_eq!(queue.pop()?, None);
/// # Ok::<(), diskqueue::Error>(())
/// ```
pub struct DiskQueue {
    dir: PathBuf,
    store: Arc<RwLock<LogStore>>,
    requests: Mutex<Option<SyncSender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    cleaner_started: AtomicBool,
}

impl DiskQueue {
    /// Create or open a queue rooted at `dir` with default configuration.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(dir, QueueConfig::default())
    }

    /// Create or open a queue rooted at `dir`.
    ///
    /// Creates `dir` and `dir/.bkp` if missing, opens the log pair, recovers
    /// the cursor from the pop-log tail and starts the serializer worker and
    /// the background flusher.
    ///
    /// # Errors
    ///
    /// - `Error::Io`: directory creation or file open failed
    /// - `Error::CorruptTail`: the pop log ends in an unreadable marker;
    ///   the queue must be repaired externally before it can be opened
    pub fn open_with(dir: impl AsRef<Path>, config: QueueConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let store = Arc::new(RwLock::new(LogStore::open(&dir, config.max_size)?));
        let shutdown = Arc::new(AtomicBool::new(false));

        let (requests, receiver) = mpsc::sync_channel(0);
        let worker = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || serve(store, receiver))
        };

        {
            let store = Arc::clone(&store);
            let shutdown = Arc::clone(&shutdown);
            std::thread::spawn(move || flush_loop(store, shutdown, config.flush_interval));
        }

        Ok(Self {
            dir,
            store,
            requests: Mutex::new(Some(requests)),
            worker: Mutex::new(Some(worker)),
            shutdown,
            cleaner_started: AtomicBool::new(false),
        })
    }

    /// Enqueue one payload.
    ///
    /// # Errors
    ///
    /// - `Error::EmptyPayload`: `payload` is empty; nothing is written
    /// - `Error::Closed`: the queue was closed
    /// - `Error::Io`: the append failed
    pub fn push(&self, payload: &[u8]) -> Result<()> {
        let requests = self.request_sender()?;
        let (reply, response) = mpsc::sync_channel(1);
        requests
            .send(Command::Push(payload.to_vec(), reply))
            .map_err(|_| Error::Closed)?;
        response.recv().map_err(|_| Error::Closed)?
    }

    /// Dequeue the oldest unconsumed payload, or `None` if the queue is
    /// drained.
    ///
    /// Corruption at the cursor surfaces as an error and does not advance
    /// the cursor; the benign drained state is `Ok(None)`.
    pub fn pop(&self) -> Result<Option<Vec<u8>>> {
        let requests = self.request_sender()?;
        let (reply, response) = mpsc::sync_channel(1);
        requests
            .send(Command::Pop(reply))
            .map_err(|_| Error::Closed)?;
        response.recv().map_err(|_| Error::Closed)?
    }

    /// Peek at up to `n` unconsumed payloads without consuming them.
    pub fn head(&self, n: usize) -> Result<Vec<Vec<u8>>> {
        write_guard(&self.store)?.head(n)
    }

    /// Peek at the last `n` unconsumed payloads without consuming them.
    pub fn tail(&self, n: usize) -> Result<Vec<Vec<u8>>> {
        write_guard(&self.store)?.tail(n)
    }

    /// Snapshot every record in the push log, consumed or not, paired with
    /// the byte offset immediately after each record.
    pub fn scan(&self) -> Result<Vec<(u64, Vec<u8>)>> {
        write_guard(&self.store)?.scan()
    }

    /// Change the rotation threshold.
    pub fn set_max_size(&self, bytes: u64) -> Result<()> {
        write_guard(&self.store)?.max_size = bytes;
        Ok(())
    }

    /// Start the backup cleaner, removing archived pairs older than `age`.
    ///
    /// One-shot: the first call starts the cleaner, later calls are no-ops.
    pub fn set_cleaner_age(&self, age: Duration) {
        if self.cleaner_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let bkp = self.dir.join(BACKUP_DIR);
        let shutdown = Arc::clone(&self.shutdown);
        std::thread::spawn(move || clean_loop(bkp, age, shutdown));
    }

    /// Diagnostic counters: records pushed and popped since open or since
    /// the last rotation.
    pub fn record_counts(&self) -> Result<(u64, u64)> {
        let store = self
            .store
            .read()
            .map_err(|_| Error::Corrupt("queue lock poisoned"))?;
        Ok((store.push_rec_nro, store.pop_rec_nro))
    }

    /// Flush outstanding operations and release all file handles.
    ///
    /// In-flight push/pop calls complete first; later calls fail with
    /// `Error::Closed`. Idempotent, and also run on drop.
    pub fn close(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);

        if let Ok(mut requests) = self.requests.lock() {
            requests.take();
        }
        let worker = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(_) => None,
        };
        if let Some(worker) = worker {
            let _ = worker.join();
        }

        let mut store = write_guard(&self.store)?;
        store.sync()?;
        store.close();
        Ok(())
    }

    fn request_sender(&self) -> Result<SyncSender<Command>> {
        let requests = self
            .requests
            .lock()
            .map_err(|_| Error::Corrupt("queue lock poisoned"))?;
        requests.as_ref().cloned().ok_or(Error::Closed)
    }
}

impl Drop for DiskQueue {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn write_guard(store: &RwLock<LogStore>) -> Result<RwLockWriteGuard<'_, LogStore>> {
    store.write().map_err(|_| Error::Corrupt("queue lock poisoned"))
}

/// Serializer worker: executes commands strictly in arrival order until
/// every sender is gone.
fn serve(store: Arc<RwLock<LogStore>>, requests: Receiver<Command>) {
    for command in requests {
        match command {
            Command::Push(payload, reply) => {
                let result = write_guard(&store).and_then(|mut store| store.push(&payload));
                let _ = reply.send(result);
            }
            Command::Pop(reply) => {
                let result = write_guard(&store).and_then(|mut store| store.pop());
                let _ = reply.send(result);
            }
        }
    }
}

/// Periodic `fsync` of both logs; bounds durability loss to one interval.
fn flush_loop(store: Arc<RwLock<LogStore>>, shutdown: Arc<AtomicBool>, interval: Duration) {
    loop {
        std::thread::sleep(interval);
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        match store.write() {
            Ok(mut store) => {
                if let Err(err) = store.sync() {
                    warn!("background flush failed: {err}");
                }
            }
            Err(_) => return,
        }
    }
}

/// Daily cleanup of aged archives; a failed directory listing retries after
/// an hour instead of waiting a full day.
fn clean_loop(bkp: PathBuf, age: Duration, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::SeqCst) {
        match clean_backups(&bkp, age) {
            Ok(removed) => {
                if !removed.is_empty() {
                    info!("removed {} aged archive files", removed.len());
                }
                std::thread::sleep(CLEANER_PASS_INTERVAL);
            }
            Err(err) => {
                warn!("backup cleanup failed: {err}");
                std::thread::sleep(CLEANER_RETRY_INTERVAL);
            }
        }
    }
}
