//! Worker pools and least-loaded placement.
//!
//! Each endpoint actor is pinned to one worker for its whole life, so every
//! engine call for that endpoint runs on the same execution context. A worker
//! is a tokio runtime handle plus a load counter; load is the number of live
//! [`WorkerLease`]s.

use crate::errors::ErizoError;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Placement policy capability.
pub trait WorkerPool: Send + Sync + 'static {
    /// Assign the least-loaded worker.
    fn pick_worker(&self) -> Result<WorkerHandle, ErizoError>;

    /// Pool name, for logs.
    fn name(&self) -> &str;
}

struct WorkerInner {
    pool: String,
    index: usize,
    runtime: Handle,
    load: AtomicUsize,
}

/// Cloneable reference to one worker.
#[derive(Clone)]
pub struct WorkerHandle {
    inner: Arc<WorkerInner>,
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("pool", &self.inner.pool)
            .field("index", &self.inner.index)
            .field("load", &self.load())
            .finish()
    }
}

impl WorkerHandle {
    pub fn new(pool: &str, index: usize, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                pool: pool.to_string(),
                index,
                runtime,
                load: AtomicUsize::new(0),
            }),
        }
    }

    /// Stable identifier, e.g. `worker-3`.
    pub fn id(&self) -> String {
        format!("{}-{}", self.inner.pool, self.inner.index)
    }

    pub fn index(&self) -> usize {
        self.inner.index
    }

    /// Number of endpoints currently holding a lease on this worker.
    pub fn load(&self) -> usize {
        self.inner.load.load(Ordering::SeqCst)
    }

    /// Count an endpoint against this worker until the lease drops.
    pub fn lease(&self) -> WorkerLease {
        self.inner.load.fetch_add(1, Ordering::SeqCst);
        WorkerLease {
            worker: self.clone(),
        }
    }

    /// Run a future on this worker's runtime.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.runtime.spawn(future)
    }
}

/// RAII load accounting for one endpoint on one worker.
#[derive(Debug)]
pub struct WorkerLease {
    worker: WorkerHandle,
}

impl WorkerLease {
    pub fn worker(&self) -> &WorkerHandle {
        &self.worker
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        self.worker.inner.load.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fixed-size pool choosing the worker with the fewest live leases.
pub struct LeastLoadedPool {
    name: String,
    workers: Vec<WorkerHandle>,
    // Dropping a sender lets the matching worker thread exit.
    shutdown_senders: Mutex<Vec<oneshot::Sender<()>>>,
    closed: AtomicBool,
}

impl LeastLoadedPool {
    /// Start `size` workers, each a dedicated OS thread driving its own
    /// current-thread runtime.
    pub fn start(name: &str, size: usize) -> Result<Self, ErizoError> {
        let mut workers = Vec::with_capacity(size);
        let mut shutdown_senders = Vec::with_capacity(size);

        for index in 0..size {
            let (handle_tx, handle_rx) = std::sync::mpsc::channel::<Handle>();
            let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
            let thread_name = format!("{name}-{index}");

            std::thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || {
                    let runtime = match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(runtime) => runtime,
                        Err(e) => {
                            warn!(target: "erizo.workers", worker = %thread_name, error = %e, "Failed to build worker runtime");
                            return;
                        }
                    };
                    if handle_tx.send(runtime.handle().clone()).is_err() {
                        return;
                    }
                    runtime.block_on(async {
                        let _ = shutdown_rx.await;
                    });
                    debug!(target: "erizo.workers", worker = %thread_name, "Worker thread exiting");
                })
                .map_err(|e| ErizoError::Internal(format!("worker thread spawn failed: {e}")))?;

            let runtime = handle_rx
                .recv()
                .map_err(|e| ErizoError::Internal(format!("worker runtime failed to start: {e}")))?;

            workers.push(WorkerHandle::new(name, index, runtime));
            shutdown_senders.push(shutdown_tx);
        }

        info!(target: "erizo.workers", pool = %name, size = size, "Worker pool started");

        Ok(Self {
            name: name.to_string(),
            workers,
            shutdown_senders: Mutex::new(shutdown_senders),
            closed: AtomicBool::new(false),
        })
    }

    /// Create `size` logical workers that share the caller's runtime.
    pub fn on_current_runtime(name: &str, size: usize) -> Result<Self, ErizoError> {
        let runtime = Handle::try_current()
            .map_err(|e| ErizoError::Internal(format!("no tokio runtime: {e}")))?;
        let workers = (0..size)
            .map(|index| WorkerHandle::new(name, index, runtime.clone()))
            .collect();

        Ok(Self {
            name: name.to_string(),
            workers,
            shutdown_senders: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Current load of every worker, by index.
    pub fn loads(&self) -> Vec<usize> {
        self.workers.iter().map(WorkerHandle::load).collect()
    }

    /// Stop handing out workers and let dedicated threads exit.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut senders) = self.shutdown_senders.lock() {
            for sender in senders.drain(..) {
                let _ = sender.send(());
            }
        }
        info!(target: "erizo.workers", pool = %self.name, "Worker pool shut down");
    }
}

impl WorkerPool for LeastLoadedPool {
    fn pick_worker(&self) -> Result<WorkerHandle, ErizoError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ErizoError::ResourceUnavailable(format!(
                "worker pool {} is shut down",
                self.name
            )));
        }
        // min_by_key keeps the first minimum, so ties go to the lowest index
        self.workers
            .iter()
            .min_by_key(|worker| worker.load())
            .cloned()
            .ok_or_else(|| {
                ErizoError::ResourceUnavailable(format!("worker pool {} is empty", self.name))
            })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
