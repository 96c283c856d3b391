// Worker pool - fixed number of workers draining a bounded queue
use crate::domain::error::{ReportError, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Bounded-concurrency scheduler. At most `size` jobs run at once; submitting
/// waits while the queue is full and fails only once the pool is shut down.
///
/// Cloning is cheap and every clone feeds the same workers.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    size: usize,
    sender: mpsc::Sender<Job>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// `max_workers == 0` sizes the pool to the available CPUs. Must be called
    /// from inside a Tokio runtime.
    pub fn new(name: impl Into<String>, max_workers: usize) -> Self {
        let name = name.into();
        let size = if max_workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            max_workers
        };

        let (sender, receiver) = mpsc::channel::<Job>(size);
        let receiver = Arc::new(Mutex::new(receiver));
        let shutdown = CancellationToken::new();

        for worker in 0..size {
            let receiver = receiver.clone();
            let shutdown = shutdown.clone();
            let pool = name.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = receiver.lock().await;
                        tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => None,
                            job = rx.recv() => job,
                        }
                    };
                    match job {
                        Some(job) => job.await,
                        None => break,
                    }
                }
                tracing::debug!(pool = %pool, worker, "worker stopped");
            });
        }

        tracing::debug!(pool = %name, size, "worker pool started");

        Self {
            inner: Arc::new(Inner {
                name,
                size,
                sender,
                shutdown,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    fn closed(&self) -> ReportError {
        ReportError::PoolClosed {
            pool: self.inner.name.clone(),
        }
    }

    /// Queue a unit of work, waiting for room if the queue is full
    pub async fn submit(&self, job: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(self.closed());
        }
        tokio::select! {
            _ = self.inner.shutdown.cancelled() => Err(self.closed()),
            sent = self.inner.sender.send(Box::pin(job)) => sent.map_err(|_| self.closed()),
        }
    }

    /// Run `fut` on a worker and wait for its result. A request cancelled while
    /// its job is still queued gets `Cancelled` without the job doing any work.
    pub async fn run<T, F>(&self, cancel: &CancellationToken, fut: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job_cancel = cancel.clone();
        let submit = self.submit(async move {
            if job_cancel.is_cancelled() {
                let _ = tx.send(Err(ReportError::Cancelled));
                return;
            }
            let _ = tx.send(fut.await);
        });

        tokio::select! {
            _ = cancel.cancelled() => return Err(ReportError::Cancelled),
            submitted = submit => submitted?,
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(ReportError::Cancelled),
            result = rx => result.map_err(|_| self.closed())?,
        }
    }

    /// Stop accepting work. Jobs already running finish; queued jobs are
    /// discarded.
    pub fn shutdown(&self) {
        tracing::debug!(pool = %self.inner.name, "worker pool shutting down");
        self.inner.shutdown.cancel();
    }
}
