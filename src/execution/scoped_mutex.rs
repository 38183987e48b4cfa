use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use metrics::gauge;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutexError {
    /// Backpressure: the scope already has `depth` tasks queued or running.
    #[error("Queue Full: scope {scope} has {depth} tasks queued")]
    QueueFull { scope: String, depth: usize },

    #[error("scope {0} worker stopped")]
    Closed(String),

    #[error("task in scope {0} panicked")]
    TaskPanicked(String),
}

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct ScopeWorker {
    tx: mpsc::UnboundedSender<Job>,
    /// Queued plus running.
    depth: Arc<AtomicUsize>,
}

/// Serializes tasks that share a scope (a signer or a proxy account).
///
/// Each scope gets its own queue drained by a single consumer task, so work in
/// one scope runs strictly in enqueue order while different scopes run
/// concurrently.
pub struct ScopedMutex {
    scopes: Mutex<HashMap<String, ScopeWorker>>,
    max_depth: usize,
}

impl ScopedMutex {
    pub fn new(max_depth: usize) -> Self {
        Self {
            scopes: Mutex::new(HashMap::new()),
            max_depth: max_depth.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ScopeWorker>> {
        self.scopes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `task` after every task previously enqueued on `scope` finished.
    ///
    /// Fails fast with [`MutexError::QueueFull`] instead of queueing past the
    /// configured depth. Once accepted the task runs to completion even if the
    /// caller stops waiting.
    pub async fn run<F, Fut, T>(&self, scope: &str, task: F) -> Result<T, MutexError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        self.enqueue(scope, task, result_tx)?;

        match result_rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(())) => Err(MutexError::TaskPanicked(scope.to_string())),
            Err(_) => Err(MutexError::Closed(scope.to_string())),
        }
    }

    fn enqueue<F, Fut, T>(
        &self,
        scope: &str,
        task: F,
        result_tx: oneshot::Sender<Result<T, ()>>,
    ) -> Result<(), MutexError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut scopes = self.lock();
        let worker = scopes
            .entry(scope.to_string())
            .or_insert_with(|| spawn_worker(scope));

        let depth = worker.depth.load(Ordering::SeqCst);
        if depth >= self.max_depth {
            tracing::warn!(scope, depth, "Scope queue full, rejecting submission");
            return Err(MutexError::QueueFull {
                scope: scope.to_string(),
                depth,
            });
        }

        let job_depth = worker.depth.clone();
        let job_scope = scope.to_string();
        let job: Job = Box::new(move || {
            async move {
                let outcome = AssertUnwindSafe(task()).catch_unwind().await;
                // Depth drops before the caller is woken so it never observes
                // its own finished task as still queued.
                let remaining = job_depth.fetch_sub(1, Ordering::SeqCst) - 1;
                gauge!("scope_queue_depth", "scope" => job_scope).set(remaining as f64);
                let _ = result_tx.send(outcome.map_err(|_| ()));
            }
            .boxed()
        });

        worker.depth.fetch_add(1, Ordering::SeqCst);
        if worker.tx.send(job).is_err() {
            worker.depth.fetch_sub(1, Ordering::SeqCst);
            scopes.remove(scope);
            return Err(MutexError::Closed(scope.to_string()));
        }

        gauge!("scope_queue_depth", "scope" => scope.to_string()).set((depth + 1) as f64);
        Ok(())
    }

    /// Tasks queued or running on `scope`.
    pub fn depth(&self, scope: &str) -> usize {
        self.lock()
            .get(scope)
            .map(|w| w.depth.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Non-idle scopes and their depth.
    pub fn depths(&self) -> BTreeMap<String, usize> {
        self.lock()
            .iter()
            .map(|(scope, w)| (scope.clone(), w.depth.load(Ordering::SeqCst)))
            .filter(|(_, depth)| *depth > 0)
            .collect()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
}

fn spawn_worker(scope: &str) -> ScopeWorker {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    let scope = scope.to_string();

    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            job().await;
        }
        tracing::debug!(scope = %scope, "Scope worker stopped");
    });

    ScopeWorker {
        tx,
        depth: Arc::new(AtomicUsize::new(0)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
