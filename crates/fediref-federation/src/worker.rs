use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Fire-and-forget unit of background work.
pub type Task = BoxFuture<'static, ()>;

/// Queue for background refreshes. Enqueueing never blocks the caller.
pub trait AsyncWorker: Send + Sync {
    fn enqueue(&self, task: Task);
}

/// Fixed number of tokio tasks draining a bounded queue.
pub struct WorkerPool {
    tx: mpsc::Sender<Task>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `concurrency` workers. Must be called within a tokio runtime.
    pub fn start(concurrency: usize, queue_size: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Task>(queue_size.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let workers = (0..concurrency.max(1))
            .map(|n| tokio::spawn(run_worker(n, rx.clone(), shutdown_rx.clone())))
            .collect();

        Self {
            tx,
            shutdown_tx,
            workers: Mutex::new(workers),
        }
    }

    /// Signal workers to stop and wait for in-progress tasks. Queued tasks
    /// that have not started are dropped.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::warn!("worker: join failed: {}", e);
            }
        }
    }
}

impl AsyncWorker for WorkerPool {
    fn enqueue(&self, task: Task) {
        match self.tx.try_send(task) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("worker: queue full, dropping task");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("worker: pool stopped, dropping task");
            }
        }
    }
}

async fn run_worker(
    n: usize,
    rx: Arc<Mutex<mpsc::Receiver<Task>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let task = tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() { break; }
                continue;
            }
            task = async { rx.lock().await.recv().await } => task,
        };
        let Some(task) = task else {
            break;
        };
        // A panicking task must not take the worker down with it.
        if let Err(e) = tokio::spawn(task).await {
            tracing::error!("worker {}: task panicked: {}", n, e);
        }
    }
    tracing::debug!("worker {}: stopped", n);
}
