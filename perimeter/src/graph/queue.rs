//! Serialized graph-write queue.
//!
//! Discovery handlers run concurrently, but the graph store must never see
//! concurrent writers. Every handler wraps its graph work in a future and
//! appends it here; a single worker task drains the queue and awaits each
//! write in order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type DbWrite = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Single-consumer queue that serializes graph writes.
pub struct DbQueue {
    tx: mpsc::UnboundedSender<DbWrite>,
    done: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DbQueue {
    /// Starts the queue worker and returns the queue handle.
    pub fn start() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let done = CancellationToken::new();
        let worker = tokio::spawn(drain(rx, done.clone()));

        Self {
            tx,
            done,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Appends a write to the queue.
    ///
    /// The future runs on the queue worker after every previously appended
    /// write has completed. Appends after shutdown are dropped.
    pub fn append<F>(&self, write: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tx.send(Box::pin(write)).is_err() {
            debug!("graph write dropped: queue is shut down");
        }
    }

    /// Stops the worker after flushing all pending writes.
    pub async fn shutdown(&self) {
        self.done.cancel();
        let worker = self.worker.lock().expect("worker handle poisoned").take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

async fn drain(mut rx: mpsc::UnboundedReceiver<DbWrite>, done: CancellationToken) {
    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            write = rx.recv() => match write {
                Some(write) => write.await,
                None => return,
            },
        }
    }
    // Flush whatever was queued before the shutdown signal.
    while let Ok(write) = rx.try_recv() {
        write.await;
    }
}
