//! Fixed worker pool
//!
//! A set of Tokio tasks pulls `(chunk, result sink)` tasks from a shared
//! bounded queue and runs the wrapped stage. Workers are spawned on the first
//! submitted chunk, so a pool can be built outside a runtime.

use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc as res_channel;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{defer, once, Proc, ProcRef, Res, ResStream};
use crate::chunk::Chunk;
use crate::concurrency::{FinishOnce, FirstErr};
use crate::error::{Error, Result};

/// A chunk and where to send its results
struct Task {
    chunk: Chunk,
    sink: res_channel::UnboundedSender<Res>,
}

/// Fixed set of workers running a stage concurrently
pub struct Pool {
    workers: usize,
    inner: ProcRef,
    queue_tx: Arc<Mutex<Option<mpsc::Sender<Task>>>>,
    queue_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
    handles: Mutex<Option<Vec<JoinHandle<()>>>>,
    finished: FinishOnce,
}

impl Pool {
    /// Run `inner` on `workers` concurrent tasks
    pub fn new(workers: usize, inner: ProcRef) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel(workers);
        Self {
            workers,
            inner,
            queue_tx: Arc::new(Mutex::new(Some(tx))),
            queue_rx: Arc::new(tokio::sync::Mutex::new(rx)),
            handles: Mutex::new(None),
            finished: FinishOnce::new(),
        }
    }

    /// Number of workers
    pub fn workers(&self) -> usize {
        self.workers
    }

    fn ensure_started(&self) {
        let mut handles = self.handles.lock();
        if handles.is_some() {
            return;
        }
        let spawned = (0..self.workers)
            .map(|id| {
                let queue = self.queue_rx.clone();
                let inner = self.inner.clone();
                tokio::spawn(worker(id, queue, inner))
            })
            .collect();
        *handles = Some(spawned);
    }
}

async fn worker(id: usize, queue: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>, inner: ProcRef) {
    loop {
        let task = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let Some(Task { chunk, sink }) = task else {
            break;
        };
        let mut results = inner.process(chunk);
        while let Some(res) = results.next().await {
            if sink.unbounded_send(res).is_err() {
                // Submitter went away; drain the rest without forwarding.
                while results.next().await.is_some() {}
                break;
            }
        }
    }
    debug!(worker = id, "pool worker exiting");
}

#[async_trait]
impl Proc for Pool {
    fn process(&self, chunk: Chunk) -> ResStream {
        if self.queue_tx.lock().is_none() {
            return once(Res::err(chunk, Error::PipelineClosed));
        }
        self.ensure_started();
        // The sender is only cloned once the stream is polled, so an idle
        // stream never keeps `finish` waiting on the workers.
        let queue_tx = self.queue_tx.clone();
        defer(async move {
            let queue = queue_tx.lock().clone();
            let Some(queue) = queue else {
                return once(Res::err(chunk, Error::PipelineClosed));
            };
            let (sink, results) = res_channel::unbounded();
            match queue.send(Task { chunk, sink }).await {
                Ok(()) => results.boxed(),
                Err(mpsc::error::SendError(task)) => {
                    once(Res::err(task.chunk, Error::PipelineClosed))
                }
            }
        })
    }

    async fn finish(&self) -> Result<()> {
        self.finished
            .run(|| async {
                // Closing the queue lets workers exit once it is empty.
                self.queue_tx.lock().take();
                let handles = self.handles.lock().take().unwrap_or_default();

                let mut first = FirstErr::new();
                for handle in handles {
                    if let Err(e) = handle.await {
                        warn!("pool worker failed: {}", e);
                        first.record_err(Error::Internal(format!("pool worker failed: {}", e)));
                    }
                }
                first.record(self.inner.finish().await);
                first.into_result()
            })
            .await
    }
}
