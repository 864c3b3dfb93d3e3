// src/engine/pool.rs
//
// Worker pool: a bounded FIFO queue drained by long-lived OS threads.
//
// Each worker owns its thread for life. Codec state (the resizer cache)
// is thread-local and is released when the worker exits.

use super::common::panic_message;
use super::pipeline::thumbnail;
use super::raster;
use crate::error::{Result, ThumbnailError};
use crate::ops::Options;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// What a worker runs for each request.
pub type Handler = Arc<dyn Fn(&[u8], &Options) -> Result<Vec<u8>> + Send + Sync>;

/// Pending reply for one submitted request.
pub type Reply = oneshot::Receiver<Result<Vec<u8>>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolConfig {
    /// Worker threads. 0 means one per available CPU.
    pub workers: usize,
    /// Requests that may wait in the queue. 0 means one per worker.
    pub queue_capacity: usize,
}

impl PoolConfig {
    pub fn resolved_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

struct Request {
    blob: Vec<u8>,
    options: Options,
    cancel: CancellationToken,
    reply: oneshot::Sender<Result<Vec<u8>>>,
}

pub struct Pool {
    sender: Mutex<Option<Sender<Request>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    size: usize,
    queue_capacity: usize,
}

impl Pool {
    /// Start a pool that runs the thumbnail pipeline.
    pub fn new(config: PoolConfig) -> io::Result<Self> {
        Self::with_handler(config, Arc::new(thumbnail))
    }

    /// Start a pool that runs `handler` for every request.
    pub fn with_handler(config: PoolConfig, handler: Handler) -> io::Result<Self> {
        let size = config.resolved_workers();
        let queue_capacity = if config.queue_capacity > 0 {
            config.queue_capacity
        } else {
            size
        };
        let (tx, rx) = bounded::<Request>(queue_capacity);

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let rx = rx.clone();
            let handler = handler.clone();
            let spawned = thread::Builder::new()
                .name(format!("thumbnail-worker-{id}"))
                .spawn(move || worker_loop(id, rx, handler));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Disconnect so the workers already started exit.
                    drop(tx);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(e);
                }
            }
        }
        info!(workers = size, queue_capacity, "worker pool started");

        Ok(Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            size,
            queue_capacity,
        })
    }

    pub fn workers(&self) -> usize {
        self.size
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    fn sender(&self) -> Result<Sender<Request>> {
        self.sender
            .lock()
            .clone()
            .ok_or_else(ThumbnailError::pool_closed)
    }

    /// Enqueue a request, blocking while the queue is full.
    pub fn submit(&self, blob: Vec<u8>, options: Options, cancel: CancellationToken) -> Result<Reply> {
        let (reply, rx) = oneshot::channel();
        self.sender()?
            .send(Request {
                blob,
                options,
                cancel,
                reply,
            })
            .map_err(|_| ThumbnailError::pool_closed())?;
        Ok(rx)
    }

    /// Run a request and block until it completes. Not for async contexts.
    pub fn thumbnail(&self, blob: Vec<u8>, options: Options, cancel: CancellationToken) -> Result<Vec<u8>> {
        self.submit(blob, options, cancel)?
            .blocking_recv()
            .unwrap_or_else(|_| Err(ThumbnailError::pool_closed()))
    }

    /// Run a request from async code. Cancellation abandons the wait with
    /// `Aborted`; a request still queued is skipped by its worker.
    pub async fn thumbnail_async(
        &self,
        blob: Vec<u8>,
        options: Options,
        cancel: CancellationToken,
    ) -> Result<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        let sender = self.sender()?;
        let request = Request {
            blob,
            options,
            cancel: cancel.clone(),
            reply,
        };

        match sender.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(request)) => {
                let send = tokio::task::spawn_blocking(move || sender.send(request).is_ok());
                tokio::select! {
                    sent = send => {
                        if !matches!(sent, Ok(true)) {
                            return Err(ThumbnailError::pool_closed());
                        }
                    }
                    _ = cancel.cancelled() => return Err(ThumbnailError::aborted()),
                }
            }
            Err(TrySendError::Disconnected(_)) => return Err(ThumbnailError::pool_closed()),
        }

        tokio::select! {
            reply = rx => reply.unwrap_or_else(|_| Err(ThumbnailError::pool_closed())),
            _ = cancel.cancelled() => Err(ThumbnailError::aborted()),
        }
    }

    /// Stop accepting requests and wait for the workers to drain the queue.
    pub fn close(&self) {
        let Some(sender) = self.sender.lock().take() else {
            return;
        };
        drop(sender);

        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            let _ = handle.join();
        }
        info!("worker pool stopped");
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(id: usize, rx: Receiver<Request>, handler: Handler) {
    debug!(worker = id, "worker started");
    for request in rx.iter() {
        let Request {
            blob,
            options,
            cancel,
            reply,
        } = request;

        if cancel.is_cancelled() {
            debug!(worker = id, "skipping cancelled request");
            let _ = reply.send(Err(ThumbnailError::aborted()));
            continue;
        }

        match panic::catch_unwind(AssertUnwindSafe(|| handler(&blob, &options))) {
            Ok(result) => {
                // The caller may have gone away; nothing to do then.
                let _ = reply.send(result);
            }
            Err(payload) => {
                error!(
                    worker = id,
                    "worker panicked, thread-local codec state is unusable: {}",
                    panic_message(payload.as_ref())
                );
                std::process::abort();
            }
        }
    }
    raster::thread_shutdown();
    debug!(worker = id, "worker stopped");
}
