//! Single-writer ingest queue.
//!
//! Ingestion workers parse documents in parallel but batches must be
//! applied one at a time. The queue gives each worker a cloneable
//! [`IngestSender`] over a bounded channel; one writer thread drains it and
//! applies batches in arrival order. A full queue blocks submitters.

use crate::error::{DatastoreError, Result};
use crate::store::Datastore;
use crate::types::{Delta, Operation};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// How often an idle writer checks for shutdown.
const IDLE_POLL: Duration = Duration::from_millis(50);

struct Job {
    ops: Vec<Operation>,
    reply: Option<Sender<Result<Delta>>>,
}

/// Counters shared between the queue and its writer thread.
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Batches applied (including ones with an empty delta).
    pub applied: AtomicU64,
    /// Batches rejected by an invariant check.
    pub rejected: AtomicU64,
}

/// Owner of the writer thread.
pub struct IngestQueue {
    sender: Sender<Job>,
    /// Held shared by a submitter from its closed check until its job is
    /// queued, and exclusively by shutdown while it sets `closed`.
    gate: Arc<RwLock<()>>,
    closed: Arc<AtomicBool>,
    stats: Arc<QueueStats>,
    worker: Option<JoinHandle<()>>,
}

impl IngestQueue {
    /// Start a writer for `store` with the configured queue capacity.
    pub fn spawn(store: Arc<Datastore>) -> Result<Self> {
        let capacity = store.config().ingest_queue_capacity;
        Self::with_capacity(store, capacity)
    }

    /// Start a writer accepting up to `capacity` pending batches.
    pub fn with_capacity(store: Arc<Datastore>, capacity: usize) -> Result<Self> {
        let (sender, receiver) = bounded(capacity.max(1));
        let closed = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(QueueStats::default());

        let worker = {
            let closed = Arc::clone(&closed);
            let stats = Arc::clone(&stats);
            thread::Builder::new()
                .name("noteindex-ingest".to_string())
                .spawn(move || writer_loop(store, receiver, closed, stats))?
        };

        Ok(Self {
            sender,
            gate: Arc::new(RwLock::new(())),
            closed,
            stats,
            worker: Some(worker),
        })
    }

    /// A submitter for one ingestion worker.
    pub fn sender(&self) -> IngestSender {
        IngestSender {
            sender: self.sender.clone(),
            gate: Arc::clone(&self.gate),
            closed: Arc::clone(&self.closed),
        }
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    /// Stop accepting batches, apply the ones already queued, and wait for
    /// the writer to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        {
            // Waits out submitters mid-send; the writer keeps draining meanwhile.
            let _gate = self.gate.write();
            self.closed.store(true, Ordering::Release);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("ingest writer panicked");
            }
        }
    }
}

impl Drop for IngestQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn writer_loop(
    store: Arc<Datastore>,
    receiver: Receiver<Job>,
    closed: Arc<AtomicBool>,
    stats: Arc<QueueStats>,
) {
    debug!("ingest writer started");
    loop {
        match receiver.recv_timeout(IDLE_POLL) {
            Ok(job) => apply(&store, job, &stats),
            Err(RecvTimeoutError::Timeout) => {
                if closed.load(Ordering::Acquire) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    // Batches accepted before the queue closed still get applied.
    while let Ok(job) = receiver.try_recv() {
        apply(&store, job, &stats);
    }
    debug!(
        applied = stats.applied.load(Ordering::Relaxed),
        rejected = stats.rejected.load(Ordering::Relaxed),
        "ingest writer stopped"
    );
}

fn apply(store: &Datastore, job: Job, stats: &QueueStats) {
    let result = store.ingest(job.ops);
    match &result {
        Ok(_) => stats.applied.fetch_add(1, Ordering::Relaxed),
        Err(_) => stats.rejected.fetch_add(1, Ordering::Relaxed),
    };
    match job.reply {
        Some(reply) => {
            // The submitter may have stopped waiting.
            let _ = reply.send(result);
        }
        None => {
            if let Err(e) = result {
                warn!(error = %e, "queued batch rejected");
            }
        }
    }
}

/// Cloneable submitter handed to ingestion workers.
#[derive(Clone)]
pub struct IngestSender {
    sender: Sender<Job>,
    gate: Arc<RwLock<()>>,
    closed: Arc<AtomicBool>,
}

impl IngestSender {
    /// Queue a batch without waiting for it to be applied. Blocks while
    /// the queue is full. Rejections are logged by the writer.
    pub fn submit(&self, ops: Vec<Operation>) -> Result<()> {
        self.send(Job { ops, reply: None })
    }

    /// Queue a batch and wait for its delta.
    pub fn submit_and_wait(&self, ops: Vec<Operation>) -> Result<Delta> {
        let (reply, response) = bounded(1);
        self.send(Job {
            ops,
            reply: Some(reply),
        })?;
        response.recv().map_err(|_| DatastoreError::QueueClosed)?
    }

    fn send(&self, job: Job) -> Result<()> {
        let _gate = self.gate.read();
        if self.closed.load(Ordering::Acquire) {
            return Err(DatastoreError::QueueClosed);
        }
        self.sender
            .send(job)
            .map_err(|_| DatastoreError::QueueClosed)
    }
}
