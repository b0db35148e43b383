//! Main-thread marshaling for host-object releases.
//!
//! Host objects (engine textures, materials, meshes) may only be destroyed on
//! the thread that owns the engine. A release requested anywhere else is
//! queued and runs on the next [`MainThreadDispatcher::pump`].
//!
//! Once the owner shuts the dispatcher down with [`MainThreadDispatcher::close`]
//! nothing can run queued jobs any more; later off-thread requests are dropped
//! with a warning.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::{self, ThreadId},
};

use tokio::sync::mpsc;
use tracing::{trace, warn};

type Job = Box<dyn FnOnce() + Send>;

/// Runs jobs on a designated owner thread.
#[derive(Clone)]
pub struct MainThreadDispatcher {
    owner: ThreadId,
    tx: mpsc::UnboundedSender<Job>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    pending: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl MainThreadDispatcher {
    /// Creates a dispatcher owned by the calling thread.
    pub fn for_current_thread() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            owner: thread::current().id(),
            tx,
            rx: Arc::new(Mutex::new(rx)),
            pending: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the caller is on the owner thread.
    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Runs `job` now on the owner thread, otherwise queues it.
    pub fn run_or_defer(&self, job: impl FnOnce() + Send + 'static) {
        if self.is_owner_thread() {
            job();
            return;
        }

        if self.is_closed() {
            warn!("Owner thread shut down, dropping deferred release");
            return;
        }
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(Box::new(job)).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            warn!("Main-thread queue closed, dropping deferred release");
        } else {
            trace!("Release deferred to owner thread");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Shuts the queue down. Returns how many queued jobs ran.
    ///
    /// On the owner thread queued jobs run first. Anywhere else they cannot
    /// run, so they are discarded and logged.
    pub fn close(&self) -> usize {
        if self.closed.swap(true, Ordering::AcqRel) {
            return 0;
        }
        if self.is_owner_thread() {
            return self.run_queued();
        }

        let discarded = self.take_queued().len();
        if discarded > 0 {
            warn!(
                discarded,
                "Dispatcher closed off the owner thread, discarding queued releases"
            );
        }
        0
    }

    /// Number of queued jobs.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Runs every queued job. Only honored on the owner thread.
    pub fn pump(&self) -> usize {
        if !self.is_owner_thread() {
            warn!("Pump called off the owner thread, ignoring");
            return 0;
        }
        self.run_queued()
    }

    fn run_queued(&self) -> usize {
        let jobs = self.take_queued();
        let count = jobs.len();
        for job in jobs {
            job();
        }
        count
    }

    // Collect first: a job may itself queue work or release references.
    fn take_queued(&self) -> Vec<Job> {
        let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        let mut collected = Vec::new();
        while let Ok(job) = rx.try_recv() {
            collected.push(job);
        }
        self.pending.fetch_sub(collected.len(), Ordering::AcqRel);
        collected
    }
}

impl std::fmt::Debug for MainThreadDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainThreadDispatcher")
            .field("owner", &self.owner)
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}
