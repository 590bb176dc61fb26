//! Worker-thread persistence channel
//!
//! Runs blocking [`Backend`] operations on a fixed pool of named worker
//! threads fed by a FIFO queue. Every submitted operation carries a
//! [`Completer`]; the caller keeps the matching [`Completion`] and consumes
//! the result on its own thread.
//!
//! Record encoding happens on the worker, so `store` never blocks the
//! caller beyond a queue push.

use crate::backend::Backend;
use crate::channel::PersistenceChannel;
use crate::codec::{decode_record, encode_record};
use crate::completion::{completion, Completion};
use crate::record::{record_key, Ack, PersistRecord};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use timeline_core::{CommandId, HistoryError, Result};
use tracing::{debug, error};

type Job<B> = Box<dyn FnOnce(&B) + Send>;

/// Worker pool metrics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    /// Operations waiting in the queue
    pub queue_depth: usize,
    /// Operations currently running
    pub active_jobs: usize,
    /// Operations finished since creation
    pub jobs_completed: u64,
    /// Number of worker threads
    pub worker_count: usize,
}

struct WorkerInner<B> {
    backend: B,
    queue: Mutex<VecDeque<Job<B>>>,
    work_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    active_jobs: AtomicUsize,
    jobs_completed: AtomicU64,
}

/// Persistence channel running a backend on worker threads
pub struct WorkerChannel<B: Backend> {
    inner: Arc<WorkerInner<B>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
}

impl<B: Backend> WorkerChannel<B> {
    /// Start `num_threads` workers over `backend`
    ///
    /// Workers are named `timeline-persist-0`, `timeline-persist-1`, etc.
    pub fn new(backend: B, num_threads: usize) -> Result<Self> {
        let num_threads = num_threads.max(1);
        let inner = Arc::new(WorkerInner {
            backend,
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            active_jobs: AtomicUsize::new(0),
            jobs_completed: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(num_threads);
        for i in 0..num_threads {
            let inner_clone = Arc::clone(&inner);
            let handle = std::thread::Builder::new()
                .name(format!("timeline-persist-{}", i))
                .spawn(move || worker_loop(&inner_clone))?;
            workers.push(handle);
        }

        Ok(Self {
            inner,
            workers: Mutex::new(workers),
            num_threads,
        })
    }

    /// Borrow the backend
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Queue a job; after shutdown the job is dropped, which drops its
    /// completer and resolves the caller's completion with `ChannelClosed`.
    fn submit(&self, job: Job<B>) {
        if self.inner.shutdown.load(Ordering::Acquire) {
            debug!(target: "timeline::worker", "channel shut down; job rejected");
            return;
        }
        self.inner.queue.lock().push_back(job);
        self.inner.work_ready.notify_one();
    }

    /// Block until all queued and running operations have finished
    ///
    /// Workers keep running afterwards.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while !queue.is_empty() || self.inner.active_jobs.load(Ordering::Acquire) > 0 {
            self.inner.drain_cond.wait(&mut queue);
        }
    }

    /// Metrics snapshot
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            queue_depth: self.inner.queue.lock().len(),
            active_jobs: self.inner.active_jobs.load(Ordering::Relaxed),
            jobs_completed: self.inner.jobs_completed.load(Ordering::Relaxed),
            worker_count: self.num_threads,
        }
    }

    fn stop(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            // Hold the queue lock so a worker between its shutdown check and
            // its wait cannot miss the notification.
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl<B: Backend> PersistenceChannel for WorkerChannel<B> {
    fn store(&self, record: PersistRecord) -> Completion<Ack> {
        let (completer, completion) = completion();
        let job: Job<B> = Box::new(move |backend: &B| {
            let result = encode_record(&record)
                .and_then(|bytes| backend.put(&record.key(), &bytes))
                .map(|()| Ack::for_record(&record));
            debug!(target: "timeline::worker", id = %record.command_id, ok = result.is_ok(), "record stored");
            completer.complete(result);
        });
        self.submit(job);
        completion
    }

    fn fetch(&self, command_id: CommandId) -> Completion<PersistRecord> {
        let (completer, completion) = completion();
        let job: Job<B> = Box::new(move |backend: &B| {
            let result = backend
                .get(&record_key(command_id))
                .and_then(|bytes| match bytes {
                    Some(bytes) => decode_record(&bytes),
                    None => Err(HistoryError::invalid(format!(
                        "no record stored for command {}",
                        command_id
                    ))),
                });
            completer.complete(result);
        });
        self.submit(job);
        completion
    }

    fn is_available(&self) -> bool {
        !self.inner.shutdown.load(Ordering::Acquire)
    }

    fn mode_name(&self) -> &'static str {
        "Worker"
    }

    fn shutdown(&self) -> Result<()> {
        self.stop();
        Ok(())
    }
}

impl<B: Backend> Drop for WorkerChannel<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Decrements `active_jobs` and wakes drain waiters, even if the job panicked
struct ActiveJobGuard<'a, B> {
    inner: &'a WorkerInner<B>,
}

impl<'a, B> Drop for ActiveJobGuard<'a, B> {
    fn drop(&mut self) {
        self.inner.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.inner.active_jobs.fetch_sub(1, Ordering::Release);
        let _queue = self.inner.queue.lock();
        self.inner.drain_cond.notify_all();
    }
}

fn worker_loop<B: Backend>(inner: &WorkerInner<B>) {
    loop {
        let job = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    inner.active_jobs.fetch_add(1, Ordering::Release);
                    break job;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveJobGuard { inner };

        // A panicking job drops its completer while unwinding, which resolves
        // the caller's completion with ChannelClosed.
        if let Err(e) =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| job(&inner.backend)))
        {
            error!(
                target: "timeline::worker",
                "persistence job panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}
