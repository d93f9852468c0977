//! Priority scheduler: worker pool for threaded jobs, idle list for
//! cooperative ones
//!
//! Four FIFO queues, one per [`JobPriority`]; workers always drain the
//! highest non-empty queue and never preempt a running job. Cooperative
//! jobs bypass the pool entirely and run in slices on the controlling
//! thread through [`JobScheduler::idle_tick`]. All terminal notifications
//! travel through one channel drained by the controlling thread, so every
//! job produces exactly one `Finished` or `Cancelled` event per run.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use log::{debug, warn};

use crate::error::JobError;
use crate::job::{
    BeginRun, EventSink, JobEvent, JobPriority, JobRef, JobState, PRIORITY_LEVELS, Progress,
    RunContext, RunMode, Terminal,
};

pub const DEFAULT_WORKERS: usize = 2;

struct QueueState {
    queues: [VecDeque<JobRef>; PRIORITY_LEVELS],
    shutdown: bool,
}

impl QueueState {
    fn pop_highest(&mut self) -> Option<JobRef> {
        self.queues.iter_mut().find_map(VecDeque::pop_front)
    }

    fn remove(&mut self, id: crate::job::JobId) -> bool {
        for queue in &mut self.queues {
            if let Some(pos) = queue.iter().position(|job| job.core().id() == id) {
                queue.remove(pos);
                return true;
            }
        }
        false
    }
}

struct Shared {
    queues: Mutex<QueueState>,
    cond: Condvar,
    sink: EventSink,
    /// Threaded jobs queued or running, for `wait_until_idle`.
    outstanding: Mutex<usize>,
    idle_cond: Condvar,
}

impl Shared {
    fn lock_queues(&self) -> MutexGuard<'_, QueueState> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn inc_outstanding(&self) {
        let mut count = self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *count += 1;
    }

    fn dec_outstanding(&self) {
        let mut count = self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle_cond.notify_all();
        }
    }
}

/// The scheduler. One instance per document view is typical; dropping it
/// shuts the workers down without waiting for a busy backend call.
pub struct JobScheduler {
    shared: Arc<Shared>,
    slice_jobs: Mutex<VecDeque<JobRef>>,
    events_rx: flume::Receiver<JobEvent>,
    sink: EventSink,
}

impl JobScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::with_workers(DEFAULT_WORKERS)
    }

    #[must_use]
    pub fn with_workers(workers: usize) -> Self {
        let (tx, rx) = flume::unbounded();
        let sink = EventSink::new(tx);
        let shared = Arc::new(Shared {
            queues: Mutex::new(QueueState {
                queues: std::array::from_fn(|_| VecDeque::new()),
                shutdown: false,
            }),
            cond: Condvar::new(),
            sink: sink.clone(),
            outstanding: Mutex::new(0),
            idle_cond: Condvar::new(),
        });

        for i in 0..workers.max(1) {
            let shared = Arc::clone(&shared);
            // Workers exit on the shutdown flag; the handle is not kept
            // because drop must not block on a hung backend.
            let _ = thread::Builder::new()
                .name(format!("quire-worker-{i}"))
                .spawn(move || worker_loop(&shared));
        }

        Self {
            shared,
            slice_jobs: Mutex::new(VecDeque::new()),
            events_rx: rx,
            sink,
        }
    }

    /// Enqueue a job. A second push of an already queued or running job is
    /// a no-op; a push of a finished job is ignored with a warning (call
    /// [`JobCore::reset`](crate::JobCore::reset) first to reuse it).
    pub fn push(&self, job: JobRef, priority: JobPriority) {
        let core = job.core();
        match core.state() {
            JobState::Pending => {}
            JobState::Running => {
                debug!("{} already running, push ignored", core.id());
                return;
            }
            state => {
                warn!("{} pushed in terminal state {state:?}, ignored", core.id());
                return;
            }
        }
        if !core.mark_queued() {
            return;
        }

        match core.mode() {
            RunMode::Threaded => {
                self.shared.inc_outstanding();
                let mut state = self.shared.lock_queues();
                state.queues[priority.index()].push_back(job);
                drop(state);
                self.shared.cond.notify_one();
            }
            RunMode::CooperativeSlice => {
                self.lock_slices().push_back(job);
            }
        }
    }

    /// Request cancellation. A job still sitting in a queue is dequeued and
    /// finalized here, so it never runs; a running job keeps running until
    /// it next observes the flag, and its result is discarded. Either way
    /// exactly one `Cancelled` event is emitted, and never a `Finished`.
    pub fn cancel(&self, job: &JobRef) {
        let core = job.core();
        if !core.cancel_token().set() {
            return;
        }
        debug!("{} cancel requested", core.id());

        let dequeued = match core.mode() {
            RunMode::Threaded => {
                let removed = self.shared.lock_queues().remove(core.id());
                if removed {
                    self.shared.dec_outstanding();
                }
                removed
            }
            RunMode::CooperativeSlice => {
                let mut slices = self.lock_slices();
                match slices.iter().position(|j| j.core().id() == core.id()) {
                    Some(pos) => {
                        slices.remove(pos);
                        true
                    }
                    None => false,
                }
            }
        };

        if dequeued {
            core.cancel_now();
            core.clear_active();
            self.sink.job_cancelled(Arc::clone(job));
        }
        // Not dequeued: a worker (or the current idle tick) owns the job
        // and will emit the Cancelled event when it finalizes.
    }

    /// Move a queued threaded job to another priority queue. The job joins
    /// the tail of its new queue; no-op once it started running.
    pub fn update_priority(&self, job: &JobRef, priority: JobPriority) {
        if job.core().mode() != RunMode::Threaded {
            return;
        }
        let id = job.core().id();
        let mut state = self.shared.lock_queues();
        let found = state
            .queues
            .iter()
            .enumerate()
            .find_map(|(qi, q)| q.iter().position(|j| j.core().id() == id).map(|p| (qi, p)));
        let Some((qi, pos)) = found else { return };
        if qi == priority.index() {
            return;
        }
        if let Some(moved) = state.queues[qi].remove(pos) {
            state.queues[priority.index()].push_back(moved);
            drop(state);
            self.shared.cond.notify_one();
        }
    }

    /// Run one slice of the oldest cooperative job. Call from the
    /// controlling thread whenever it is otherwise idle. Returns whether
    /// cooperative work remains.
    pub fn idle_tick(&self) -> bool {
        let Some(job) = self.lock_slices().pop_front() else {
            return false;
        };
        let core = job.core();

        match core.state() {
            JobState::Pending => match core.begin_run() {
                BeginRun::Run => {}
                _ => {
                    core.clear_active();
                    self.sink.job_cancelled(job);
                    return self.has_slice_work();
                }
            },
            JobState::Running => {
                if core.is_cancelled() {
                    core.cancel_now();
                    core.clear_active();
                    self.sink.job_cancelled(job);
                    return self.has_slice_work();
                }
            }
            state => {
                warn!("{} on idle list in state {state:?}", core.id());
                core.clear_active();
                return self.has_slice_work();
            }
        }

        let ctx = RunContext::new(self.sink.clone());
        let result = catch_unwind(AssertUnwindSafe(|| job.run(&ctx)))
            .unwrap_or_else(|_| Err(JobError::internal("job panicked")));

        match result {
            Ok(Progress::More) if !core.is_cancelled() => {
                self.lock_slices().push_back(job);
            }
            outcome => {
                let terminal = core.finish(outcome.map(|_| ()));
                core.clear_active();
                match terminal {
                    Terminal::Cancelled => self.sink.job_cancelled(job),
                    _ => self.sink.job_finished(job),
                }
            }
        }
        self.has_slice_work()
    }

    /// Drain every notification currently queued, without blocking.
    pub fn poll_events(&self) -> Vec<JobEvent> {
        self.events_rx.try_iter().collect()
    }

    /// The raw event channel, for callers that integrate it into their own
    /// event loop.
    #[must_use]
    pub fn events(&self) -> &flume::Receiver<JobEvent> {
        &self.events_rx
    }

    /// Block until no threaded job is queued or running. Cooperative jobs
    /// are not covered; drive those with [`JobScheduler::idle_tick`].
    pub fn wait_until_idle(&self) {
        let mut outstanding = self
            .shared
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *outstanding > 0 {
            outstanding = self
                .shared
                .idle_cond
                .wait(outstanding)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn lock_slices(&self) -> MutexGuard<'_, VecDeque<JobRef>> {
        self.slice_jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn has_slice_work(&self) -> bool {
        !self.lock_slices().is_empty()
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.shared.lock_queues().shutdown = true;
        self.shared.cond.notify_all();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut state = shared.lock_queues();
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(job) = state.pop_highest() {
                    break job;
                }
                state = shared.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
        };

        let core = job.core();
        match core.begin_run() {
            BeginRun::Run => {}
            BeginRun::Cancelled => {
                core.clear_active();
                shared.sink.job_cancelled(job);
                shared.dec_outstanding();
                continue;
            }
            BeginRun::Skip => {
                shared.dec_outstanding();
                continue;
            }
        }

        let ctx = RunContext::new(shared.sink.clone());
        let outcome = loop {
            let result = catch_unwind(AssertUnwindSafe(|| job.run(&ctx)))
                .unwrap_or_else(|_| Err(JobError::internal("job panicked")));
            match result {
                // Threaded jobs may use More to re-check the cancel flag
                // between phases of a long run.
                Ok(Progress::More) if !core.is_cancelled() => continue,
                Ok(_) => break Ok(()),
                Err(err) => break Err(err),
            }
        };

        let terminal = core.finish(outcome);
        core.clear_active();
        match terminal {
            Terminal::Cancelled => shared.sink.job_cancelled(job),
            _ => shared.sink.job_finished(job),
        }
        shared.dec_outstanding();
    }
}
