//! Job identity, lifecycle state machine and completion events
//!
//! Every unit of background work is an [`EngineJob`]: a job-specific struct
//! embedding a [`JobCore`] that owns the id, the run mode, the cancel flag
//! and the lifecycle state. The scheduler drives jobs exclusively through
//! the core, so the state transitions live here in one place.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::warn;

use crate::error::JobError;

/// Process-unique job identity, stable across requeues of the same job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// How a job executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Runs to completion on a worker thread.
    Threaded,
    /// Runs in bounded slices on the controlling thread via
    /// [`crate::JobScheduler::idle_tick`].
    CooperativeSlice,
}

/// Queue a threaded job lands in. Workers always drain the highest
/// non-empty queue first; within a queue, order is FIFO. Queue rank
/// comes from [`JobPriority::index`], lowest index served first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobPriority {
    /// Needed before anything can be shown (document load).
    Urgent,
    /// Blocks the current view (visible-page work).
    High,
    /// Near-future needs (adjacent-page prefetch).
    Low,
    /// Everything else (thumbnails out of view).
    Background,
}

pub(crate) const PRIORITY_LEVELS: usize = 4;

impl JobPriority {
    pub(crate) fn index(self) -> usize {
        match self {
            Self::Urgent => 0,
            Self::High => 1,
            Self::Low => 2,
            Self::Background => 3,
        }
    }
}

/// Lifecycle of a job. `Succeeded`, `Failed` and `Cancelled` are terminal;
/// a reusable job returns to `Pending` only through [`JobCore::reset`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed(JobError),
    Cancelled,
}

impl JobState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

/// Shared cancellation flag. Setting it never interrupts a running job;
/// the job observes it at its own pace and the scheduler discards the
/// result of a cancelled run.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Returns whether this call was the one that set the flag.
    pub(crate) fn set(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Decision made when a worker picks a job off a queue.
pub(crate) enum BeginRun {
    /// Transitioned `Pending -> Running`; execute it.
    Run,
    /// Cancel raced the dequeue; the job never runs.
    Cancelled,
    /// Stale queue entry (already terminal or already running); skip it.
    Skip,
}

/// Terminal outcome of one run attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Terminal {
    Succeeded,
    Failed(JobError),
    Cancelled,
}

/// State shared between a job and the scheduler.
pub struct JobCore {
    id: JobId,
    mode: RunMode,
    state: Mutex<JobState>,
    cancel: CancelToken,
    /// Set while the job sits in a queue or runs; makes push idempotent.
    active: AtomicBool,
}

impl JobCore {
    #[must_use]
    pub fn new(mode: RunMode) -> Self {
        Self {
            id: JobId::next(),
            mode,
            state: Mutex::new(JobState::Pending),
            cancel: CancelToken::default(),
            active: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    #[must_use]
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    #[must_use]
    pub fn state(&self) -> JobState {
        self.lock_state().clone()
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the queue slot. Returns false when the job is already queued
    /// or running, so a second push is a no-op.
    pub(crate) fn mark_queued(&self) -> bool {
        !self.active.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn clear_active(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Called by the executor right after dequeue.
    pub(crate) fn begin_run(&self) -> BeginRun {
        let mut state = self.lock_state();
        match *state {
            JobState::Pending => {
                if self.cancel.is_cancelled() {
                    *state = JobState::Cancelled;
                    BeginRun::Cancelled
                } else {
                    *state = JobState::Running;
                    BeginRun::Run
                }
            }
            ref other => {
                warn!("{} dequeued in state {:?}", self.id, other);
                BeginRun::Skip
            }
        }
    }

    /// Record the outcome of a finished run. A cancel observed here wins
    /// over the job's own result, which is discarded by the caller.
    pub(crate) fn finish(&self, outcome: Result<(), JobError>) -> Terminal {
        let mut state = self.lock_state();
        let terminal = if self.cancel.is_cancelled() {
            Terminal::Cancelled
        } else {
            match outcome {
                Ok(()) => Terminal::Succeeded,
                Err(err) => Terminal::Failed(err),
            }
        };
        *state = match &terminal {
            Terminal::Succeeded => JobState::Succeeded,
            Terminal::Failed(err) => JobState::Failed(err.clone()),
            Terminal::Cancelled => JobState::Cancelled,
        };
        terminal
    }

    /// Cancel a job that was removed from a queue before it ran, or a
    /// cooperative job between slices.
    pub(crate) fn cancel_now(&self) {
        let mut state = self.lock_state();
        if !state.is_terminal() {
            *state = JobState::Cancelled;
        }
    }

    /// Return a succeeded or failed job to `Pending` so it can be pushed
    /// again with new parameters. Rejected while the job is queued,
    /// running or cancelled.
    pub fn reset(&self) -> bool {
        let mut state = self.lock_state();
        match *state {
            JobState::Succeeded | JobState::Failed(_) => {
                *state = JobState::Pending;
                self.cancel.clear();
                self.active.store(false, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }
}

/// Whether a cooperative job wants another slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    /// The job is done; the scheduler records success.
    Finished,
    /// More slices remain; the scheduler keeps the job on the idle list.
    More,
}

/// A schedulable unit of work.
///
/// Threaded jobs return `Finished` from their single `run` call;
/// cooperative jobs are called repeatedly and return `More` until done.
pub trait EngineJob: Send + Sync {
    fn core(&self) -> &JobCore;

    fn run(&self, ctx: &RunContext) -> Result<Progress, JobError>;
}

pub type JobRef = Arc<dyn EngineJob>;

/// Notification delivered to the controlling thread.
///
/// `Finished` covers both success and failure; the receiver inspects the
/// job's state. Progress variants are informational and may arrive many
/// times; the terminal variants arrive exactly once per run.
pub enum JobEvent {
    Finished(JobRef),
    Cancelled(JobRef),
    FindProgress {
        id: JobId,
        page: usize,
        matches: usize,
    },
    FontsProgress {
        id: JobId,
        fraction: f64,
    },
}

impl JobEvent {
    #[must_use]
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Finished(job) | Self::Cancelled(job) => job.core().id(),
            Self::FindProgress { id, .. } | Self::FontsProgress { id, .. } => *id,
        }
    }
}

impl fmt::Debug for JobEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finished(job) => write!(f, "Finished({})", job.core().id()),
            Self::Cancelled(job) => write!(f, "Cancelled({})", job.core().id()),
            Self::FindProgress { id, page, matches } => {
                write!(f, "FindProgress({id}, page {page}, {matches} matches)")
            }
            Self::FontsProgress { id, fraction } => {
                write!(f, "FontsProgress({id}, {fraction:.2})")
            }
        }
    }
}

/// Sending half of the event channel, handed to running jobs through
/// [`RunContext`] so long-lived jobs can stream progress.
#[derive(Clone)]
pub struct EventSink {
    tx: flume::Sender<JobEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: flume::Sender<JobEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: JobEvent) {
        // The receiver lives as long as the scheduler; a send can only fail
        // during teardown, where dropping the event is fine.
        if self.tx.send(event).is_err() {
            warn!("event receiver gone, dropping notification");
        }
    }

    pub(crate) fn job_finished(&self, job: JobRef) {
        self.send(JobEvent::Finished(job));
    }

    pub(crate) fn job_cancelled(&self, job: JobRef) {
        self.send(JobEvent::Cancelled(job));
    }

    pub fn find_progress(&self, id: JobId, page: usize, matches: usize) {
        self.send(JobEvent::FindProgress { id, page, matches });
    }

    pub fn fonts_progress(&self, id: JobId, fraction: f64) {
        self.send(JobEvent::FontsProgress { id, fraction });
    }
}

/// Execution context passed to every `run` call.
pub struct RunContext {
    events: EventSink,
}

impl RunContext {
    pub(crate) fn new(events: EventSink) -> Self {
        Self { events }
    }

    #[must_use]
    pub fn events(&self) -> &EventSink {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = JobCore::new(RunMode::Threaded);
        let b = JobCore::new(RunMode::Threaded);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn cancel_before_run_wins() {
        let core = JobCore::new(RunMode::Threaded);
        core.cancel_token().set();

        assert!(matches!(core.begin_run(), BeginRun::Cancelled));
        assert_eq!(core.state(), JobState::Cancelled);
    }

    #[test]
    fn cancel_during_run_discards_result() {
        let core = JobCore::new(RunMode::Threaded);
        assert!(matches!(core.begin_run(), BeginRun::Run));

        core.cancel_token().set();
        let terminal = core.finish(Ok(()));

        assert_eq!(terminal, Terminal::Cancelled);
        assert_eq!(core.state(), JobState::Cancelled);
    }

    #[test]
    fn reset_reopens_terminal_job() {
        let core = JobCore::new(RunMode::Threaded);
        assert!(matches!(core.begin_run(), BeginRun::Run));
        core.finish(Err(JobError::internal("boom")));

        assert!(core.reset());
        assert_eq!(core.state(), JobState::Pending);
        assert!(!core.is_cancelled());
    }

    #[test]
    fn reset_refuses_a_cancelled_job() {
        let core = JobCore::new(RunMode::Threaded);
        core.cancel_token().set();
        assert!(matches!(core.begin_run(), BeginRun::Cancelled));

        assert!(!core.reset());
        assert_eq!(core.state(), JobState::Cancelled);
    }

    #[test]
    fn reset_refuses_while_running() {
        let core = JobCore::new(RunMode::Threaded);
        assert!(matches!(core.begin_run(), BeginRun::Run));
        assert!(!core.reset());
    }

    #[test]
    fn mark_queued_is_idempotent() {
        let core = JobCore::new(RunMode::Threaded);
        assert!(core.mark_queued());
        assert!(!core.mark_queued());
        core.clear_active();
        assert!(core.mark_queued());
    }
}
