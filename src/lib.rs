//! Background job engine for interactive document viewers.
//!
//! A viewer UI must never call a document backend directly: backend calls
//! are slow and not thread-safe. This crate provides the machinery behind
//! that rule: typed [`jobs`] running on a priority [`JobScheduler`], a
//! single [`SharedDocument`] lock serializing backend access, and a
//! [`PageCache`] that keeps per-page derived data (links, text, forms, ...)
//! warm around the visible pages.
//!
//! The controlling thread pushes jobs, drains [`JobEvent`]s, and drives
//! cooperative jobs (find, font scan) through [`JobScheduler::idle_tick`].

pub mod aspect;
pub mod backend;
pub mod error;
pub mod job;
pub mod jobs;
pub mod page_cache;
pub mod scheduler;
pub mod types;

pub use aspect::AspectMask;
pub use backend::{Document, DocumentBackend, DocumentSource, FontLock, SharedDocument};
pub use error::{BackendError, JobError};
pub use job::{
    CancelToken, EngineJob, JobCore, JobEvent, JobId, JobPriority, JobRef, JobState, Progress,
    RunContext, RunMode,
};
pub use page_cache::{DEFAULT_PREFETCH_MARGIN, PageCache};
pub use scheduler::{DEFAULT_WORKERS, JobScheduler};
