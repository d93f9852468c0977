//! Incremental text search across the whole document

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::backend::SharedDocument;
use crate::error::JobError;
use crate::job::{EngineJob, JobCore, Progress, RunContext, RunMode};
use crate::types::{FindOptions, Rect};

/// Cooperative search job: each slice searches exactly one page, starting
/// at `start_page` and wrapping around, and emits a
/// [`FindProgress`](crate::JobEvent::FindProgress) event for it. The job
/// finishes after every page has been visited once.
///
/// Slices take the document lock non-blockingly; when a worker holds it,
/// the slice yields without advancing.
pub struct FindJob {
    core: JobCore,
    doc: SharedDocument,
    query: String,
    options: FindOptions,
    start_page: usize,
    n_pages: usize,
    current: AtomicUsize,
    scanned: AtomicUsize,
    pages: Mutex<Vec<Option<Vec<Rect>>>>,
}

impl FindJob {
    pub fn new(
        doc: SharedDocument,
        start_page: usize,
        query: impl Into<String>,
        options: FindOptions,
    ) -> Arc<Self> {
        let n_pages = doc.page_count();
        let start_page = if n_pages == 0 { 0 } else { start_page % n_pages };
        Arc::new(Self {
            core: JobCore::new(RunMode::CooperativeSlice),
            doc,
            query: query.into(),
            options,
            start_page,
            n_pages,
            current: AtomicUsize::new(start_page),
            scanned: AtomicUsize::new(0),
            pages: Mutex::new(vec![None; n_pages]),
        })
    }

    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Match rectangles for a page, `None` while that page is unscanned.
    #[must_use]
    pub fn matches(&self, page: usize) -> Option<Vec<Rect>> {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(page)
            .and_then(Clone::clone)
    }

    /// Whether any scanned page had at least one match.
    #[must_use]
    pub fn has_results(&self) -> bool {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .flatten()
            .any(|matches| !matches.is_empty())
    }

    /// Fraction of pages scanned so far, in `0.0..=1.0`.
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.n_pages == 0 {
            return 1.0;
        }
        self.scanned.load(Ordering::SeqCst) as f64 / self.n_pages as f64
    }
}

impl EngineJob for FindJob {
    fn core(&self) -> &JobCore {
        &self.core
    }

    fn run(&self, ctx: &RunContext) -> Result<Progress, JobError> {
        if self.n_pages == 0 {
            return Ok(Progress::Finished);
        }

        let page = self.current.load(Ordering::SeqCst);
        let found = {
            let Some(mut guard) = self.doc.try_lock() else {
                // A worker holds the document; try again next tick.
                return Ok(Progress::More);
            };
            let doc = guard
                .as_mut()
                .ok_or_else(|| JobError::internal("no document bound"))?;
            doc.find_text(page, &self.query, &self.options)?
        };

        let n_matches = found.len();
        self.pages.lock().unwrap_or_else(PoisonError::into_inner)[page] = Some(found);
        ctx.events().find_progress(self.core.id(), page, n_matches);

        let scanned = self.scanned.fetch_add(1, Ordering::SeqCst) + 1;
        self.current
            .store((page + 1) % self.n_pages, Ordering::SeqCst);

        if scanned >= self.n_pages {
            Ok(Progress::Finished)
        } else {
            Ok(Progress::More)
        }
    }
}
