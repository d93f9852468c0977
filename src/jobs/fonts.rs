//! Incremental scan of the fonts a document uses

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::backend::{FontLock, SharedDocument};
use crate::error::JobError;
use crate::job::{EngineJob, JobCore, Progress, RunContext, RunMode};
use crate::types::FontInfo;

const PAGES_PER_SLICE: usize = 5;

/// Cooperative job that walks every page collecting font usage, a few
/// pages per slice. Needs both the document lock and the font lock (in
/// that order); either being busy makes the slice yield.
///
/// Emits a [`FontsProgress`](crate::JobEvent::FontsProgress) event after
/// each slice.
pub struct FontsJob {
    core: JobCore,
    doc: SharedDocument,
    fonts: FontLock,
    next_page: AtomicUsize,
    out: Mutex<Vec<FontInfo>>,
}

impl FontsJob {
    pub fn new(doc: SharedDocument, fonts: FontLock) -> Arc<Self> {
        Arc::new(Self {
            core: JobCore::new(RunMode::CooperativeSlice),
            doc,
            fonts,
            next_page: AtomicUsize::new(0),
            out: Mutex::new(Vec::new()),
        })
    }

    /// Fonts collected so far, deduplicated by name.
    #[must_use]
    pub fn fonts(&self) -> Vec<FontInfo> {
        self.out
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EngineJob for FontsJob {
    fn core(&self) -> &JobCore {
        &self.core
    }

    fn run(&self, ctx: &RunContext) -> Result<Progress, JobError> {
        let Some(mut guard) = self.doc.try_lock() else {
            return Ok(Progress::More);
        };
        let doc = guard
            .as_mut()
            .ok_or_else(|| JobError::internal("no document bound"))?;
        let Some(_fonts) = self.fonts.try_acquire() else {
            return Ok(Progress::More);
        };

        let n_pages = doc.page_count();
        let first = self.next_page.load(Ordering::SeqCst);
        let last = (first + PAGES_PER_SLICE).min(n_pages);

        for page in first..last {
            let found = doc.scan_fonts(page)?;
            let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
            for font in found {
                if !out.iter().any(|known| known.name == font.name) {
                    out.push(font);
                }
            }
        }
        self.next_page.store(last, Ordering::SeqCst);

        let fraction = if n_pages == 0 {
            1.0
        } else {
            last as f64 / n_pages as f64
        };
        ctx.events().fonts_progress(self.core.id(), fraction);

        if last >= n_pages {
            Ok(Progress::Finished)
        } else {
            Ok(Progress::More)
        }
    }
}
