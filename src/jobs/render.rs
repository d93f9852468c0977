//! Rasterization jobs: display renders, thumbnails and print output

use std::sync::{Arc, Mutex, PoisonError};

use crate::backend::{FontLock, SharedDocument};
use crate::error::JobError;
use crate::job::{EngineJob, JobCore, JobState, Progress, RunContext, RunMode};
use crate::types::{PixelSurface, RenderOptions, RenderedPage, ThumbnailOptions};

/// Renders one page for display, optionally with a selection overlay.
///
/// The job is reusable: after it finishes, `set_options` plus
/// [`JobCore::reset`](crate::JobCore::reset) re-arm it for the next render
/// of the same page without reallocating.
pub struct RenderJob {
    core: JobCore,
    doc: SharedDocument,
    fonts: FontLock,
    page: usize,
    options: Mutex<RenderOptions>,
    out: Mutex<Option<RenderedPage>>,
}

impl RenderJob {
    pub fn new(
        doc: SharedDocument,
        fonts: FontLock,
        page: usize,
        options: RenderOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: JobCore::new(RunMode::Threaded),
            doc,
            fonts,
            page,
            options: Mutex::new(options),
            out: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn page(&self) -> usize {
        self.page
    }

    /// Replace the render parameters. Only meaningful before the next push.
    pub fn set_options(&self, options: RenderOptions) {
        *self.options.lock().unwrap_or_else(PoisonError::into_inner) = options;
    }

    /// The rendered page, if the job succeeded.
    #[must_use]
    pub fn take_output(&self) -> Option<RenderedPage> {
        if self.core.state() != JobState::Succeeded {
            return None;
        }
        self.out
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl EngineJob for RenderJob {
    fn core(&self) -> &JobCore {
        &self.core
    }

    fn run(&self, _ctx: &RunContext) -> Result<Progress, JobError> {
        let mut guard = self.doc.lock();
        let doc = guard
            .as_mut()
            .ok_or_else(|| JobError::internal("no document bound"))?;
        let options = self
            .options
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let _fonts = self.fonts.acquire();
        let rendered = doc.render(self.page, &options)?;

        *self.out.lock().unwrap_or_else(PoisonError::into_inner) = Some(rendered);
        Ok(Progress::Finished)
    }
}

/// Produces a small preview surface for one page.
pub struct ThumbnailJob {
    core: JobCore,
    doc: SharedDocument,
    fonts: FontLock,
    page: usize,
    options: ThumbnailOptions,
    out: Mutex<Option<PixelSurface>>,
}

impl ThumbnailJob {
    pub fn new(
        doc: SharedDocument,
        fonts: FontLock,
        page: usize,
        options: ThumbnailOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: JobCore::new(RunMode::Threaded),
            doc,
            fonts,
            page,
            options,
            out: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn page(&self) -> usize {
        self.page
    }

    #[must_use]
    pub fn take_output(&self) -> Option<PixelSurface> {
        if self.core.state() != JobState::Succeeded {
            return None;
        }
        self.out
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl EngineJob for ThumbnailJob {
    fn core(&self) -> &JobCore {
        &self.core
    }

    fn run(&self, _ctx: &RunContext) -> Result<Progress, JobError> {
        let mut guard = self.doc.lock();
        let doc = guard
            .as_mut()
            .ok_or_else(|| JobError::internal("no document bound"))?;

        let _fonts = self.fonts.acquire();
        let surface = doc.thumbnail(self.page, &self.options)?;

        *self.out.lock().unwrap_or_else(PoisonError::into_inner) = Some(surface);
        Ok(Progress::Finished)
    }
}

/// Renders one page at print fidelity.
pub struct PrintJob {
    core: JobCore,
    doc: SharedDocument,
    fonts: FontLock,
    page: usize,
    out: Mutex<Option<PixelSurface>>,
}

impl PrintJob {
    pub fn new(doc: SharedDocument, fonts: FontLock, page: usize) -> Arc<Self> {
        Arc::new(Self {
            core: JobCore::new(RunMode::Threaded),
            doc,
            fonts,
            page,
            out: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn page(&self) -> usize {
        self.page
    }

    #[must_use]
    pub fn take_output(&self) -> Option<PixelSurface> {
        if self.core.state() != JobState::Succeeded {
            return None;
        }
        self.out
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl EngineJob for PrintJob {
    fn core(&self) -> &JobCore {
        &self.core
    }

    fn run(&self, _ctx: &RunContext) -> Result<Progress, JobError> {
        let mut guard = self.doc.lock();
        let doc = guard
            .as_mut()
            .ok_or_else(|| JobError::internal("no document bound"))?;

        let _fonts = self.fonts.acquire();
        let surface = doc.render_for_print(self.page)?;

        *self.out.lock().unwrap_or_else(PoisonError::into_inner) = Some(surface);
        Ok(Progress::Finished)
    }
}
