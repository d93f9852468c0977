//! Document loading with password retry

use std::sync::{Arc, Mutex, PoisonError};

use log::debug;

use crate::backend::{Document, DocumentBackend, DocumentSource, FontLock, SharedDocument};
use crate::error::JobError;
use crate::job::{EngineJob, JobCore, Progress, RunContext, RunMode};

/// Opens and parses a document, binding it into the shared slot on success.
///
/// When parsing fails (typically `PasswordRequired`), the partially-opened
/// handle is kept on the job; the caller calls [`LoadJob::set_password`],
/// [`JobCore::reset`](crate::JobCore::reset) and pushes the same job again,
/// and the retry resumes from the staged handle instead of re-opening the
/// source.
pub struct LoadJob {
    core: JobCore,
    backend: Arc<dyn DocumentBackend>,
    source: DocumentSource,
    password: Mutex<Option<String>>,
    staged: Mutex<Option<Box<dyn Document>>>,
    target: SharedDocument,
    fonts: FontLock,
}

impl LoadJob {
    pub fn new(
        backend: Arc<dyn DocumentBackend>,
        source: DocumentSource,
        target: SharedDocument,
        fonts: FontLock,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: JobCore::new(RunMode::Threaded),
            backend,
            source,
            password: Mutex::new(None),
            staged: Mutex::new(None),
            target,
            fonts,
        })
    }

    pub fn set_password(&self, password: impl Into<String>) {
        let mut guard = self
            .password
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Some(password.into());
    }

    #[must_use]
    pub fn source(&self) -> &DocumentSource {
        &self.source
    }
}

impl EngineJob for LoadJob {
    fn core(&self) -> &JobCore {
        &self.core
    }

    fn run(&self, _ctx: &RunContext) -> Result<Progress, JobError> {
        let staged = self
            .staged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        // Parsing may pull glyph data through the global font subsystem.
        // Lock order is doc then fonts, so the font guard is dropped
        // before the install below takes the document slot.
        let doc = {
            let _fonts = self.fonts.acquire();
            let mut doc = match staged {
                Some(doc) => {
                    debug!("{} resuming from staged handle", self.core.id());
                    doc
                }
                None => self.backend.open(&self.source)?,
            };

            let password = self
                .password
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Err(err) = doc.load(password.as_deref()) {
                // Keep the handle for the retry path.
                *self.staged.lock().unwrap_or_else(PoisonError::into_inner) = Some(doc);
                return Err(err.into());
            }
            doc
        };

        *self.target.lock() = Some(doc);
        Ok(Progress::Finished)
    }
}
