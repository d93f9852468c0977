//! Persistence jobs: whole-document save and single-page export

use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::SharedDocument;
use crate::error::JobError;
use crate::job::{EngineJob, JobCore, Progress, RunContext, RunMode};

/// Writes the document (including any mutations, e.g. filled forms) to a
/// destination path.
pub struct SaveJob {
    core: JobCore,
    doc: SharedDocument,
    destination: PathBuf,
}

impl SaveJob {
    pub fn new(doc: SharedDocument, destination: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            core: JobCore::new(RunMode::Threaded),
            doc,
            destination: destination.into(),
        })
    }

    #[must_use]
    pub fn destination(&self) -> &std::path::Path {
        &self.destination
    }
}

impl EngineJob for SaveJob {
    fn core(&self) -> &JobCore {
        &self.core
    }

    fn run(&self, _ctx: &RunContext) -> Result<Progress, JobError> {
        self.doc
            .with(|doc| doc.save(&self.destination))
            .ok_or_else(|| JobError::internal("no document bound"))??;
        Ok(Progress::Finished)
    }
}

/// Exports a single page as a standalone file, for backends that support it.
pub struct ExportJob {
    core: JobCore,
    doc: SharedDocument,
    page: usize,
    destination: PathBuf,
}

impl ExportJob {
    pub fn new(doc: SharedDocument, page: usize, destination: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            core: JobCore::new(RunMode::Threaded),
            doc,
            page,
            destination: destination.into(),
        })
    }

    #[must_use]
    pub fn page(&self) -> usize {
        self.page
    }
}

impl EngineJob for ExportJob {
    fn core(&self) -> &JobCore {
        &self.core
    }

    fn run(&self, _ctx: &RunContext) -> Result<Progress, JobError> {
        self.doc
            .with(|doc| doc.export_page(self.page, &self.destination))
            .ok_or_else(|| JobError::internal("no document bound"))??;
        Ok(Progress::Finished)
    }
}
