//! Batched per-page aspect extraction and the document outline

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::aspect::AspectMask;
use crate::backend::SharedDocument;
use crate::error::JobError;
use crate::job::{EngineJob, JobCore, Progress, RunContext, RunMode};
use crate::types::{
    Annotation, FormField, Link, MappingList, Media, OutlineEntry, PageImage, Rect, TextAttr,
};

/// Derived data for one page. `computed` records which fields hold real
/// results; the other bits leave their fields at the empty default.
#[derive(Clone, Debug, Default)]
pub struct PageData {
    pub computed: AspectMask,
    pub links: MappingList<Link>,
    pub forms: MappingList<FormField>,
    pub images: MappingList<PageImage>,
    pub annotations: MappingList<Annotation>,
    pub media: MappingList<Media>,
    pub text: String,
    pub text_layout: Vec<Rect>,
    pub text_attrs: Vec<TextAttr>,
}

impl PageData {
    /// Copy the aspects in `mask` that `other` actually computed.
    pub fn merge_from(&mut self, other: &PageData, mask: AspectMask) {
        for bit in (mask & other.computed).iter() {
            match bit {
                AspectMask::LINKS => self.links = other.links.clone(),
                AspectMask::FORMS => self.forms = other.forms.clone(),
                AspectMask::IMAGES => self.images = other.images.clone(),
                AspectMask::ANNOTATIONS => self.annotations = other.annotations.clone(),
                AspectMask::MEDIA => self.media = other.media.clone(),
                AspectMask::TEXT => self.text = other.text.clone(),
                AspectMask::TEXT_LAYOUT => self.text_layout = other.text_layout.clone(),
                AspectMask::TEXT_ATTRS => self.text_attrs = other.text_attrs.clone(),
                _ => continue,
            }
            self.computed |= bit;
        }
    }
}

/// Extracts a set of aspects for one page in a single document-lock pass.
///
/// Aspects land in the output slot one by one, so a reader holding the
/// job handle can see partial results while the job is still running.
/// The cancel flag is checked between aspects; unsupported aspects are
/// skipped without error.
pub struct PageDataJob {
    core: JobCore,
    doc: SharedDocument,
    page: usize,
    aspects: AspectMask,
    out: Mutex<PageData>,
}

impl PageDataJob {
    pub fn new(doc: SharedDocument, page: usize, aspects: AspectMask) -> Arc<Self> {
        Arc::new(Self {
            core: JobCore::new(RunMode::Threaded),
            doc,
            page,
            aspects,
            out: Mutex::new(PageData::default()),
        })
    }

    #[must_use]
    pub fn page(&self) -> usize {
        self.page
    }

    #[must_use]
    pub fn aspects(&self) -> AspectMask {
        self.aspects
    }

    fn lock_out(&self) -> MutexGuard<'_, PageData> {
        self.out.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read the output slot, possibly mid-run. Check `computed` before
    /// trusting any field.
    pub fn with_partial<R>(&self, f: impl FnOnce(&PageData) -> R) -> R {
        f(&self.lock_out())
    }

    #[must_use]
    pub fn snapshot(&self) -> PageData {
        self.lock_out().clone()
    }
}

impl EngineJob for PageDataJob {
    fn core(&self) -> &JobCore {
        &self.core
    }

    fn run(&self, _ctx: &RunContext) -> Result<Progress, JobError> {
        let mut guard = self.doc.lock();
        let doc = guard
            .as_mut()
            .ok_or_else(|| JobError::internal("no document bound"))?;

        for bit in self.aspects.iter() {
            if self.core.is_cancelled() {
                break;
            }
            if !doc.supports(bit) {
                continue;
            }
            // Fetch outside the output lock so mid-run readers never wait
            // on a backend call.
            let mut fetched = PageData::default();
            match bit {
                AspectMask::LINKS => fetched.links = doc.links(self.page)?,
                AspectMask::FORMS => fetched.forms = doc.form_fields(self.page)?,
                AspectMask::IMAGES => fetched.images = doc.images(self.page)?,
                AspectMask::ANNOTATIONS => fetched.annotations = doc.annotations(self.page)?,
                AspectMask::MEDIA => fetched.media = doc.media(self.page)?,
                AspectMask::TEXT => fetched.text = doc.text(self.page)?,
                AspectMask::TEXT_LAYOUT => fetched.text_layout = doc.text_layout(self.page)?,
                AspectMask::TEXT_ATTRS => fetched.text_attrs = doc.text_attrs(self.page)?,
                _ => continue,
            }
            fetched.computed = bit;
            self.lock_out().merge_from(&fetched, bit);
        }
        Ok(Progress::Finished)
    }
}

/// Fetches the document outline (table of contents).
pub struct OutlineJob {
    core: JobCore,
    doc: SharedDocument,
    out: Mutex<Option<Vec<OutlineEntry>>>,
}

impl OutlineJob {
    pub fn new(doc: SharedDocument) -> Arc<Self> {
        Arc::new(Self {
            core: JobCore::new(RunMode::Threaded),
            doc,
            out: Mutex::new(None),
        })
    }

    /// The outline, once the job succeeded.
    #[must_use]
    pub fn take_outline(&self) -> Option<Vec<OutlineEntry>> {
        self.out
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl EngineJob for OutlineJob {
    fn core(&self) -> &JobCore {
        &self.core
    }

    fn run(&self, _ctx: &RunContext) -> Result<Progress, JobError> {
        let outline = self
            .doc
            .with(|doc| doc.outline())
            .ok_or_else(|| JobError::internal("no document bound"))??;
        *self.out.lock().unwrap_or_else(PoisonError::into_inner) = Some(outline);
        Ok(Progress::Finished)
    }
}
